//! Consumer-count analysis.
//!
//! For every node reachable from a function body this counts how many parent
//! edges reference it, and how many of those discard its value. The lowering
//! consumes these counts one edge at a time: a slot can be recycled once the
//! last reader of the value has been lowered.
//!
//! The walk is iterative, so arbitrarily deep trees do not exhaust the
//! native stack here.

use crate::Vec;
use crate::ir::{Edge, ExprId, IrFunction};

/// How a consumer uses a node it visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    /// The consumer reads the node's value.
    Value,
    /// The consumer runs the node for its side effects only.
    Ignore,
}

/// Counting failed: the lowering visited a node more often, or in a
/// different way, than the analysis predicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountMismatch {
    pub expr: ExprId,
    pub usage: Usage,
}

#[derive(Debug, Clone)]
pub struct ConsumerCounts {
    total: Vec<u32>,
    ignored: Vec<u32>,
    demanded: Vec<bool>,
    remaining: Vec<u32>,
    remaining_values: Vec<u32>,
}

impl ConsumerCounts {
    pub fn analyze(function: &IrFunction) -> Self {
        let n = function.len();
        let mut total = alloc::vec![0u32; n];
        let mut ignored = alloc::vec![0u32; n];
        let mut reads_in = alloc::vec![false; n];
        let mut demanded = alloc::vec![false; n];

        let root = function.body;
        total[root.index()] += 1;
        if function.return_type.slot_kind().is_some() && function.expr(root).ty.slot_kind().is_some() {
            reads_in[root.index()] = true;
        } else {
            ignored[root.index()] += 1;
        }

        // Parents before children: every incoming edge of a node has been
        // classified by the time the node itself is processed.
        for id in topological_order(function) {
            let expr = function.expr(id);
            let is_demanded = reads_in[id.index()] && expr.ty.slot_kind().is_some();
            demanded[id.index()] = is_demanded;

            expr.kind.for_each_edge(|child, edge| {
                let reads = match edge {
                    Edge::Effect => false,
                    Edge::Forward => is_demanded,
                    Edge::Operand => true,
                } && function.expr(child).ty.slot_kind().is_some();

                total[child.index()] += 1;
                if reads {
                    reads_in[child.index()] = true;
                } else {
                    ignored[child.index()] += 1;
                }
            });
        }

        let remaining = total.clone();
        let remaining_values = total.iter().zip(&ignored).map(|(t, i)| t - i).collect();
        Self {
            total,
            ignored,
            demanded,
            remaining,
            remaining_values,
        }
    }

    /// Number of consumers of `expr`.
    pub fn total(&self, expr: ExprId) -> u32 {
        self.total[expr.index()]
    }

    /// Number of consumers that discard the value of `expr`.
    pub fn ignored(&self, expr: ExprId) -> u32 {
        self.ignored[expr.index()]
    }

    /// Whether any consumer reads the value of `expr`.
    pub fn is_demanded(&self, expr: ExprId) -> bool {
        self.demanded[expr.index()]
    }

    /// Value reads of `expr` that have not been consumed yet.
    pub fn remaining_values(&self, expr: ExprId) -> u32 {
        self.remaining_values[expr.index()]
    }

    /// Consumes one consumer of `expr` and returns how many remain.
    pub fn dec_and_get(&mut self, expr: ExprId, usage: Usage) -> Result<u32, CountMismatch> {
        let i = expr.index();
        let mismatch = CountMismatch { expr, usage };
        let remaining = self.remaining[i].checked_sub(1).ok_or(mismatch)?;
        if usage == Usage::Value {
            self.remaining_values[i] = self.remaining_values[i].checked_sub(1).ok_or(mismatch)?;
        } else if remaining < self.remaining_values[i] {
            // Every remaining consumer would have to read the value.
            return Err(mismatch);
        }
        self.remaining[i] = remaining;
        Ok(remaining)
    }
}

/// Reverse post-order of the nodes reachable from the body. Nodes on a
/// cycle still appear exactly once.
fn topological_order(function: &IrFunction) -> Vec<ExprId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Open,
        Closed,
    }

    let mut marks = alloc::vec![Mark::New; function.len()];
    let mut post_order = Vec::with_capacity(function.len());
    // (node, children already pushed)
    let mut stack = alloc::vec![(function.body, false)];

    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            marks[id.index()] = Mark::Closed;
            post_order.push(id);
            continue;
        }
        if marks[id.index()] != Mark::New {
            continue;
        }
        marks[id.index()] = Mark::Open;
        stack.push((id, true));

        let mut children = Vec::new();
        function
            .expr(id)
            .kind
            .for_each_edge(|child, _| children.push(child));
        // Reversed so children are expanded in evaluation order.
        for child in children.into_iter().rev() {
            if marks[child.index()] == Mark::New {
                stack.push((child, false));
            }
        }
    }

    post_order.reverse();
    post_order
}
