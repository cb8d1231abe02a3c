//! Lowering errors.

use core::fmt;

use crate::String;
use crate::ir::{BlockId, ExprId, LoopId};
use crate::ir::consumers::CountMismatch;

/// Errors that abort lowering of a function.
///
/// Lowering is all-or-nothing: on error no program is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    /// A node was reached again while it was still being lowered.
    Cycle { expr: ExprId },

    /// The node kind has no lowering (throw, try-catch, new-object, ...).
    Unsupported { expr: ExprId, kind: &'static str },

    /// `exit-block` outside of the block it names.
    UnknownBlock { expr: ExprId, block: BlockId },

    /// `exit-loop` or `continue-loop` outside of the loop it names.
    UnknownLoop { expr: ExprId, lp: LoopId },

    UnresolvedMethod { expr: ExprId, method: String },
    UnresolvedField { expr: ExprId, field: String },
    UnresolvedClass { expr: ExprId, class: String },

    /// An operand's register partition does not match what the node needs.
    TypeMismatch { expr: ExprId, message: String },

    /// A node's value is read on a path that may not have run its code, for
    /// example a node shared by both arms of a conditional. Hoist it above
    /// the branch.
    SharedAcrossBranches { expr: ExprId },

    /// Nesting exceeded `CompileOptions::max_depth`.
    TooDeep { depth: usize, max_depth: usize },

    /// A jump target was never resolved.
    DanglingJump { index: usize },

    /// A reserved instruction slot was never filled.
    UnfilledSlot { index: usize },

    /// Slot or jump bookkeeping broke an invariant. Always a lowering bug.
    Internal { message: String },
}

impl BuildError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        BuildError::Internal {
            message: message.into(),
        }
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Cycle { expr } => write!(f, "Cycle found in IR at {}", expr),
            BuildError::Unsupported { expr, kind } => {
                write!(f, "Lowering of {} ({}) is not supported", kind, expr)
            }
            BuildError::UnknownBlock { expr, block } => {
                write!(f, "{} exits block {} which is not open", expr, block)
            }
            BuildError::UnknownLoop { expr, lp } => {
                write!(f, "{} refers to loop {} which is not open", expr, lp)
            }
            BuildError::UnresolvedMethod { expr, method } => {
                write!(f, "Unknown native function {} at {}", method, expr)
            }
            BuildError::UnresolvedField { expr, field } => {
                write!(f, "Unknown field {} at {}", field, expr)
            }
            BuildError::UnresolvedClass { expr, class } => {
                write!(f, "Unknown class {} at {}", class, expr)
            }
            BuildError::TypeMismatch { expr, message } => {
                write!(f, "Type mismatch at {}: {}", expr, message)
            }
            BuildError::SharedAcrossBranches { expr } => write!(
                f,
                "{} is read outside the branch it was computed in",
                expr
            ),
            BuildError::TooDeep { depth, max_depth } => write!(
                f,
                "IR nesting depth {} exceeds maximum of {}",
                depth, max_depth
            ),
            BuildError::DanglingJump { index } => {
                write!(f, "Jump at @{} was never resolved", index)
            }
            BuildError::UnfilledSlot { index } => {
                write!(f, "Reserved instruction at @{} was never filled", index)
            }
            BuildError::Internal { message } => write!(f, "Internal lowering error: {}", message),
        }
    }
}

impl core::error::Error for BuildError {}

impl From<CountMismatch> for BuildError {
    fn from(err: CountMismatch) -> Self {
        BuildError::internal(crate::format!(
            "consumer count mismatch for {} ({:?})",
            err.expr, err.usage
        ))
    }
}
