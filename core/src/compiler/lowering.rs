//! Lowering of a tree IR function into register bytecode.
//!
//! The lowering walks the tree once, depth first, threading three pieces of
//! state through every call:
//!
//! - a **usage**: whether the caller reads the node's value or only runs it
//!   for effects. Each visit consumes one consumer from [`ConsumerCounts`],
//!   which fails loudly if the walk and the analysis ever disagree.
//! - a **hint**: a slot the caller would like the value in. It is taken only
//!   by nodes with a single consumer, so a shared value never lands in a
//!   register that someone else overwrites.
//! - a **suggested jump**: the pending tail of a condition. An exit or a
//!   continue that is the very next thing emitted adopts it instead of
//!   emitting its own `goto`. It only travels through `Sequence.second`.
//!
//! Slots are reference counted per node: every reader `alloc`s before
//! visiting and `release`s once the value was used. A pooled slot goes back
//! to the pool when no reader is pending and no value read remains.
//!
//! A shared node is lowered where it is first reached. Its value only exists
//! on paths through the region (branch arm, block or loop body, right operand
//! of `&&`/`||`) that ran its code, so a read from outside that region fails
//! with [`BuildError::SharedAcrossBranches`].

use alloc::rc::Rc;

use hashbrown::{HashMap, HashSet};
use tracing::{debug, trace};

use crate::api::CompileOptions;
use crate::compiler::BuildError;
use crate::compiler::jumps::{Jumps, PatchList, patch_all};
use crate::compiler::pool::SlotPool;
use crate::compiler::program::{JumpPatch, ProgramBuffer};
use crate::ir::{
    BinaryOp, BlockId, CallType, ConsumerCounts, ExprId, ExprKind, FieldRef, IrFunction, IrType,
    LoopId, MethodRef, NullaryOp, UnaryOp, Usage,
};
use crate::vm::{
    CallSite, CmpOp, Conversion, Environment, FloatOp, Instruction, IntOp, Label, Program, Slot,
    SlotKind, TypedSlot,
};
use crate::{Box, ToString, Vec, format};

/// Lowers `function` into a [`Program`], resolving every name it refers to
/// against `env`.
///
/// # Example
///
/// ```
/// use tarn_core::api::CompileOptions;
/// use tarn_core::compiler::compile;
/// use tarn_core::ir::{BinaryOp, FunctionBuilder, IrType};
/// use tarn_core::vm::{Environment, Interpreter, Value};
///
/// let mut b = FunctionBuilder::new(IrType::Int);
/// let x = b.param(IrType::Int);
/// let x = b.get_param(x);
/// let two = b.int(2);
/// let body = b.binary(BinaryOp::IMul, x, two);
/// let function = b.finish(body);
///
/// let env = Environment::new();
/// let program = compile(&function, &env, CompileOptions::default()).unwrap();
/// let mut vm = Interpreter::new(&program, &env);
/// assert_eq!(vm.call(&[Value::Int(21)]).unwrap(), Some(Value::Int(42)));
/// ```
pub fn compile(
    function: &IrFunction,
    env: &Environment,
    options: CompileOptions,
) -> Result<Program, BuildError> {
    Lowering::new(function, env, options).lower()
}

#[derive(Debug, Clone, Copy)]
enum ExprState {
    /// On the current lowering path. Reaching it again means a cycle.
    InProgress,
    /// Lowered. `slot` is cleared once the slot went back to the pool.
    /// `region` is where the node's code runs; its value is only written
    /// on paths through that region.
    Built {
        slot: Option<TypedSlot>,
        region: Region,
    },
}

/// A stretch of code that runs conditionally: a branch arm, the right
/// operand of `&&`/`||`, a block or loop body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Region(u32);

/// A condition tail waiting at `at` that an exit may take over.
struct Suggestion {
    at: Label,
    jumps: Jumps,
    /// Branch when the condition equals this.
    polarity: bool,
}

struct BlockFrame {
    block: BlockId,
    breaks: PatchList,
}

struct LoopFrame {
    lp: LoopId,
    header: Label,
    breaks: PatchList,
}

struct Lowering<'f, 'e> {
    function: &'f IrFunction,
    env: &'e Environment,
    options: CompileOptions,

    consumers: ConsumerCounts,
    pool: SlotPool,
    buffer: ProgramBuffer,

    states: HashMap<ExprId, ExprState>,
    /// Readers that allocated a node's value and have not released it yet.
    pending: HashMap<ExprId, u32>,
    /// Nodes whose slot belongs to someone else (a hint, a parameter, a
    /// variable). Releasing them never frees anything.
    borrowed: HashSet<ExprId>,

    param_slots: Vec<TypedSlot>,
    var_slots: Vec<TypedSlot>,

    blocks: Vec<BlockFrame>,
    loops: Vec<LoopFrame>,
    /// Open regions, outermost first. Ids only grow, so the stack is sorted.
    regions: Vec<Region>,
    next_region: u32,

    strings: Vec<Rc<str>>,
    string_index: HashMap<Rc<str>, u32>,
    call_sites: Vec<CallSite>,

    depth: usize,
}

impl<'f, 'e> Lowering<'f, 'e> {
    fn new(function: &'f IrFunction, env: &'e Environment, options: CompileOptions) -> Self {
        Self {
            function,
            env,
            options,
            consumers: ConsumerCounts::analyze(function),
            pool: SlotPool::new(),
            buffer: ProgramBuffer::new(),
            states: HashMap::new(),
            pending: HashMap::new(),
            borrowed: HashSet::new(),
            param_slots: Vec::new(),
            var_slots: Vec::new(),
            blocks: Vec::new(),
            loops: Vec::new(),
            regions: alloc::vec![Region(0)],
            next_region: 1,
            strings: Vec::new(),
            string_index: HashMap::new(),
            call_sites: Vec::new(),
            depth: 0,
        }
    }

    fn lower(mut self) -> Result<Program, BuildError> {
        let function = self.function;
        let body = function.body();

        // Fixed slots first, parameters before locals, in declaration order.
        for (i, ty) in function.params().iter().enumerate() {
            let kind = ty.slot_kind().ok_or_else(|| BuildError::TypeMismatch {
                expr: body,
                message: format!("parameter {} has no value type ({:?})", i, ty),
            })?;
            self.param_slots.push(TypedSlot::new(kind, self.pool.reserve(kind)));
        }
        for (i, ty) in function.locals().iter().enumerate() {
            let kind = ty.slot_kind().ok_or_else(|| BuildError::TypeMismatch {
                expr: body,
                message: format!("local {} has no value type ({:?})", i, ty),
            })?;
            self.var_slots.push(TypedSlot::new(kind, self.pool.reserve(kind)));
        }

        let body_type = function.expr(body).ty;
        let usage = match (function.return_type().slot_kind(), body_type.slot_kind()) {
            (Some(expected), Some(found)) if expected == found => Usage::Value,
            (None, _) => Usage::Ignore,
            (Some(_), None) if body_type == IrType::Unreachable => Usage::Ignore,
            _ => {
                return Err(BuildError::TypeMismatch {
                    expr: body,
                    message: format!(
                        "function returns {:?} but its body is {:?}",
                        function.return_type(),
                        body_type
                    ),
                });
            }
        };

        let slot = self.build(body, usage, None, &mut None)?;

        // The result binding never aliases a parameter or a variable.
        let result = match slot {
            Some(slot) if self.is_fixed(slot) => {
                let result = TypedSlot::new(slot.kind, self.pool.acquire(slot.kind));
                self.buffer.add(Instruction::Move {
                    kind: slot.kind,
                    r: result.slot,
                    a: slot.slot,
                });
                Some(result)
            }
            other => other,
        };
        self.buffer.add(Instruction::Stop);

        let live = self.pool.live_count();
        if live != result.map_or(0, |_| 1) {
            return Err(BuildError::internal(format!(
                "{} slots still live after lowering",
                live
            )));
        }

        let instructions = self.buffer.finish()?;
        let counts = self.pool.counts();
        debug!(
            instructions = instructions.len(),
            int = counts.int,
            long = counts.long,
            float = counts.float,
            double = counts.double,
            object = counts.object,
            "Lowered function"
        );

        Ok(Program {
            instructions,
            counts,
            strings: self.strings,
            call_sites: self.call_sites,
            params: self.param_slots,
            variables: self.var_slots,
            result,
        })
    }

    // === Node bookkeeping ===

    /// Lowers `id` once; later visits return the cached slot.
    fn build(
        &mut self,
        id: ExprId,
        usage: Usage,
        hint: Option<TypedSlot>,
        suggestion: &mut Option<Suggestion>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let slot = match self.states.get(&id) {
            Some(ExprState::InProgress) => return Err(BuildError::Cycle { expr: id }),
            Some(&ExprState::Built { slot, region }) => {
                if usage == Usage::Value && self.regions.binary_search(&region).is_err() {
                    return Err(BuildError::SharedAcrossBranches { expr: id });
                }
                self.consumers.dec_and_get(id, usage)?;
                slot
            }
            None => {
                self.consumers.dec_and_get(id, usage)?;
                self.enter(id)?;
                let slot = self.visit(id, hint, suggestion)?;
                self.leave(id, slot);
                slot
            }
        };

        if usage == Usage::Value && slot.is_none() {
            return Err(BuildError::internal(format!("{} has no value slot", id)));
        }
        Ok(slot)
    }

    fn enter(&mut self, id: ExprId) -> Result<(), BuildError> {
        self.depth += 1;
        if self.depth > self.options.max_depth {
            return Err(BuildError::TooDeep {
                depth: self.depth,
                max_depth: self.options.max_depth,
            });
        }
        self.states.insert(id, ExprState::InProgress);
        trace!(expr = %id, kind = self.function.expr(id).kind.name(), depth = self.depth, "enter");
        Ok(())
    }

    fn leave(&mut self, id: ExprId, slot: Option<TypedSlot>) {
        // Parameters and variables read their fixed slot, valid everywhere.
        let region = match self.function.expr(id).kind {
            ExprKind::Parameter(_) | ExprKind::Variable(_) => Region(0),
            _ => self.current_region(),
        };
        self.states.insert(id, ExprState::Built { slot, region });
        self.depth -= 1;
    }

    fn current_region(&self) -> Region {
        self.regions.last().copied().unwrap_or(Region(0))
    }

    fn open_region(&mut self) -> Region {
        let region = Region(self.next_region);
        self.next_region += 1;
        self.regions.push(region);
        region
    }

    fn close_region(&mut self, region: Region) -> Result<(), BuildError> {
        match self.regions.pop() {
            Some(open) if open == region => Ok(()),
            _ => Err(BuildError::internal("region stack out of order")),
        }
    }

    fn alloc(&mut self, id: ExprId) {
        *self.pending.entry(id).or_default() += 1;
    }

    fn release(&mut self, id: ExprId) -> Result<(), BuildError> {
        let pending = self
            .pending
            .get_mut(&id)
            .and_then(|pending| {
                *pending = pending.checked_sub(1)?;
                Some(*pending)
            })
            .ok_or_else(|| BuildError::internal(format!("{} released more often than allocated", id)))?;

        if pending > 0 || self.consumers.remaining_values(id) > 0 || self.borrowed.contains(&id) {
            return Ok(());
        }
        if let Some(ExprState::Built { slot, .. }) = self.states.get_mut(&id) {
            if let Some(slot) = slot.take() {
                self.pool.release(slot.kind, slot.slot)?;
            }
        }
        Ok(())
    }

    /// Lowers `id` for its value. The caller must [`release`](Self::release)
    /// it after the last instruction reading the slot.
    fn operand(&mut self, id: ExprId) -> Result<TypedSlot, BuildError> {
        self.alloc(id);
        self.build(id, Usage::Value, None, &mut None)?
            .ok_or_else(|| BuildError::internal(format!("{} has no value slot", id)))
    }

    /// Lowers `id` so that its value ends up in `target`.
    fn build_to(
        &mut self,
        id: ExprId,
        target: TypedSlot,
        suggestion: &mut Option<Suggestion>,
    ) -> Result<(), BuildError> {
        let Some(kind) = self.kind_of(id) else {
            self.build(id, Usage::Ignore, None, suggestion)?;
            return Ok(());
        };
        if kind != target.kind {
            return Err(BuildError::TypeMismatch {
                expr: id,
                message: format!("{:?} value stored into a {:?} slot", kind, target.kind),
            });
        }

        self.alloc(id);
        let slot = self
            .build(id, Usage::Value, Some(target), suggestion)?
            .ok_or_else(|| BuildError::internal(format!("{} has no value slot", id)))?;
        if slot != target {
            self.buffer.add(Instruction::Move {
                kind,
                r: target.slot,
                a: slot.slot,
            });
        }
        self.release(id)
    }

    /// Lowers a `Forward` child: into `target` when the parent's value is
    /// read, for effects otherwise.
    fn branch(
        &mut self,
        id: ExprId,
        target: Option<TypedSlot>,
        suggestion: &mut Option<Suggestion>,
    ) -> Result<(), BuildError> {
        match target {
            Some(target) if self.kind_of(id).is_some() => self.build_to(id, target, suggestion),
            _ => self.build(id, Usage::Ignore, None, suggestion).map(drop),
        }
    }

    fn result_slot(&mut self, id: ExprId, hint: Option<TypedSlot>) -> Result<TypedSlot, BuildError> {
        let kind = self
            .kind_of(id)
            .ok_or_else(|| BuildError::internal(format!("{} has no value type", id)))?;
        if let Some(hint) = hint {
            if hint.kind == kind && self.consumers.total(id) == 1 {
                self.borrowed.insert(id);
                return Ok(hint);
            }
        }
        Ok(TypedSlot::new(kind, self.pool.acquire(kind)))
    }

    fn kind_of(&self, id: ExprId) -> Option<SlotKind> {
        self.function.expr(id).ty.slot_kind()
    }

    fn is_fixed(&self, slot: TypedSlot) -> bool {
        self.param_slots.contains(&slot) || self.var_slots.contains(&slot)
    }

    fn expect_type(&self, id: ExprId, expected: IrType) -> Result<(), BuildError> {
        let found = self.function.expr(id).ty;
        if found.slot_kind() != expected.slot_kind() {
            return Err(BuildError::TypeMismatch {
                expr: id,
                message: format!("expected {:?}, found {:?}", expected, found),
            });
        }
        Ok(())
    }

    fn intern(&mut self, s: &Rc<str>) -> u32 {
        if let Some(index) = self.string_index.get(s) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(s.clone());
        self.string_index.insert(s.clone(), index);
        index
    }

    // === Conditions ===

    /// Lowers a boolean node for branching.
    ///
    /// `&&`, `||` and `!` with a single consumer compose their operands'
    /// continuations and never materialize a value. Anything else is
    /// computed into a slot and branched on.
    fn condition(&mut self, id: ExprId) -> Result<Jumps, BuildError> {
        self.expect_type(id, IrType::Boolean)?;
        let function = self.function;
        let kind = &function.expr(id).kind;
        let composable = self.consumers.total(id) == 1
            && !self.states.contains_key(&id)
            && matches!(
                kind,
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    ..
                } | ExprKind::Binary {
                    op: BinaryOp::LogicalAnd | BinaryOp::LogicalOr,
                    ..
                }
            );

        if composable {
            self.consumers.dec_and_get(id, Usage::Value)?;
            self.enter(id)?;
            let jumps = self.compose(id, kind)?;
            self.leave(id, None);
            return Ok(jumps);
        }

        let slot = self.operand(id)?;
        let jumps = Jumps::on_slot(&mut self.buffer, slot.slot);
        self.release(id)?;
        Ok(jumps)
    }

    #[inline(never)]
    fn compose(&mut self, id: ExprId, kind: &ExprKind) -> Result<Jumps, BuildError> {
        match *kind {
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => Ok(self.condition(operand)?.negate()),
            ExprKind::Binary {
                op: BinaryOp::LogicalAnd,
                first,
                second,
            } => {
                let first = self.condition(first)?;
                let bail = first.defer(false, &mut self.buffer)?;
                let mut second = self.short_circuited(second)?;
                second.add_sites(false, bail);
                Ok(second)
            }
            ExprKind::Binary {
                op: BinaryOp::LogicalOr,
                first,
                second,
            } => {
                let first = self.condition(first)?;
                let done = first.defer(true, &mut self.buffer)?;
                let mut second = self.short_circuited(second)?;
                second.add_sites(true, done);
                Ok(second)
            }
            _ => Err(BuildError::internal(format!("{} is not a logical operator", id))),
        }
    }

    /// The right operand of `&&`/`||`, which only runs on one path.
    fn short_circuited(&mut self, id: ExprId) -> Result<Jumps, BuildError> {
        let region = self.open_region();
        let jumps = self.condition(id)?;
        self.close_region(region)?;
        Ok(jumps)
    }

    // === Visitor ===

    // Every IR level recurses through `build` and `visit`, so both stay
    // small. Node bodies live in their own never-inlined functions.
    #[inline(never)]
    fn visit(
        &mut self,
        id: ExprId,
        hint: Option<TypedSlot>,
        suggestion: &mut Option<Suggestion>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let function = self.function;
        let demanded = self.consumers.is_demanded(id);

        match &function.expr(id).kind {
            // --- Control ---
            ExprKind::Sequence { first, second } => {
                self.sequence(id, *first, *second, demanded, hint, suggestion)
            }
            ExprKind::Block { block, body } => self.block(id, *block, *body, demanded, hint),
            ExprKind::ExitBlock { block } => self.exit_block(id, *block, suggestion),
            ExprKind::Loop {
                lp,
                preheader,
                body,
            } => self.loop_(*lp, *preheader, *body),
            ExprKind::ExitLoop { lp } => self.exit_loop(id, *lp, suggestion),
            ExprKind::ContinueLoop { lp } => self.continue_loop(id, *lp, suggestion),
            ExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                let target = self.demanded_slot(id, demanded, hint)?;
                self.conditional(*condition, *then_expr, *else_expr, target)?;
                Ok(target)
            }

            // --- Operators ---
            ExprKind::Nullary(op) => self.nullary(id, *op, demanded, hint),
            ExprKind::Unary { op, operand } => self.unary(id, *op, *operand, demanded, hint),
            ExprKind::Binary { op, .. } if op.is_logical() => self.logical_value(id, demanded, hint),
            ExprKind::Binary { op, first, second } => {
                self.binary(id, *op, *first, *second, demanded, hint)
            }

            // --- Constants ---
            ExprKind::IntConstant(value) => {
                let value = *value;
                self.constant(id, demanded, hint, |r| Instruction::IConst { r, value })
            }
            ExprKind::LongConstant(value) => {
                let value = *value;
                self.constant(id, demanded, hint, |r| Instruction::LConst { r, value })
            }
            ExprKind::FloatConstant(value) => {
                let value = *value;
                self.constant(id, demanded, hint, |r| Instruction::FConst { r, value })
            }
            ExprKind::DoubleConstant(value) => {
                let value = *value;
                self.constant(id, demanded, hint, |r| Instruction::DConst { r, value })
            }
            ExprKind::StringConstant(value) => self.string_constant(id, value, demanded, hint),

            // --- Data ---
            ExprKind::Parameter(param) => {
                let slot = *self.param_slots.get(param.index()).ok_or_else(|| {
                    BuildError::internal(format!("{} refers to unknown parameter {}", id, param))
                })?;
                self.borrowed.insert(id);
                Ok(demanded.then_some(slot))
            }
            ExprKind::Variable(var) => {
                let slot = self.var_slot(id, var.index())?;
                self.borrowed.insert(id);
                Ok(demanded.then_some(slot))
            }
            ExprKind::SetVariable { var, value } => {
                let slot = self.var_slot(id, var.index())?;
                self.build_to(*value, slot, &mut None)?;
                Ok(None)
            }
            ExprKind::GetField { field, object } => {
                self.get_field(id, field, *object, demanded, hint)
            }
            ExprKind::GetStaticField { field } => self.get_static_field(id, field, demanded, hint),
            ExprKind::Call {
                method,
                call_type,
                args,
            } => self.call(id, method, *call_type, args, demanded, hint),
            ExprKind::ArrayElement { array, index } => {
                self.array_element(id, *array, *index, demanded, hint)
            }
            ExprKind::SetArrayElement {
                array,
                index,
                value,
            } => self.set_array_element(*array, *index, *value),
            ExprKind::Cast { value, class } => {
                self.class_test(id, *value, class, true, demanded, hint)
            }
            ExprKind::InstanceOf { value, class } => {
                self.class_test(id, *value, class, false, demanded, hint)
            }
            ExprKind::BoundsCheck {
                index,
                array,
                lower,
            } => self.bounds_check(id, *index, *array, *lower, demanded, hint),

            kind @ (ExprKind::SetField { .. }
            | ExprKind::SetStaticField { .. }
            | ExprKind::Throw { .. }
            | ExprKind::TryCatch { .. }
            | ExprKind::CaughtValue
            | ExprKind::CaughtException
            | ExprKind::NewObject { .. }
            | ExprKind::NewArray { .. }
            | ExprKind::Tuple { .. }
            | ExprKind::TupleComponent { .. }) => Err(BuildError::Unsupported {
                expr: id,
                kind: kind.name(),
            }),
        }
    }

    // === Control ===

    #[inline(never)]
    fn sequence(
        &mut self,
        id: ExprId,
        first: ExprId,
        second: ExprId,
        demanded: bool,
        hint: Option<TypedSlot>,
        suggestion: &mut Option<Suggestion>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        self.build(first, Usage::Ignore, None, &mut None)?;
        let target = self.demanded_slot(id, demanded, hint)?;
        self.branch(second, target, suggestion)?;
        Ok(target)
    }

    #[inline(never)]
    fn block(
        &mut self,
        id: ExprId,
        block: BlockId,
        body: ExprId,
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let target = self.demanded_slot(id, demanded, hint)?;
        self.blocks.push(BlockFrame {
            block,
            breaks: PatchList::new(),
        });
        // An exit may leave the body before any given node in it ran.
        let region = self.open_region();
        self.branch(body, target, &mut None)?;
        self.close_region(region)?;
        let frame = self
            .blocks
            .pop()
            .ok_or_else(|| BuildError::internal("block stack underflow"))?;
        let end = self.buffer.label();
        patch_all(&mut self.buffer, frame.breaks, end)?;
        Ok(target)
    }

    #[inline(never)]
    fn exit_block(
        &mut self,
        id: ExprId,
        block: BlockId,
        suggestion: &mut Option<Suggestion>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let Some(frame) = self.blocks.iter().rposition(|frame| frame.block == block) else {
            return Err(BuildError::UnknownBlock { expr: id, block });
        };
        let sites = self.exit_sites(suggestion)?;
        self.blocks[frame].breaks.extend(sites);
        Ok(None)
    }

    #[inline(never)]
    fn loop_(
        &mut self,
        lp: LoopId,
        preheader: ExprId,
        body: ExprId,
    ) -> Result<Option<TypedSlot>, BuildError> {
        self.build(preheader, Usage::Ignore, None, &mut None)?;
        let header = self.buffer.label();
        self.loops.push(LoopFrame {
            lp,
            header,
            breaks: PatchList::new(),
        });
        let region = self.open_region();
        self.build(body, Usage::Ignore, None, &mut None)?;
        self.close_region(region)?;
        if self.function.expr(body).ty != IrType::Unreachable {
            self.buffer.add(Instruction::Goto { target: header });
        }
        let frame = self
            .loops
            .pop()
            .ok_or_else(|| BuildError::internal("loop stack underflow"))?;
        let end = self.buffer.label();
        patch_all(&mut self.buffer, frame.breaks, end)?;
        Ok(None)
    }

    #[inline(never)]
    fn exit_loop(
        &mut self,
        id: ExprId,
        lp: LoopId,
        suggestion: &mut Option<Suggestion>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let frame = self.find_loop(id, lp)?;
        let sites = self.exit_sites(suggestion)?;
        self.loops[frame].breaks.extend(sites);
        Ok(None)
    }

    #[inline(never)]
    fn continue_loop(
        &mut self,
        id: ExprId,
        lp: LoopId,
        suggestion: &mut Option<Suggestion>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let frame = self.find_loop(id, lp)?;
        let header = self.loops[frame].header;
        let here = self.buffer.label();
        match suggestion.take_if(|s| s.at == here) {
            Some(s) => s.jumps.resolve(s.polarity, header, &mut self.buffer)?,
            None => self.buffer.add(Instruction::Goto { target: header }),
        }
        Ok(None)
    }

    /// Jump sites of an exit: the suggested condition tail when it sits
    /// right here, a fresh `goto` otherwise.
    fn exit_sites(&mut self, suggestion: &mut Option<Suggestion>) -> Result<PatchList, BuildError> {
        let here = self.buffer.label();
        match suggestion.take_if(|s| s.at == here) {
            Some(s) => s.jumps.defer(s.polarity, &mut self.buffer),
            None => Ok(PatchList::from_elem(self.goto_pending()?, 1)),
        }
    }

    // === Operators ===

    #[inline(never)]
    fn nullary(
        &mut self,
        id: ExprId,
        op: NullaryOp,
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        match op {
            NullaryOp::Void => Ok(None),
            NullaryOp::Null => {
                let Some(r) = self.demanded_slot(id, demanded, hint)? else {
                    return Ok(None);
                };
                self.buffer.add(Instruction::Null { r: r.slot });
                Ok(Some(r))
            }
            NullaryOp::Unreachable => {
                self.buffer.add(Instruction::Unreachable);
                Ok(None)
            }
        }
    }

    /// `&&` and `||` read as a value: `1` on the true path, `0` on the
    /// false one.
    #[inline(never)]
    fn logical_value(
        &mut self,
        id: ExprId,
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let function = self.function;
        let jumps = self.compose(id, &function.expr(id).kind)?;
        if !demanded {
            let here = self.buffer.label();
            jumps.resolve(true, here, &mut self.buffer)?;
            return Ok(None);
        }
        let falsy = jumps.defer(false, &mut self.buffer)?;
        let r = self.result_slot(id, hint)?;
        self.buffer.add(Instruction::IConst {
            r: r.slot,
            value: 1,
        });
        let skip = self.goto_pending()?;
        let here = self.buffer.label();
        patch_all(&mut self.buffer, falsy, here)?;
        self.buffer.add(Instruction::IConst {
            r: r.slot,
            value: 0,
        });
        let end = self.buffer.label();
        self.buffer.patch(skip, end)?;
        Ok(Some(r))
    }

    #[inline(never)]
    fn string_constant(
        &mut self,
        id: ExprId,
        value: &Rc<str>,
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        if !demanded {
            return Ok(None);
        }
        let index = self.intern(value);
        self.constant(id, demanded, hint, |r| Instruction::SConst { r, index })
    }

    // === Data ===

    #[inline(never)]
    fn get_field(
        &mut self,
        id: ExprId,
        field: &FieldRef,
        object: ExprId,
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let (index, ty) = self
            .env
            .resolve_field(&field.owner, &field.name)
            .ok_or_else(|| BuildError::UnresolvedField {
                expr: id,
                field: field.to_string(),
            })?;
        check_field_type(id, field, ty)?;
        self.expect_type(object, IrType::Object)?;
        if !demanded {
            self.build(object, Usage::Ignore, None, &mut None)?;
            return Ok(None);
        }
        let object_slot = self.operand(object)?;
        self.release(object)?;
        let r = self.result_slot(id, hint)?;
        self.buffer.add(Instruction::GetField {
            kind: r.kind,
            r: r.slot,
            object: object_slot.slot,
            field: index,
        });
        Ok(Some(r))
    }

    #[inline(never)]
    fn get_static_field(
        &mut self,
        id: ExprId,
        field: &FieldRef,
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let (static_id, ty) = self
            .env
            .resolve_static_field(&field.owner, &field.name)
            .ok_or_else(|| BuildError::UnresolvedField {
                expr: id,
                field: field.to_string(),
            })?;
        check_field_type(id, field, ty)?;
        let Some(r) = self.demanded_slot(id, demanded, hint)? else {
            return Ok(None);
        };
        self.buffer.add(Instruction::GetStatic {
            kind: r.kind,
            r: r.slot,
            field: static_id,
        });
        Ok(Some(r))
    }

    #[inline(never)]
    fn array_element(
        &mut self,
        id: ExprId,
        array: ExprId,
        index: ExprId,
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        self.expect_type(array, IrType::Object)?;
        self.expect_type(index, IrType::Int)?;
        if !demanded {
            self.build(array, Usage::Ignore, None, &mut None)?;
            self.build(index, Usage::Ignore, None, &mut None)?;
            return Ok(None);
        }
        let array_slot = self.operand(array)?;
        let index_slot = self.operand(index)?;
        self.release(index)?;
        self.release(array)?;
        let r = self.result_slot(id, hint)?;
        self.buffer.add(Instruction::ArrayGet {
            kind: r.kind,
            r: r.slot,
            array: array_slot.slot,
            index: index_slot.slot,
        });
        Ok(Some(r))
    }

    #[inline(never)]
    fn set_array_element(
        &mut self,
        array: ExprId,
        index: ExprId,
        value: ExprId,
    ) -> Result<Option<TypedSlot>, BuildError> {
        self.expect_type(array, IrType::Object)?;
        self.expect_type(index, IrType::Int)?;
        let array_slot = self.operand(array)?;
        let index_slot = self.operand(index)?;
        let value_slot = self.operand(value)?;
        self.release(value)?;
        self.release(index)?;
        self.release(array)?;
        self.buffer.add(Instruction::ArraySet {
            kind: value_slot.kind,
            array: array_slot.slot,
            index: index_slot.slot,
            value: value_slot.slot,
        });
        Ok(None)
    }

    /// `cast` when `is_cast`, `instanceof` otherwise.
    #[inline(never)]
    fn class_test(
        &mut self,
        id: ExprId,
        value: ExprId,
        class: &str,
        is_cast: bool,
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let class_id = self.env.class_id(class).ok_or_else(|| BuildError::UnresolvedClass {
            expr: id,
            class: class.to_string(),
        })?;
        self.expect_type(value, IrType::Object)?;
        if !demanded {
            self.build(value, Usage::Ignore, None, &mut None)?;
            return Ok(None);
        }
        let a = self.operand(value)?;
        self.release(value)?;
        let r = self.result_slot(id, hint)?;
        let instruction = if is_cast {
            Instruction::Cast {
                r: r.slot,
                a: a.slot,
                class: class_id,
            }
        } else {
            Instruction::InstanceOf {
                r: r.slot,
                a: a.slot,
                class: class_id,
            }
        };
        self.buffer.add(instruction);
        Ok(Some(r))
    }

    #[inline(never)]
    fn bounds_check(
        &mut self,
        id: ExprId,
        index: ExprId,
        array: Option<ExprId>,
        lower: bool,
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        self.expect_type(index, IrType::Int)?;
        let index_slot = self.operand(index)?;
        let array_slot = match array {
            Some(array) => {
                self.expect_type(array, IrType::Object)?;
                Some(self.operand(array)?)
            }
            None => None,
        };
        if lower {
            self.buffer.add(Instruction::LowerBoundCheck {
                index: index_slot.slot,
            });
        }
        if let (Some(array), Some(array_slot)) = (array, array_slot) {
            self.buffer.add(Instruction::UpperBoundCheck {
                index: index_slot.slot,
                array: array_slot.slot,
            });
            self.release(array)?;
        }
        self.release(index)?;
        // Most often the index slot was just freed and comes back.
        let Some(r) = self.demanded_slot(id, demanded, hint)? else {
            return Ok(None);
        };
        if r != index_slot {
            self.buffer.add(Instruction::Move {
                kind: SlotKind::Int,
                r: r.slot,
                a: index_slot.slot,
            });
        }
        Ok(Some(r))
    }

    // === Helpers ===

    fn demanded_slot(
        &mut self,
        id: ExprId,
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        if demanded {
            self.result_slot(id, hint).map(Some)
        } else {
            Ok(None)
        }
    }

    fn goto_pending(&mut self) -> Result<JumpPatch, BuildError> {
        self.buffer.add_jump(Instruction::Goto {
            target: Label::PENDING,
        })
    }

    fn find_loop(&self, id: ExprId, lp: LoopId) -> Result<usize, BuildError> {
        self.loops
            .iter()
            .rposition(|frame| frame.lp == lp)
            .ok_or(BuildError::UnknownLoop { expr: id, lp })
    }

    fn var_slot(&self, id: ExprId, index: usize) -> Result<TypedSlot, BuildError> {
        self.var_slots.get(index).copied().ok_or_else(|| {
            BuildError::internal(format!("{} refers to unknown variable v{}", id, index))
        })
    }

    fn constant(
        &mut self,
        id: ExprId,
        demanded: bool,
        hint: Option<TypedSlot>,
        make: impl FnOnce(Slot) -> Instruction,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let Some(r) = self.demanded_slot(id, demanded, hint)? else {
            return Ok(None);
        };
        self.buffer.add(make(r.slot));
        Ok(Some(r))
    }

    /// One arm of a conditional, lowered in its own region.
    fn arm(
        &mut self,
        id: ExprId,
        target: Option<TypedSlot>,
        suggestion: &mut Option<Suggestion>,
    ) -> Result<(), BuildError> {
        let region = self.open_region();
        self.branch(id, target, suggestion)?;
        self.close_region(region)
    }

    #[inline(never)]
    fn conditional(
        &mut self,
        condition: ExprId,
        then_expr: ExprId,
        else_expr: ExprId,
        target: Option<TypedSlot>,
    ) -> Result<(), BuildError> {
        let jumps = self.condition(condition)?;
        let then_label = self.buffer.label();

        let mut suggestion = Some(Suggestion {
            at: then_label,
            jumps,
            polarity: true,
        });
        self.arm(then_expr, target, &mut suggestion)?;

        let Some(Suggestion { jumps, .. }) = suggestion else {
            // The then-branch left through the condition's own jump; false
            // falls straight into the else-branch.
            return self.arm(else_expr, target, &mut None);
        };

        if self.buffer.label() == then_label {
            // Empty then-branch: branch over the else-branch when true.
            let mut suggestion = Some(Suggestion {
                at: then_label,
                jumps,
                polarity: false,
            });
            self.arm(else_expr, target, &mut suggestion)?;
            if let Some(Suggestion { jumps, .. }) = suggestion {
                let end = self.buffer.label();
                jumps.resolve(true, end, &mut self.buffer)?;
            }
            return Ok(());
        }

        let skip_else = if self.function.expr(then_expr).ty != IrType::Unreachable {
            Some(self.goto_pending()?)
        } else {
            None
        };
        let else_label = self.buffer.label();
        jumps.resolve(false, else_label, &mut self.buffer)?;
        self.arm(else_expr, target, &mut None)?;
        if let Some(skip_else) = skip_else {
            let end = self.buffer.label();
            self.buffer.patch(skip_else, end)?;
        }
        Ok(())
    }

    #[inline(never)]
    fn unary(
        &mut self,
        id: ExprId,
        op: UnaryOp,
        operand: ExprId,
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let (operand_type, _) = op.signature();
        self.expect_type(operand, operand_type)?;

        if op == UnaryOp::NullCheck {
            // Always checked, even when nobody reads the result.
            let a = self.operand(operand)?;
            self.release(operand)?;
            let r = self.demanded_slot(id, demanded, hint)?;
            self.buffer.add(Instruction::NullCheck {
                r: r.unwrap_or(a).slot,
                a: a.slot,
            });
            return Ok(r);
        }

        if !demanded {
            self.build(operand, Usage::Ignore, None, &mut None)?;
            return Ok(None);
        }
        let a = self.operand(operand)?;
        self.release(operand)?;
        let r = self.result_slot(id, hint)?;
        self.buffer.add(unary_instruction(op, r.slot, a.slot)?);
        Ok(Some(r))
    }

    #[inline(never)]
    fn binary(
        &mut self,
        id: ExprId,
        op: BinaryOp,
        first: ExprId,
        second: ExprId,
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let (first_type, second_type, _) = op.signature();
        self.expect_type(first, first_type)?;
        self.expect_type(second, second_type)?;

        if !demanded {
            self.build(first, Usage::Ignore, None, &mut None)?;
            self.build(second, Usage::Ignore, None, &mut None)?;
            return Ok(None);
        }
        let a = self.operand(first)?;
        let b = self.operand(second)?;
        // Second first, so the first operand's slot is reused for the result.
        self.release(second)?;
        self.release(first)?;
        let r = self.result_slot(id, hint)?;
        self.buffer.add(binary_instruction(op, r.slot, a.slot, b.slot)?);
        Ok(Some(r))
    }

    #[inline(never)]
    fn call(
        &mut self,
        id: ExprId,
        method: &MethodRef,
        call_type: CallType,
        args: &[ExprId],
        demanded: bool,
        hint: Option<TypedSlot>,
    ) -> Result<Option<TypedSlot>, BuildError> {
        let function_id = self
            .env
            .resolve_function(&method.owner, &method.name)
            .ok_or_else(|| BuildError::UnresolvedMethod {
                expr: id,
                method: method.to_string(),
            })?;
        let native = self.env.function(function_id);
        if native.call_type() != call_type
            || native.params() != method.params.as_slice()
            || native.return_type() != method.ret
        {
            return Err(BuildError::TypeMismatch {
                expr: id,
                message: format!("{} does not match the registered native", method),
            });
        }

        let receiver_count = match call_type {
            CallType::Static => 0,
            CallType::Instance => 1,
        };
        if args.len() != method.params.len() + receiver_count {
            return Err(BuildError::TypeMismatch {
                expr: id,
                message: format!(
                    "{} takes {} arguments, {} given",
                    method,
                    method.params.len() + receiver_count,
                    args.len()
                ),
            });
        }
        let expected = (receiver_count == 1)
            .then_some(IrType::Object)
            .into_iter()
            .chain(method.params.iter().copied());
        for (arg, ty) in args.iter().zip(expected) {
            self.expect_type(*arg, ty)?;
        }

        let mut slots = Vec::with_capacity(args.len());
        for arg in args {
            slots.push(self.operand(*arg)?);
        }
        for arg in args.iter().rev() {
            self.release(*arg)?;
        }
        let result = self.demanded_slot(id, demanded, hint)?;

        let (receiver, rest) = slots.split_at(receiver_count);
        let site = self.call_sites.len() as u32;
        self.call_sites.push(CallSite {
            function: function_id,
            receiver: receiver.first().map(|slot| slot.slot),
            args: Box::from(rest),
            result,
        });
        self.buffer.add(Instruction::Call { site });
        Ok(result)
    }
}

fn check_field_type(id: ExprId, field: &FieldRef, ty: IrType) -> Result<(), BuildError> {
    if ty.slot_kind() != field.ty.slot_kind() {
        return Err(BuildError::TypeMismatch {
            expr: id,
            message: format!("field {} is {:?}, not {:?}", field, ty, field.ty),
        });
    }
    Ok(())
}

fn unary_instruction(
    op: UnaryOp,
    r: Slot,
    a: Slot,
) -> Result<Instruction, BuildError> {
    let convert = |op| Instruction::Convert { op, r, a };
    Ok(match op {
        UnaryOp::Not => Instruction::Not { r, a },
        UnaryOp::IInv => Instruction::Inv {
            kind: SlotKind::Int,
            r,
            a,
        },
        UnaryOp::LInv => Instruction::Inv {
            kind: SlotKind::Long,
            r,
            a,
        },
        UnaryOp::INeg | UnaryOp::LNeg | UnaryOp::FNeg | UnaryOp::DNeg => {
            let (operand, _) = op.signature();
            let kind = operand
                .slot_kind()
                .ok_or_else(|| BuildError::internal("negation of a non-value"))?;
            Instruction::Neg { kind, r, a }
        }
        UnaryOp::IntToLong => convert(Conversion::I2L),
        UnaryOp::IntToFloat => convert(Conversion::I2F),
        UnaryOp::IntToDouble => convert(Conversion::I2D),
        UnaryOp::LongToInt => convert(Conversion::L2I),
        UnaryOp::LongToFloat => convert(Conversion::L2F),
        UnaryOp::LongToDouble => convert(Conversion::L2D),
        UnaryOp::FloatToInt => convert(Conversion::F2I),
        UnaryOp::FloatToLong => convert(Conversion::F2L),
        UnaryOp::FloatToDouble => convert(Conversion::F2D),
        UnaryOp::DoubleToInt => convert(Conversion::D2I),
        UnaryOp::DoubleToLong => convert(Conversion::D2L),
        UnaryOp::DoubleToFloat => convert(Conversion::D2F),
        UnaryOp::IntToByte => convert(Conversion::I2B),
        UnaryOp::IntToShort => convert(Conversion::I2S),
        UnaryOp::IntToChar => convert(Conversion::I2C),
        UnaryOp::ArrayLength => Instruction::ArrayLength { r, a },
        UnaryOp::NullCheck => Instruction::NullCheck { r, a },
    })
}

fn binary_instruction(
    op: BinaryOp,
    r: Slot,
    a: Slot,
    b: Slot,
) -> Result<Instruction, BuildError> {
    use BinaryOp::*;
    let int = |op| Instruction::IBin { op, r, a, b };
    let long = |op| Instruction::LBin { op, r, a, b };
    let float = |op| Instruction::FBin { op, r, a, b };
    let double = |op| Instruction::DBin { op, r, a, b };
    let icmp = |op| Instruction::ICmp { op, r, a, b };
    let compare = |kind| Instruction::Compare { kind, r, a, b };
    let refcmp = |op| Instruction::RefCmp { op, r, a, b };

    Ok(match op {
        IAdd => int(IntOp::Add),
        ISub => int(IntOp::Sub),
        IMul => int(IntOp::Mul),
        IDiv => int(IntOp::Div),
        IRem => int(IntOp::Rem),
        IAnd => int(IntOp::And),
        IOr => int(IntOp::Or),
        IXor => int(IntOp::Xor),
        IShl => int(IntOp::Shl),
        IShr => int(IntOp::Shr),
        IShru => int(IntOp::Shru),

        LAdd => long(IntOp::Add),
        LSub => long(IntOp::Sub),
        LMul => long(IntOp::Mul),
        LDiv => long(IntOp::Div),
        LRem => long(IntOp::Rem),
        LAnd => long(IntOp::And),
        LOr => long(IntOp::Or),
        LXor => long(IntOp::Xor),
        LShl => long(IntOp::Shl),
        LShr => long(IntOp::Shr),
        LShru => long(IntOp::Shru),

        FAdd => float(FloatOp::Add),
        FSub => float(FloatOp::Sub),
        FMul => float(FloatOp::Mul),
        FDiv => float(FloatOp::Div),
        FRem => float(FloatOp::Rem),

        DAdd => double(FloatOp::Add),
        DSub => double(FloatOp::Sub),
        DMul => double(FloatOp::Mul),
        DDiv => double(FloatOp::Div),
        DRem => double(FloatOp::Rem),

        LCmp => compare(SlotKind::Long),
        FCmp => compare(SlotKind::Float),
        DCmp => compare(SlotKind::Double),

        IEq => icmp(CmpOp::Eq),
        INe => icmp(CmpOp::Ne),
        ILt => icmp(CmpOp::Lt),
        ILe => icmp(CmpOp::Le),
        IGt => icmp(CmpOp::Gt),
        IGe => icmp(CmpOp::Ge),

        RefEq => refcmp(CmpOp::Eq),
        RefNe => refcmp(CmpOp::Ne),

        LogicalAnd | LogicalOr => {
            return Err(BuildError::internal("logical operators are lowered as jumps"));
        }
    })
}
