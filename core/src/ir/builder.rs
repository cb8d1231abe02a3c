use alloc::rc::Rc;

use crate::Vec;
use crate::ir::{
    BinaryOp, BlockId, CallType, ExprId, ExprKind, FieldRef, IrExpr, IrFunction, IrType, LoopId,
    MethodRef, NullaryOp, ParamId, UnaryOp, VarId,
};

/// Incremental constructor for [`IrFunction`].
///
/// Result types are derived from the operands where the node kind fixes
/// them; blocks take theirs explicitly.
///
/// # Example
///
/// ```
/// use tarn_core::ir::{BinaryOp, FunctionBuilder, IrType};
///
/// let mut b = FunctionBuilder::new(IrType::Int);
/// let x = b.param(IrType::Int);
/// let x = b.get_param(x);
/// let one = b.int(1);
/// let body = b.binary(BinaryOp::IAdd, x, one);
/// let function = b.finish(body);
/// assert_eq!(function.params(), &[IrType::Int]);
/// ```
pub struct FunctionBuilder {
    params: Vec<IrType>,
    locals: Vec<IrType>,
    nodes: Vec<IrExpr>,
    blocks: u32,
    loops: u32,
    return_type: IrType,
}

impl FunctionBuilder {
    pub fn new(return_type: IrType) -> Self {
        Self {
            params: Vec::new(),
            locals: Vec::new(),
            nodes: Vec::new(),
            blocks: 0,
            loops: 0,
            return_type,
        }
    }

    pub fn param(&mut self, ty: IrType) -> ParamId {
        self.params.push(ty);
        ParamId(self.params.len() as u32 - 1)
    }

    pub fn local(&mut self, ty: IrType) -> VarId {
        self.locals.push(ty);
        VarId(self.locals.len() as u32 - 1)
    }

    pub fn ty(&self, expr: ExprId) -> IrType {
        self.nodes[expr.index()].ty
    }

    /// Appends a node with an explicit type.
    pub fn expr(&mut self, kind: ExprKind, ty: IrType) -> ExprId {
        self.nodes.push(IrExpr { kind, ty });
        ExprId(self.nodes.len() as u32 - 1)
    }

    /// Reserves a node to be filled in by [`define`](Self::define), allowing
    /// forward references.
    pub fn placeholder(&mut self, ty: IrType) -> ExprId {
        self.expr(ExprKind::Nullary(NullaryOp::Unreachable), ty)
    }

    pub fn define(&mut self, placeholder: ExprId, kind: ExprKind) {
        self.nodes[placeholder.index()].kind = kind;
    }

    pub fn finish(self, body: ExprId) -> IrFunction {
        IrFunction {
            params: self.params,
            locals: self.locals,
            nodes: self.nodes,
            body,
            return_type: self.return_type,
        }
    }

    // === Constants ===

    pub fn int(&mut self, value: i32) -> ExprId {
        self.expr(ExprKind::IntConstant(value), IrType::Int)
    }

    pub fn boolean(&mut self, value: bool) -> ExprId {
        self.expr(ExprKind::IntConstant(value as i32), IrType::Boolean)
    }

    pub fn long(&mut self, value: i64) -> ExprId {
        self.expr(ExprKind::LongConstant(value), IrType::Long)
    }

    pub fn float(&mut self, value: f32) -> ExprId {
        self.expr(ExprKind::FloatConstant(value), IrType::Float)
    }

    pub fn double(&mut self, value: f64) -> ExprId {
        self.expr(ExprKind::DoubleConstant(value), IrType::Double)
    }

    pub fn string(&mut self, value: &str) -> ExprId {
        self.expr(ExprKind::StringConstant(Rc::from(value)), IrType::Object)
    }

    // === Operators ===

    pub fn nullary(&mut self, op: NullaryOp) -> ExprId {
        self.expr(ExprKind::Nullary(op), op.result_type())
    }

    pub fn void(&mut self) -> ExprId {
        self.nullary(NullaryOp::Void)
    }

    pub fn null(&mut self) -> ExprId {
        self.nullary(NullaryOp::Null)
    }

    pub fn unary(&mut self, op: UnaryOp, operand: ExprId) -> ExprId {
        self.expr(ExprKind::Unary { op, operand }, op.result_type())
    }

    pub fn not(&mut self, operand: ExprId) -> ExprId {
        self.unary(UnaryOp::Not, operand)
    }

    pub fn binary(&mut self, op: BinaryOp, first: ExprId, second: ExprId) -> ExprId {
        self.expr(ExprKind::Binary { op, first, second }, op.result_type())
    }

    pub fn and(&mut self, first: ExprId, second: ExprId) -> ExprId {
        self.binary(BinaryOp::LogicalAnd, first, second)
    }

    pub fn or(&mut self, first: ExprId, second: ExprId) -> ExprId {
        self.binary(BinaryOp::LogicalOr, first, second)
    }

    // === Control ===

    pub fn sequence(&mut self, first: ExprId, second: ExprId) -> ExprId {
        let ty = self.ty(second);
        self.expr(ExprKind::Sequence { first, second }, ty)
    }

    /// Chains `exprs` left to right; the last one provides the value.
    pub fn seq(&mut self, exprs: &[ExprId]) -> ExprId {
        let Some((&last, init)) = exprs.split_last() else {
            return self.void();
        };
        init.iter()
            .rev()
            .fold(last, |second, &first| self.sequence(first, second))
    }

    pub fn new_block(&mut self) -> BlockId {
        self.blocks += 1;
        BlockId(self.blocks - 1)
    }

    pub fn block(&mut self, block: BlockId, ty: IrType, body: ExprId) -> ExprId {
        self.expr(ExprKind::Block { block, body }, ty)
    }

    pub fn exit_block(&mut self, block: BlockId) -> ExprId {
        self.expr(ExprKind::ExitBlock { block }, IrType::Unreachable)
    }

    pub fn new_loop(&mut self) -> LoopId {
        self.loops += 1;
        LoopId(self.loops - 1)
    }

    pub fn loop_(&mut self, lp: LoopId, preheader: ExprId, body: ExprId) -> ExprId {
        self.expr(
            ExprKind::Loop {
                lp,
                preheader,
                body,
            },
            IrType::Void,
        )
    }

    pub fn exit_loop(&mut self, lp: LoopId) -> ExprId {
        self.expr(ExprKind::ExitLoop { lp }, IrType::Unreachable)
    }

    pub fn continue_loop(&mut self, lp: LoopId) -> ExprId {
        self.expr(ExprKind::ContinueLoop { lp }, IrType::Unreachable)
    }

    /// The type is the then-branch's, unless that branch never completes.
    pub fn conditional(&mut self, condition: ExprId, then_expr: ExprId, else_expr: ExprId) -> ExprId {
        let ty = match self.ty(then_expr) {
            IrType::Unreachable => self.ty(else_expr),
            ty => ty,
        };
        self.expr(
            ExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            },
            ty,
        )
    }

    // === Data ===

    pub fn get_param(&mut self, param: ParamId) -> ExprId {
        let ty = self.params[param.index()];
        self.expr(ExprKind::Parameter(param), ty)
    }

    pub fn get_var(&mut self, var: VarId) -> ExprId {
        let ty = self.locals[var.index()];
        self.expr(ExprKind::Variable(var), ty)
    }

    pub fn set_var(&mut self, var: VarId, value: ExprId) -> ExprId {
        self.expr(ExprKind::SetVariable { var, value }, IrType::Void)
    }

    pub fn get_field(&mut self, field: FieldRef, object: ExprId) -> ExprId {
        let ty = field.ty;
        self.expr(ExprKind::GetField { field, object }, ty)
    }

    pub fn get_static(&mut self, field: FieldRef) -> ExprId {
        let ty = field.ty;
        self.expr(ExprKind::GetStaticField { field }, ty)
    }

    pub fn call(&mut self, method: MethodRef, call_type: CallType, args: &[ExprId]) -> ExprId {
        let ty = method.ret;
        self.expr(
            ExprKind::Call {
                method,
                call_type,
                args: args.to_vec(),
            },
            ty,
        )
    }

    pub fn array_get(&mut self, array: ExprId, index: ExprId, elem: IrType) -> ExprId {
        self.expr(ExprKind::ArrayElement { array, index }, elem)
    }

    pub fn array_set(&mut self, array: ExprId, index: ExprId, value: ExprId) -> ExprId {
        self.expr(
            ExprKind::SetArrayElement {
                array,
                index,
                value,
            },
            IrType::Void,
        )
    }

    pub fn cast(&mut self, value: ExprId, class: &str) -> ExprId {
        self.expr(
            ExprKind::Cast {
                value,
                class: Rc::from(class),
            },
            IrType::Object,
        )
    }

    pub fn instance_of(&mut self, value: ExprId, class: &str) -> ExprId {
        self.expr(
            ExprKind::InstanceOf {
                value,
                class: Rc::from(class),
            },
            IrType::Boolean,
        )
    }

    pub fn bounds_check(&mut self, index: ExprId, array: Option<ExprId>, lower: bool) -> ExprId {
        self.expr(ExprKind::BoundsCheck { index, array, lower }, IrType::Int)
    }
}
