//! Tree IR consumed by the lowering.
//!
//! Nodes live in an arena owned by [`IrFunction`] and refer to each other by
//! [`ExprId`]. A node may be referenced from several parents (a DAG); the
//! [`consumers`] analysis counts those references. Cycles can only be built
//! through [`FunctionBuilder::placeholder`] and are rejected by the lowering.

use alloc::rc::Rc;
use core::fmt;

use crate::Vec;
use crate::vm::SlotKind;

mod builder;
pub mod consumers;
mod ops;

pub use builder::FunctionBuilder;
pub use consumers::{ConsumerCounts, Usage};
pub use ops::{BinaryOp, NullaryOp, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    Object,
    Void,
    /// Type of expressions that never complete normally (exits, `unreachable`).
    Unreachable,
}

impl IrType {
    /// Register partition holding values of this type, `None` for types
    /// without values.
    pub const fn slot_kind(self) -> Option<SlotKind> {
        match self {
            IrType::Boolean | IrType::Byte | IrType::Short | IrType::Char | IrType::Int => {
                Some(SlotKind::Int)
            }
            IrType::Long => Some(SlotKind::Long),
            IrType::Float => Some(SlotKind::Float),
            IrType::Double => Some(SlotKind::Double),
            IrType::Object => Some(SlotKind::Object),
            IrType::Void | IrType::Unreachable => None,
        }
    }
}

macro_rules! ir_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        }
    };
}

ir_id!(ExprId, "e");
ir_id!(ParamId, "p");
ir_id!(VarId, "v");
ir_id!(BlockId, "b");
ir_id!(LoopId, "loop");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    Static,
    /// The first argument is the receiver.
    Instance,
}

/// Symbolic reference to a native function, resolved during lowering.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodRef {
    pub owner: Rc<str>,
    pub name: Rc<str>,
    /// Parameter types, excluding the receiver.
    pub params: Vec<IrType>,
    pub ret: IrType,
}

impl MethodRef {
    pub fn new(owner: &str, name: &str, params: &[IrType], ret: IrType) -> Self {
        Self {
            owner: Rc::from(owner),
            name: Rc::from(name),
            params: params.to_vec(),
            ret,
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    pub owner: Rc<str>,
    pub name: Rc<str>,
    pub ty: IrType,
}

impl FieldRef {
    pub fn new(owner: &str, name: &str, ty: IrType) -> Self {
        Self {
            owner: Rc::from(owner),
            name: Rc::from(name),
            ty,
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    // === Control ===
    Sequence {
        first: ExprId,
        second: ExprId,
    },
    Block {
        block: BlockId,
        body: ExprId,
    },
    ExitBlock {
        block: BlockId,
    },
    /// Runs `preheader` once, then `body` forever. Only `ExitLoop` leaves.
    Loop {
        lp: LoopId,
        preheader: ExprId,
        body: ExprId,
    },
    ExitLoop {
        lp: LoopId,
    },
    ContinueLoop {
        lp: LoopId,
    },
    Conditional {
        condition: ExprId,
        then_expr: ExprId,
        else_expr: ExprId,
    },

    // === Operators ===
    Nullary(NullaryOp),
    Unary {
        op: UnaryOp,
        operand: ExprId,
    },
    Binary {
        op: BinaryOp,
        first: ExprId,
        second: ExprId,
    },

    // === Constants ===
    /// Also used for boolean, byte, short and char constants.
    IntConstant(i32),
    LongConstant(i64),
    FloatConstant(f32),
    DoubleConstant(f64),
    StringConstant(Rc<str>),

    // === Data ===
    Parameter(ParamId),
    /// Reads the variable's own register, not a copy. A later
    /// [`SetVariable`](ExprKind::SetVariable) that runs before the reader
    /// uses the value changes what it sees: in `v + (v = 10; 1)` the left
    /// operand reads 10. Front ends that need a snapshot copy the value
    /// into a fresh local first.
    Variable(VarId),
    SetVariable {
        var: VarId,
        value: ExprId,
    },
    GetField {
        field: FieldRef,
        object: ExprId,
    },
    GetStaticField {
        field: FieldRef,
    },
    SetField {
        field: FieldRef,
        object: ExprId,
        value: ExprId,
    },
    SetStaticField {
        field: FieldRef,
        value: ExprId,
    },
    Call {
        method: MethodRef,
        call_type: CallType,
        args: Vec<ExprId>,
    },
    ArrayElement {
        array: ExprId,
        index: ExprId,
    },
    SetArrayElement {
        array: ExprId,
        index: ExprId,
        value: ExprId,
    },
    Cast {
        value: ExprId,
        class: Rc<str>,
    },
    InstanceOf {
        value: ExprId,
        class: Rc<str>,
    },
    /// Evaluates to `index` after checking `index >= 0` (when `lower`) and
    /// `index < array.length` (when `array` is present).
    BoundsCheck {
        index: ExprId,
        array: Option<ExprId>,
        lower: bool,
    },

    // === Not lowered ===
    Throw {
        value: ExprId,
    },
    TryCatch {
        body: ExprId,
        handler: ExprId,
    },
    CaughtValue,
    CaughtException,
    NewObject {
        class: Rc<str>,
    },
    NewArray {
        elem: IrType,
        length: ExprId,
    },
    Tuple {
        components: Vec<ExprId>,
    },
    TupleComponent {
        tuple: ExprId,
        index: u32,
    },
}

/// How a parent uses one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// The child runs for its side effects only.
    Effect,
    /// The child's value is read iff the parent's own value is read.
    Forward,
    /// The child's value is always read.
    Operand,
}

impl ExprKind {
    /// Visits every child reference in evaluation order.
    pub fn for_each_edge(&self, mut f: impl FnMut(ExprId, Edge)) {
        use Edge::*;
        match self {
            ExprKind::Sequence { first, second } => {
                f(*first, Effect);
                f(*second, Forward);
            }
            ExprKind::Block { body, .. } => f(*body, Forward),
            ExprKind::Loop {
                preheader, body, ..
            } => {
                f(*preheader, Effect);
                f(*body, Effect);
            }
            ExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                f(*condition, Operand);
                f(*then_expr, Forward);
                f(*else_expr, Forward);
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::NullCheck => f(*operand, Operand),
                _ => f(*operand, Forward),
            },
            ExprKind::Binary { op, first, second } => {
                let edge = if op.is_logical() { Operand } else { Forward };
                f(*first, edge);
                f(*second, edge);
            }
            ExprKind::SetVariable { value, .. } => f(*value, Operand),
            ExprKind::GetField { object, .. } => f(*object, Forward),
            ExprKind::SetField { object, value, .. } => {
                f(*object, Operand);
                f(*value, Operand);
            }
            ExprKind::SetStaticField { value, .. } => f(*value, Operand),
            ExprKind::Call { args, .. } => args.iter().for_each(|arg| f(*arg, Operand)),
            ExprKind::ArrayElement { array, index } => {
                f(*array, Forward);
                f(*index, Forward);
            }
            ExprKind::SetArrayElement {
                array,
                index,
                value,
            } => {
                f(*array, Operand);
                f(*index, Operand);
                f(*value, Operand);
            }
            ExprKind::Cast { value, .. } | ExprKind::InstanceOf { value, .. } => {
                f(*value, Forward)
            }
            ExprKind::BoundsCheck { index, array, .. } => {
                f(*index, Operand);
                if let Some(array) = array {
                    f(*array, Operand);
                }
            }
            ExprKind::Throw { value } => f(*value, Operand),
            ExprKind::TryCatch { body, handler } => {
                f(*body, Operand);
                f(*handler, Operand);
            }
            ExprKind::NewArray { length, .. } => f(*length, Operand),
            ExprKind::Tuple { components } => components.iter().for_each(|c| f(*c, Operand)),
            ExprKind::TupleComponent { tuple, .. } => f(*tuple, Operand),
            ExprKind::ExitBlock { .. }
            | ExprKind::ExitLoop { .. }
            | ExprKind::ContinueLoop { .. }
            | ExprKind::Nullary(_)
            | ExprKind::IntConstant(_)
            | ExprKind::LongConstant(_)
            | ExprKind::FloatConstant(_)
            | ExprKind::DoubleConstant(_)
            | ExprKind::StringConstant(_)
            | ExprKind::Parameter(_)
            | ExprKind::Variable(_)
            | ExprKind::GetStaticField { .. }
            | ExprKind::CaughtValue
            | ExprKind::CaughtException
            | ExprKind::NewObject { .. } => {}
        }
    }

    /// Short name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ExprKind::Sequence { .. } => "sequence",
            ExprKind::Block { .. } => "block",
            ExprKind::ExitBlock { .. } => "exit-block",
            ExprKind::Loop { .. } => "loop",
            ExprKind::ExitLoop { .. } => "exit-loop",
            ExprKind::ContinueLoop { .. } => "continue-loop",
            ExprKind::Conditional { .. } => "conditional",
            ExprKind::Nullary(_) => "nullary",
            ExprKind::Unary { .. } => "unary",
            ExprKind::Binary { .. } => "binary",
            ExprKind::IntConstant(_) => "int-constant",
            ExprKind::LongConstant(_) => "long-constant",
            ExprKind::FloatConstant(_) => "float-constant",
            ExprKind::DoubleConstant(_) => "double-constant",
            ExprKind::StringConstant(_) => "string-constant",
            ExprKind::Parameter(_) => "parameter",
            ExprKind::Variable(_) => "variable",
            ExprKind::SetVariable { .. } => "set-variable",
            ExprKind::GetField { .. } => "get-field",
            ExprKind::GetStaticField { .. } => "get-static-field",
            ExprKind::SetField { .. } => "set-field",
            ExprKind::SetStaticField { .. } => "set-static-field",
            ExprKind::Call { .. } => "call",
            ExprKind::ArrayElement { .. } => "array-element",
            ExprKind::SetArrayElement { .. } => "set-array-element",
            ExprKind::Cast { .. } => "cast",
            ExprKind::InstanceOf { .. } => "instanceof",
            ExprKind::BoundsCheck { .. } => "bounds-check",
            ExprKind::Throw { .. } => "throw",
            ExprKind::TryCatch { .. } => "try-catch",
            ExprKind::CaughtValue => "caught-value",
            ExprKind::CaughtException => "caught-exception",
            ExprKind::NewObject { .. } => "new-object",
            ExprKind::NewArray { .. } => "new-array",
            ExprKind::Tuple { .. } => "tuple",
            ExprKind::TupleComponent { .. } => "tuple-component",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrExpr {
    pub kind: ExprKind,
    pub ty: IrType,
}

/// A function body with its parameter and local variable declarations.
#[derive(Debug, Clone)]
pub struct IrFunction {
    pub(crate) params: Vec<IrType>,
    pub(crate) locals: Vec<IrType>,
    pub(crate) nodes: Vec<IrExpr>,
    pub(crate) body: ExprId,
    pub(crate) return_type: IrType,
}

impl IrFunction {
    pub fn params(&self) -> &[IrType] {
        &self.params
    }

    pub fn locals(&self) -> &[IrType] {
        &self.locals
    }

    pub fn body(&self) -> ExprId {
        self.body
    }

    pub fn return_type(&self) -> IrType {
        self.return_type
    }

    pub fn expr(&self, id: ExprId) -> &IrExpr {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
