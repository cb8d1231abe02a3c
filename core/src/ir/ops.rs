//! Operator catalogue of the tree IR.

use crate::ir::IrType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullaryOp {
    Void,
    Null,
    Unreachable,
}

impl NullaryOp {
    pub const fn result_type(self) -> IrType {
        match self {
            NullaryOp::Void => IrType::Void,
            NullaryOp::Null => IrType::Object,
            NullaryOp::Unreachable => IrType::Unreachable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    IInv,
    LInv,
    INeg,
    LNeg,
    FNeg,
    DNeg,

    IntToLong,
    IntToFloat,
    IntToDouble,
    LongToInt,
    LongToFloat,
    LongToDouble,
    FloatToInt,
    FloatToLong,
    FloatToDouble,
    DoubleToInt,
    DoubleToLong,
    DoubleToFloat,
    IntToByte,
    IntToShort,
    IntToChar,

    ArrayLength,
    /// Passes the operand through, failing at run time when it is null.
    NullCheck,
}

impl UnaryOp {
    /// `(operand type, result type)`.
    pub const fn signature(self) -> (IrType, IrType) {
        use IrType::*;
        match self {
            UnaryOp::Not => (Boolean, Boolean),
            UnaryOp::IInv | UnaryOp::INeg => (Int, Int),
            UnaryOp::LInv | UnaryOp::LNeg => (Long, Long),
            UnaryOp::FNeg => (Float, Float),
            UnaryOp::DNeg => (Double, Double),
            UnaryOp::IntToLong => (Int, Long),
            UnaryOp::IntToFloat => (Int, Float),
            UnaryOp::IntToDouble => (Int, Double),
            UnaryOp::LongToInt => (Long, Int),
            UnaryOp::LongToFloat => (Long, Float),
            UnaryOp::LongToDouble => (Long, Double),
            UnaryOp::FloatToInt => (Float, Int),
            UnaryOp::FloatToLong => (Float, Long),
            UnaryOp::FloatToDouble => (Float, Double),
            UnaryOp::DoubleToInt => (Double, Int),
            UnaryOp::DoubleToLong => (Double, Long),
            UnaryOp::DoubleToFloat => (Double, Float),
            UnaryOp::IntToByte => (Int, Byte),
            UnaryOp::IntToShort => (Int, Short),
            UnaryOp::IntToChar => (Int, Char),
            UnaryOp::ArrayLength => (Object, Int),
            UnaryOp::NullCheck => (Object, Object),
        }
    }

    pub const fn result_type(self) -> IrType {
        self.signature().1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    IAdd,
    ISub,
    IMul,
    IDiv,
    IRem,
    IAnd,
    IOr,
    IXor,
    IShl,
    IShr,
    IShru,

    LAdd,
    LSub,
    LMul,
    LDiv,
    LRem,
    LAnd,
    LOr,
    LXor,
    LShl,
    LShr,
    LShru,

    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,

    DAdd,
    DSub,
    DMul,
    DDiv,
    DRem,

    LCmp,
    FCmp,
    DCmp,

    IEq,
    INe,
    ILt,
    ILe,
    IGt,
    IGe,

    RefEq,
    RefNe,

    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    /// `(first operand, second operand, result)` types.
    pub const fn signature(self) -> (IrType, IrType, IrType) {
        use BinaryOp::*;
        use IrType::{Boolean, Double, Float, Int, Long, Object};
        match self {
            IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor | IShl | IShr | IShru => {
                (Int, Int, Int)
            }
            LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => (Long, Long, Long),
            LShl | LShr | LShru => (Long, Int, Long),
            FAdd | FSub | FMul | FDiv | FRem => (Float, Float, Float),
            DAdd | DSub | DMul | DDiv | DRem => (Double, Double, Double),
            LCmp => (Long, Long, Int),
            FCmp => (Float, Float, Int),
            DCmp => (Double, Double, Int),
            IEq | INe | ILt | ILe | IGt | IGe => (Int, Int, Boolean),
            RefEq | RefNe => (Object, Object, Boolean),
            LogicalAnd | LogicalOr => (Boolean, Boolean, Boolean),
        }
    }

    pub const fn result_type(self) -> IrType {
        self.signature().2
    }

    pub const fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }
}
