//! Register machine instructions.
//!
//! Every instruction names its operands as slots into the five typed register
//! arrays. Apart from the three jump forms, executing an instruction advances
//! the program counter by exactly one.
//!
//! # Operand Notation
//!
//! Field names follow one convention throughout:
//! - `r`: destination slot
//! - `a`, `b`: source slots
//! - `kind`: register partition when the opcode is generic over it
//!
//! The partition of every operand is fixed by the opcode. For example,
//! `LBin` reads `a` from the long partition and, for shifts only, `b` from the
//! int partition.

use core::fmt;

use static_assertions::const_assert;

use crate::vm::object::ClassId;
use crate::vm::{Slot, SlotKind, StaticFieldId};

/// Instruction address, used as a jump target.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl Label {
    /// Target of a jump that has not been patched yet.
    pub const PENDING: Label = Label(u32::MAX);

    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_pending(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pending() {
            write!(f, "@?")
        } else {
            write!(f, "@{}", self.0)
        }
    }
}

/// Integer operations shared by the int and long partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Shru,
}

impl IntOp {
    pub const fn is_shift(self) -> bool {
        matches!(self, IntOp::Shl | IntOp::Shr | IntOp::Shru)
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            IntOp::Add => "add",
            IntOp::Sub => "sub",
            IntOp::Mul => "mul",
            IntOp::Div => "div",
            IntOp::Rem => "rem",
            IntOp::And => "and",
            IntOp::Or => "or",
            IntOp::Xor => "xor",
            IntOp::Shl => "shl",
            IntOp::Shr => "shr",
            IntOp::Shru => "shru",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl FloatOp {
    pub const fn mnemonic(self) -> &'static str {
        match self {
            FloatOp::Add => "add",
            FloatOp::Sub => "sub",
            FloatOp::Mul => "mul",
            FloatOp::Div => "div",
            FloatOp::Rem => "rem",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub const fn mnemonic(self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
        }
    }

    #[inline(always)]
    pub fn test<T: PartialOrd>(self, a: T, b: T) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }
}

/// Numeric conversions. Source and destination partitions are implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversion {
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    /// Truncate to a signed byte.
    I2B,
    /// Truncate to a signed short.
    I2S,
    /// Truncate to an unsigned 16-bit char.
    I2C,
}

impl Conversion {
    pub const fn from_kind(self) -> SlotKind {
        use Conversion::*;
        match self {
            I2L | I2F | I2D | I2B | I2S | I2C => SlotKind::Int,
            L2I | L2F | L2D => SlotKind::Long,
            F2I | F2L | F2D => SlotKind::Float,
            D2I | D2L | D2F => SlotKind::Double,
        }
    }

    pub const fn to_kind(self) -> SlotKind {
        use Conversion::*;
        match self {
            L2I | F2I | D2I | I2B | I2S | I2C => SlotKind::Int,
            I2L | F2L | D2L => SlotKind::Long,
            I2F | L2F | D2F => SlotKind::Float,
            I2D | L2D | F2D => SlotKind::Double,
        }
    }

    pub const fn mnemonic(self) -> &'static str {
        use Conversion::*;
        match self {
            I2L => "i2l",
            I2F => "i2f",
            I2D => "i2d",
            L2I => "l2i",
            L2F => "l2f",
            L2D => "l2d",
            F2I => "f2i",
            F2L => "f2l",
            F2D => "f2d",
            D2I => "d2i",
            D2L => "d2l",
            D2F => "d2f",
            I2B => "i2b",
            I2S => "i2s",
            I2C => "i2c",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    // ========================================================================
    // Constants
    // ========================================================================
    IConst { r: Slot, value: i32 },
    LConst { r: Slot, value: i64 },
    FConst { r: Slot, value: f32 },
    DConst { r: Slot, value: f64 },
    /// Load string `index` of the program's constant pool into object slot `r`.
    SConst { r: Slot, index: u32 },
    /// Store the null reference into object slot `r`.
    Null { r: Slot },

    // ========================================================================
    // Moves
    // ========================================================================
    Move { kind: SlotKind, r: Slot, a: Slot },

    // ========================================================================
    // Arithmetic
    // ========================================================================
    /// Wrapping int arithmetic. Division by zero is a runtime error.
    IBin { op: IntOp, r: Slot, a: Slot, b: Slot },
    /// Wrapping long arithmetic. For shifts `b` is an int slot.
    LBin { op: IntOp, r: Slot, a: Slot, b: Slot },
    FBin { op: FloatOp, r: Slot, a: Slot, b: Slot },
    DBin { op: FloatOp, r: Slot, a: Slot, b: Slot },
    /// Negation within a numeric partition.
    Neg { kind: SlotKind, r: Slot, a: Slot },
    /// Bitwise complement, int or long partition.
    Inv { kind: SlotKind, r: Slot, a: Slot },
    /// Boolean negation: `r = (a == 0) as i32`.
    Not { r: Slot, a: Slot },
    Convert { op: Conversion, r: Slot, a: Slot },

    // ========================================================================
    // Comparison
    // ========================================================================
    /// `r = (a op b) as i32` on int slots.
    ICmp { op: CmpOp, r: Slot, a: Slot, b: Slot },
    /// Three-way comparison into int slot `r` (-1, 0, 1), operands in `kind`.
    ///
    /// Floating point follows `Float.compare`: NaN is greater than everything
    /// and equal to itself, `-0.0 < 0.0`.
    Compare { kind: SlotKind, r: Slot, a: Slot, b: Slot },
    /// Reference (in)equality into int slot `r`. Only `Eq` and `Ne` occur.
    RefCmp { op: CmpOp, r: Slot, a: Slot, b: Slot },

    // ========================================================================
    // Objects
    // ========================================================================
    ArrayLength { r: Slot, a: Slot },
    /// `r = a`, failing when `a` is null.
    NullCheck { r: Slot, a: Slot },
    /// `r = array[index]`, element partition `kind`.
    ArrayGet { kind: SlotKind, r: Slot, array: Slot, index: Slot },
    ArraySet { kind: SlotKind, array: Slot, index: Slot, value: Slot },
    /// Read field number `field` of the instance in object slot `object`.
    GetField { kind: SlotKind, r: Slot, object: Slot, field: u32 },
    GetStatic { kind: SlotKind, r: Slot, field: StaticFieldId },
    /// `r = a`, failing unless `a` is null or an instance of `class`.
    Cast { r: Slot, a: Slot, class: ClassId },
    InstanceOf { r: Slot, a: Slot, class: ClassId },
    /// Fails when int slot `index` is negative.
    LowerBoundCheck { index: Slot },
    /// Fails when int slot `index` is not below the length of `array`.
    UpperBoundCheck { index: Slot, array: Slot },
    /// Invoke call site `site` of the program's call-site table.
    Call { site: u32 },

    // ========================================================================
    // Control flow
    // ========================================================================
    Goto { target: Label },
    /// Jump when int slot `cond` is non-zero.
    JumpIfTrue { cond: Slot, target: Label },
    /// Jump when int slot `cond` is zero.
    JumpIfFalse { cond: Slot, target: Label },
    /// Always fails; marks code the IR declared unreachable.
    Unreachable,
    /// Placeholder for a reserved instruction. Never survives lowering.
    Nop,
    /// Set the stop flag.
    Stop,
}

// Keep the hot loop's instruction array dense.
const_assert!(core::mem::size_of::<Instruction>() <= 16);

impl Instruction {
    pub const fn is_jump(&self) -> bool {
        matches!(
            self,
            Instruction::Goto { .. }
                | Instruction::JumpIfTrue { .. }
                | Instruction::JumpIfFalse { .. }
        )
    }

    pub const fn jump_target(&self) -> Option<Label> {
        match self {
            Instruction::Goto { target }
            | Instruction::JumpIfTrue { target, .. }
            | Instruction::JumpIfFalse { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Mutable access to the target of a jump; `None` for other instructions.
    pub fn jump_target_mut(&mut self) -> Option<&mut Label> {
        match self {
            Instruction::Goto { target }
            | Instruction::JumpIfTrue { target, .. }
            | Instruction::JumpIfFalse { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Whether execution can fail at this instruction.
    pub const fn can_error(&self) -> bool {
        match self {
            Instruction::IBin { op, .. } | Instruction::LBin { op, .. } => {
                matches!(op, IntOp::Div | IntOp::Rem)
            }
            Instruction::ArrayLength { .. }
            | Instruction::NullCheck { .. }
            | Instruction::ArrayGet { .. }
            | Instruction::ArraySet { .. }
            | Instruction::GetField { .. }
            | Instruction::Cast { .. }
            | Instruction::LowerBoundCheck { .. }
            | Instruction::UpperBoundCheck { .. }
            | Instruction::Call { .. }
            | Instruction::Unreachable => true,
            _ => false,
        }
    }
}
