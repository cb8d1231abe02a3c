//! Register bytecode and the interpreter that runs it.
//!
//! A [`Program`] is a flat array of [`Instruction`]s over five typed register
//! partitions (int, long, float, double, object). Everything a program refers
//! to by name (classes, native functions, static fields) lives in an
//! [`Environment`] and is addressed by dense ids.

mod code;
mod error;
mod instruction_set;
mod native;
mod object;
mod printer;
mod registers;
mod runtime;
mod slot;

pub use code::{CallSite, Program};
pub use error::{ExecutionError, NativeError, ResourceExceededError, RuntimeError};
pub use instruction_set::{CmpOp, Conversion, FloatOp, Instruction, IntOp, Label};
pub use native::{ClassInfo, Environment, FunctionId, NativeFn, NativeFunction, StaticFieldId};
pub use object::{Array, ClassId, Instance, Object, ObjectRef, Value, ref_eq};
pub use printer::InstructionPrinter;
pub use registers::RegisterFile;
pub use runtime::Interpreter;
pub use slot::{Slot, SlotCounts, SlotKind, TypedSlot};
