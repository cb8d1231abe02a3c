//! Interpreter errors.
//!
//! # Error Categories
//!
//! - **Runtime errors**: a check performed by an instruction failed (division
//!   by zero, index out of bounds, null dereference, failed cast) or a native
//!   function returned an error. Native failures are all reported through the
//!   single [`RuntimeError::Native`] variant.
//!
//! - **Resource exceeded errors**: the run hit a configured limit. The
//!   register file is left intact, so the interpreter can be resumed.

use core::fmt;

use crate::{String, ToString};

/// Error returned by [`Interpreter::run`](crate::vm::Interpreter::run) and friends.
#[derive(Debug)]
pub enum ExecutionError {
    Runtime(RuntimeError),
    ResourceExceeded(ResourceExceededError),
}

#[derive(Debug)]
pub enum RuntimeError {
    /// Integer division or remainder by zero.
    DivisionByZero { pc: usize },

    /// Array access or bounds check outside `0..len`. `len` is unknown for
    /// a lower-bound check.
    IndexOutOfBounds {
        index: i32,
        len: Option<usize>,
        pc: usize,
    },

    /// Dereference of a null object register.
    NullPointer { pc: usize },

    /// A cast to `class` failed.
    ClassCast { class: String, pc: usize },

    /// Control reached an `unreachable` instruction.
    Unreachable { pc: usize },

    /// The program counter left the instruction array.
    InvalidJump { target: usize, pc: usize },

    /// The instruction is malformed for this program (a wrong partition, an
    /// unknown call site, an unfilled placeholder).
    InvalidInstruction { pc: usize },

    /// Arguments passed to [`Interpreter::call`](crate::vm::Interpreter::call)
    /// do not match the parameters.
    InvalidArguments { message: String },

    /// A native function failed or returned a value of the wrong kind.
    Native {
        function: String,
        pc: usize,
        source: NativeError,
    },
}

#[derive(Debug)]
pub enum ResourceExceededError {
    /// More than `max_steps` instructions were dispatched in one run.
    StepLimit { max_steps: u64 },
}

/// Failure reported by a native function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Runtime(e) => write!(f, "{}", e),
            ExecutionError::ResourceExceeded(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::DivisionByZero { pc } => write!(f, "Division by zero at @{}", pc),
            RuntimeError::IndexOutOfBounds { index, len, pc } => {
                write!(f, "Index {} out of bounds", index)?;
                if let Some(len) = len {
                    write!(f, " (length: {})", len)?;
                }
                write!(f, " at @{}", pc)
            }
            RuntimeError::NullPointer { pc } => write!(f, "Null dereference at @{}", pc),
            RuntimeError::ClassCast { class, pc } => {
                write!(f, "Value is not an instance of {} at @{}", class, pc)
            }
            RuntimeError::Unreachable { pc } => write!(f, "Reached unreachable code at @{}", pc),
            RuntimeError::InvalidJump { target, pc } => {
                write!(f, "Jump from @{} to invalid address @{}", pc, target)
            }
            RuntimeError::InvalidInstruction { pc } => write!(f, "Malformed instruction at @{}", pc),
            RuntimeError::InvalidArguments { message } => write!(f, "Invalid arguments: {}", message),
            RuntimeError::Native {
                function,
                pc,
                source,
            } => write!(f, "Native call {} failed at @{}: {}", function, pc, source),
        }
    }
}

impl fmt::Display for ResourceExceededError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceExceededError::StepLimit { max_steps } => {
                write!(f, "Execution exceeded the limit of {} steps", max_steps)
            }
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl core::error::Error for ExecutionError {}
impl core::error::Error for RuntimeError {}
impl core::error::Error for ResourceExceededError {}
impl core::error::Error for NativeError {}

impl From<RuntimeError> for ExecutionError {
    fn from(err: RuntimeError) -> Self {
        ExecutionError::Runtime(err)
    }
}

impl From<ResourceExceededError> for ExecutionError {
    fn from(err: ResourceExceededError) -> Self {
        ExecutionError::ResourceExceeded(err)
    }
}

impl From<&str> for NativeError {
    fn from(message: &str) -> Self {
        NativeError::new(message.to_string())
    }
}
