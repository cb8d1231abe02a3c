//! Options shared by the compiler and the interpreter.

mod options;

pub use options::{CompileOptions, ExecutionOptions};
