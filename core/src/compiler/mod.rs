//! Lowering of tree IR functions into register bytecode.
//!
//! The compiler turns an [`IrFunction`](crate::ir::IrFunction) into a flat
//! [`Program`](crate::vm::Program) for the [`Interpreter`](crate::vm::Interpreter).
//!
//! ## Design
//!
//! - Single recursive walk guided by precomputed consumer counts
//! - Temporaries come from a per-partition LIFO pool and are recycled as soon
//!   as their last reader is lowered
//! - Conditions lower to jump continuations, so `&&`, `||` and `!` never
//!   materialize a boolean when they only steer control flow
//! - Forward jumps are recorded as patch lists and resolved when the target
//!   is emitted

mod error;
mod jumps;
mod lowering;
mod pool;
mod program;

#[cfg(test)]
mod lowering_test;

pub use error::BuildError;
pub use lowering::compile;
