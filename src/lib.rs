//! Tarn - lowering of a typed expression-tree IR into register bytecode
//!
//! # Overview
//!
//! A front end hands over one function as a tree of typed IR nodes. Tarn
//! lowers it into a flat program for a register machine with five typed
//! register partitions, and runs it against an [`Environment`] of native
//! classes, functions and static fields.
//!
//! # Quick Start
//!
//! ```
//! use tarn::{BinaryOp, Environment, FunctionBuilder, IrType, Value};
//!
//! // x * 2 + 1
//! let mut b = FunctionBuilder::new(IrType::Int);
//! let x = b.param(IrType::Int);
//! let x = b.get_param(x);
//! let two = b.int(2);
//! let double = b.binary(BinaryOp::IMul, x, two);
//! let one = b.int(1);
//! let body = b.binary(BinaryOp::IAdd, double, one);
//! let function = b.finish(body);
//!
//! let env = Environment::new();
//! let program = tarn::compile(&function, &env).unwrap();
//! let result = tarn::run(&program, &env, &[Value::Int(20)]).unwrap();
//! assert_eq!(result, Some(Value::Int(41)));
//! ```
//!
//! # Errors
//!
//! [`tarn_core`] reports plain error enums. This crate wraps them in
//! [`Error`], which implements [`miette::Diagnostic`] so host applications
//! can render them with codes and help text.

pub use tarn_core::{api, compiler, ir, vm};

pub use tarn_core::api::{CompileOptions, ExecutionOptions};
pub use tarn_core::compiler::BuildError;
pub use tarn_core::ir::{BinaryOp, FunctionBuilder, IrFunction, IrType, UnaryOp};
pub use tarn_core::vm::{
    Environment, ExecutionError, Interpreter, NativeError, Program, RuntimeError, Value,
};

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum Error {
    #[error("Failed to lower function")]
    #[diagnostic(
        code(tarn::build),
        help("the IR handed to the lowering is malformed or uses a node kind without a lowering")
    )]
    Build(#[from] BuildError),

    #[error("Program execution failed")]
    #[diagnostic(
        code(tarn::runtime),
        help("a runtime check failed, or the run hit the configured step limit")
    )]
    Execution(#[from] ExecutionError),
}

/// Lowers `function` with default [`CompileOptions`].
pub fn compile(function: &IrFunction, env: &Environment) -> Result<Program, Error> {
    compile_with(function, env, CompileOptions::default())
}

pub fn compile_with(
    function: &IrFunction,
    env: &Environment,
    options: CompileOptions,
) -> Result<Program, Error> {
    Ok(tarn_core::compiler::compile(function, env, options)?)
}

/// Runs `program` once with `args` bound to its parameters and returns the
/// result register, if the program has one.
pub fn run(program: &Program, env: &Environment, args: &[Value]) -> Result<Option<Value>, Error> {
    run_with(program, env, args, ExecutionOptions::default())
}

pub fn run_with(
    program: &Program,
    env: &Environment,
    args: &[Value],
    options: ExecutionOptions,
) -> Result<Option<Value>, Error> {
    let mut interpreter = Interpreter::with_options(program, env, options);
    Ok(interpreter.call(args)?)
}
