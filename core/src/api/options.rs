//! Configuration options for lowering and execution.

/// Configuration options for lowering a function to bytecode.
///
/// # Example
///
/// ```
/// use tarn_core::api::CompileOptions;
///
/// let options = CompileOptions { max_depth: 200 };
/// assert_eq!(CompileOptions::default().max_depth, 256);
/// # let _ = options;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// Maximum nesting of IR nodes the lowering recurses through.
    ///
    /// Every level takes native stack. The default fits a 2 MB thread
    /// stack, unoptimized. Raise it only together with the stack size.
    ///
    /// Default: 256
    pub max_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { max_depth: 256 }
    }
}

/// Configuration options for running a program.
///
/// These options control resource limits of the interpreter.
///
/// # Example
///
/// ```
/// use tarn_core::api::ExecutionOptions;
///
/// let options = ExecutionOptions {
///     max_steps: Some(10_000),
/// };
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionOptions {
    /// Maximum number of instructions dispatched by one `resume` (if Some).
    ///
    /// Set to `None` for no limit (be careful with untrusted programs!).
    ///
    /// Default: None
    pub max_steps: Option<u64>,
}
