//! Error types for engine execution
//!
//! `Engine::execute` stops at the first non-success and propagates it; a
//! batch's visible side effects up to the failing TAC are retained. The
//! `Invariant` variant covers the bug class (free of an unknown base, null
//! data on entry to a consumer): these abort the batch with a diagnostic
//! rather than being recoverable conditions.

use vexel_core::ScalarType;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the execution engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Allocator or victim cache could not provide a buffer
    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),

    /// Scalar type has no kernel support on the active path
    #[error("type not supported: {0}")]
    TypeNotSupported(ScalarType),

    /// EXTENSION instruction with no registered method
    #[error("user function not supported: opcode {0}")]
    UserFuncNotSupported(u32),

    /// External compiler failed or produced no object
    #[error("kernel compilation failed for {symbol}: {detail}")]
    CompileFailed { symbol: String, detail: String },

    /// Shared object could not be opened or the launcher resolved
    #[error("kernel load failed for {symbol}: {detail}")]
    LoadFailed { symbol: String, detail: String },

    /// Template directory missing or a template malformed
    #[error("template error: {0}")]
    Template(String),

    /// Launcher reported a runtime failure
    #[error("kernel {symbol} failed with status {status}")]
    KernelFailed { symbol: String, status: i64 },

    /// Programming invariant violated; aborts the batch
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error(transparent)]
    Core(#[from] vexel_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
