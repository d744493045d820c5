//! Error types for the core data model

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the core data model
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid base-array handle
    #[error("invalid base handle: {0}")]
    InvalidBase(u32),

    /// Base buffer accessed before it was realized
    #[error("base {0} has no realized buffer")]
    Unrealized(u32),

    /// Element type of a typed access does not match the base dtype
    #[error("type mismatch: base is {expected}, access is {actual} bytes/elem")]
    TypeMismatch { expected: String, actual: usize },

    /// Scalar type not supported by the requested operation
    #[error("type not supported: {0}")]
    TypeNotSupported(String),

    /// Opcode cannot be lowered
    #[error("cannot lower opcode: {0}")]
    UnsupportedOpcode(String),

    /// Malformed instruction (wrong operand count, missing constant, ...)
    #[error("malformed instruction: {0}")]
    MalformedInstruction(String),
}
