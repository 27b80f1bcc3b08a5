use thiserror::Error;

/// Errors surfaced by terramesh's core operations.
///
/// `Io` covers both transient and fatal I/O failures rather than
/// splitting them into separate variants; whether a failure is worth
/// retrying is propagation policy decided at the call site (the tailer
/// matches on the underlying `io::ErrorKind` itself), not a distinct
/// payload shape.
#[derive(Error, Debug)]
pub enum TerramError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid format: {0}")]
    FormatInvalid(String),

    #[error("unsupported database version: expected {expected}, found {found}")]
    DatabaseVersion { expected: i32, found: i32 },

    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, TerramError>;
