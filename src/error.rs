use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the simulation core.
///
/// Two families of failures flow through this enum: contract violations
/// (`InvalidParam`, `IterationLimit`), which callers should treat as bugs in
/// the calling code, and recoverable load/save failures (`Format`, `Io`,
/// `Json`), which leave no partially constructed object behind.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid user or API parameter (dimension mismatch, zero mass, ...).
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Malformed or truncated persisted data.
    #[error("format error: {0}")]
    Format(String),

    /// A single frame resolved more collisions than the configured cap.
    #[error("collision resolution limit exceeded within one step ({0})")]
    IterationLimit(usize),

    /// Propagated I/O errors from save/load streams.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Propagated JSON syntax errors from load streams.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
