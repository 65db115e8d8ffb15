//! Unified error type for the fleet-optimizer workspace.
//!
//! Library crates return [`FleetError`]; application edges (CLI, HTTP)
//! wrap it in `anyhow` with context. Per-route infeasibility is *not* an
//! error — it is domain data (see `fleet-algo`'s `Reason`) recorded as an
//! unassignment while the run continues.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    /// I/O errors (file access, sockets, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Input validation failures; the run aborts before any mutation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Relational backend errors
    #[error("Database error: {0}")]
    Database(String),

    /// Connection pool exhausted or closed
    #[error("Resource exhaustion: {0}")]
    Pool(String),

    /// Cooperative cancellation; the partial result is still valid
    #[error("Run cancelled")]
    Cancelled,

    /// Internal invariant violated (odometer regression, availability
    /// regression). Fatal.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using FleetError.
pub type FleetResult<T> = Result<T, FleetError>;

impl From<anyhow::Error> for FleetError {
    fn from(err: anyhow::Error) -> Self {
        FleetError::Other(err.to_string())
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Parse(err.to_string())
    }
}

impl From<String> for FleetError {
    fn from(s: String) -> Self {
        FleetError::Other(s)
    }
}

impl From<&str> for FleetError {
    fn from(s: &str) -> Self {
        FleetError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category() {
        let err = FleetError::Validation("route 7 has no segments".into());
        assert!(err.to_string().contains("Validation error"));
        assert!(err.to_string().contains("route 7"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: FleetError = io_err.into();
        assert!(matches!(err, FleetError::Io(_)));
    }

    #[test]
    fn question_mark_propagates() {
        fn inner() -> FleetResult<()> {
            Err(FleetError::Invariant("odometer went backwards".into()))
        }
        fn outer() -> FleetResult<()> {
            inner()?;
            Ok(())
        }
        assert!(matches!(outer(), Err(FleetError::Invariant(_))));
    }
}
