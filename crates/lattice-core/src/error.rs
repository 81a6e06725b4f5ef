//! Error types for Lattice.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level result type for Lattice operations.
pub type Result<T> = std::result::Result<T, LatticeError>;

/// Top-level error type for Lattice.
#[derive(Debug, Error)]
pub enum LatticeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("write verification failed for {}: content on disk does not match", path.display())]
    VerificationFailed { path: PathBuf },

    #[error("write to {} failed after {attempts} attempts: {source}", path.display())]
    RetriesExhausted {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
}

impl LatticeError {
    /// Shorthand for a missing whiteboard document.
    #[must_use]
    pub fn whiteboard_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "whiteboard",
            id: id.into(),
        }
    }

    /// `true` for errors the caller can treat as "nothing there".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for LatticeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_display_human_readable_messages() {
        let err = LatticeError::whiteboard_not_found("board-7");
        let msg = err.to_string();
        assert!(msg.contains("whiteboard"));
        assert!(msg.contains("board-7"));

        let err = LatticeError::VerificationFailed {
            path: PathBuf::from("/vault/.whiteboards/index.json"),
        };
        assert!(err.to_string().contains("index.json"));
    }

    #[test]
    fn not_found_covers_missing_files() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(LatticeError::from(io).is_not_found());
        assert!(!LatticeError::Parse("bad".to_string()).is_not_found());
    }
}
