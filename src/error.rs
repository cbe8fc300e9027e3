//! Error taxonomy for a repair run.

use std::path::PathBuf;

/// Result type for repair operations.
pub type Result<T> = std::result::Result<T, RepairError>;

/// Errors that abort a repair run.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    /// The input is not a readable zip container, or an entry cannot be staged.
    #[error("invalid wheel archive {}: {message}", path.display())]
    ArchiveFormat { path: PathBuf, message: String },

    /// Malformed exclusion rule or per-object configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An external dynamic-section tool invocation failed.
    #[error("{operation} failed on {}: {source}", file.display())]
    Patch {
        file: PathBuf,
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The metadata directory could not be located or RECORD could not be rebuilt.
    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RepairError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn archive(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::ArchiveFormat {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn patch(
        file: impl Into<PathBuf>,
        operation: &'static str,
        source: anyhow::Error,
    ) -> Self {
        Self::Patch {
            file: file.into(),
            operation,
            source: source.into(),
        }
    }

    /// Name of the failed editor operation, for `Patch` errors.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Patch { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}
