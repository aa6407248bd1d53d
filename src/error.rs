use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the render pipeline.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Everything that can stop a render or an export.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Missing or malformed plan/config field. Raised before any rendering work.
    #[error("invalid field '{field}': {message}")]
    Validation { field: String, message: String },

    /// A pattern could not be laid out on the step grid.
    #[error("cannot schedule '{track}' (index {index}): {message}")]
    Scheduling {
        track: String,
        index: usize,
        message: String,
    },

    /// NaN or Inf found in a rendered buffer.
    #[error("non-finite sample during {stage} in buffer '{buffer}' at sample {index}")]
    NumericIntegrity {
        stage: &'static str,
        buffer: String,
        index: usize,
    },

    /// File could not be written or read.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Binary data that does not match the expected layout, or a value
    /// that cannot be represented in it.
    #[error("{format} encoding error at byte {offset}: {message}")]
    Encoding {
        format: &'static str,
        offset: usize,
        message: String,
    },

    /// The dedicated synthesis thread pool could not be started.
    #[error("failed to start synthesis workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl RenderError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        RenderError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn scheduling(track: impl Into<String>, index: usize, message: impl Into<String>) -> Self {
        RenderError::Scheduling {
            track: track.into(),
            index,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RenderError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn encoding(format: &'static str, offset: usize, message: impl Into<String>) -> Self {
        RenderError::Encoding {
            format,
            offset,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(e: serde_json::Error) -> Self {
        RenderError::validation("plan", e.to_string())
    }
}
