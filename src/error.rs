use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Accumulator serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Failed to load {}: {reason}", path.display())]
    DataLoad { path: PathBuf, reason: String },

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Resized content {height}x{width} does not fit in a {canvas}x{canvas} canvas")]
    CanvasOverflow {
        height: usize,
        width: usize,
        canvas: usize,
    },

    #[error("Evaluation error: {0}")]
    Evaluation(String),
}

/// Broad failure category, used to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed input files. The sample can be skipped.
    DataLoad,
    /// A transform rejected its input. The sample can be skipped.
    Transform,
    /// Centroid or accumulator failure. The run must stop.
    Evaluation,
    /// Bad configuration or unreadable config file.
    Config,
    /// Filesystem or persistence failure outside sample loading.
    Io,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DataLoad { .. } => ErrorKind::DataLoad,
            Error::Shape(_) | Error::Transform(_) | Error::CanvasOverflow { .. } => {
                ErrorKind::Transform
            }
            Error::Evaluation(_) => ErrorKind::Evaluation,
            Error::Json(_) | Error::Config(_) => ErrorKind::Config,
            Error::Io(_) | Error::Serialization(_) => ErrorKind::Io,
        }
    }

    /// Whether a per-sample failure may be skipped instead of aborting a run.
    pub fn is_skippable(&self) -> bool {
        matches!(self.kind(), ErrorKind::DataLoad | ErrorKind::Transform)
    }

    pub(crate) fn data_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::DataLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
