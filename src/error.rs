use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OcrError>;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    #[error("image has zero size ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("inference runtime: {0}")]
    Runtime(#[from] ort::Error),

    #[error("failed to read recognizer keys from {path:?}")]
    Keys {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// A collaborator returned something that can't be lined up with its input.
    #[error("unexpected model output: {0}")]
    UnexpectedOutput(String),
}
