use std::path::PathBuf;
use std::process::ExitStatus;

use image::{ColorType, ImageError};
use thiserror::Error;

/// Failures of the deskew corrector
#[derive(Debug, Error)]
pub enum DeskewError {
    #[error("image has no pixels")]
    EmptyImage,

    /// The foreground mask is empty or thresholding found a single class,
    /// so there is no region to fit a rectangle to.
    #[error("no foreground region to estimate skew from")]
    DegenerateRegion,

    #[error("unsupported pixel format: {0:?}")]
    UnsupportedPixelFormat(ColorType),

    #[error("rotation transform is not invertible")]
    SingularTransform,
}

/// Failures of a detector
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("model not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("failed to load model: {0}")]
    Model(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unexpected model output: {0}")]
    UnexpectedOutput(String),
}

/// Failure isolated to one source image or one crop of it
#[derive(Debug, Error)]
pub enum CropError {
    #[error("cannot decode {}: {source}", path.display())]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("detection failed for {}: {source}", path.display())]
    Detection {
        path: PathBuf,
        #[source]
        source: DetectionError,
    },

    #[error("cannot deskew crop {index} of {}: {source}", path.display())]
    Deskew {
        path: PathBuf,
        index: usize,
        #[source]
        source: DeskewError,
    },

    #[error("cannot write {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
}

/// Failure that aborts a whole run
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("input path does not exist: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("cannot read input directory {}: {source}", path.display())]
    ReadInputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create output directory {}: {source}", path.display())]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to launch or complete the external trainer
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("dataset descriptor not found: {}", .0.display())]
    DatasetNotFound(PathBuf),

    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("trainer exited with {0}")]
    Failed(ExitStatus),
}
