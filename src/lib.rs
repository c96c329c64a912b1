pub mod batch;
pub mod cli;
pub mod config;
pub mod deskew;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod train;
pub mod transform;
#[cfg(feature = "onnx")]
pub mod yolo;

pub use batch::{process_image, run_batch, BatchSummary, ImageReport};
pub use cli::Cli;
pub use config::{BatchConfig, DeskewOptions, Device, MaskPolarity, ThresholdMode};
pub use deskew::{correct_rotation, correct_rotation_with, estimate_skew, SkewEstimate};
pub use detection::{filter_detections, non_max_suppression, BoundingBox, Detection, Detector};
pub use error::{BatchError, CropError, DeskewError, DetectionError, TrainError};
pub use geometry::{min_area_rect, normalize_angle, RotatedRect};
pub use train::TrainConfig;
pub use transform::warp_replicate;
#[cfg(feature = "onnx")]
pub use yolo::{YoloDetector, YoloDetectorBuilder};
