use std::path::PathBuf;

use clap::ValueEnum;

/// Compute device used for inference and training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Device {
    /// Use an accelerator when one is compiled in, otherwise the CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
    #[value(name = "coreml")]
    CoreMl,
}

impl Device {
    /// Device argument understood by the external trainer.
    ///
    /// `Auto` resolves to Apple's `mps` backend on macOS and to `cpu` elsewhere.
    pub fn trainer_arg(&self) -> &'static str {
        match self {
            Device::Auto if cfg!(target_os = "macos") => "mps",
            Device::Auto | Device::Cpu => "cpu",
            Device::Cuda => "0",
            Device::CoreMl => "mps",
        }
    }
}

/// How a detection's confidence is compared against the configured threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ThresholdMode {
    /// Keep detections with `confidence >= threshold`
    #[default]
    Inclusive,
    /// Keep detections with `confidence > threshold`
    Exclusive,
}

impl ThresholdMode {
    pub fn passes(&self, confidence: f32, threshold: f32) -> bool {
        match self {
            ThresholdMode::Inclusive => confidence >= threshold,
            ThresholdMode::Exclusive => confidence > threshold,
        }
    }
}

/// Which side of the Otsu split is treated as the document.
///
/// Thresholding labels every pixel as either bright (above the level) or
/// dark. Which of the two is the card depends on the photograph, so the
/// choice is explicit rather than baked into the mask construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MaskPolarity {
    /// The class with the smaller enclosing rectangle is the foreground (ties
    /// go to bright)
    #[default]
    Auto,
    /// Dark pixels are the foreground
    Dark,
    /// Bright pixels are the foreground
    Bright,
}

/// Options for the deskew corrector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeskewOptions {
    pub polarity: MaskPolarity,
    /// Skews smaller than this (degrees) are left uncorrected
    pub min_angle: f64,
}

impl Default for DeskewOptions {
    fn default() -> Self {
        Self {
            polarity: MaskPolarity::Auto,
            min_angle: 0.0,
        }
    }
}

/// Configuration for a detection-driven crop run.
///
/// Crops are written as `{output_dir}/{stem}_{label}_{index}.{format}` where
/// `index` counts retained detections of one source image starting at 0.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Single image or directory of `.jpg`, `.jpeg` and `.png` files
    pub input_path: PathBuf,
    /// Created if absent
    pub output_dir: PathBuf,
    /// ONNX export of the trained detector
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub threshold_mode: ThresholdMode,
    pub device: Device,
    /// Pass each crop through the deskew corrector
    pub deskew: bool,
    pub deskew_options: DeskewOptions,
    pub label: String,
    /// Output file extension, also selects the encoder
    pub format: String,
    /// Also save the source image with retained boxes outlined
    pub annotate: bool,
    /// TrueType font for the preview labels; system fonts are tried if unset
    pub font_path: Option<PathBuf>,
    /// Overlap above which the detector suppresses the weaker box
    pub iou_threshold: f32,
    /// Square side length the detector resizes its input to
    pub input_size: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("inference/images"),
            output_dir: PathBuf::from("inference/crops"),
            model_path: PathBuf::from("runs/detect/train/weights/best.onnx"),
            confidence_threshold: 0.9,
            threshold_mode: ThresholdMode::Inclusive,
            device: Device::Auto,
            deskew: true,
            deskew_options: DeskewOptions::default(),
            label: "aadhaar".to_string(),
            format: "png".to_string(),
            annotate: false,
            font_path: None,
            iou_threshold: 0.5,
            input_size: 640,
        }
    }
}
