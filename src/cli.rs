use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{BatchConfig, DeskewOptions, Device, MaskPolarity, ThresholdMode};
use crate::train::TrainConfig;

#[derive(Parser, Debug)]
#[command(name = "card-crop")]
#[command(version, about = "Detect, crop and deskew identity cards in photographs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Show detection details
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Detect cards and save one crop per detection
    Crop(CropArgs),
    /// Deskew a single already-cropped image
    Deskew(DeskewArgs),
    /// Train the detector with the external trainer
    Train(TrainArgs),
}

#[derive(Args, Debug, Clone, Copy)]
pub struct DeskewFlags {
    /// Which side of the Otsu split is the card
    #[arg(long, value_enum, default_value_t = MaskPolarity::Auto)]
    pub polarity: MaskPolarity,

    /// Leave skews smaller than this many degrees uncorrected
    #[arg(long, default_value = "0")]
    pub min_angle: f64,
}

impl From<DeskewFlags> for DeskewOptions {
    fn from(flags: DeskewFlags) -> Self {
        Self {
            polarity: flags.polarity,
            min_angle: flags.min_angle,
        }
    }
}

#[derive(Args, Debug)]
pub struct CropArgs {
    /// Input image or directory of .jpg/.jpeg/.png files
    #[arg(short, long, default_value = "inference/images")]
    pub input: PathBuf,

    /// Output directory, created if absent
    #[arg(short, long, default_value = "inference/crops")]
    pub output: PathBuf,

    /// ONNX export of the trained detector
    #[arg(short, long, default_value = "runs/detect/train/weights/best.onnx")]
    pub model: PathBuf,

    /// Minimum detection confidence
    #[arg(short, long, default_value = "0.9", value_parser = parse_unit_interval)]
    pub confidence: f32,

    /// Require confidence strictly above the threshold
    #[arg(long)]
    pub exclusive: bool,

    /// Inference device
    #[arg(long, value_enum, default_value_t = Device::Auto)]
    pub device: Device,

    /// Save crops without deskewing them
    #[arg(long)]
    pub no_deskew: bool,

    #[command(flatten)]
    pub deskew: DeskewFlags,

    /// Label between the file stem and the crop index
    #[arg(long, default_value = "aadhaar")]
    pub label: String,

    /// Output file format (extension)
    #[arg(long, default_value = "png")]
    pub format: String,

    /// Also save each source image with its detections outlined
    #[arg(long)]
    pub annotate: bool,

    /// Font for the confidence labels on annotated images
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// Overlap above which weaker boxes are suppressed
    #[arg(long, default_value = "0.5", value_parser = parse_unit_interval)]
    pub iou: f32,

    /// Detector input resolution
    #[arg(long, default_value = "640")]
    pub input_size: u32,
}

impl CropArgs {
    pub fn to_config(&self) -> BatchConfig {
        BatchConfig {
            input_path: self.input.clone(),
            output_dir: self.output.clone(),
            model_path: self.model.clone(),
            confidence_threshold: self.confidence,
            threshold_mode: if self.exclusive {
                ThresholdMode::Exclusive
            } else {
                ThresholdMode::Inclusive
            },
            device: self.device,
            deskew: !self.no_deskew,
            deskew_options: self.deskew.into(),
            label: self.label.clone(),
            format: self.format.trim_start_matches('.').to_string(),
            annotate: self.annotate,
            font_path: self.font.clone(),
            iou_threshold: self.iou,
            input_size: self.input_size,
        }
    }
}

#[derive(Args, Debug)]
pub struct DeskewArgs {
    /// Input image path
    #[arg(required = true)]
    pub input: PathBuf,

    /// Output path [default: input_deskewed.png]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub deskew: DeskewFlags,
}

impl DeskewArgs {
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let stem = self.input.file_stem().unwrap_or_default().to_string_lossy();
            let parent = self.input.parent().unwrap_or(std::path::Path::new("."));
            parent.join(format!("{}_deskewed.png", stem))
        })
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Dataset descriptor
    #[arg(short, long, default_value = "data.yaml")]
    pub data: PathBuf,

    /// Pretrained weights to start from
    #[arg(short, long, default_value = "yolov8n.pt")]
    pub model: String,

    #[arg(short, long, default_value = "60")]
    pub epochs: u32,

    /// Training image size
    #[arg(long, default_value = "640")]
    pub imgsz: u32,

    #[arg(long, value_enum, default_value_t = Device::Auto)]
    pub device: Device,

    /// Trainer executable
    #[arg(long, default_value = "yolo")]
    pub trainer: String,
}

impl TrainArgs {
    pub fn to_config(&self) -> TrainConfig {
        TrainConfig {
            trainer: self.trainer.clone(),
            data: self.data.clone(),
            base_model: self.model.clone(),
            image_size: self.imgsz,
            epochs: self.epochs,
            device: self.device,
        }
    }
}

fn parse_unit_interval(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .parse()
        .map_err(|_| format!("Invalid number: {}", s))?;

    if !(0.0..=1.0).contains(&value) {
        return Err(format!("Value {} must be between 0 and 1", value));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_defaults_match_config_defaults() {
        let cli = Cli::try_parse_from(["card-crop", "crop"]).unwrap();
        let Command::Crop(args) = cli.command else {
            panic!("expected crop subcommand");
        };
        assert_eq!(args.to_config(), BatchConfig::default());
    }

    #[test]
    fn test_crop_flags() {
        let cli = Cli::try_parse_from([
            "card-crop",
            "crop",
            "--input",
            "photos",
            "--confidence",
            "0.8",
            "--exclusive",
            "--no-deskew",
            "--polarity",
            "dark",
            "--device",
            "coreml",
            "--format",
            ".jpg",
            "--annotate",
            "--font",
            "fonts/DejaVuSans.ttf",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);

        let Command::Crop(args) = cli.command else {
            panic!("expected crop subcommand");
        };
        let config = args.to_config();
        assert_eq!(config.input_path, PathBuf::from("photos"));
        assert_eq!(config.confidence_threshold, 0.8);
        assert_eq!(config.threshold_mode, ThresholdMode::Exclusive);
        assert!(!config.deskew);
        assert_eq!(config.deskew_options.polarity, MaskPolarity::Dark);
        assert_eq!(config.device, Device::CoreMl);
        assert_eq!(config.format, "jpg");
        assert!(config.annotate);
        assert_eq!(config.font_path, Some(PathBuf::from("fonts/DejaVuSans.ttf")));
    }

    #[test]
    fn test_confidence_out_of_range() {
        assert!(Cli::try_parse_from(["card-crop", "crop", "--confidence", "1.5"]).is_err());
        assert!(parse_unit_interval("abc").is_err());
    }

    #[test]
    fn test_deskew_output_path() {
        let cli = Cli::try_parse_from(["card-crop", "deskew", "crops/card_0.png"]).unwrap();
        let Command::Deskew(args) = cli.command else {
            panic!("expected deskew subcommand");
        };
        assert_eq!(args.output_path(), PathBuf::from("crops/card_0_deskewed.png"));
    }

    #[test]
    fn test_train_defaults_match_config_defaults() {
        let cli = Cli::try_parse_from(["card-crop", "train"]).unwrap();
        let Command::Train(args) = cli.command else {
            panic!("expected train subcommand");
        };
        assert_eq!(args.to_config(), TrainConfig::default());
    }
}
