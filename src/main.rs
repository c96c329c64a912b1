use anyhow::{Context, Result};
use clap::Parser;
use image::ImageReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use card_crop::cli::{Command, CropArgs, DeskewArgs, TrainArgs};
use card_crop::{correct_rotation_with, estimate_skew, Cli, DeskewOptions};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Crop(args) => crop(args),
        Command::Deskew(args) => deskew(args),
        Command::Train(args) => train(args),
    }
}

#[cfg(feature = "onnx")]
fn crop(args: &CropArgs) -> Result<()> {
    use card_crop::{run_batch, YoloDetector};

    let config = args.to_config();
    let mut detector = YoloDetector::from_config(&config)
        .with_context(|| format!("Failed to load detector: {:?}", config.model_path))?;

    let summary = run_batch(&mut detector, &config).context("Batch crop failed")?;

    eprintln!(
        "Processed {} image(s): {} crop(s) saved to {:?}",
        summary.images, summary.crops_saved, config.output_dir
    );
    if summary.crop_failures > 0 || !summary.failed_images.is_empty() {
        eprintln!(
            "Skipped {} crop(s) and {} image(s), see log for details",
            summary.crop_failures,
            summary.failed_images.len()
        );
    }

    Ok(())
}

#[cfg(not(feature = "onnx"))]
fn crop(_args: &CropArgs) -> Result<()> {
    anyhow::bail!("card-crop was built without the `onnx` feature; no detector is available")
}

fn deskew(args: &DeskewArgs) -> Result<()> {
    let img = ImageReader::open(&args.input)
        .with_context(|| format!("Failed to open input file: {:?}", args.input))?
        .decode()
        .with_context(|| format!("Failed to decode image: {:?}", args.input))?;

    let options = DeskewOptions::from(args.deskew);
    let estimate = estimate_skew(&img, &options).context("Failed to estimate skew")?;
    info!(
        angle = estimate.angle,
        threshold = estimate.threshold,
        foreground = estimate.foreground_pixels,
        "skew estimated"
    );

    let corrected = correct_rotation_with(&img, &options).context("Failed to deskew image")?;

    let output_path = args.output_path();
    corrected
        .save(&output_path)
        .with_context(|| format!("Failed to save output: {:?}", output_path))?;

    eprintln!(
        "Saved deskewed image ({:.2}° corrected): {:?}",
        estimate.angle, output_path
    );

    Ok(())
}

fn train(args: &TrainArgs) -> Result<()> {
    let config = args.to_config();
    config.run().context("Training failed")?;
    eprintln!("Training finished");
    Ok(())
}
