//! Detection-driven batch crop: find cards, cut them out, deskew and save.

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::FontVec;
use image::{DynamicImage, ImageError, ImageReader, Rgb};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{debug, error, info, instrument, warn};

use crate::config::BatchConfig;
use crate::deskew::correct_rotation_with;
use crate::detection::{filter_detections, Detection, Detector};
use crate::error::{BatchError, CropError};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

const SYSTEM_FONTS: [&str; 3] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

const LABEL_SCALE: f32 = 16.0;

/// Outcome of processing one source image
#[derive(Debug)]
pub struct ImageReport {
    pub source: PathBuf,
    /// Detections that passed the confidence threshold
    pub detections: Vec<Detection>,
    /// Crops written to disk
    pub saved: Vec<PathBuf>,
    /// Crops, or the annotated preview, that were not written, with the reason
    pub skipped_crops: Vec<CropError>,
}

/// Totals for a whole run
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub images: usize,
    pub crops_saved: usize,
    pub crop_failures: usize,
    /// Images that could not be decoded or run through the detector
    pub failed_images: Vec<CropError>,
    pub reports: Vec<ImageReport>,
}

/// Whether `path` has one of the accepted raster extensions (any case)
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Resolve the input path to a sorted list of image files.
///
/// A file path is returned as is; a directory is listed without recursion.
pub fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>, BatchError> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        return Err(BatchError::InputNotFound(input.to_path_buf()));
    }

    let read_err = |source| BatchError::ReadInputDir {
        path: input.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(input).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && is_supported_image(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_stem(source: &Path) -> String {
    source
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

/// `{output_dir}/{stem}_{label}_{index}.{format}`
pub fn crop_output_path(config: &BatchConfig, source: &Path, index: usize) -> PathBuf {
    config.output_dir.join(format!(
        "{}_{}_{}.{}",
        file_stem(source),
        config.label,
        index,
        config.format
    ))
}

/// `{output_dir}/{stem}_detections.{format}`
pub fn annotation_output_path(config: &BatchConfig, source: &Path) -> PathBuf {
    config
        .output_dir
        .join(format!("{}_detections.{}", file_stem(source), config.format))
}

/// Save `image`, dropping alpha and extra depth for JPEG output
fn save_image(image: &DynamicImage, path: &Path) -> Result<(), ImageError> {
    let is_jpeg = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));

    if is_jpeg {
        DynamicImage::ImageRgb8(image.to_rgb8()).save(path)
    } else {
        image.save(path)
    }
}

fn load_image(path: &Path) -> Result<DynamicImage, ImageError> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

fn read_font(path: &Path) -> Result<FontVec, String> {
    let data = fs::read(path).map_err(|e| e.to_string())?;
    FontVec::try_from_vec(data).map_err(|e| e.to_string())
}

/// Font for the preview labels.
///
/// An explicit path is the only candidate when given; otherwise the first
/// system font that parses is used. `None` means labels are skipped.
pub fn load_label_font(explicit: Option<&Path>) -> Option<FontVec> {
    if let Some(path) = explicit {
        return match read_font(path) {
            Ok(font) => Some(font),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not load label font");
                None
            }
        };
    }

    let font = SYSTEM_FONTS
        .iter()
        .find_map(|path| read_font(Path::new(path)).ok());
    if font.is_none() {
        debug!("no system font found, labels will be skipped");
    }
    font
}

pub fn confidence_label(confidence: f32) -> String {
    format!("Conf: {:.2}", confidence)
}

/// Source image with every retained box outlined and, given a font,
/// labelled with its confidence
fn annotate(
    image: &DynamicImage,
    detections: &[Detection],
    font: Option<&FontVec>,
) -> DynamicImage {
    let mut canvas = image.to_rgb8();
    for detection in detections {
        let b = detection.bbox;
        let rect = Rect::at(b.x1 as i32, b.y1 as i32).of_size(b.width(), b.height());
        draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);

        if let Some(font) = font {
            // Above the box unless that would leave the canvas
            let y = if b.y1 > 20 {
                b.y1 as i32 - LABEL_SCALE as i32 - 4
            } else {
                b.y1 as i32 + 4
            };
            let text = confidence_label(detection.confidence);
            draw_text_mut(&mut canvas, BOX_COLOR, b.x1 as i32 + 2, y, LABEL_SCALE, font, &text);
        }
    }
    DynamicImage::ImageRgb8(canvas)
}

/// Detect, crop, deskew and save every card found in one image.
///
/// Errors are returned only when the image itself is unusable; failures of
/// individual crops are collected in the report.
#[instrument(skip_all, fields(source = %source.display()))]
pub fn process_image<D: Detector + ?Sized>(
    detector: &mut D,
    source: &Path,
    config: &BatchConfig,
    font: Option<&FontVec>,
) -> Result<ImageReport, CropError> {
    let image = load_image(source).map_err(|e| CropError::UnreadableImage {
        path: source.to_path_buf(),
        source: e,
    })?;

    let raw = detector
        .detect(&image, config.confidence_threshold)
        .map_err(|e| CropError::Detection {
            path: source.to_path_buf(),
            source: e,
        })?;
    let detections = filter_detections(&raw, config.confidence_threshold, config.threshold_mode);
    debug!(raw = raw.len(), retained = detections.len(), "filtered detections");

    let mut report = ImageReport {
        source: source.to_path_buf(),
        detections,
        saved: Vec::new(),
        skipped_crops: Vec::new(),
    };

    for (index, detection) in report.detections.iter().enumerate() {
        let mut crop = detection.bbox.crop(&image);

        if config.deskew {
            match correct_rotation_with(&crop, &config.deskew_options) {
                Ok(upright) => crop = upright,
                Err(e) => {
                    warn!(index, error = %e, "skipping crop");
                    report.skipped_crops.push(CropError::Deskew {
                        path: source.to_path_buf(),
                        index,
                        source: e,
                    });
                    continue;
                }
            }
        }

        let path = crop_output_path(config, source, index);
        match save_image(&crop, &path) {
            Ok(()) => {
                info!(path = %path.display(), confidence = detection.confidence, "saved crop");
                report.saved.push(path);
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to write crop");
                report.skipped_crops.push(CropError::WriteFailure { path, source: e });
            }
        }
    }

    if config.annotate {
        let path = annotation_output_path(config, source);
        if let Err(e) = save_image(&annotate(&image, &report.detections, font), &path) {
            error!(path = %path.display(), error = %e, "failed to write annotated image");
            report.skipped_crops.push(CropError::WriteFailure { path, source: e });
        }
    }

    info!(
        detections = report.detections.len(),
        saved = report.saved.len(),
        "processed image"
    );

    Ok(report)
}

/// Run the detector over every input image and write the crops.
///
/// Only a missing input or an uncreatable output directory ends the run;
/// every per-image and per-crop failure is logged and counted.
#[instrument(
    skip_all,
    fields(input = %config.input_path.display(), output = %config.output_dir.display())
)]
pub fn run_batch<D: Detector + ?Sized>(
    detector: &mut D,
    config: &BatchConfig,
) -> Result<BatchSummary, BatchError> {
    let inputs = collect_inputs(&config.input_path)?;
    fs::create_dir_all(&config.output_dir).map_err(|source| BatchError::CreateOutputDir {
        path: config.output_dir.clone(),
        source,
    })?;

    info!(count = inputs.len(), "found images");

    let font = if config.annotate {
        load_label_font(config.font_path.as_deref())
    } else {
        None
    };

    let mut summary = BatchSummary::default();
    for source in &inputs {
        summary.images += 1;
        match process_image(detector, source, config, font.as_ref()) {
            Ok(report) => {
                summary.crops_saved += report.saved.len();
                summary.crop_failures += report.skipped_crops.len();
                summary.reports.push(report);
            }
            Err(e) => {
                warn!(error = %e, "skipping image");
                summary.failed_images.push(e);
            }
        }
    }

    info!(
        images = summary.images,
        saved = summary.crops_saved,
        crop_failures = summary.crop_failures,
        failed_images = summary.failed_images.len(),
        "batch finished"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_image(Path::new("a/card.jpg")));
        assert!(is_supported_image(Path::new("card.JPEG")));
        assert!(is_supported_image(Path::new("card.Png")));
        assert!(!is_supported_image(Path::new("card.gif")));
        assert!(!is_supported_image(Path::new("README")));
    }

    #[test]
    fn test_crop_naming() {
        let config = BatchConfig {
            output_dir: PathBuf::from("out"),
            ..Default::default()
        };
        assert_eq!(
            crop_output_path(&config, Path::new("in/scan.01.jpg"), 0),
            PathBuf::from("out/scan.01_aadhaar_0.png")
        );
        assert_eq!(
            annotation_output_path(&config, Path::new("in/scan.jpg")),
            PathBuf::from("out/scan_detections.png")
        );
    }

    #[test]
    fn test_confidence_label() {
        assert_eq!(confidence_label(0.953), "Conf: 0.95");
        assert_eq!(confidence_label(1.0), "Conf: 1.00");
    }

    #[test]
    fn test_unreadable_label_font_skips_labels() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("font.ttf");
        fs::write(&bogus, b"not a font").unwrap();

        assert!(load_label_font(Some(&bogus)).is_none());
        assert!(load_label_font(Some(&dir.path().join("missing.ttf"))).is_none());
    }

    #[test]
    fn test_annotation_outlines_boxes() {
        let image = DynamicImage::ImageLuma8(image::GrayImage::new(60, 50));
        let detections = [Detection {
            bbox: crate::BoundingBox::new(10, 30, 40, 45).unwrap(),
            confidence: 0.97,
        }];

        let annotated = annotate(&image, &detections, None).to_rgb8();
        assert_eq!(annotated.get_pixel(10, 30), &BOX_COLOR);
        assert_eq!(annotated.get_pixel(39, 44), &BOX_COLOR);
        assert_eq!(annotated.get_pixel(25, 37), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let result = collect_inputs(Path::new("no/such/input/dir"));
        assert!(matches!(result, Err(BatchError::InputNotFound(_))));
    }
}
