//! Skew estimation and correction for cropped document regions.
//!
//! The crop is binarized with Otsu's method, the foreground pixels are
//! enclosed in a minimum-area rectangle, and the rectangle's closest-axis
//! angle is rotated away about the image centre.

use image::{DynamicImage, GrayImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::point::Point;
use tracing::{debug, instrument};

use crate::config::{DeskewOptions, MaskPolarity};
use crate::error::DeskewError;
use crate::geometry::{min_area_rect, normalize_angle, rotation_matrix, RotatedRect};
use crate::transform::warp_replicate;

/// Result of skew estimation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewEstimate {
    /// Closest-axis rotation in degrees, within (-45, 45]
    pub angle: f64,
    /// Rectangle fitted around the foreground
    pub rect: RotatedRect,
    /// Number of pixels in the foreground mask
    pub foreground_pixels: usize,
    /// Otsu level used for binarization
    pub threshold: u8,
}

/// Foreground pixels after Otsu binarization and the rectangle enclosing them.
///
/// Thresholding marks pixels strictly above the level as bright. Which class
/// is the document is decided by `polarity`; see [`MaskPolarity`].
fn fit_foreground(
    gray: &GrayImage,
    level: u8,
    polarity: MaskPolarity,
) -> Result<(usize, RotatedRect), DeskewError> {
    let mask = threshold(gray, level, ThresholdType::Binary);

    let mut bright = Vec::new();
    let mut dark = Vec::new();
    for (x, y, p) in mask.enumerate_pixels() {
        let point = Point::new(x as i32, y as i32);
        if p[0] > 0 {
            bright.push(point);
        } else {
            dark.push(point);
        }
    }

    // A single class means the threshold separated nothing
    if bright.is_empty() || dark.is_empty() {
        return Err(DeskewError::DegenerateRegion);
    }

    let fit = |points: &[Point<i32>]| {
        min_area_rect(points)
            .map(|rect| (points.len(), rect))
            .ok_or(DeskewError::DegenerateRegion)
    };

    match polarity {
        MaskPolarity::Bright => fit(&bright),
        MaskPolarity::Dark => fit(&dark),
        MaskPolarity::Auto => {
            let bright = fit(&bright)?;
            let dark = fit(&dark)?;
            // A tight crop leaves the background only in the corners, and
            // those corners span the whole crop
            if bright.1.area() <= dark.1.area() {
                Ok(bright)
            } else {
                Ok(dark)
            }
        }
    }
}

/// Estimate the in-plane skew of `image`
#[instrument(level = "debug", skip(image), fields(width = image.width(), height = image.height()))]
pub fn estimate_skew(
    image: &DynamicImage,
    options: &DeskewOptions,
) -> Result<SkewEstimate, DeskewError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(DeskewError::EmptyImage);
    }

    let gray = image.to_luma8();
    let level = otsu_level(&gray);
    let (foreground_pixels, rect) = fit_foreground(&gray, level, options.polarity)?;
    let angle = normalize_angle(rect.angle);

    debug!(
        level,
        foreground = foreground_pixels,
        raw_angle = rect.angle,
        angle,
        "estimated skew"
    );

    Ok(SkewEstimate {
        angle,
        rect,
        foreground_pixels,
        threshold: level,
    })
}

/// Deskew `image` with default options
pub fn correct_rotation(image: &DynamicImage) -> Result<DynamicImage, DeskewError> {
    correct_rotation_with(image, &DeskewOptions::default())
}

/// Rotate `image` upright about its centre.
///
/// The result has the same dimensions, channel layout and sample type as the
/// input. Corners rotated off the canvas are lost and uncovered areas repeat
/// the nearest edge pixel.
pub fn correct_rotation_with(
    image: &DynamicImage,
    options: &DeskewOptions,
) -> Result<DynamicImage, DeskewError> {
    let estimate = estimate_skew(image, options)?;

    if estimate.angle.abs() < options.min_angle {
        debug!(angle = estimate.angle, "skew below minimum, left as is");
        return Ok(image.clone());
    }

    let center = (image.width() as f64 / 2.0, image.height() as f64 / 2.0);
    let matrix = rotation_matrix(estimate.angle, center);
    warp_replicate(image, &matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    /// Bright rectangle of `size` rotated by `angle` degrees (y down) about
    /// the centre of a black canvas
    fn rotated_card(canvas: (u32, u32), size: (f64, f64), angle: f64) -> DynamicImage {
        let (sin, cos) = angle.to_radians().sin_cos();
        let center = (canvas.0 as f64 / 2.0, canvas.1 as f64 / 2.0);
        let gray = GrayImage::from_fn(canvas.0, canvas.1, |x, y| {
            let dx = x as f64 - center.0;
            let dy = y as f64 - center.1;
            let u = dx * cos + dy * sin;
            let v = -dx * sin + dy * cos;
            if u.abs() <= size.0 / 2.0 && v.abs() <= size.1 / 2.0 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        DynamicImage::ImageLuma8(gray)
    }

    #[test]
    fn test_upright_rectangle_needs_no_correction() {
        let img = rotated_card((200, 150), (120.0, 60.0), 0.0);
        let options = DeskewOptions::default();

        let first = estimate_skew(&img, &options).unwrap();
        assert!(first.angle.abs() < 0.01);

        let corrected = correct_rotation(&img).unwrap();
        let second = estimate_skew(&corrected, &options).unwrap();
        assert!(second.angle.abs() < 0.01);
    }

    #[test]
    fn test_twenty_degree_skew_is_removed() {
        let img = rotated_card((400, 300), (200.0, 100.0), 20.0);
        let options = DeskewOptions::default();

        let before = estimate_skew(&img, &options).unwrap();
        assert!((before.angle - 20.0).abs() < 1.0, "estimated {}", before.angle);

        let corrected = correct_rotation(&img).unwrap();
        assert_eq!(corrected.color(), img.color());
        assert_eq!((corrected.width(), corrected.height()), (400, 300));

        let after = estimate_skew(&corrected, &options).unwrap();
        assert!(after.angle.abs() < 1.0, "residual {}", after.angle);
    }

    #[test]
    fn test_negative_skew_is_removed() {
        let img = rotated_card((300, 300), (160.0, 90.0), -12.0);
        let options = DeskewOptions::default();

        assert!((estimate_skew(&img, &options).unwrap().angle + 12.0).abs() < 1.0);
        let corrected = correct_rotation(&img).unwrap();
        assert!(estimate_skew(&corrected, &options).unwrap().angle.abs() < 1.0);
    }

    #[test]
    fn test_shape_and_depth_preserved() {
        let gray = rotated_card((90, 70), (50.0, 30.0), 8.0);
        let inputs = [
            gray.clone(),
            DynamicImage::ImageRgb8(gray.to_rgb8()),
            DynamicImage::ImageRgba8(gray.to_rgba8()),
            DynamicImage::ImageLuma16(gray.to_luma16()),
            DynamicImage::ImageRgb32F(gray.to_rgb32f()),
        ];

        for input in &inputs {
            let output = correct_rotation(input).unwrap();
            assert_eq!(output.color(), input.color());
            assert_eq!((output.width(), output.height()), (90, 70));
        }
    }

    #[test]
    fn test_input_is_left_untouched() {
        let img = rotated_card((120, 90), (70.0, 40.0), 15.0);
        let before = img.as_bytes().to_vec();
        let _ = correct_rotation(&img).unwrap();
        assert_eq!(img.as_bytes(), &before[..]);
    }

    #[test]
    fn test_uniform_crops_are_degenerate() {
        let black = DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 40, Luma([0])));
        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 40, Rgb([255, 255, 255])));

        for polarity in [MaskPolarity::Auto, MaskPolarity::Dark, MaskPolarity::Bright] {
            let options = DeskewOptions {
                polarity,
                ..Default::default()
            };
            assert!(matches!(
                correct_rotation_with(&black, &options),
                Err(DeskewError::DegenerateRegion)
            ));
            assert!(matches!(
                correct_rotation_with(&white, &options),
                Err(DeskewError::DegenerateRegion)
            ));
        }
    }

    #[test]
    fn test_polarity_selects_foreground() {
        let img = rotated_card((200, 150), (80.0, 40.0), 0.0);

        let auto = estimate_skew(&img, &DeskewOptions::default()).unwrap();
        let bright = estimate_skew(
            &img,
            &DeskewOptions {
                polarity: MaskPolarity::Bright,
                ..Default::default()
            },
        )
        .unwrap();
        let dark = estimate_skew(
            &img,
            &DeskewOptions {
                polarity: MaskPolarity::Dark,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(auto.foreground_pixels, bright.foreground_pixels);
        assert_eq!(bright.foreground_pixels + dark.foreground_pixels, 200 * 150);
        assert!(dark.rect.area() > bright.rect.area());
    }

    #[test]
    fn test_tight_crop_is_deskewed() {
        // Box hugging the card: the card outnumbers the dark corners
        let img = rotated_card((400, 300), (200.0, 100.0), 20.0).crop_imm(88, 68, 224, 164);

        let estimate = estimate_skew(&img, &DeskewOptions::default()).unwrap();
        assert!((estimate.angle - 20.0).abs() < 1.0, "estimated {}", estimate.angle);
        assert!(estimate.foreground_pixels > 224 * 164 / 2);

        // Upright card spans (12, 32)..(212, 132) around the shared centre
        let corrected = correct_rotation(&img).unwrap().to_luma8();
        assert!(corrected.get_pixel(20, 40)[0] > 200);
        assert!(corrected.get_pixel(20, 125)[0] > 200);
        assert!(corrected.get_pixel(7, 82)[0] < 50);
    }

    #[test]
    fn test_small_skew_below_minimum_is_copied() {
        let img = rotated_card((200, 150), (120.0, 60.0), 3.0);
        let options = DeskewOptions {
            min_angle: 5.0,
            ..Default::default()
        };
        let output = correct_rotation_with(&img, &options).unwrap();
        assert_eq!(output.as_bytes(), img.as_bytes());
    }

    #[test]
    fn test_empty_image_rejected() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(0, 0));
        assert!(matches!(correct_rotation(&img), Err(DeskewError::EmptyImage)));
    }
}
