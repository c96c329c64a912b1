use image::{DynamicImage, ImageBuffer, Pixel};
use nalgebra::Matrix3;

use crate::error::DeskewError;
use crate::geometry::transform_point;

/// Sample types the resampler can read and write back
pub(crate) trait Sample: Copy {
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

impl Sample for u8 {
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value.round().clamp(0.0, u8::MAX as f64) as u8
    }
}

impl Sample for u16 {
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value.round().clamp(0.0, u16::MAX as f64) as u16
    }
}

impl Sample for f32 {
    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

/// Cubic interpolation kernel (Catmull-Rom)
fn cubic_weight(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;

    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
        0.5 * t3 - 0.5 * t2,
    ]
}

/// Bicubic interpolation of interleaved samples at (x, y).
///
/// Taps outside the image are clamped to the nearest edge pixel, so positions
/// far outside the source replicate the border.
fn bicubic_interpolate(
    samples: &[f64],
    channels: usize,
    width: u32,
    height: u32,
    x: f64,
    y: f64,
    out: &mut [f64],
) {
    let x_floor = x.floor();
    let y_floor = y.floor();
    let wx = cubic_weight(x - x_floor);
    let wy = cubic_weight(y - y_floor);
    let (x_floor, y_floor) = (x_floor as i64, y_floor as i64);

    out.iter_mut().for_each(|v| *v = 0.0);

    for (j, weight_y) in wy.iter().enumerate() {
        let py = (y_floor + j as i64 - 1).clamp(0, height as i64 - 1) as usize;
        for (i, weight_x) in wx.iter().enumerate() {
            let px = (x_floor + i as i64 - 1).clamp(0, width as i64 - 1) as usize;
            let idx = (py * width as usize + px) * channels;
            let weight = weight_x * weight_y;
            for (c, value) in out.iter_mut().enumerate() {
                *value += samples[idx + c] * weight;
            }
        }
    }
}

/// Resample `img` through `inverse` (output -> source) onto a canvas of the
/// same size
fn warp_buffer<P>(
    img: &ImageBuffer<P, Vec<P::Subpixel>>,
    inverse: &Matrix3<f64>,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel,
    P::Subpixel: Sample,
{
    let (width, height) = img.dimensions();
    let channels = P::CHANNEL_COUNT as usize;
    let samples: Vec<f64> = img.as_raw().iter().map(|s| s.to_f64()).collect();

    let mut output = ImageBuffer::<P, Vec<P::Subpixel>>::new(width, height);
    let mut interpolated = vec![0.0; channels];

    for (out_x, out_y, pixel) in output.enumerate_pixels_mut() {
        let (src_x, src_y) = transform_point(inverse, out_x as f64, out_y as f64);
        bicubic_interpolate(
            &samples,
            channels,
            width,
            height,
            src_x,
            src_y,
            &mut interpolated,
        );
        for (dst, value) in pixel.channels_mut().iter_mut().zip(&interpolated) {
            *dst = P::Subpixel::from_f64(*value);
        }
    }

    output
}

/// Apply an affine transformation with bicubic interpolation and replicated
/// borders, keeping the canvas size, channel layout and sample type.
pub fn warp_replicate(
    img: &DynamicImage,
    forward_matrix: &Matrix3<f64>,
) -> Result<DynamicImage, DeskewError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(DeskewError::EmptyImage);
    }

    let inverse = forward_matrix
        .try_inverse()
        .ok_or(DeskewError::SingularTransform)?;

    let warped = match img {
        DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(warp_buffer(buf, &inverse)),
        DynamicImage::ImageLumaA8(buf) => DynamicImage::ImageLumaA8(warp_buffer(buf, &inverse)),
        DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(warp_buffer(buf, &inverse)),
        DynamicImage::ImageRgba8(buf) => DynamicImage::ImageRgba8(warp_buffer(buf, &inverse)),
        DynamicImage::ImageLuma16(buf) => DynamicImage::ImageLuma16(warp_buffer(buf, &inverse)),
        DynamicImage::ImageLumaA16(buf) => {
            DynamicImage::ImageLumaA16(warp_buffer(buf, &inverse))
        }
        DynamicImage::ImageRgb16(buf) => DynamicImage::ImageRgb16(warp_buffer(buf, &inverse)),
        DynamicImage::ImageRgba16(buf) => DynamicImage::ImageRgba16(warp_buffer(buf, &inverse)),
        DynamicImage::ImageRgb32F(buf) => DynamicImage::ImageRgb32F(warp_buffer(buf, &inverse)),
        DynamicImage::ImageRgba32F(buf) => {
            DynamicImage::ImageRgba32F(warp_buffer(buf, &inverse))
        }
        other => return Err(DeskewError::UnsupportedPixelFormat(other.color())),
    };

    Ok(warped)
}
