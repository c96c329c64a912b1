use image::DynamicImage;

use crate::config::ThresholdMode;
use crate::error::DetectionError;

/// Axis-aligned box in source-image pixel coordinates, `x1 < x2`, `y1 < y2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    /// Returns `None` unless the box has a positive width and height
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Option<Self> {
        (x1 < x2 && y1 < y2).then_some(Self { x1, y1, x2, y2 })
    }

    /// Box from corner coordinates in floating point, clipped to a
    /// `width`x`height` image. Fractions are truncated.
    pub fn from_corners_clipped(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        width: u32,
        height: u32,
    ) -> Option<Self> {
        let clip = |v: f32, max: u32| v.clamp(0.0, max as f32) as u32;
        Self::new(
            clip(x1, width),
            clip(y1, height),
            clip(x2, width),
            clip(y2, height),
        )
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Intersection over union
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let intersection = ix2.saturating_sub(ix1) as u64 * iy2.saturating_sub(iy1) as u64;
        let union = self.area() + other.area() - intersection;
        if union == 0 {
            return 0.0;
        }
        intersection as f32 / union as f32
    }

    /// Copy of the region of `image` covered by this box
    pub fn crop(&self, image: &DynamicImage) -> DynamicImage {
        image.crop_imm(self.x1, self.y1, self.width(), self.height())
    }
}

/// A box reported by a detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector certainty in [0, 1]
    pub confidence: f32,
}

/// Object detector consumed by the batch crop.
///
/// Implementations return boxes clipped to the image. They may drop
/// candidates below `confidence_threshold` early; callers still apply
/// [`filter_detections`] with their own comparison mode.
pub trait Detector {
    fn detect(
        &mut self,
        image: &DynamicImage,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectionError>;
}

/// Detections passing `threshold` under `mode`, in their original order
pub fn filter_detections(
    detections: &[Detection],
    threshold: f32,
    mode: ThresholdMode,
) -> Vec<Detection> {
    detections
        .iter()
        .filter(|d| mode.passes(d.confidence, threshold))
        .copied()
        .collect()
}

/// Greedy non-maximum suppression.
///
/// Detections are visited by descending confidence; one is dropped when its
/// IoU with an already kept box exceeds `iou_threshold`.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: u32, y1: u32, x2: u32, y2: u32, confidence: f32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, y1, x2, y2).unwrap(),
            confidence,
        }
    }

    #[test]
    fn test_box_rejects_empty_extent() {
        assert!(BoundingBox::new(5, 5, 5, 10).is_none());
        assert!(BoundingBox::new(5, 10, 8, 2).is_none());
        assert_eq!(BoundingBox::new(1, 2, 4, 8).unwrap().area(), 18);
    }

    #[test]
    fn test_box_clipping() {
        let b = BoundingBox::from_corners_clipped(-12.5, 3.9, 700.0, 40.2, 640, 480).unwrap();
        assert_eq!(b, BoundingBox::new(0, 3, 640, 40).unwrap());
        assert!(BoundingBox::from_corners_clipped(650.0, 0.0, 700.0, 10.0, 640, 480).is_none());
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0, 0, 10, 10).unwrap();
        let b = BoundingBox::new(5, 0, 15, 10).unwrap();
        let c = BoundingBox::new(20, 20, 30, 30).unwrap();
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&c), 0.0);
        assert_eq!(a.iou(&a), 1.0);
    }

    #[test]
    fn test_filter_keeps_order_and_boundary() {
        let detections = vec![
            det(0, 0, 10, 10, 0.95),
            det(0, 0, 10, 10, 0.5),
            det(0, 0, 10, 10, 0.9),
            det(0, 0, 10, 10, 0.92),
        ];

        let inclusive = filter_detections(&detections, 0.9, ThresholdMode::Inclusive);
        let confidences: Vec<f32> = inclusive.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.95, 0.9, 0.92]);

        let exclusive = filter_detections(&detections, 0.9, ThresholdMode::Exclusive);
        let confidences: Vec<f32> = exclusive.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.95, 0.92]);
    }

    #[test]
    fn test_nms_keeps_strongest_of_overlap() {
        let detections = vec![
            det(0, 0, 100, 60, 0.80),
            det(4, 2, 104, 62, 0.93),
            det(200, 200, 260, 240, 0.70),
        ];
        let kept = non_max_suppression(detections, 0.5);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.93);
        assert_eq!(kept[1].confidence, 0.70);
    }

    #[test]
    fn test_crop_matches_box() {
        let image = DynamicImage::new_rgb8(50, 40);
        let cropped = BoundingBox::new(10, 5, 30, 25).unwrap().crop(&image);
        assert_eq!((cropped.width(), cropped.height()), (20, 20));
    }
}
