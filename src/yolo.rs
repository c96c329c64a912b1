//! YOLOv8 card detector running an ONNX export through ONNX Runtime.
//!
//! The export takes a `[1, 3, S, S]` RGB tensor scaled to `[0, 1]` and
//! produces `[1, 4 + classes, N]`: box centre, size, then one score row per
//! class, for `N` candidate anchors.

use std::path::PathBuf;

use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, ArrayView3, Ix3};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info, instrument, warn};

use crate::config::{BatchConfig, Device};
use crate::detection::{non_max_suppression, BoundingBox, Detection, Detector};
use crate::error::DetectionError;

pub struct YoloDetectorBuilder {
    model: Option<PathBuf>,
    input_size: u32,
    iou_threshold: f32,
    device: Device,
    threads: usize,
}

impl YoloDetectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, path: impl Into<PathBuf>) -> Self {
        self.model = Some(path.into());
        self
    }

    pub fn input_size(mut self, size: u32) -> Self {
        self.input_size = size;
        self
    }

    pub fn iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    #[instrument(skip(self), fields(model = ?self.model, device = ?self.device))]
    pub fn build(self) -> Result<YoloDetector, DetectionError> {
        let model = self
            .model
            .unwrap_or_else(|| BatchConfig::default().model_path);
        if !model.exists() {
            return Err(DetectionError::ModelNotFound(model));
        }

        let session = Session::builder()
            .map_err(model_error)?
            .with_execution_providers(execution_providers(self.device))
            .map_err(model_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(model_error)?
            .with_intra_threads(self.threads)
            .map_err(model_error)?
            .commit_from_file(&model)
            .map_err(model_error)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "images".to_string());

        info!(model = %model.display(), input = %input_name, "detector loaded");

        Ok(YoloDetector {
            session,
            input_name,
            input_size: self.input_size,
            iou_threshold: self.iou_threshold,
        })
    }
}

impl Default for YoloDetectorBuilder {
    fn default() -> Self {
        Self {
            model: None,
            input_size: 640,
            iou_threshold: 0.5,
            device: Device::Auto,
            threads: 4,
        }
    }
}

fn model_error(err: impl std::fmt::Display) -> DetectionError {
    DetectionError::Model(err.to_string())
}

fn inference_error(err: impl std::fmt::Display) -> DetectionError {
    DetectionError::Inference(err.to_string())
}

fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    let mut providers = Vec::new();

    #[cfg(feature = "cuda")]
    if matches!(device, Device::Cuda | Device::Auto) {
        use ort::execution_providers::CUDAExecutionProvider;
        providers.push(CUDAExecutionProvider::default().build());
    }

    #[cfg(feature = "coreml")]
    if matches!(device, Device::CoreMl | Device::Auto) {
        use ort::execution_providers::CoreMLExecutionProvider;
        providers.push(CoreMLExecutionProvider::default().build());
    }

    if providers.is_empty() && matches!(device, Device::Cuda | Device::CoreMl) {
        warn!(?device, "accelerator support not compiled in, running on CPU");
    }

    providers.push(CPUExecutionProvider::default().build());
    providers
}

pub struct YoloDetector {
    session: Session,
    input_name: String,
    input_size: u32,
    iou_threshold: f32,
}

impl YoloDetector {
    pub fn builder() -> YoloDetectorBuilder {
        YoloDetectorBuilder::new()
    }

    /// Detector configured from the model, device and tensor settings of a
    /// batch run
    pub fn from_config(config: &BatchConfig) -> Result<Self, DetectionError> {
        Self::builder()
            .model(&config.model_path)
            .input_size(config.input_size)
            .iou_threshold(config.iou_threshold)
            .device(config.device)
            .build()
    }
}

impl std::fmt::Debug for YoloDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YoloDetector")
            .field("input_name", &self.input_name)
            .field("input_size", &self.input_size)
            .field("iou_threshold", &self.iou_threshold)
            .finish_non_exhaustive()
    }
}

/// Stretch-resize to `size`x`size` and lay out as NCHW in [0, 1]
fn preprocess(image: &DynamicImage, size: u32) -> Array4<f32> {
    let resized = image
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();
    Array4::from_shape_fn((1, 3, size as usize, size as usize), |(_, c, y, x)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

/// Turn raw anchor rows into boxes in source-image coordinates
fn decode(
    output: ArrayView3<f32>,
    input_size: u32,
    image_width: u32,
    image_height: u32,
    confidence_threshold: f32,
) -> Result<Vec<Detection>, DetectionError> {
    let rows = output.shape()[1];
    if output.shape()[0] != 1 || rows < 5 {
        return Err(DetectionError::UnexpectedOutput(format!(
            "expected [1, 4 + classes, N], got {:?}",
            output.shape()
        )));
    }

    let scale_x = image_width as f32 / input_size as f32;
    let scale_y = image_height as f32 / input_size as f32;

    let mut detections = Vec::new();
    for anchor in 0..output.shape()[2] {
        let confidence = (4..rows)
            .map(|row| output[[0, row, anchor]])
            .fold(f32::MIN, f32::max);
        if confidence < confidence_threshold {
            continue;
        }

        let cx = output[[0, 0, anchor]];
        let cy = output[[0, 1, anchor]];
        let w = output[[0, 2, anchor]];
        let h = output[[0, 3, anchor]];

        let bbox = BoundingBox::from_corners_clipped(
            (cx - w / 2.0) * scale_x,
            (cy - h / 2.0) * scale_y,
            (cx + w / 2.0) * scale_x,
            (cy + h / 2.0) * scale_y,
            image_width,
            image_height,
        );
        if let Some(bbox) = bbox {
            detections.push(Detection { bbox, confidence });
        }
    }

    Ok(detections)
}

impl Detector for YoloDetector {
    #[instrument(
        level = "debug",
        skip(self, image),
        fields(width = image.width(), height = image.height())
    )]
    fn detect(
        &mut self,
        image: &DynamicImage,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectionError> {
        let input_size = self.input_size;
        let iou_threshold = self.iou_threshold;

        let input = Tensor::from_array(preprocess(image, input_size)).map_err(inference_error)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(inference_error)?;
        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(inference_error)?
            .into_dimensionality::<Ix3>()
            .map_err(|e| DetectionError::UnexpectedOutput(e.to_string()))?;

        let candidates = decode(
            output,
            input_size,
            image.width(),
            image.height(),
            confidence_threshold,
        )?;
        let before = candidates.len();
        let detections = non_max_suppression(candidates, iou_threshold);
        debug!(before, after = detections.len(), "non-maximum suppression");

        Ok(detections)
    }
}
