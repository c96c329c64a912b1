//! Launches detector training through the external `yolo` trainer.

use std::path::PathBuf;
use std::process::Command;

use tracing::{info, instrument};

use crate::config::Device;
use crate::error::TrainError;

/// Settings handed to the trainer
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    /// Trainer executable
    pub trainer: String,
    /// Dataset descriptor (`data.yaml`)
    pub data: PathBuf,
    /// Pretrained weights to start from
    pub base_model: String,
    pub image_size: u32,
    pub epochs: u32,
    pub device: Device,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            trainer: "yolo".to_string(),
            data: PathBuf::from("data.yaml"),
            base_model: "yolov8n.pt".to_string(),
            image_size: 640,
            epochs: 60,
            device: Device::Auto,
        }
    }
}

impl TrainConfig {
    /// Trainer arguments, `key=value` style
    pub fn args(&self) -> Vec<String> {
        vec![
            "detect".to_string(),
            "train".to_string(),
            format!("data={}", self.data.display()),
            format!("model={}", self.base_model),
            format!("epochs={}", self.epochs),
            format!("imgsz={}", self.image_size),
            format!("device={}", self.device.trainer_arg()),
        ]
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.trainer);
        command.args(self.args());
        command
    }

    /// Run the trainer to completion with inherited stdio
    #[instrument(skip(self), fields(data = %self.data.display(), epochs = self.epochs))]
    pub fn run(&self) -> Result<(), TrainError> {
        if !self.data.exists() {
            return Err(TrainError::DatasetNotFound(self.data.clone()));
        }

        info!(
            trainer = %self.trainer,
            device = self.device.trainer_arg(),
            "starting training"
        );

        let status = self
            .command()
            .status()
            .map_err(|source| TrainError::Spawn {
                program: self.trainer.clone(),
                source,
            })?;

        if !status.success() {
            return Err(TrainError::Failed(status));
        }

        info!("training finished");
        Ok(())
    }
}
