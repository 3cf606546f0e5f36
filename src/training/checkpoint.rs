//! Best-only model checkpointing
//!
//! The weights are written with Burn's `CompactRecorder` next to a small JSON
//! sidecar describing when and why they were written. Both files share a stem:
//!
//! ```text
//! <stem>.<recorder extension>   model weights
//! <stem>.json                   CheckpointMeta
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{CompactRecorder, FileRecorder},
    tensor::backend::Backend,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::ResidualUNet;
use crate::utils::error::{PixelShiftError, Result};

/// Metadata stored beside the weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Zero-based epoch that produced the weights
    pub epoch: usize,
    pub val_loss: f64,
    pub num_params: usize,
    /// RFC 3339 write time
    pub timestamp: String,
}

impl CheckpointMeta {
    pub fn new(epoch: usize, val_loss: f64, num_params: usize) -> Self {
        Self {
            epoch,
            val_loss,
            num_params,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Tracks the lowest validation loss seen so far
#[derive(Debug, Clone, Copy, Default)]
pub struct BestTracker {
    best: Option<f64>,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a loss; returns true only for a strict new minimum.
    /// Non-finite losses never count as an improvement.
    pub fn observe(&mut self, val_loss: f64) -> bool {
        let improved = val_loss.is_finite()
            && match self.best {
                None => true,
                Some(best) => val_loss < best,
            };
        if improved {
            self.best = Some(val_loss);
        }
        improved
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }
}

/// A checkpoint location identified by its stem (path without extension)
#[derive(Debug, Clone)]
pub struct Checkpoint {
    stem: PathBuf,
}

impl Checkpoint {
    pub fn new(stem: impl Into<PathBuf>) -> Self {
        Self { stem: stem.into() }
    }

    pub fn stem(&self) -> &Path {
        &self.stem
    }

    /// Path of the weights file
    pub fn model_path(&self) -> PathBuf {
        let ext = <CompactRecorder as FileRecorder<burn::backend::NdArray>>::file_extension();
        self.stem.with_extension(ext)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.stem.with_extension("json")
    }

    pub fn exists(&self) -> bool {
        self.model_path().is_file()
    }

    /// Overwrite the weights and sidecar
    pub fn save<B: Backend>(&self, model: &ResidualUNet<B>, meta: &CheckpointMeta) -> Result<()> {
        if let Some(parent) = self.stem.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let recorder = CompactRecorder::new();
        model
            .clone()
            .save_file(&self.stem, &recorder)
            .map_err(|e| PixelShiftError::CheckpointSave(self.model_path(), format!("{:?}", e)))?;

        meta.save(&self.meta_path())
            .map_err(|e| PixelShiftError::CheckpointSave(self.meta_path(), e.to_string()))?;

        info!(
            "Checkpoint saved to {:?} (epoch {}, val_loss {:.5})",
            self.model_path(),
            meta.epoch + 1,
            meta.val_loss
        );
        Ok(())
    }

    /// Load weights into `model`, which must have the same architecture
    pub fn load<B: Backend>(&self, model: ResidualUNet<B>, device: &B::Device) -> Result<ResidualUNet<B>> {
        let path = self.model_path();
        if !path.is_file() {
            return Err(PixelShiftError::CheckpointLoad(path, "file not found".to_string()));
        }

        let recorder = CompactRecorder::new();
        let model = model
            .load_file(&self.stem, &recorder, device)
            .map_err(|e| PixelShiftError::CheckpointLoad(path.clone(), format!("{:?}", e)))?;

        info!("Loaded checkpoint from {:?}", path);
        Ok(model)
    }

    /// Read the sidecar if one was written
    pub fn meta(&self) -> Option<CheckpointMeta> {
        CheckpointMeta::load(&self.meta_path()).ok()
    }
}
