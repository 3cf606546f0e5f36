//! Run configuration
//!
//! `RunConfig` collects every constant of a run. Defaults reproduce the
//! reference setup: 128x128 images, 1000 validation samples, 15 epochs of
//! single-sample Adam steps and seed 1337. It round-trips through JSON so a
//! run can be repeated with `--config`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::{AssemblerConfig, CatalogConfig, ShufflePolicy};
use crate::model::ResidualUNetConfig;
use crate::training::TrainingConfig;
use crate::utils::error::{PixelShiftError, Result};
use crate::utils::render::ArtifactNames;
use crate::{BATCH_SIZE, EPOCHS, IMAGE_SIZE, NUM_OUTPUT_CHANNELS, SEED, VAL_SAMPLES};

/// Explicit compute resources for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// CUDA device ordinal (ignored on CPU backends)
    pub gpu_index: usize,
    /// Worker threads for the local rayon pool
    pub cpu_threads: usize,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            gpu_index: 0,
            cpu_threads: 8,
        }
    }
}

impl ComputeConfig {
    /// Build a thread pool owned by the caller; no global pool is touched
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        if self.cpu_threads == 0 {
            return Err(PixelShiftError::Config("cpu_threads must be positive".to_string()));
        }

        rayon::ThreadPoolBuilder::new()
            .num_threads(self.cpu_threads)
            .thread_name(|i| format!("pixelshift-{}", i))
            .build()
            .map_err(|e| PixelShiftError::Config(format!("failed to build thread pool: {}", e)))
    }

    /// Run `f` inside a fresh pool sized by `cpu_threads`
    pub fn install<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        Ok(self.thread_pool()?.install(f))
    }
}

/// Network size preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum Architecture {
    /// One full-resolution block per side, 128 filters
    #[default]
    Compact,
    /// Strided entry, three pooling and four upsampling blocks
    Classic,
}

/// Every setting of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Prefix for artifact names
    pub run_name: String,
    pub input_dir: PathBuf,
    pub target_dir: PathBuf,
    pub input_ext: String,
    pub target_ext: String,
    pub output_dir: PathBuf,
    /// Checkpoint stem (no extension)
    pub checkpoint: PathBuf,
    /// Image rendered and predicted after the validation preview
    pub external_image: Option<PathBuf>,
    pub image_size: usize,
    pub num_output_channels: usize,
    pub architecture: Architecture,
    pub batch_size: usize,
    pub val_samples: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub shuffle_policy: ShufflePolicy,
    /// Validation sample used for the rendered preview
    pub preview_index: usize,
    pub compute: ComputeConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_name: "oxford_gen_color_r2_sht".to_string(),
            input_dir: PathBuf::from("images"),
            target_dir: PathBuf::from("annotations/trimaps"),
            input_ext: ".jpg".to_string(),
            target_ext: ".png".to_string(),
            output_dir: PathBuf::from("out"),
            checkpoint: PathBuf::from("oxford_gen_color_r2_sht"),
            external_image: Some(PathBuf::from("input/000004.jpg")),
            image_size: IMAGE_SIZE,
            num_output_channels: NUM_OUTPUT_CHANNELS,
            architecture: Architecture::default(),
            batch_size: BATCH_SIZE,
            val_samples: VAL_SAMPLES,
            epochs: EPOCHS,
            learning_rate: 1e-3,
            seed: SEED,
            shuffle_policy: ShufflePolicy::default(),
            preview_index: 1,
            compute: ComputeConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_name.is_empty() {
            return Err(PixelShiftError::Config("run_name must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(PixelShiftError::Config("batch_size must be positive".to_string()));
        }
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            return Err(PixelShiftError::Config(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        self.model_config().validate()
    }

    pub fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig {
            input_dir: self.input_dir.clone(),
            target_dir: self.target_dir.clone(),
            input_ext: self.input_ext.clone(),
            target_ext: self.target_ext.clone(),
            val_samples: self.val_samples,
            seed: self.seed,
            policy: self.shuffle_policy,
        }
    }

    /// Shifted pairing, one eager batch per split
    pub fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig::shifted([self.image_size, self.image_size])
    }

    pub fn model_config(&self) -> ResidualUNetConfig {
        let base = match self.architecture {
            Architecture::Compact => ResidualUNetConfig::new(),
            Architecture::Classic => ResidualUNetConfig::classic(),
        };
        base.with_image_size(self.image_size)
            .with_num_output_channels(self.num_output_channels)
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            batch_size: self.batch_size,
            seed: self.seed,
            checkpoint: self.checkpoint.clone(),
        }
    }

    pub fn artifacts(&self) -> ArtifactNames {
        ArtifactNames::new(&self.output_dir, &self.run_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.image_size, 128);
        assert_eq!(config.num_output_channels, 3);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.val_samples, 1000);
        assert_eq!(config.epochs, 15);
        assert_eq!(config.seed, 1337);
        assert_eq!(config.compute.cpu_threads, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");

        let config = RunConfig {
            epochs: 3,
            architecture: Architecture::Classic,
            external_image: None,
            ..RunConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded.epochs, 3);
        assert_eq!(loaded.architecture, Architecture::Classic);
        assert!(loaded.external_image.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "epochs": 2, "run_name": "short" }"#).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded.epochs, 2);
        assert_eq!(loaded.run_name, "short");
        assert_eq!(loaded.val_samples, 1000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_batch = RunConfig {
            batch_size: 0,
            ..RunConfig::default()
        };
        assert!(matches!(zero_batch.validate(), Err(PixelShiftError::Config(_))));

        let odd_classic = RunConfig {
            architecture: Architecture::Classic,
            image_size: 100,
            ..RunConfig::default()
        };
        assert!(odd_classic.validate().is_err());
    }

    #[test]
    fn test_derived_configs() {
        let config = RunConfig::default();
        assert_eq!(config.model_config().entry_filters, 128);
        assert_eq!(config.catalog_config().seed, 1337);
        assert_eq!(config.training_config().epochs, 15);
        assert_eq!(config.assembler_config().image_size, [128, 128]);
    }

    #[test]
    fn test_compute_pool() {
        let compute = ComputeConfig {
            gpu_index: 0,
            cpu_threads: 2,
        };
        let threads = compute.install(rayon::current_num_threads).unwrap();
        assert_eq!(threads, 2);

        let broken = ComputeConfig {
            gpu_index: 0,
            cpu_threads: 0,
        };
        assert!(broken.thread_pool().is_err());
    }
}
