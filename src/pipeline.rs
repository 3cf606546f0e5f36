//! End-to-end run
//!
//! catalog -> shifted assembly -> load or train -> summary -> preview renders
//! -> optional external prediction. Artifacts already written stay on disk if
//! a later stage fails.

use std::fs;
use std::path::PathBuf;

use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend, tensor::backend::Backend};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::dataset::{
    decode_image, BatchAssembler, CatalogSplits, CatalogStats, ColorMode, ImageCatalog, SampleBatch,
};
use crate::inference::Predictor;
use crate::model::{ResidualUNet, ResidualUNetConfig};
use crate::training::{Checkpoint, Trainer, TrainingReport};
use crate::utils::error::{PixelShiftError, Result, ResultExt};
use crate::utils::render::{autocontrast, image_to_tensor, render_tensor, save_png, to_image};

/// What a run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub catalog: CatalogStats,
    /// Present when the network was trained in this run
    pub training: Option<TrainingReport>,
    pub loaded_checkpoint: bool,
    pub summary_path: PathBuf,
    pub artifacts: Vec<PathBuf>,
}

pub struct Pipeline {
    config: RunConfig,
    model_config: ResidualUNetConfig,
}

impl Pipeline {
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        let model_config = config.model_config();
        Ok(Self {
            config,
            model_config,
        })
    }

    /// Replace the architecture derived from the run config
    pub fn with_model_config(mut self, model_config: ResidualUNetConfig) -> Result<Self> {
        model_config.validate()?;
        self.model_config = model_config;
        Ok(self)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn model_config(&self) -> &ResidualUNetConfig {
        &self.model_config
    }

    /// Run every stage
    pub fn run<B: AutodiffBackend>(&self, device: &B::Device) -> Result<PipelineReport> {
        if let Some(path) = &self.config.external_image {
            if !path.is_file() {
                return Err(PixelShiftError::Decode(
                    path.clone(),
                    "external image not found".to_string(),
                ));
            }
        }

        let splits = self.splits()?;
        let stats = splits.stats();
        info!("{}", stats);

        let checkpoint = Checkpoint::new(&self.config.checkpoint);
        let loaded_checkpoint = checkpoint.exists();
        let (model, training) = self.load_or_train::<B>(&splits, device)?;

        let summary_path = self.write_summary(&model)?;

        let mut artifacts = self.render_preview(&model, &splits, device)?;
        artifacts.extend(self.render_external(&model, device)?);

        info!("Wrote {} artifacts to {:?}", artifacts.len(), self.config.output_dir);

        Ok(PipelineReport {
            catalog: stats,
            training,
            loaded_checkpoint,
            summary_path,
            artifacts,
        })
    }

    /// Discover, shuffle and split the catalog
    pub fn splits(&self) -> Result<CatalogSplits> {
        let catalog = ImageCatalog::build(self.config.catalog_config())?;
        Ok(catalog.splits())
    }

    fn assemble(&self, paths: &[PathBuf]) -> Result<SampleBatch> {
        BatchAssembler::shifted(self.config.assembler_config(), paths.to_vec())?.assemble_all()
    }

    /// Load the checkpoint if present, otherwise train and keep the final weights
    pub fn load_or_train<B: AutodiffBackend>(
        &self,
        splits: &CatalogSplits,
        device: &B::Device,
    ) -> Result<(ResidualUNet<B::InnerBackend>, Option<TrainingReport>)> {
        let checkpoint = Checkpoint::new(&self.config.checkpoint);

        if checkpoint.exists() {
            info!("Found checkpoint {:?}, skipping training", checkpoint.model_path());
            return Ok((self.load::<B::InnerBackend>(device)?, None));
        }

        let (model, report) = self.train::<B>(splits, device)?;
        Ok((model, Some(report)))
    }

    /// Train a fresh network on the shifted train split
    ///
    /// Returns the last epoch's weights at full precision. The best-only
    /// checkpoint is left on disk for the next run and is not reloaded.
    pub fn train<B: AutodiffBackend>(
        &self,
        splits: &CatalogSplits,
        device: &B::Device,
    ) -> Result<(ResidualUNet<B::InnerBackend>, TrainingReport)> {
        let train = self.assemble(&splits.train_inputs)?;
        let val = self.assemble(&splits.val_inputs)?;

        let model = self.model_config.init::<B>(device)?;
        let trainer = Trainer::<B>::new(self.config.training_config(), device.clone());
        let (model, report) = trainer.fit(model, &train, &val)?;

        if !report.checkpoint_written() {
            warn!("No checkpoint was written; the next run will train again");
        }

        Ok((model.valid(), report))
    }

    /// Load the checkpointed network; a missing or unreadable file is an error
    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<ResidualUNet<B>> {
        let model = self.model_config.init::<B>(device)?;
        Checkpoint::new(&self.config.checkpoint).load(model, device)
    }

    /// Write the layer table to `summary-<run_name>.txt`
    pub fn write_summary<B: Backend>(&self, model: &ResidualUNet<B>) -> Result<PathBuf> {
        let path = self.config.artifacts().summary();
        fs::create_dir_all(&self.config.output_dir)?;
        fs::write(&path, model.summary())?;
        Ok(path)
    }

    /// Render the preview sample, its shifted target and the prediction on it
    pub fn render_preview<B: Backend>(
        &self,
        model: &ResidualUNet<B>,
        splits: &CatalogSplits,
        device: &B::Device,
    ) -> Result<Vec<PathBuf>> {
        let names = self.config.artifacts();
        let index = self.config.preview_index;

        let val = self.assemble(&splits.val_inputs)?;
        let (input, target) = val.pair(index).with_context(|| {
            format!(
                "preview index {} is outside the {} validation pairs",
                index,
                val.len()
            )
        })?;

        let mut written = Vec::new();
        let mut emit = |image: image::DynamicImage, path: PathBuf| -> Result<()> {
            save_png(&image, &path)?;
            written.push(path);
            Ok(())
        };

        emit(render_tensor(input)?, names.image(0))?;
        emit(render_tensor(target)?, names.image(1))?;

        let predictor = Predictor::new(model.clone(), device.clone());
        let prediction = predictor.predict(input)?;

        emit(render_tensor(input)?, names.image(2))?;
        emit(render_tensor(&prediction.output)?, names.image(3))?;
        for (j, channel) in prediction.channels().iter().enumerate() {
            emit(render_tensor(channel)?, names.prediction_channel(j))?;
        }

        Ok(written)
    }

    /// Auto-contrast the external image, predict on it and render the rounded output
    pub fn render_external<B: Backend>(
        &self,
        model: &ResidualUNet<B>,
        device: &B::Device,
    ) -> Result<Vec<PathBuf>> {
        let Some(path) = &self.config.external_image else {
            return Ok(Vec::new());
        };

        let names = self.config.artifacts();
        let size = self.config.image_size;

        let decoded = decode_image(path, [size, size], ColorMode::Rgb)?;
        let contrasted = autocontrast(&to_image(&decoded)?);
        save_png(&contrasted, &names.image(4))?;

        // The network sees the contrast-stretched pixels
        let predictor = Predictor::new(model.clone(), device.clone());
        let prediction = predictor.predict(&image_to_tensor(&contrasted))?.rounded();
        save_png(&render_tensor(&prediction.output)?, &names.image(5))?;

        Ok(vec![names.image(4), names.image(5)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    type TestAutodiffBackend = Autodiff<NdArray>;

    fn write_dataset(root: &Path, n: usize) {
        let images = root.join("images");
        let trimaps = root.join("trimaps");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&trimaps).unwrap();

        for i in 0..n {
            let shade = (i * 40) as u8;
            let mut img = RgbImage::from_pixel(10, 10, Rgb([shade, 255 - shade, 90]));
            img.put_pixel(0, 0, Rgb([255, 0, 0]));
            img.save(images.join(format!("pet_{}.jpg", i))).unwrap();
            RgbImage::from_pixel(10, 10, Rgb([1, 1, 1]))
                .save(trimaps.join(format!("pet_{}.png", i)))
                .unwrap();
        }

        RgbImage::from_pixel(12, 12, Rgb([30, 60, 200]))
            .save(root.join("external.png"))
            .unwrap();
    }

    fn test_config(root: &Path) -> RunConfig {
        RunConfig {
            run_name: "shift".to_string(),
            input_dir: root.join("images"),
            target_dir: root.join("trimaps"),
            output_dir: root.join("out"),
            checkpoint: root.join("best"),
            external_image: Some(root.join("external.png")),
            image_size: 8,
            val_samples: 3,
            epochs: 1,
            ..RunConfig::default()
        }
    }

    fn tiny_model() -> ResidualUNetConfig {
        ResidualUNetConfig::new()
            .with_image_size(8)
            .with_entry_filters(4)
            .with_down_filters(vec![4])
            .with_up_filters(vec![4])
    }

    #[test]
    fn test_run_trains_then_reuses_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), 6);
        let device = Default::default();

        let pipeline = Pipeline::new(test_config(dir.path()))
            .unwrap()
            .with_model_config(tiny_model())
            .unwrap();

        let first = pipeline.run::<TestAutodiffBackend>(&device).unwrap();
        assert!(!first.loaded_checkpoint);
        assert_eq!(first.catalog.train_inputs, 3);
        assert_eq!(first.catalog.val_inputs, 3);
        assert!(first.training.as_ref().unwrap().checkpoint_written());
        assert!(first.summary_path.is_file());

        let out = dir.path().join("out");
        for name in [
            "shift_0.png",
            "shift_1.png",
            "shift_2.png",
            "shift_3.png",
            "shift_3_0.png",
            "shift_3_1.png",
            "shift_3_2.png",
            "shift_4.png",
            "shift_5.png",
        ] {
            assert!(out.join(name).is_file(), "missing {}", name);
        }
        assert_eq!(first.artifacts.len(), 9);

        let second = pipeline.run::<TestAutodiffBackend>(&device).unwrap();
        assert!(second.loaded_checkpoint);
        assert!(second.training.is_none());
    }

    /// True when `v` survives a round trip through IEEE half precision
    fn fits_half(v: f32) -> bool {
        v.to_bits() & 0x1FFF == 0
    }

    #[test]
    fn test_train_keeps_full_precision_final_weights() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), 6);
        let device = Default::default();

        let pipeline = Pipeline::new(test_config(dir.path()))
            .unwrap()
            .with_model_config(tiny_model())
            .unwrap();
        let splits = pipeline.splits().unwrap();

        let (model, report) = pipeline
            .train::<TestAutodiffBackend>(&splits, &device)
            .unwrap();
        assert!(report.checkpoint_written());

        let trained: Vec<f32> = model.head.weight.val().into_data().to_vec::<f32>().unwrap();
        assert!(trained.iter().any(|&v| !fits_half(v)));

        // the stored checkpoint is the half-precision copy
        let stored = pipeline.load::<NdArray>(&device).unwrap();
        let reloaded: Vec<f32> = stored.head.weight.val().into_data().to_vec::<f32>().unwrap();
        assert!(reloaded.iter().all(|&v| fits_half(v)));
        assert_ne!(trained, reloaded);
    }

    #[test]
    fn test_missing_external_image_fails_before_training() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), 6);
        let device = Default::default();

        let config = RunConfig {
            external_image: Some(dir.path().join("absent.jpg")),
            ..test_config(dir.path())
        };
        let pipeline = Pipeline::new(config)
            .unwrap()
            .with_model_config(tiny_model())
            .unwrap();

        let result = pipeline.run::<TestAutodiffBackend>(&device);
        assert!(matches!(result, Err(PixelShiftError::Decode(_, _))));
        assert!(!Checkpoint::new(dir.path().join("best")).exists());
    }

    #[test]
    fn test_preview_index_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path(), 6);
        let device = Default::default();

        let config = RunConfig {
            preview_index: 5,
            ..test_config(dir.path())
        };
        let pipeline = Pipeline::new(config).unwrap();
        let splits = pipeline.splits().unwrap();
        let model = tiny_model().init::<NdArray>(&device).unwrap();

        let result = pipeline.render_preview(&model, &splits, &device);
        assert!(matches!(result, Err(PixelShiftError::InvalidInput(_))));
    }
}
