//! Training loop
//!
//! A hand-written loop over Burn primitives: Adam, mean absolute error on raw
//! pixel values, a fixed number of epochs and a checkpoint written whenever
//! the validation loss reaches a new minimum.

use std::path::PathBuf;

use burn::{
    data::dataloader::batcher::Batcher,
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, backend::Backend, ElementConversion, Tensor},
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::checkpoint::{BestTracker, Checkpoint, CheckpointMeta};
use crate::dataset::{PairBatch, PairBatcher, SampleBatch, SamplePair};
use crate::model::ResidualUNet;
use crate::utils::error::{PixelShiftError, Result};
use crate::utils::logging::{ProgressLogger, TrainingLogger};
use crate::{BATCH_SIZE, EPOCHS, SEED};

/// Hyperparameters for [`Trainer`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Samples per optimizer step
    pub batch_size: usize,
    /// Seed for the per-epoch shuffle
    pub seed: u64,
    /// Checkpoint stem; the best weights are written here
    pub checkpoint: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: EPOCHS,
            learning_rate: 1e-3,
            batch_size: BATCH_SIZE,
            seed: SEED,
            checkpoint: PathBuf::from("pixelshift_best"),
        }
    }
}

/// Per-epoch history of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingState {
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
    /// Zero-based epochs whose weights were checkpointed
    pub checkpoint_epochs: Vec<usize>,
}

impl TrainingState {
    pub fn epochs_run(&self) -> usize {
        self.val_losses.len()
    }

    pub fn record(&mut self, train_loss: f64, val_loss: f64, checkpointed: bool) {
        if checkpointed {
            self.checkpoint_epochs.push(self.val_losses.len());
        }
        self.train_losses.push(train_loss);
        self.val_losses.push(val_loss);
    }
}

/// Outcome of [`Trainer::fit`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub state: TrainingState,
    pub best_val_loss: Option<f64>,
    pub best_epoch: Option<usize>,
    pub checkpoint: PathBuf,
}

impl TrainingReport {
    pub fn checkpoint_written(&self) -> bool {
        !self.state.checkpoint_epochs.is_empty()
    }
}

/// Mean absolute error over every element
pub fn mae_loss<B: Backend>(prediction: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
    (prediction - target).abs().mean()
}

pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
    batcher: PairBatcher,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> Self {
        Self {
            config,
            device,
            batcher: PairBatcher::new(),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train `model` on `train` and checkpoint on `val`
    ///
    /// Returns the model as it stands after the last epoch; the best weights
    /// live in the checkpoint when one was written.
    pub fn fit(
        &self,
        mut model: ResidualUNet<B>,
        train: &SampleBatch,
        val: &SampleBatch,
    ) -> Result<(ResidualUNet<B>, TrainingReport)> {
        if train.is_empty() {
            return Err(PixelShiftError::InvalidInput("training split is empty".to_string()));
        }
        if val.is_empty() {
            return Err(PixelShiftError::InvalidInput("validation split is empty".to_string()));
        }
        if self.config.batch_size == 0 {
            return Err(PixelShiftError::Config("batch size must be positive".to_string()));
        }

        let checkpoint = Checkpoint::new(&self.config.checkpoint);
        let batch_size = self.config.batch_size;
        let num_steps = train.len().div_ceil(batch_size);

        // Keras Adam defaults
        let mut optimizer = AdamConfig::new()
            .with_beta_1(0.9)
            .with_beta_2(0.999)
            .with_epsilon(1e-7)
            .init::<B, ResidualUNet<B>>();

        info!(
            "Training on {} pairs, validating on {} ({} epochs, {} steps/epoch, lr {})",
            train.len(),
            val.len(),
            self.config.epochs,
            num_steps,
            self.config.learning_rate
        );

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut tracker = BestTracker::new();
        let mut state = TrainingState::default();
        let mut best_epoch = None;
        let mut logger = TrainingLogger::new(self.config.epochs);

        for epoch in 0..self.config.epochs {
            logger.start_epoch(epoch);

            let mut order: Vec<usize> = (0..train.len()).collect();
            order.shuffle(&mut rng);

            let mut progress = ProgressLogger::new("Steps", num_steps);
            let mut loss_sum = 0.0f64;

            for chunk in order.chunks(batch_size) {
                let batch: PairBatch<B> = self.batcher.batch(select(train, chunk), &self.device);

                let output = model.forward(batch.inputs);
                let loss = mae_loss(output, batch.targets);
                let loss_value: f64 = loss.clone().into_scalar().elem();
                loss_sum += loss_value * chunk.len() as f64;

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optimizer.step(self.config.learning_rate, model, grads);

                progress.increment();
            }
            progress.finish();

            let train_loss = loss_sum / train.len() as f64;
            let val_loss = evaluate(&model.valid(), val, batch_size, &self.device)?;
            logger.end_epoch(train_loss, val_loss, self.config.learning_rate);

            let previous = tracker.best();
            let improved = tracker.observe(val_loss);
            if improved {
                logger.log_new_best(previous, val_loss);
                let meta = CheckpointMeta::new(epoch, val_loss, model.num_params());
                checkpoint.save(&model, &meta)?;
                best_epoch = Some(epoch);
            } else {
                debug!(
                    "val_loss {:.5} did not improve on {:.5}",
                    val_loss,
                    previous.unwrap_or(f64::NAN)
                );
            }

            state.record(train_loss, val_loss, improved);
        }

        logger.log_complete(tracker.best());

        let report = TrainingReport {
            state,
            best_val_loss: tracker.best(),
            best_epoch,
            checkpoint: checkpoint.model_path(),
        };
        Ok((model, report))
    }
}

fn select(batch: &SampleBatch, indices: &[usize]) -> Vec<SamplePair> {
    indices
        .iter()
        .map(|&i| SamplePair {
            input: batch.inputs[i].clone(),
            target: batch.targets[i].clone(),
        })
        .collect()
}

/// Sample-weighted mean absolute error of `model` over `data`
pub fn evaluate<B: Backend>(
    model: &ResidualUNet<B>,
    data: &SampleBatch,
    batch_size: usize,
    device: &B::Device,
) -> Result<f64> {
    if data.is_empty() {
        return Err(PixelShiftError::InvalidInput("cannot evaluate on an empty batch".to_string()));
    }

    let batcher = PairBatcher::new();
    let indices: Vec<usize> = (0..data.len()).collect();
    let mut total = 0.0f64;

    for chunk in indices.chunks(batch_size.max(1)) {
        let batch: PairBatch<B> = batcher.batch(select(data, chunk), device);
        let output = model.forward(batch.inputs);
        let loss: f64 = mae_loss(output, batch.targets).into_scalar().elem();
        total += loss * chunk.len() as f64;
    }

    Ok(total / data.len() as f64)
}
