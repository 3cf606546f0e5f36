//! Training
//!
//! - `trainer`: Adam + mean-absolute-error loop with per-epoch validation
//! - `checkpoint`: best-only weight persistence and its JSON sidecar

pub mod checkpoint;
pub mod trainer;

pub use checkpoint::{BestTracker, Checkpoint, CheckpointMeta};
pub use trainer::{evaluate, mae_loss, Trainer, TrainingConfig, TrainingReport, TrainingState};
