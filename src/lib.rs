//! # pixelshift
//!
//! A residual encoder-decoder, built with the Burn framework, that learns to
//! predict the raw pixels of the next image in a shuffled catalog from the
//! current one.
//!
//! ## Modules
//!
//! - `dataset`: catalog discovery and splitting, decoding, input/target pairing
//! - `model`: separable-conv down blocks, transposed-conv up blocks, the network
//! - `training`: Adam + mean absolute error with best-only checkpointing
//! - `inference`: single-sample prediction with optional rounding
//! - `pipeline`: the full catalog-to-artifacts run
//! - `config`: run and compute configuration
//! - `utils`: errors, logging and PNG rendering
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pixelshift::backend::{device, TrainingBackend};
//! use pixelshift::{Pipeline, RunConfig};
//!
//! let config = RunConfig::default();
//! let device = device(&config.compute);
//! let report = config
//!     .compute
//!     .install(|| Pipeline::new(config.clone())?.run::<TrainingBackend>(&device))??;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

pub use config::{Architecture, ComputeConfig, RunConfig};
pub use dataset::{
    AssemblerConfig, BatchAssembler, BatchSource, CatalogConfig, ImageCatalog, Pairing, PixelTensor,
    SampleBatch, ShufflePolicy,
};
pub use inference::{Prediction, Predictor};
pub use model::{ResidualUNet, ResidualUNetConfig};
pub use pipeline::{Pipeline, PipelineReport};
pub use training::{Trainer, TrainingConfig, TrainingReport, TrainingState};
pub use utils::error::{PixelShiftError, Result};

/// Default input height and width
pub const IMAGE_SIZE: usize = 128;

/// Channels predicted per pixel (RGB of the next image)
pub const NUM_OUTPUT_CHANNELS: usize = 3;

/// Trailing catalog entries reserved for validation
pub const VAL_SAMPLES: usize = 1000;

pub const EPOCHS: usize = 15;

/// Seed shared by the catalog shuffle and the epoch shuffle
pub const SEED: u64 = 1337;

/// Samples per optimizer step
pub const BATCH_SIZE: usize = 1;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
