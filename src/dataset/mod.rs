//! Dataset handling
//!
//! - `catalog`: path discovery, seeded shuffle and train/validation split
//! - `sample`: decoded pixel tensors
//! - `assembler`: pairing inputs with targets into host batches
//! - `batcher`: Burn tensor batches

pub mod assembler;
pub mod batcher;
pub mod catalog;
pub mod sample;

pub use assembler::{AssemblerConfig, BatchAssembler, BatchSource, Pairing, SampleBatch};
pub use batcher::{stack_samples, unstack_samples, PairBatch, PairBatcher, SamplePair};
pub use catalog::{CatalogConfig, CatalogSplits, CatalogStats, ImageCatalog, ShufflePolicy};
pub use sample::{decode_image, ColorMode, PixelTensor};
