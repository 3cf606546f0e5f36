//! Batch assembly
//!
//! Turns path lists into host-side batches of decoded [`PixelTensor`]s. The
//! pairing between input and target is selected by [`Pairing`]:
//!
//! - `Mask`: target is a grayscale trimap with labels shifted from 1..=3 to 0..=2
//! - `DirectRgb`: target is the RGB image at the same index
//! - `ShiftedNext`: target for position `j` is the raw image at position `j + 1`
//!
//! Every batch is rebuilt from disk on each call; nothing is cached.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::sample::{decode_image, ColorMode, PixelTensor};
use crate::utils::error::{PixelShiftError, Result};
use crate::{BATCH_SIZE, IMAGE_SIZE};

/// Relationship between an input and its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pairing {
    Mask,
    DirectRgb,
    ShiftedNext,
}

/// Configuration for [`BatchAssembler`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblerConfig {
    pub pairing: Pairing,
    /// Also decompose every target into single-channel tensors
    pub channel_split: bool,
    /// Decoded size as [height, width]
    pub image_size: [usize; 2],
    /// Samples per batch. For `ShiftedNext`, `None` yields one batch with
    /// every pair; for the other pairings it defaults to one sample.
    pub batch_size: Option<usize>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            pairing: Pairing::ShiftedNext,
            channel_split: false,
            image_size: [IMAGE_SIZE, IMAGE_SIZE],
            batch_size: None,
        }
    }
}

impl AssemblerConfig {
    pub fn shifted(image_size: [usize; 2]) -> Self {
        Self {
            image_size,
            ..Self::default()
        }
    }

    pub fn with_pairing(mut self, pairing: Pairing) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_channel_split(mut self, channel_split: bool) -> Self {
        self.channel_split = channel_split;
        self
    }
}

/// Decoded inputs and targets for one batch, index-aligned
#[derive(Debug, Clone, Default)]
pub struct SampleBatch {
    pub inputs: Vec<PixelTensor>,
    pub targets: Vec<PixelTensor>,
    /// Per-target channel decomposition; empty unless `channel_split` is set
    pub target_channels: Vec<Vec<PixelTensor>>,
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Input/target pair at position `j`
    pub fn pair(&self, j: usize) -> Option<(&PixelTensor, &PixelTensor)> {
        Some((self.inputs.get(j)?, self.targets.get(j)?))
    }
}

/// Indexed provider of batches
pub trait BatchSource {
    /// Number of batches
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize batch `index`
    fn batch_at(&self, index: usize) -> Result<SampleBatch>;
}

/// Builds [`SampleBatch`]es from paired path lists
#[derive(Debug, Clone)]
pub struct BatchAssembler {
    config: AssemblerConfig,
    inputs: Vec<PathBuf>,
    targets: Vec<PathBuf>,
}

impl BatchAssembler {
    pub fn new(config: AssemblerConfig, inputs: Vec<PathBuf>, targets: Vec<PathBuf>) -> Result<Self> {
        if config.batch_size == Some(0) {
            return Err(PixelShiftError::Config("batch size must be positive".to_string()));
        }

        match config.pairing {
            Pairing::ShiftedNext => {
                if inputs.len() != targets.len() {
                    return Err(PixelShiftError::ShapeMismatch(format!(
                        "shifted pairing needs equal lists, got {} inputs and {} targets",
                        inputs.len(),
                        targets.len()
                    )));
                }
                if inputs.len() < 2 {
                    return Err(PixelShiftError::InvalidInput(format!(
                        "shifted pairing needs at least 2 images, got {}",
                        inputs.len()
                    )));
                }
            }
            Pairing::Mask | Pairing::DirectRgb => {
                if inputs.len() < targets.len() {
                    return Err(PixelShiftError::ShapeMismatch(format!(
                        "{} inputs cannot cover {} targets",
                        inputs.len(),
                        targets.len()
                    )));
                }
            }
        }

        Ok(Self {
            config,
            inputs,
            targets,
        })
    }

    /// Shifted pairing over a single list used as both input and target source
    pub fn shifted(config: AssemblerConfig, paths: Vec<PathBuf>) -> Result<Self> {
        let config = AssemblerConfig {
            pairing: Pairing::ShiftedNext,
            ..config
        };
        Self::new(config, paths.clone(), paths)
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Number of (input, target) pairs across all batches
    pub fn num_pairs(&self) -> usize {
        match self.config.pairing {
            Pairing::ShiftedNext => self.inputs.len() - 1,
            Pairing::Mask | Pairing::DirectRgb => {
                let size = self.pair_batch_size();
                (self.targets.len() / size) * size
            }
        }
    }

    /// Every pair in one batch
    pub fn assemble_all(&self) -> Result<SampleBatch> {
        let end = self.num_pairs();
        self.assemble_range(0, end)
    }

    fn pair_batch_size(&self) -> usize {
        self.config.batch_size.unwrap_or(BATCH_SIZE)
    }

    fn assemble_range(&self, start: usize, end: usize) -> Result<SampleBatch> {
        let size = self.config.image_size;

        let (inputs, targets) = match self.config.pairing {
            Pairing::ShiftedNext => {
                if self.inputs == self.targets {
                    // Path j is input j and target j - 1: decode the window once
                    let decoded = decode_all(&self.inputs[start..=end], size, ColorMode::Rgb)?;
                    let inputs = decoded[..end - start].to_vec();
                    let targets = decoded[1..].to_vec();
                    (inputs, targets)
                } else {
                    let inputs = decode_all(&self.inputs[start..end], size, ColorMode::Rgb)?;
                    let targets = decode_all(&self.targets[start + 1..=end], size, ColorMode::Rgb)?;
                    (inputs, targets)
                }
            }
            Pairing::DirectRgb => {
                let inputs = decode_all(&self.inputs[start..end], size, ColorMode::Rgb)?;
                let targets = decode_all(&self.targets[start..end], size, ColorMode::Rgb)?;
                (inputs, targets)
            }
            Pairing::Mask => {
                let inputs = decode_all(&self.inputs[start..end], size, ColorMode::Rgb)?;
                let targets = decode_all(&self.targets[start..end], size, ColorMode::Grayscale)?
                    .into_iter()
                    .map(|t| t.offset(1.0))
                    .collect();
                (inputs, targets)
            }
        };

        let target_channels = if self.config.channel_split {
            targets.iter().map(PixelTensor::split_channels).collect()
        } else {
            Vec::new()
        };

        debug!(
            "Assembled {:?} batch of {} pairs ({}..{})",
            self.config.pairing,
            inputs.len(),
            start,
            end
        );

        Ok(SampleBatch {
            inputs,
            targets,
            target_channels,
        })
    }
}

impl BatchSource for BatchAssembler {
    fn len(&self) -> usize {
        match (self.config.pairing, self.config.batch_size) {
            (Pairing::ShiftedNext, None) => 1,
            (Pairing::ShiftedNext, Some(b)) => self.num_pairs().div_ceil(b),
            (Pairing::Mask | Pairing::DirectRgb, _) => self.targets.len() / self.pair_batch_size(),
        }
    }

    fn batch_at(&self, index: usize) -> Result<SampleBatch> {
        if index >= self.len() {
            return Err(PixelShiftError::InvalidInput(format!(
                "batch {} requested from a source of {} batches",
                index,
                self.len()
            )));
        }

        let total = self.num_pairs();
        let (start, end) = match (self.config.pairing, self.config.batch_size) {
            (Pairing::ShiftedNext, None) => (0, total),
            (Pairing::ShiftedNext, Some(b)) => (index * b, ((index + 1) * b).min(total)),
            (Pairing::Mask | Pairing::DirectRgb, _) => {
                let b = self.pair_batch_size();
                (index * b, (index + 1) * b)
            }
        };

        self.assemble_range(start, end)
    }
}

/// Decode paths in parallel, preserving order; the first failure aborts
fn decode_all(paths: &[PathBuf], size: [usize; 2], mode: ColorMode) -> Result<Vec<PixelTensor>> {
    let total = paths.len();
    if total > 100 {
        info!("Decoding {} images...", total);
    }

    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    let decoded = AtomicUsize::new(0);

    let tensors = paths
        .par_iter()
        .map(|path| {
            let result = decode_image(path, size, mode);
            let count = decoded.fetch_add(1, Ordering::Relaxed);
            if count % 100 == 0 {
                pb.set_position(count as u64);
            }
            result
        })
        .collect::<Result<Vec<_>>>();

    pb.finish_and_clear();
    tensors
}
