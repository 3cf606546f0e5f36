//! Image catalog: discovery, deterministic shuffling and train/validation split
//!
//! Two parallel directories are listed (inputs and targets), filtered by
//! extension, sorted, shuffled with a fixed seed and split so that the last
//! `val_samples` entries form the validation partition.

use std::fmt;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{PixelShiftError, Result};
use crate::{SEED, VAL_SAMPLES};

/// How the two path lists are shuffled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShufflePolicy {
    /// Each list is shuffled on its own with a freshly seeded RNG.
    /// Pairing by index only holds while both lists have the same length.
    Independent,
    /// One permutation is drawn and applied to both lists; lengths must match
    #[default]
    SharedPermutation,
}

/// Configuration for catalog discovery and splitting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub input_dir: PathBuf,
    pub target_dir: PathBuf,
    /// Suffix an input file name must end with (case-sensitive, e.g. ".jpg")
    pub input_ext: String,
    /// Suffix a target file name must end with; hidden names are always skipped
    pub target_ext: String,
    /// Number of trailing entries reserved for validation
    pub val_samples: usize,
    pub seed: u64,
    pub policy: ShufflePolicy,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("images"),
            target_dir: PathBuf::from("annotations/trimaps"),
            input_ext: ".jpg".to_string(),
            target_ext: ".png".to_string(),
            val_samples: VAL_SAMPLES,
            seed: SEED,
            policy: ShufflePolicy::default(),
        }
    }
}

/// Train/validation partitions of both path lists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSplits {
    pub train_inputs: Vec<PathBuf>,
    pub train_targets: Vec<PathBuf>,
    pub val_inputs: Vec<PathBuf>,
    pub val_targets: Vec<PathBuf>,
}

impl CatalogSplits {
    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            train_inputs: self.train_inputs.len(),
            train_targets: self.train_targets.len(),
            val_inputs: self.val_inputs.len(),
            val_targets: self.val_targets.len(),
        }
    }
}

/// Partition sizes, printed by the `catalog` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub train_inputs: usize,
    pub train_targets: usize,
    pub val_inputs: usize,
    pub val_targets: usize,
}

impl fmt::Display for CatalogStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Catalog split:")?;
        writeln!(
            f,
            "  Train:      {:>6} inputs, {:>6} targets",
            self.train_inputs, self.train_targets
        )?;
        write!(
            f,
            "  Validation: {:>6} inputs, {:>6} targets",
            self.val_inputs, self.val_targets
        )
    }
}

/// Sorted, shuffled path lists for one run
#[derive(Debug, Clone)]
pub struct ImageCatalog {
    config: CatalogConfig,
    inputs: Vec<PathBuf>,
    targets: Vec<PathBuf>,
}

impl ImageCatalog {
    /// Discover both directories and shuffle the results
    pub fn build(config: CatalogConfig) -> Result<Self> {
        let inputs = list_images(&config.input_dir, &config.input_ext, false)?;
        let targets = list_images(&config.target_dir, &config.target_ext, true)?;

        info!(
            "Discovered {} inputs in {:?} and {} targets in {:?}",
            inputs.len(),
            config.input_dir,
            targets.len(),
            config.target_dir
        );

        Self::from_paths(config, inputs, targets)
    }

    /// Build from already-listed paths; they are sorted before shuffling
    pub fn from_paths(
        config: CatalogConfig,
        mut inputs: Vec<PathBuf>,
        mut targets: Vec<PathBuf>,
    ) -> Result<Self> {
        inputs.sort();
        targets.sort();

        let (inputs, targets) = match config.policy {
            ShufflePolicy::Independent => (
                shuffle_paths(inputs, config.seed),
                shuffle_paths(targets, config.seed),
            ),
            ShufflePolicy::SharedPermutation => {
                if inputs.len() != targets.len() {
                    return Err(PixelShiftError::ShapeMismatch(format!(
                        "{} inputs cannot be paired with {} targets",
                        inputs.len(),
                        targets.len()
                    )));
                }
                let order = permutation(inputs.len(), config.seed);
                (apply_order(&inputs, &order), apply_order(&targets, &order))
            }
        };

        Ok(Self {
            config,
            inputs,
            targets,
        })
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Split both lists; validation takes the last `val_samples` entries
    pub fn splits(&self) -> CatalogSplits {
        let (train_inputs, val_inputs) = split_tail(&self.inputs, self.config.val_samples);
        let (train_targets, val_targets) = split_tail(&self.targets, self.config.val_samples);

        let splits = CatalogSplits {
            train_inputs,
            train_targets,
            val_inputs,
            val_targets,
        };
        debug!("{:?}", splits.stats());
        splits
    }
}

/// List regular files directly inside `dir` whose name ends with `ext`
pub fn list_images(dir: &Path, ext: &str, skip_hidden: bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PixelShiftError::Discovery(
            dir.to_path_buf(),
            "not a directory".to_string(),
        ));
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| PixelShiftError::Discovery(dir.to_path_buf(), e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(ext) || (skip_hidden && name.starts_with('.')) {
            continue;
        }
        paths.push(entry.path().to_path_buf());
    }

    paths.sort();
    Ok(paths)
}

/// Shuffle with a fresh RNG, so the result depends only on (seed, length)
pub fn shuffle_paths(mut paths: Vec<PathBuf>, seed: u64) -> Vec<PathBuf> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    paths.shuffle(&mut rng);
    paths
}

/// Seeded permutation of `0..len`
pub fn permutation(len: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    order
}

fn apply_order(paths: &[PathBuf], order: &[usize]) -> Vec<PathBuf> {
    order.iter().map(|&i| paths[i].clone()).collect()
}

/// Split off the last `tail` entries; a tail longer than the list takes everything
pub fn split_tail<T: Clone>(items: &[T], tail: usize) -> (Vec<T>, Vec<T>) {
    let cut = items.len().saturating_sub(tail);
    (items[..cut].to_vec(), items[cut..].to_vec())
}
