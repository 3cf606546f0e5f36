//! Burn batching for input/target image pairs
//!
//! Tensors stay in NHWC layout with raw pixel values; the network permutes
//! to channels-first internally.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use crate::dataset::sample::PixelTensor;
use crate::utils::error::{PixelShiftError, Result};

/// One training example
#[derive(Clone, Debug)]
pub struct SamplePair {
    pub input: PixelTensor,
    pub target: PixelTensor,
}

/// A batch of pairs as tensors of shape [N, H, W, C]
#[derive(Clone, Debug)]
pub struct PairBatch<B: Backend> {
    pub inputs: Tensor<B, 4>,
    pub targets: Tensor<B, 4>,
}

/// Batcher turning [`SamplePair`]s into [`PairBatch`]es
#[derive(Clone, Debug, Default)]
pub struct PairBatcher;

impl PairBatcher {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, SamplePair, PairBatch<B>> for PairBatcher {
    fn batch(&self, items: Vec<SamplePair>, device: &B::Device) -> PairBatch<B> {
        let (inputs, targets): (Vec<_>, Vec<_>) =
            items.into_iter().map(|p| (p.input, p.target)).unzip();

        PairBatch {
            inputs: stack_unchecked(inputs, device),
            targets: stack_unchecked(targets, device),
        }
    }
}

/// Stack samples of identical shape into an NHWC tensor
pub fn stack_samples<B: Backend>(samples: &[PixelTensor], device: &B::Device) -> Result<Tensor<B, 4>> {
    let first = samples
        .first()
        .ok_or_else(|| PixelShiftError::InvalidInput("cannot stack an empty sample list".to_string()))?;

    let shape = first.shape();
    if let Some(odd) = samples.iter().find(|s| s.shape() != shape) {
        return Err(PixelShiftError::ShapeMismatch(format!(
            "sample of shape {:?} in a batch of {:?}",
            odd.shape(),
            shape
        )));
    }

    Ok(stack_unchecked(samples.to_vec(), device))
}

fn stack_unchecked<B: Backend>(samples: Vec<PixelTensor>, device: &B::Device) -> Tensor<B, 4> {
    let n = samples.len();
    let [h, w, c] = samples.first().map(PixelTensor::shape).unwrap_or([0, 0, 0]);

    let data: Vec<f32> = samples.into_iter().flat_map(PixelTensor::into_data).collect();

    Tensor::<B, 4>::from_floats(TensorData::new(data, [n, h, w, c]), device)
}

/// Split an NHWC tensor back into host samples
pub fn unstack_samples<B: Backend>(tensor: Tensor<B, 4>) -> Result<Vec<PixelTensor>> {
    let [n, h, w, c] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| PixelShiftError::InvalidInput(format!("tensor readback failed: {:?}", e)))?;

    let per_sample = h * w * c;
    (0..n)
        .map(|i| PixelTensor::new(values[i * per_sample..(i + 1) * per_sample].to_vec(), h, w, c))
        .collect()
}
