//! Single-sample inference
//!
//! Runs the network on a batch of one and hands back the per-pixel output as a
//! host tensor, optionally rounded to whole pixel values.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{decode_image, stack_samples, unstack_samples, ColorMode, PixelTensor, SampleBatch};
use crate::model::ResidualUNet;
use crate::utils::error::{PixelShiftError, Result};

/// Output of one forward pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Network output of shape (H, W, num_output_channels)
    pub output: PixelTensor,
    /// Source image when predicting from a path
    pub image_path: Option<PathBuf>,
    pub inference_time_ms: f64,
}

impl Prediction {
    /// Round half to even, like `rint`
    pub fn rounded(&self) -> Prediction {
        Prediction {
            output: self.output.rounded(),
            image_path: self.image_path.clone(),
            inference_time_ms: self.inference_time_ms,
        }
    }

    /// One single-channel tensor per output channel
    pub fn channels(&self) -> Vec<PixelTensor> {
        self.output.split_channels()
    }
}

/// Inference wrapper around a trained network
pub struct Predictor<B: Backend> {
    model: ResidualUNet<B>,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(model: ResidualUNet<B>, device: B::Device) -> Self {
        Self { model, device }
    }

    pub fn model(&self) -> &ResidualUNet<B> {
        &self.model
    }

    /// Input shape the network expects, as (H, W, C)
    pub fn input_shape(&self) -> [usize; 3] {
        let size = self.model.image_size();
        [size, size, 3]
    }

    /// Predict on a decoded sample of the network's input shape
    pub fn predict(&self, sample: &PixelTensor) -> Result<Prediction> {
        if sample.shape() != self.input_shape() {
            return Err(PixelShiftError::ShapeMismatch(format!(
                "network expects {:?}, got {:?}",
                self.input_shape(),
                sample.shape()
            )));
        }

        let start = Instant::now();
        let input = stack_samples::<B>(std::slice::from_ref(sample), &self.device)?;
        let output = self.model.forward(input);

        let output = unstack_samples(output)?
            .into_iter()
            .next()
            .ok_or_else(|| PixelShiftError::InvalidInput("network returned an empty batch".to_string()))?;
        let elapsed = start.elapsed();

        debug!("Inference took {:.2}ms", elapsed.as_secs_f64() * 1000.0);

        Ok(Prediction {
            output,
            image_path: None,
            inference_time_ms: elapsed.as_secs_f64() * 1000.0,
        })
    }

    /// Predict on input `index` of an assembled batch
    pub fn predict_batch_item(&self, batch: &SampleBatch, index: usize) -> Result<Prediction> {
        let sample = batch.inputs.get(index).ok_or_else(|| {
            PixelShiftError::InvalidInput(format!(
                "sample {} requested from a batch of {}",
                index,
                batch.len()
            ))
        })?;
        self.predict(sample)
    }

    /// Decode an external image at the network resolution and predict on it
    pub fn predict_path(&self, path: &Path) -> Result<Prediction> {
        let [h, w, _] = self.input_shape();
        let sample = decode_image(path, [h, w], ColorMode::Rgb)?;

        let mut prediction = self.predict(&sample)?;
        prediction.image_path = Some(path.to_path_buf());
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResidualUNetConfig;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray;

    fn predictor() -> Predictor<TestBackend> {
        let device = Default::default();
        let model = ResidualUNetConfig::new()
            .with_image_size(8)
            .with_entry_filters(4)
            .with_down_filters(vec![4])
            .with_up_filters(vec![4])
            .init::<TestBackend>(&device)
            .unwrap();
        Predictor::new(model, device)
    }

    #[test]
    fn test_predict_shape() {
        let predictor = predictor();
        let sample = PixelTensor::zeros(8, 8, 3);

        let prediction = predictor.predict(&sample).unwrap();
        assert_eq!(prediction.output.shape(), [8, 8, 3]);
        assert_eq!(prediction.channels().len(), 3);
        assert_eq!(prediction.channels()[1].shape(), [8, 8, 1]);
    }

    #[test]
    fn test_predict_rejects_wrong_shape() {
        let predictor = predictor();
        let result = predictor.predict(&PixelTensor::zeros(4, 4, 3));
        assert!(matches!(result, Err(PixelShiftError::ShapeMismatch(_))));
    }

    #[test]
    fn test_rounded_prediction_is_integral() {
        let predictor = predictor();
        let sample = PixelTensor::new(vec![123.0; 8 * 8 * 3], 8, 8, 3).unwrap();

        let rounded = predictor.predict(&sample).unwrap().rounded();
        assert!(rounded.output.data().iter().all(|v| v.fract() == 0.0));
        assert_eq!(rounded.rounded().output, rounded.output);
    }

    #[test]
    fn test_predict_path_resizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("external.png");
        RgbImage::from_pixel(20, 12, Rgb([10, 20, 30])).save(&path).unwrap();

        let prediction = predictor().predict_path(&path).unwrap();
        assert_eq!(prediction.output.shape(), [8, 8, 3]);
        assert_eq!(prediction.image_path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_predict_batch_item_out_of_range() {
        let batch = SampleBatch::default();
        assert!(predictor().predict_batch_item(&batch, 1).is_err());
    }
}
