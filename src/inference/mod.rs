//! Inference on validation samples and external images

pub mod predictor;

pub use predictor::{Prediction, Predictor};
