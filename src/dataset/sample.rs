//! Decoded pixel tensors
//!
//! A [`PixelTensor`] is one decoded, resized image stored in HWC order with
//! raw `0..=255` intensities as `f32`. No normalization is applied: the network
//! regresses pixel values directly.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};

use crate::utils::error::{PixelShiftError, Result};

/// How a file is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    /// Three channels
    Rgb,
    /// One channel (used for trimap masks)
    Grayscale,
}

impl ColorMode {
    pub fn channels(&self) -> usize {
        match self {
            ColorMode::Rgb => 3,
            ColorMode::Grayscale => 1,
        }
    }
}

/// A single image tensor of shape (H, W, C)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelTensor {
    data: Vec<f32>,
    height: usize,
    width: usize,
    channels: usize,
}

impl PixelTensor {
    /// Wrap an HWC buffer, checking its length against the shape
    pub fn new(data: Vec<f32>, height: usize, width: usize, channels: usize) -> Result<Self> {
        let expected = height * width * channels;
        if data.len() != expected {
            return Err(PixelShiftError::ShapeMismatch(format!(
                "buffer of {} values cannot hold ({}, {}, {})",
                data.len(),
                height,
                width,
                channels
            )));
        }

        Ok(Self {
            data,
            height,
            width,
            channels,
        })
    }

    pub fn zeros(height: usize, width: usize, channels: usize) -> Self {
        Self {
            data: vec![0.0; height * width * channels],
            height,
            width,
            channels,
        }
    }

    /// Build from a decoded image, keeping its native channel layout
    pub fn from_image(image: &DynamicImage, mode: ColorMode) -> Self {
        let (width, height, raw) = match mode {
            ColorMode::Rgb => {
                let rgb = image.to_rgb8();
                let (w, h) = rgb.dimensions();
                (w, h, rgb.into_raw())
            }
            ColorMode::Grayscale => {
                let luma = image.to_luma8();
                let (w, h) = luma.dimensions();
                (w, h, luma.into_raw())
            }
        };

        Self {
            data: raw.into_iter().map(f32::from).collect(),
            height: height as usize,
            width: width as usize,
            channels: mode.channels(),
        }
    }

    /// Shape as (H, W, C)
    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Value at row `y`, column `x`, channel `c`
    pub fn get(&self, y: usize, x: usize, c: usize) -> f32 {
        self.data[(y * self.width + x) * self.channels + c]
    }

    /// Extract channel `c` as a single-channel tensor
    pub fn channel(&self, c: usize) -> Result<PixelTensor> {
        if c >= self.channels {
            return Err(PixelShiftError::ShapeMismatch(format!(
                "channel {} requested from a {}-channel tensor",
                c, self.channels
            )));
        }

        let data = self
            .data
            .chunks_exact(self.channels)
            .map(|pixel| pixel[c])
            .collect();

        Ok(Self {
            data,
            height: self.height,
            width: self.width,
            channels: 1,
        })
    }

    /// Decompose into one single-channel tensor per channel
    pub fn split_channels(&self) -> Vec<PixelTensor> {
        (0..self.channels)
            .filter_map(|c| self.channel(c).ok())
            .collect()
    }

    /// Round every element to the nearest integer (ties to even)
    pub fn rounded(&self) -> PixelTensor {
        // `+ 0.0` folds -0.0 into 0.0
        let data = self.data.iter().map(|v| v.round_ties_even() + 0.0).collect();

        Self {
            data,
            height: self.height,
            width: self.width,
            channels: self.channels,
        }
    }

    /// Subtract a constant from every element
    pub fn offset(mut self, delta: f32) -> PixelTensor {
        for v in &mut self.data {
            *v -= delta;
        }
        self
    }

    /// Smallest and largest element
    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }
}

/// Decode an image file and resize it to `size` = [height, width]
///
/// Resizing uses nearest-neighbour sampling and ignores the aspect ratio.
pub fn decode_image(path: &Path, size: [usize; 2], mode: ColorMode) -> Result<PixelTensor> {
    let img = ImageReader::open(path)
        .map_err(|e| PixelShiftError::Decode(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| PixelShiftError::Decode(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| PixelShiftError::Decode(path.to_path_buf(), e.to_string()))?;

    let [height, width] = size;
    let resized = img.resize_exact(width as u32, height as u32, FilterType::Nearest);

    Ok(PixelTensor::from_image(&resized, mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient() -> PixelTensor {
        // 2x2 RGB with distinct values per channel
        let data = vec![
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, //
            7.0, 8.0, 9.0, 10.0, 11.0, 12.0,
        ];
        PixelTensor::new(data, 2, 2, 3).unwrap()
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        let result = PixelTensor::new(vec![0.0; 10], 2, 2, 3);
        assert!(matches!(result, Err(PixelShiftError::ShapeMismatch(_))));
    }

    #[test]
    fn test_hwc_indexing() {
        let t = gradient();
        assert_eq!(t.shape(), [2, 2, 3]);
        assert_eq!(t.get(0, 0, 0), 1.0);
        assert_eq!(t.get(0, 1, 2), 6.0);
        assert_eq!(t.get(1, 0, 1), 8.0);
    }

    #[test]
    fn test_split_channels() {
        let channels = gradient().split_channels();
        assert_eq!(channels.len(), 3);
        assert_eq!(channels[0].data(), &[1.0, 4.0, 7.0, 10.0]);
        assert_eq!(channels[1].data(), &[2.0, 5.0, 8.0, 11.0]);
        assert_eq!(channels[2].data(), &[3.0, 6.0, 9.0, 12.0]);
        assert_eq!(channels[2].shape(), [2, 2, 1]);
    }

    #[test]
    fn test_channel_out_of_range() {
        assert!(gradient().channel(3).is_err());
    }

    #[test]
    fn test_rounding_matches_rint() {
        let t = PixelTensor::new(vec![1.2, 2.7, -0.4], 1, 3, 1).unwrap();
        let rounded = t.rounded();
        assert_eq!(rounded.data(), &[1.0, 3.0, 0.0]);
        assert!(rounded.data()[2].is_sign_positive());

        let ties = PixelTensor::new(vec![0.5, 1.5, 2.5], 1, 3, 1).unwrap();
        assert_eq!(ties.rounded().data(), &[0.0, 2.0, 2.0]);
    }

    #[test]
    fn test_rounding_is_idempotent() {
        let t = PixelTensor::new(vec![0.49, 17.5, 254.51, -3.2], 2, 2, 1).unwrap();
        let once = t.rounded();
        assert_eq!(once.rounded(), once);
    }

    #[test]
    fn test_decode_and_resize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solid.png");
        RgbImage::from_pixel(10, 6, Rgb([200, 100, 50]))
            .save(&path)
            .unwrap();

        let t = decode_image(&path, [4, 4], ColorMode::Rgb).unwrap();
        assert_eq!(t.shape(), [4, 4, 3]);
        assert_eq!(t.get(3, 3, 0), 200.0);
        assert_eq!(t.get(0, 0, 1), 100.0);
        assert_eq!(t.get(2, 1, 2), 50.0);

        let gray = decode_image(&path, [4, 4], ColorMode::Grayscale).unwrap();
        assert_eq!(gray.shape(), [4, 4, 1]);
    }

    #[test]
    fn test_decode_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();

        let result = decode_image(&path, [4, 4], ColorMode::Rgb);
        assert!(matches!(result, Err(PixelShiftError::Decode(p, _)) if p == path));
    }
}
