//! Rendering tensors to viewable PNG artifacts
//!
//! Every artifact goes through the same two steps: min/max scaling of the
//! tensor into 8-bit pixels, then a per-band histogram stretch.

use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, RgbImage};

use crate::dataset::{ColorMode, PixelTensor};
use crate::utils::error::{PixelShiftError, Result};

/// Scale a tensor to 8 bits: shift the minimum to 0, divide by the new
/// maximum when it is nonzero, multiply by 255 and truncate.
///
/// Three channels give an RGB image, one channel a grayscale image.
pub fn to_display_image(tensor: &PixelTensor) -> Result<DynamicImage> {
    let (min, _) = tensor.min_max();
    let max = tensor.data().iter().fold(f32::NEG_INFINITY, |m, &v| m.max(v - min));

    let pixels: Vec<u8> = tensor
        .data()
        .iter()
        .map(|&v| {
            let mut x = v - min;
            if max != 0.0 {
                x /= max;
            }
            (x * 255.0) as u8
        })
        .collect();

    pack(tensor, pixels)
}

/// Convert without rescaling; values are truncated and saturate at 0 and 255
pub fn to_image(tensor: &PixelTensor) -> Result<DynamicImage> {
    let pixels = tensor.data().iter().map(|&v| v as u8).collect();
    pack(tensor, pixels)
}

fn pack(tensor: &PixelTensor, pixels: Vec<u8>) -> Result<DynamicImage> {
    let (w, h) = (tensor.width() as u32, tensor.height() as u32);
    let image = match tensor.channels() {
        3 => RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
        1 => GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
        c => {
            return Err(PixelShiftError::InvalidInput(format!(
                "cannot display a {}-channel tensor",
                c
            )))
        }
    };

    image.ok_or_else(|| PixelShiftError::InvalidInput("pixel buffer does not match image size".to_string()))
}

/// Stretch each band so its darkest occupied level maps to 0 and its
/// brightest to 255. A band holding a single level is left as is.
pub fn autocontrast(image: &DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(gray) => {
            let mut out = gray.clone();
            stretch_bands(&mut out, 1);
            DynamicImage::ImageLuma8(out)
        }
        other => {
            let mut out = other.to_rgb8();
            stretch_bands(&mut out, 3);
            DynamicImage::ImageRgb8(out)
        }
    }
}

fn stretch_bands(buffer: &mut [u8], bands: usize) {
    for band in 0..bands {
        let mut histogram = [0usize; 256];
        for px in buffer.chunks_exact(bands) {
            histogram[px[band] as usize] += 1;
        }

        let lut = band_lut(&histogram);
        for px in buffer.chunks_exact_mut(bands) {
            px[band] = lut[px[band] as usize];
        }
    }
}

fn band_lut(histogram: &[usize; 256]) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = i as u8;
    }

    let lo = histogram.iter().position(|&n| n > 0);
    let hi = histogram.iter().rposition(|&n| n > 0);
    let (lo, hi) = match (lo, hi) {
        (Some(lo), Some(hi)) if hi > lo => (lo, hi),
        _ => return lut,
    };

    // Integer mapping; departs from PIL's float table, which can send `hi` to 254
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = ((i.clamp(lo, hi) - lo) * 255 / (hi - lo)) as u8;
    }
    lut
}

/// Scale then auto-contrast
pub fn render_tensor(tensor: &PixelTensor) -> Result<DynamicImage> {
    Ok(autocontrast(&to_display_image(tensor)?))
}

/// Convert an RGB or grayscale image back into a pixel tensor
pub fn image_to_tensor(image: &DynamicImage) -> PixelTensor {
    match image {
        DynamicImage::ImageLuma8(_) => PixelTensor::from_image(image, ColorMode::Grayscale),
        _ => PixelTensor::from_image(image, ColorMode::Rgb),
    }
}

/// Write a PNG, creating the parent directory if needed
pub fn save_png(image: &DynamicImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| PixelShiftError::Render(path.to_path_buf(), e.to_string()))?;
    }

    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| PixelShiftError::Render(path.to_path_buf(), e.to_string()))?;

    tracing::debug!("Wrote {:?}", path);
    Ok(())
}

/// Artifact file names for one run
#[derive(Debug, Clone)]
pub struct ArtifactNames {
    pub output_dir: PathBuf,
    pub run_name: String,
}

impl ArtifactNames {
    pub fn new(output_dir: impl Into<PathBuf>, run_name: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            run_name: run_name.into(),
        }
    }

    /// `<output_dir>/<run_name>_<index>.png`
    pub fn image(&self, index: usize) -> PathBuf {
        self.output_dir.join(format!("{}_{}.png", self.run_name, index))
    }

    /// `<output_dir>/<run_name>_3_<channel>.png`
    pub fn prediction_channel(&self, channel: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_3_{}.png", self.run_name, channel))
    }

    /// `<output_dir>/summary-<run_name>.txt`
    pub fn summary(&self) -> PathBuf {
        self.output_dir.join(format!("summary-{}.txt", self.run_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_display_scaling() {
        let t = PixelTensor::new(vec![10.0, 20.0, 30.0, 50.0], 2, 2, 1).unwrap();
        let img = to_display_image(&t).unwrap().to_luma8();

        // (v - 10) / 40 * 255, truncated
        assert_eq!(img.get_pixel(0, 0), &Luma([0]));
        assert_eq!(img.get_pixel(1, 0), &Luma([63]));
        assert_eq!(img.get_pixel(0, 1), &Luma([127]));
        assert_eq!(img.get_pixel(1, 1), &Luma([255]));
    }

    #[test]
    fn test_display_constant_tensor_is_black() {
        let t = PixelTensor::new(vec![42.0; 12], 2, 2, 3).unwrap();
        let img = to_display_image(&t).unwrap();
        assert!(matches!(img, DynamicImage::ImageRgb8(_)));
        assert!(img.to_rgb8().pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_display_handles_negative_values() {
        let t = PixelTensor::new(vec![-5.0, 5.0], 1, 2, 1).unwrap();
        let img = to_display_image(&t).unwrap().to_luma8();
        assert_eq!(img.as_raw(), &vec![0, 255]);
    }

    #[test]
    fn test_to_image_keeps_values() {
        let t = PixelTensor::new(vec![10.0, 20.7, 300.0, -4.0], 2, 2, 1).unwrap();
        let img = to_image(&t).unwrap().to_luma8();
        assert_eq!(img.as_raw(), &vec![10, 20, 255, 0]);
    }

    #[test]
    fn test_display_rejects_two_channels() {
        let t = PixelTensor::zeros(2, 2, 2);
        assert!(to_display_image(&t).is_err());
    }

    #[test]
    fn test_autocontrast_stretches_each_band() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([50, 0, 7]));
        img.put_pixel(1, 0, Rgb([100, 255, 7]));

        let out = autocontrast(&DynamicImage::ImageRgb8(img)).to_rgb8();
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 7]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([255, 255, 7]));
    }

    #[test]
    fn test_autocontrast_grayscale_midpoint() {
        let mut img = GrayImage::new(3, 1);
        img.put_pixel(0, 0, Luma([100]));
        img.put_pixel(1, 0, Luma([150]));
        img.put_pixel(2, 0, Luma([200]));

        let out = autocontrast(&DynamicImage::ImageLuma8(img)).to_luma8();
        assert_eq!(out.as_raw(), &vec![0, 127, 255]);
    }

    #[test]
    fn test_autocontrast_top_of_band_reaches_white() {
        let mut img = GrayImage::new(3, 1);
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(1, 0, Luma([10]));
        img.put_pixel(2, 0, Luma([25]));

        let out = autocontrast(&DynamicImage::ImageLuma8(img)).to_luma8();
        assert_eq!(out.as_raw(), &vec![0, 102, 255]);
    }

    #[test]
    fn test_artifact_names() {
        let names = ArtifactNames::new("out", "oxford_shift");
        assert_eq!(names.image(0), PathBuf::from("out/oxford_shift_0.png"));
        assert_eq!(names.prediction_channel(2), PathBuf::from("out/oxford_shift_3_2.png"));
        assert_eq!(names.summary(), PathBuf::from("out/summary-oxford_shift.txt"));
    }

    #[test]
    fn test_save_png_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("x_0.png");
        let t = PixelTensor::new(vec![0.0, 1.0, 2.0, 3.0], 2, 2, 1).unwrap();

        save_png(&render_tensor(&t).unwrap(), &path).unwrap();
        let reloaded = image::open(&path).unwrap().to_luma8();
        assert_eq!(reloaded.dimensions(), (2, 2));
        assert_eq!(reloaded.get_pixel(1, 1), &Luma([255]));
    }
}
