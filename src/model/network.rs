//! Residual encoder-decoder network
//!
//! Entry convolution, a stack of [`DownBlock`]s, a mirrored stack of
//! [`UpBlock`]s and a linear 3x3 head. The public interface is NHWC: images go
//! in as `[batch, height, width, 3]` and predictions come out as
//! `[batch, height, width, num_output_channels]`.

use std::fmt::Write as _;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use super::blocks::{DownBlock, UpBlock, BN_EPSILON};
use crate::utils::error::{PixelShiftError, Result as PsResult};

/// Configuration for [`ResidualUNet`]
#[derive(Config, Debug)]
pub struct ResidualUNetConfig {
    /// Input height and width (square images)
    #[config(default = "128")]
    pub image_size: usize,

    #[config(default = "3")]
    pub in_channels: usize,

    /// Channels of the per-pixel output
    #[config(default = "3")]
    pub num_output_channels: usize,

    #[config(default = "128")]
    pub entry_filters: usize,

    /// Stride of the entry convolution (2 halves the resolution)
    #[config(default = "1")]
    pub entry_stride: usize,

    #[config(default = "vec![128]")]
    pub down_filters: Vec<usize>,

    #[config(default = "vec![128]")]
    pub up_filters: Vec<usize>,

    /// Pool in every down block and upsample in every up block
    #[config(default = "false")]
    pub resample: bool,
}

impl ResidualUNetConfig {
    /// The deeper schedule with a strided entry and 2x resampling per block
    pub fn classic() -> Self {
        Self::new()
            .with_entry_filters(32)
            .with_entry_stride(2)
            .with_down_filters(vec![64, 128, 256])
            .with_up_filters(vec![256, 128, 64, 32])
            .with_resample(true)
    }

    /// Check that the output resolution matches the input resolution
    pub fn validate(&self) -> PsResult<()> {
        let zero_filters = self.down_filters.iter().chain(&self.up_filters).any(|&f| f == 0);
        if self.image_size == 0
            || self.in_channels == 0
            || self.num_output_channels == 0
            || self.entry_filters == 0
            || zero_filters
        {
            return Err(PixelShiftError::Config(
                "sizes, channels and filter counts must be positive".to_string(),
            ));
        }

        if self.entry_stride == 0 || self.image_size % self.entry_stride != 0 {
            return Err(PixelShiftError::Config(format!(
                "image size {} is not divisible by entry stride {}",
                self.image_size, self.entry_stride
            )));
        }

        let mut side = self.image_size / self.entry_stride;
        if self.resample {
            for _ in &self.down_filters {
                if side % 2 != 0 {
                    return Err(PixelShiftError::Config(format!(
                        "cannot pool an odd resolution of {}",
                        side
                    )));
                }
                side /= 2;
            }
            side <<= self.up_filters.len();
        }

        if side != self.image_size {
            return Err(PixelShiftError::Config(format!(
                "network maps {}x{} inputs to {}x{} outputs",
                self.image_size, self.image_size, side, side
            )));
        }

        Ok(())
    }

    /// Build the network, failing on an inconsistent configuration
    pub fn init<B: Backend>(&self, device: &B::Device) -> PsResult<ResidualUNet<B>> {
        self.validate()?;

        let entry_conv = Conv2dConfig::new([self.in_channels, self.entry_filters], [3, 3])
            .with_stride([self.entry_stride, self.entry_stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        let mut channels = self.entry_filters;
        let mut down_blocks = Vec::with_capacity(self.down_filters.len());
        for &filters in &self.down_filters {
            down_blocks.push(DownBlock::new(channels, filters, self.resample, device));
            channels = filters;
        }

        let mut up_blocks = Vec::with_capacity(self.up_filters.len());
        for &filters in &self.up_filters {
            up_blocks.push(UpBlock::new(channels, filters, self.resample, device));
            channels = filters;
        }

        let head = Conv2dConfig::new([channels, self.num_output_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Ok(ResidualUNet {
            entry_conv,
            entry_bn: BatchNormConfig::new(self.entry_filters)
                .with_epsilon(BN_EPSILON)
                .init(device),
            relu: Relu::new(),
            down_blocks,
            up_blocks,
            head,
            image_size: self.image_size,
            entry_stride: self.entry_stride,
            num_output_channels: self.num_output_channels,
        })
    }
}

/// Residual encoder-decoder regressing per-pixel values
#[derive(Module, Debug)]
pub struct ResidualUNet<B: Backend> {
    pub entry_conv: Conv2d<B>,
    pub entry_bn: BatchNorm<B, 2>,
    pub relu: Relu,
    pub down_blocks: Vec<DownBlock<B>>,
    pub up_blocks: Vec<UpBlock<B>>,
    pub head: Conv2d<B>,
    image_size: usize,
    entry_stride: usize,
    num_output_channels: usize,
}

impl<B: Backend> ResidualUNet<B> {
    /// Forward pass
    ///
    /// # Arguments
    /// * `images` - NHWC tensor of shape [batch, height, width, in_channels]
    ///
    /// # Returns
    /// * NHWC tensor of shape [batch, height, width, num_output_channels]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = images.permute([0, 3, 1, 2]);

        let x = self.entry_conv.forward(x);
        let x = self.entry_bn.forward(x);
        let mut x = self.relu.forward(x);

        // Each block's output is the next block's residual base
        for block in &self.down_blocks {
            x = block.forward(x.clone(), x);
        }
        for block in &self.up_blocks {
            x = block.forward(x.clone(), x);
        }

        self.head.forward(x).permute([0, 2, 3, 1])
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn num_output_channels(&self) -> usize {
        self.num_output_channels
    }

    /// Layer table with output shapes (batch of one) and parameter counts
    pub fn summary(&self) -> String {
        let mut rows: Vec<(String, [usize; 3], usize)> = Vec::new();

        let mut side = self.image_size / self.entry_stride;
        let mut channels = self.entry_bn.gamma.dims()[0];

        rows.push((
            "entry_conv (Conv2d 3x3)".to_string(),
            [side, side, channels],
            self.entry_conv.num_params(),
        ));
        rows.push((
            "entry_bn (BatchNorm)".to_string(),
            [side, side, channels],
            self.entry_bn.num_params(),
        ));

        for (i, block) in self.down_blocks.iter().enumerate() {
            channels = block.bn2.gamma.dims()[0];
            if block.downsamples() {
                side /= 2;
            }
            rows.push((
                format!("down_{} (SeparableConv x2 + residual)", i),
                [side, side, channels],
                block.num_params(),
            ));
        }

        for (i, block) in self.up_blocks.iter().enumerate() {
            channels = block.bn2.gamma.dims()[0];
            if block.upsamples() {
                side *= 2;
            }
            rows.push((
                format!("up_{} (ConvTranspose x2 + residual)", i),
                [side, side, channels],
                block.num_params(),
            ));
        }

        rows.push((
            "head (Conv2d 3x3, linear)".to_string(),
            [side, side, self.num_output_channels],
            self.head.num_params(),
        ));

        let mut out = String::new();
        let rule = "=".repeat(78);
        let _ = writeln!(out, "Model: ResidualUNet");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "{:<42}{:<24}{:>12}", "Layer", "Output shape", "Params");
        let _ = writeln!(out, "{}", "-".repeat(78));
        let _ = writeln!(
            out,
            "{:<42}{:<24}{:>12}",
            "input",
            format!("(1, {}, {}, 3)", self.image_size, self.image_size),
            0
        );
        for (name, [h, w, c], params) in &rows {
            let _ = writeln!(
                out,
                "{:<42}{:<24}{:>12}",
                name,
                format!("(1, {}, {}, {})", h, w, c),
                params
            );
        }
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Total params: {}", self.num_params());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> ResidualUNetConfig {
        ResidualUNetConfig::new()
            .with_image_size(16)
            .with_entry_filters(8)
            .with_down_filters(vec![8])
            .with_up_filters(vec![8])
    }

    #[test]
    fn test_default_config_matches_compact_schedule() {
        let config = ResidualUNetConfig::new();
        assert_eq!(config.image_size, 128);
        assert_eq!(config.entry_filters, 128);
        assert_eq!(config.entry_stride, 1);
        assert_eq!(config.down_filters, vec![128]);
        assert_eq!(config.up_filters, vec![128]);
        assert!(!config.resample);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_output_shape_matches_input() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();

        let x = Tensor::<TestBackend, 4>::ones([2, 16, 16, 3], &device);
        assert_eq!(model.forward(x).dims(), [2, 16, 16, 3]);
    }

    #[test]
    fn test_full_resolution_rgb_round_trip() {
        let device = Default::default();
        let config = ResidualUNetConfig::new()
            .with_entry_filters(4)
            .with_down_filters(vec![4])
            .with_up_filters(vec![4]);
        assert_eq!(config.image_size, 128);
        assert_eq!(config.num_output_channels, 3);

        let model = config.init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 4>::ones([1, 128, 128, 3], &device) * 127.0;
        assert_eq!(model.forward(x).dims(), [1, 128, 128, 3]);
    }

    #[test]
    fn test_config_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unet.json");

        let config = ResidualUNetConfig::classic().with_num_output_channels(1);
        config.save(&path).unwrap();

        let loaded = ResidualUNetConfig::load(&path).unwrap();
        assert_eq!(loaded.down_filters, vec![64, 128, 256]);
        assert_eq!(loaded.num_output_channels, 1);
        assert!(loaded.resample);
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_batch_norm_uses_keras_epsilon() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();

        assert_eq!(model.entry_bn.epsilon, 1e-3);
        assert_eq!(model.down_blocks[0].bn1.epsilon, 1e-3);
        assert_eq!(model.up_blocks[0].bn2.epsilon, 1e-3);
    }

    #[test]
    fn test_output_channels_follow_config() {
        let device = Default::default();
        let model = small_config()
            .with_num_output_channels(1)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::<TestBackend, 4>::zeros([1, 16, 16, 3], &device);
        assert_eq!(model.forward(x).dims(), [1, 16, 16, 1]);
    }

    #[test]
    fn test_classic_schedule_round_trips_resolution() {
        let config = ResidualUNetConfig::classic()
            .with_image_size(16)
            .with_entry_filters(4)
            .with_down_filters(vec![4, 8, 8])
            .with_up_filters(vec![8, 8, 4, 4]);
        assert!(config.validate().is_ok());

        let device = Default::default();
        let model = config.init::<TestBackend>(&device).unwrap();
        let x = Tensor::<TestBackend, 4>::ones([1, 16, 16, 3], &device);
        assert_eq!(model.forward(x).dims(), [1, 16, 16, 3]);
    }

    #[test]
    fn test_validate_rejects_unbalanced_resampling() {
        let config = ResidualUNetConfig::classic().with_up_filters(vec![32]);
        assert!(matches!(config.validate(), Err(PixelShiftError::Config(_))));

        let odd = ResidualUNetConfig::new().with_image_size(15).with_entry_stride(2);
        assert!(odd.validate().is_err());

        let empty = small_config().with_down_filters(vec![0]);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_summary_lists_layers() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device).unwrap();
        let summary = model.summary();

        assert!(summary.contains("entry_conv"));
        assert!(summary.contains("down_0"));
        assert!(summary.contains("up_0"));
        assert!(summary.contains("(1, 16, 16, 3)"));
        assert!(summary.contains(&format!("Total params: {}", model.num_params())));
    }
}
