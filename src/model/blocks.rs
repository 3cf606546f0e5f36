//! Residual building blocks
//!
//! All blocks operate on channels-first tensors `[batch, channels, height, width]`.
//! Each block adds a 1x1 projection of `residual_base` to its main path so the
//! two can be summed even when the channel count or resolution changes.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        interpolate::{Interpolate2d, Interpolate2dConfig, InterpolateMode},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Batch-norm epsilon shared by every block (Keras default)
pub const BN_EPSILON: f64 = 1e-3;

/// Depthwise 3x3 convolution followed by a pointwise 1x1 convolution
#[derive(Module, Debug)]
pub struct SeparableConv2d<B: Backend> {
    pub depthwise: Conv2d<B>,
    pub pointwise: Conv2d<B>,
}

impl<B: Backend> SeparableConv2d<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let depthwise = Conv2dConfig::new([in_channels, in_channels], [3, 3])
            .with_groups(in_channels)
            .with_padding(PaddingConfig2d::Same)
            .with_bias(false)
            .init(device);

        let pointwise = Conv2dConfig::new([in_channels, out_channels], [1, 1]).init(device);

        Self {
            depthwise,
            pointwise,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pointwise.forward(self.depthwise.forward(x))
    }
}

/// Encoder block: two separable convolutions with an optional 2x downsample
#[derive(Module, Debug)]
pub struct DownBlock<B: Backend> {
    pub sep1: SeparableConv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub sep2: SeparableConv2d<B>,
    pub bn2: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: Option<MaxPool2d>,
    /// 1x1 projection of the residual base, strided when pooling
    pub residual: Conv2d<B>,
}

impl<B: Backend> DownBlock<B> {
    pub fn new(in_channels: usize, filters: usize, downsample: bool, device: &B::Device) -> Self {
        let pool = downsample.then(|| {
            MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init()
        });

        let stride = if downsample { 2 } else { 1 };
        let residual = Conv2dConfig::new([in_channels, filters], [1, 1])
            .with_stride([stride, stride])
            .init(device);

        Self {
            sep1: SeparableConv2d::new(in_channels, filters, device),
            bn1: BatchNormConfig::new(filters).with_epsilon(BN_EPSILON).init(device),
            sep2: SeparableConv2d::new(filters, filters, device),
            bn2: BatchNormConfig::new(filters).with_epsilon(BN_EPSILON).init(device),
            relu: Relu::new(),
            pool,
            residual,
        }
    }

    /// Returns `main(current) + project(residual_base)`
    pub fn forward(&self, current: Tensor<B, 4>, residual_base: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(current);
        let x = self.bn1.forward(self.sep1.forward(x));
        let x = self.relu.forward(x);
        let x = self.bn2.forward(self.sep2.forward(x));

        let x = match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        };

        x + self.residual.forward(residual_base)
    }

    pub fn downsamples(&self) -> bool {
        self.pool.is_some()
    }
}

/// Decoder block: two transposed convolutions with an optional 2x upsample
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    pub deconv1: ConvTranspose2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub deconv2: ConvTranspose2d<B>,
    pub bn2: BatchNorm<B, 2>,
    pub relu: Relu,
    pub upsample: Option<Interpolate2d>,
    pub residual: Conv2d<B>,
}

impl<B: Backend> UpBlock<B> {
    pub fn new(in_channels: usize, filters: usize, upsample: bool, device: &B::Device) -> Self {
        let upsample = upsample.then(|| {
            Interpolate2dConfig::new()
                .with_scale_factor(Some([2.0, 2.0]))
                .with_mode(InterpolateMode::Nearest)
                .init()
        });

        Self {
            deconv1: ConvTranspose2dConfig::new([in_channels, filters], [3, 3])
                .with_padding([1, 1])
                .init(device),
            bn1: BatchNormConfig::new(filters).with_epsilon(BN_EPSILON).init(device),
            deconv2: ConvTranspose2dConfig::new([filters, filters], [3, 3])
                .with_padding([1, 1])
                .init(device),
            bn2: BatchNormConfig::new(filters).with_epsilon(BN_EPSILON).init(device),
            relu: Relu::new(),
            upsample,
            residual: Conv2dConfig::new([in_channels, filters], [1, 1]).init(device),
        }
    }

    /// Returns `main(current) + project(upsample(residual_base))`
    pub fn forward(&self, current: Tensor<B, 4>, residual_base: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(current);
        let x = self.bn1.forward(self.deconv1.forward(x));
        let x = self.relu.forward(x);
        let x = self.bn2.forward(self.deconv2.forward(x));

        match &self.upsample {
            Some(up) => {
                let x = up.forward(x);
                x + self.residual.forward(up.forward(residual_base))
            }
            None => x + self.residual.forward(residual_base),
        }
    }

    pub fn upsamples(&self) -> bool {
        self.upsample.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_separable_conv_shape() {
        let device = Default::default();
        let sep = SeparableConv2d::<TestBackend>::new(4, 6, &device);
        let x = Tensor::<TestBackend, 4>::ones([2, 4, 8, 8], &device);
        assert_eq!(sep.forward(x).dims(), [2, 6, 8, 8]);
    }

    #[test]
    fn test_separable_conv_param_count() {
        let device = Default::default();
        let sep = SeparableConv2d::<TestBackend>::new(4, 6, &device);
        // depthwise 4*9 (no bias) + pointwise 4*6 + 6
        assert_eq!(sep.num_params(), 36 + 24 + 6);
    }

    #[test]
    fn test_down_block_shapes() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 4, 8, 8], &device);

        let keep = DownBlock::<TestBackend>::new(4, 8, false, &device);
        assert!(!keep.downsamples());
        assert_eq!(keep.forward(x.clone(), x.clone()).dims(), [1, 8, 8, 8]);

        let pool = DownBlock::<TestBackend>::new(4, 8, true, &device);
        assert_eq!(pool.forward(x.clone(), x).dims(), [1, 8, 4, 4]);
    }

    #[test]
    fn test_up_block_shapes() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([1, 8, 4, 4], &device);

        let keep = UpBlock::<TestBackend>::new(8, 4, false, &device);
        assert!(!keep.upsamples());
        assert_eq!(keep.forward(x.clone(), x.clone()).dims(), [1, 4, 4, 4]);

        let up = UpBlock::<TestBackend>::new(8, 4, true, &device);
        assert_eq!(up.forward(x.clone(), x).dims(), [1, 4, 8, 8]);
    }
}
