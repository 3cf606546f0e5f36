//! Network architecture built with the Burn framework
//!
//! - `blocks`: separable convolution and the residual down/up blocks
//! - `network`: the configurable encoder-decoder composed from those blocks

pub mod blocks;
pub mod network;

pub use blocks::{DownBlock, SeparableConv2d, UpBlock};
pub use network::{ResidualUNet, ResidualUNetConfig};
