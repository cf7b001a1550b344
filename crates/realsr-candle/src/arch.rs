//! RRDBNet architecture and the fixed output wrapper
//!
//! This module builds the residual-in-residual dense block network the
//! exported checkpoints were trained with, on top of candle's conv layers.
//! The network is constructed directly from named weight tensors through a
//! [`VarBuilder`]; a parameter whose shape disagrees with the configuration
//! fails construction, which is the intended fatal-load behavior.

use candle_core::{Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Module, VarBuilder, conv2d, ops};
use serde::{Deserialize, Serialize};

/// Negative slope shared by every leaky ReLU in the network
const LEAKY_RELU_SLOPE: f64 = 0.2;
/// Residual scaling applied to dense-block and RRDB outputs
const RESIDUAL_SCALE: f64 = 0.2;

/// Structural configuration of an RRDBNet
///
/// The conversion tool always uses [`ArchConfig::default`]; smaller
/// configurations exist for tests and future model variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchConfig {
    /// Number of input image channels
    pub in_channels: usize,
    /// Number of output image channels
    pub out_channels: usize,
    /// Base feature width of the trunk
    pub num_features: usize,
    /// Number of RRDB blocks in the trunk
    pub num_blocks: usize,
    /// Growth width inside each residual dense block
    pub growth_channels: usize,
    /// Spatial upscale factor (the trained checkpoints are 4x)
    pub scale: usize,
}

impl Default for ArchConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            out_channels: 3,
            num_features: 64,
            num_blocks: 23,
            growth_channels: 32,
            scale: 4,
        }
    }
}

impl ArchConfig {
    /// Enumerates every parameter name the network loads, with its shape
    ///
    /// The names match the checkpoint layout (`conv_first.weight`,
    /// `body.{i}.rdb{j}.conv{k}.weight`, ...), so the list doubles as the
    /// completeness check for checkpoints and packages.
    pub fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let nf = self.num_features;
        let gc = self.growth_channels;
        let mut shapes = Vec::new();

        let mut push_conv = |name: String, out_c: usize, in_c: usize| {
            shapes.push((format!("{name}.weight"), vec![out_c, in_c, 3, 3]));
            shapes.push((format!("{name}.bias"), vec![out_c]));
        };

        push_conv("conv_first".to_string(), nf, self.in_channels);

        for block in 0..self.num_blocks {
            for rdb in 1..=3 {
                for conv in 1..=5 {
                    let in_c = nf + (conv - 1) * gc;
                    let out_c = if conv == 5 { nf } else { gc };
                    push_conv(format!("body.{block}.rdb{rdb}.conv{conv}"), out_c, in_c);
                }
            }
        }

        push_conv("conv_body".to_string(), nf, nf);
        push_conv("conv_up1".to_string(), nf, nf);
        push_conv("conv_up2".to_string(), nf, nf);
        push_conv("conv_hr".to_string(), nf, nf);
        push_conv("conv_last".to_string(), self.out_channels, nf);

        shapes
    }
}

/// Creates a 3x3 same-padding convolution under `name`
fn conv3x3(in_c: usize, out_c: usize, vb: VarBuilder, name: &str) -> Result<Conv2d> {
    let config = Conv2dConfig {
        padding: 1,
        ..Default::default()
    };
    conv2d(in_c, out_c, 3, config, vb.pp(name))
}

/// A five-convolution dense block with a scaled residual connection
///
/// Each convolution sees the concatenation of the block input and every
/// preceding activation.
#[derive(Debug)]
struct ResidualDenseBlock {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    conv4: Conv2d,
    conv5: Conv2d,
}

impl ResidualDenseBlock {
    fn new(config: &ArchConfig, vb: VarBuilder) -> Result<Self> {
        let nf = config.num_features;
        let gc = config.growth_channels;
        Ok(Self {
            conv1: conv3x3(nf, gc, vb.clone(), "conv1")?,
            conv2: conv3x3(nf + gc, gc, vb.clone(), "conv2")?,
            conv3: conv3x3(nf + 2 * gc, gc, vb.clone(), "conv3")?,
            conv4: conv3x3(nf + 3 * gc, gc, vb.clone(), "conv4")?,
            conv5: conv3x3(nf + 4 * gc, nf, vb, "conv5")?,
        })
    }
}

impl Module for ResidualDenseBlock {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x1 = ops::leaky_relu(&self.conv1.forward(x)?, LEAKY_RELU_SLOPE)?;
        let x2 = ops::leaky_relu(&self.conv2.forward(&Tensor::cat(&[x, &x1], 1)?)?, LEAKY_RELU_SLOPE)?;
        let x3 = ops::leaky_relu(&self.conv3.forward(&Tensor::cat(&[x, &x1, &x2], 1)?)?, LEAKY_RELU_SLOPE)?;
        let x4 = ops::leaky_relu(&self.conv4.forward(&Tensor::cat(&[x, &x1, &x2, &x3], 1)?)?, LEAKY_RELU_SLOPE)?;
        let x5 = self.conv5.forward(&Tensor::cat(&[x, &x1, &x2, &x3, &x4], 1)?)?;
        x5.affine(RESIDUAL_SCALE, 0.0)? + x
    }
}

/// Residual-in-residual dense block: three dense blocks plus an outer residual
#[derive(Debug)]
struct Rrdb {
    rdb1: ResidualDenseBlock,
    rdb2: ResidualDenseBlock,
    rdb3: ResidualDenseBlock,
}

impl Rrdb {
    fn new(config: &ArchConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            rdb1: ResidualDenseBlock::new(config, vb.pp("rdb1"))?,
            rdb2: ResidualDenseBlock::new(config, vb.pp("rdb2"))?,
            rdb3: ResidualDenseBlock::new(config, vb.pp("rdb3"))?,
        })
    }
}

impl Module for Rrdb {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let out = self.rdb1.forward(x)?;
        let out = self.rdb2.forward(&out)?;
        let out = self.rdb3.forward(&out)?;
        out.affine(RESIDUAL_SCALE, 0.0)? + x
    }
}

/// The full super-resolution network
///
/// Input is a `(1, in_channels, H, W)` tensor with samples in the network's
/// 0-1 domain; output is `(1, out_channels, scale*H, scale*W)`, unclamped.
#[derive(Debug)]
pub struct RrdbNet {
    conv_first: Conv2d,
    body: Vec<Rrdb>,
    conv_body: Conv2d,
    conv_up1: Conv2d,
    conv_up2: Conv2d,
    conv_hr: Conv2d,
    conv_last: Conv2d,
}

impl RrdbNet {
    /// Builds the network from named parameters
    ///
    /// # Errors
    /// Fails if any parameter is missing from the builder or its shape does
    /// not match `config`.
    pub fn new(config: &ArchConfig, vb: VarBuilder) -> Result<Self> {
        let nf = config.num_features;
        let body = (0..config.num_blocks)
            .map(|i| Rrdb::new(config, vb.pp(format!("body.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            conv_first: conv3x3(config.in_channels, nf, vb.clone(), "conv_first")?,
            body,
            conv_body: conv3x3(nf, nf, vb.clone(), "conv_body")?,
            conv_up1: conv3x3(nf, nf, vb.clone(), "conv_up1")?,
            conv_up2: conv3x3(nf, nf, vb.clone(), "conv_up2")?,
            conv_hr: conv3x3(nf, nf, vb.clone(), "conv_hr")?,
            conv_last: conv3x3(nf, config.out_channels, vb, "conv_last")?,
        })
    }
}

impl Module for RrdbNet {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let feat = self.conv_first.forward(x)?;

        let mut trunk = feat.clone();
        for block in &self.body {
            trunk = block.forward(&trunk)?;
        }
        let trunk = self.conv_body.forward(&trunk)?;
        let feat = (&feat + &trunk)?;

        // Two nearest-neighbor 2x stages make up the 4x upscale
        let (_, _, h, w) = feat.dims4()?;
        let feat = ops::leaky_relu(&self.conv_up1.forward(&feat.upsample_nearest2d(h * 2, w * 2)?)?, LEAKY_RELU_SLOPE)?;
        let (_, _, h, w) = feat.dims4()?;
        let feat = ops::leaky_relu(&self.conv_up2.forward(&feat.upsample_nearest2d(h * 2, w * 2)?)?, LEAKY_RELU_SLOPE)?;

        let feat = ops::leaky_relu(&self.conv_hr.forward(&feat)?, LEAKY_RELU_SLOPE)?;
        self.conv_last.forward(&feat)
    }
}

/// The network composed with its permanent output transform
///
/// Clamps every output value to [0, 1] and scales by 255, so the exported
/// model can never emit an out-of-range pixel value, whatever the input.
/// Only this wrapped form is traced and exported; there is no unwrapped
/// variant.
#[derive(Debug)]
pub struct ClampedModel {
    inner: RrdbNet,
}

impl ClampedModel {
    /// Wraps a network for the lifetime of the conversion or prediction
    pub fn new(inner: RrdbNet) -> Self {
        Self { inner }
    }
}

impl Module for ClampedModel {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let out = self.inner.forward(x)?;
        out.clamp(0f32, 1f32)?.affine(255.0, 0.0)
    }
}
