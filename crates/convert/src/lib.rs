//! Checkpoint-to-package conversion
//!
//! This crate turns a pretrained RRDBNet `.pth` checkpoint into a
//! self-contained inference model package: weights are loaded, the network
//! is composed with its permanent output transform, the computation graph is
//! exercised once with synthetic data, and the declared input/output
//! contracts are written next to the (optionally quantized) weights.

pub mod checkpoint;
pub mod quantize;

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder};
use realsr_candle::arch::{ArchConfig, ClampedModel, RrdbNet};
use realsr_candle::package::{
    ColorLayout, DeploymentTarget, DimRange, FORMAT_VERSION, ImageInputSpec, ImageOutputSpec, ModelPackage, PackageError,
    PackageManifest, Precision, ScaleRatio,
};
use thiserror::Error;

pub use checkpoint::{Checkpoint, CheckpointError, ParamKey};

/// Name the exported input contract is bound by at prediction time
pub const INPUT_NAME: &str = "input_image";
/// Name the exported output contract is published under
pub const OUTPUT_NAME: &str = "output_image";

/// Conversion configuration
///
/// Everything baked into the exported package besides the weights
/// themselves: precision, deployment target, the supported resolution
/// range, and the synthetic image size used to exercise the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Export with fp16 precision and quantized weights
    pub float16: bool,
    /// Deployment target recorded in the manifest
    pub target: DeploymentTarget,
    /// Minimum supported square-image dimension
    pub min_dim: u32,
    /// Maximum supported square-image dimension
    pub max_dim: u32,
    /// Side length of the synthetic trace input
    pub trace_size: u32,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            float16: false,
            target: DeploymentTarget::Mac,
            min_dim: 64,
            max_dim: 2048,
            trace_size: 64,
        }
    }
}

impl ConvertOptions {
    /// Validates the configured dimension range and trace size
    ///
    /// Runs before any file access, so an invalid range is rejected at
    /// conversion time rather than surfacing later as a runtime surprise.
    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.min_dim == 0 || self.max_dim == 0 {
            return Err(ConvertError::ZeroDimension);
        }
        if self.min_dim > self.max_dim {
            return Err(ConvertError::InvalidDimRange {
                min: self.min_dim,
                max: self.max_dim,
            });
        }
        if self.trace_size == 0 {
            return Err(ConvertError::ZeroTraceSize);
        }
        Ok(())
    }

    /// Returns the compute precision this configuration exports at
    pub fn precision(&self) -> Precision {
        if self.float16 { Precision::Float16 } else { Precision::Float32 }
    }
}

/// Error types for conversion
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The configured dimension range is inverted
    #[error("invalid dimension range: min {min} must not exceed max {max}")]
    InvalidDimRange {
        /// Configured minimum dimension
        min: u32,
        /// Configured maximum dimension
        max: u32,
    },
    /// A configured dimension is zero
    #[error("supported dimensions must be positive")]
    ZeroDimension,
    /// The configured trace size is zero
    #[error("trace size must be positive")]
    ZeroTraceSize,
    /// The checkpoint could not be loaded
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    /// Network construction or the trace forward pass failed
    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),
    /// The traced graph produced an unexpected output shape
    #[error("trace produced output shape {found:?}, expected {expected:?}")]
    TraceShape {
        /// Shape the trace produced
        found: Vec<usize>,
        /// Shape the architecture promises
        expected: Vec<usize>,
    },
    /// The traced graph emitted a value outside the guaranteed output range
    #[error("trace produced values in [{min}, {max}], outside the guaranteed [0, 255]")]
    TraceRange {
        /// Smallest traced output value
        min: f32,
        /// Largest traced output value
        max: f32,
    },
    /// The package could not be written
    #[error(transparent)]
    Package(#[from] PackageError),
}

/// Result of exercising the composed model during export
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceReport {
    /// Output shape of the traced forward pass
    pub output_shape: [usize; 4],
    /// Smallest output value observed
    pub min: f32,
    /// Largest output value observed
    pub max: f32,
}

/// Converts a `.pth` checkpoint into a model package at `out`
///
/// The fixed architecture (3 in/out channels, 64 features, 23 blocks, 32
/// growth channels, 4x) is assumed; a checkpoint for any other network
/// fails construction. Produces exactly one package directory, overwriting
/// any existing artifact at the path.
///
/// # Errors
/// Fails on invalid options (before any file access), on unreadable or
/// key-less checkpoints (before any file write), and on trace or save
/// failures. No partial-artifact cleanup is performed.
pub fn convert_checkpoint(pth: &Path, out: &Path, options: &ConvertOptions) -> Result<TraceReport, ConvertError> {
    options.validate()?;

    let checkpoint = Checkpoint::open(pth)?;
    tracing::info!("loaded checkpoint weights under `{}`", checkpoint.key().as_str());

    convert_model(checkpoint.into_tensors(), &ArchConfig::default(), out, options)
}

/// Converts already-materialized weights into a model package at `out`
///
/// This is the body of [`convert_checkpoint`] after checkpoint loading,
/// split out so callers with weights from another source (or tests with a
/// reduced architecture) can drive the same pipeline.
pub fn convert_model(
    weights: HashMap<String, Tensor>,
    arch: &ArchConfig,
    out: &Path,
    options: &ConvertOptions,
) -> Result<TraceReport, ConvertError> {
    options.validate()?;
    let device = Device::Cpu;

    // Build the network and compose it with the permanent output transform;
    // candle modules carry no training state, so construction yields
    // inference mode. Shape mismatches against `arch` surface here.
    let vb = VarBuilder::from_tensors(weights.clone(), DType::F32, &device);
    let net = RrdbNet::new(arch, vb)?;
    let model = ClampedModel::new(net);

    // Exercise the composed graph once with synthetic data; the package
    // describes a concrete traced graph, not just parameter values
    let report = trace_model(&model, arch, options.trace_size, &device)?;
    tracing::info!(
        "traced graph: output shape {:?}, value range {:.4}-{:.4}",
        report.output_shape,
        report.min,
        report.max
    );

    let manifest = PackageManifest {
        format_version: FORMAT_VERSION,
        name: package_name(out),
        architecture: *arch,
        input: ImageInputSpec {
            name: INPUT_NAME.to_string(),
            color_layout: ColorLayout::Rgb,
            height: DimRange::new(options.min_dim, options.max_dim),
            width: DimRange::new(options.min_dim, options.max_dim),
            // Callers supply raw 0-255 samples; the runtime divides by 255
            scale: ScaleRatio::new(1, 255),
            bias: [0.0, 0.0, 0.0],
        },
        output: ImageOutputSpec {
            name: OUTPUT_NAME.to_string(),
            color_layout: ColorLayout::Rgb,
        },
        precision: options.precision(),
        target: options.target,
    };

    // The quantization pass is a second compression step on top of the
    // precision declaration, applied to the stored weights only
    let weights = if options.float16 { quantize::quantize_weights(&weights)? } else { weights };

    let package = ModelPackage { manifest, weights };
    package.save(out)?;
    tracing::info!("saved model package to {}", out.display());

    Ok(report)
}

/// Runs the wrapped model on synthetic random input and validates the
/// resulting graph: the output must have the promised shape and respect the
/// guaranteed [0, 255] value range
fn trace_model(model: &ClampedModel, arch: &ArchConfig, trace_size: u32, device: &Device) -> Result<TraceReport, ConvertError> {
    let side = trace_size as usize;
    let example = Tensor::rand(0f32, 1f32, (1, arch.in_channels, side, side), device)?;
    let output = model.forward(&example)?;

    let found = output.dims().to_vec();
    let expected = vec![1, arch.out_channels, side * arch.scale, side * arch.scale];
    if found != expected {
        return Err(ConvertError::TraceShape { found, expected });
    }

    let values = output.flatten_all()?.to_vec1::<f32>()?;
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for value in values {
        min = min.min(value);
        max = max.max(value);
    }
    if min < 0.0 || max > 255.0 {
        return Err(ConvertError::TraceRange { min, max });
    }

    Ok(TraceReport {
        output_shape: [expected[0], expected[1], expected[2], expected[3]],
        min,
        max,
    })
}

/// Derives the manifest model name from the output path
fn package_name(out: &Path) -> String {
    out.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("rrdbnet")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = ConvertOptions::default();
        assert_eq!(options.min_dim, 64);
        assert_eq!(options.max_dim, 2048);
        assert_eq!(options.trace_size, 64);
        assert_eq!(options.target, DeploymentTarget::Mac);
        assert_eq!(options.precision(), Precision::Float32);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_reject_inverted_range() {
        let options = ConvertOptions {
            min_dim: 512,
            max_dim: 64,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(ConvertError::InvalidDimRange { min: 512, max: 64 })));
    }

    #[test]
    fn test_options_reject_zero_dimensions() {
        let options = ConvertOptions {
            min_dim: 0,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(ConvertError::ZeroDimension)));

        let options = ConvertOptions {
            trace_size: 0,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(ConvertError::ZeroTraceSize)));
    }

    #[test]
    fn test_float16_selects_precision() {
        let options = ConvertOptions {
            float16: true,
            ..Default::default()
        };
        assert_eq!(options.precision(), Precision::Float16);
    }

    #[test]
    fn test_package_name_from_path() {
        assert_eq!(package_name(Path::new("output/realesrgan_x4plus.srpkg")), "realesrgan_x4plus");
        assert_eq!(package_name(Path::new("..")), "rrdbnet");
    }
}
