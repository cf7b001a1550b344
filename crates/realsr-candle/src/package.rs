//! Exported model package format
//!
//! This module provides the manifest types and on-disk layout for exported
//! super-resolution model packages. A package is a directory bundling a JSON
//! manifest (the declared input/output contracts, compute precision, and
//! deployment target) with the wrapped network's weights in safetensors form.
//! The manifest is immutable after export: the runtime only reads it.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::arch::ArchConfig;

/// Manifest file name inside a package directory
pub const MANIFEST_FILE: &str = "manifest.json";
/// Weight file name inside a package directory
pub const WEIGHTS_FILE: &str = "weights.safetensors";
/// Package format version understood by this runtime
pub const FORMAT_VERSION: u32 = 1;

/// Represents a rational sample scale as a fraction
///
/// Used to express the input-side normalization exactly (e.g. "1/255"),
/// avoiding floating-point drift in the serialized manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleRatio {
    /// The numerator of the fraction
    pub numerator: u32,
    /// The denominator of the fraction
    pub denominator: u32,
}

impl ScaleRatio {
    /// Creates a new scale ratio from numerator and denominator
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self { numerator, denominator }
    }

    /// Converts the ratio to a floating-point multiplier
    pub fn to_f64(&self) -> f64 {
        f64::from(self.numerator) / f64::from(self.denominator)
    }

    /// Returns true if this ratio equals 1.0 (no scaling)
    pub fn is_unity(&self) -> bool {
        self.numerator == self.denominator
    }
}

impl FromStr for ScaleRatio {
    type Err = ScaleRatioParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('/') {
            let parts: Vec<&str> = s.split('/').collect();
            if parts.len() != 2 {
                return Err(ScaleRatioParseError::InvalidFormat);
            }

            let numerator = parts[0].parse::<u32>().map_err(|_| ScaleRatioParseError::InvalidNumerator)?;
            let denominator = parts[1].parse::<u32>().map_err(|_| ScaleRatioParseError::InvalidDenominator)?;

            if denominator == 0 {
                return Err(ScaleRatioParseError::ZeroDenominator);
            }

            Ok(ScaleRatio::new(numerator, denominator))
        } else {
            // Handle whole numbers like "1", "255", etc.
            let numerator = s.parse::<u32>().map_err(|_| ScaleRatioParseError::InvalidNumerator)?;
            Ok(ScaleRatio::new(numerator, 1))
        }
    }
}

impl fmt::Display for ScaleRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

impl Serialize for ScaleRatio {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScaleRatio {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error types for scale ratio parsing
#[derive(Debug, Clone)]
pub enum ScaleRatioParseError {
    /// The format is not recognized (should be "n" or "n/d")
    InvalidFormat,
    /// The numerator is not a valid integer
    InvalidNumerator,
    /// The denominator is not a valid integer
    InvalidDenominator,
    /// The denominator is zero (division by zero)
    ZeroDenominator,
}

impl fmt::Display for ScaleRatioParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat => write!(f, "Invalid scale ratio format"),
            Self::InvalidNumerator => write!(f, "Invalid numerator"),
            Self::InvalidDenominator => write!(f, "Invalid denominator"),
            Self::ZeroDenominator => write!(f, "Denominator cannot be zero"),
        }
    }
}

impl std::error::Error for ScaleRatioParseError {}

/// An inclusive range of supported image dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimRange {
    /// Smallest accepted dimension
    pub min: u32,
    /// Largest accepted dimension
    pub max: u32,
}

impl DimRange {
    /// Creates a new dimension range
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Returns true if `dim` lies inside the range (inclusive on both ends)
    pub fn contains(&self, dim: u32) -> bool {
        self.min <= dim && dim <= self.max
    }
}

impl fmt::Display for DimRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Channel order of an image contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorLayout {
    /// Red, green, blue
    Rgb,
    /// Blue, green, red
    Bgr,
}

impl ColorLayout {
    /// Returns the human-readable name of this layout
    pub fn name(&self) -> &'static str {
        match self {
            ColorLayout::Rgb => "RGB",
            ColorLayout::Bgr => "BGR",
        }
    }
}

/// Compute precision baked into a package at export time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// 16-bit floating point weights and activations
    Float16,
    /// 32-bit floating point weights and activations
    Float32,
}

impl Precision {
    /// Returns the human-readable name of this precision
    pub fn name(&self) -> &'static str {
        match self {
            Precision::Float16 => "float16",
            Precision::Float32 => "float32",
        }
    }

    /// Returns the candle dtype weights are stored at for this precision
    pub fn dtype(&self) -> DType {
        match self {
            Precision::Float16 => DType::F16,
            Precision::Float32 => DType::F32,
        }
    }
}

/// Deployment target baked into a package at export time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentTarget {
    /// Desktop deployment
    Mac,
    /// Mobile deployment
    Ios,
}

impl DeploymentTarget {
    /// Returns the human-readable name of this target
    pub fn name(&self) -> &'static str {
        match self {
            DeploymentTarget::Mac => "mac",
            DeploymentTarget::Ios => "ios",
        }
    }
}

/// Declared contract for the package's single image input
///
/// Callers supply raw 0-255 samples; the runtime applies `scale` and `bias`
/// before the samples enter the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInputSpec {
    /// Name the input is bound by at prediction time
    pub name: String,
    /// Channel order the network expects
    pub color_layout: ColorLayout,
    /// Accepted height range in pixels
    pub height: DimRange,
    /// Accepted width range in pixels
    pub width: DimRange,
    /// Multiplier applied to raw samples before the network
    pub scale: ScaleRatio,
    /// Per-channel offset added after scaling
    pub bias: [f32; 3],
}

/// Declared contract for the package's single image output
///
/// No output-side scaling is declared: the wrapped network already produces
/// the final 0-255 value range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOutputSpec {
    /// Name the output is published under at prediction time
    pub name: String,
    /// Channel order of the produced image
    pub color_layout: ColorLayout,
}

/// A complete package manifest describing one exported model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package format version, checked at load time
    pub format_version: u32,
    /// Human-readable model name
    pub name: String,
    /// Architecture the weights belong to
    pub architecture: ArchConfig,
    /// The single declared image input
    pub input: ImageInputSpec,
    /// The single declared image output
    pub output: ImageOutputSpec,
    /// Compute precision of the stored weights
    pub precision: Precision,
    /// Deployment target the package was exported for
    pub target: DeploymentTarget,
}

/// Error types for package loading and saving
#[derive(Debug, Error)]
pub enum PackageError {
    /// A package file could not be read or written
    #[error("package I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The manifest could not be parsed
    #[error("invalid package manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    /// The manifest declares a format version this runtime does not understand
    #[error("unsupported package format version {found} (expected {expected})")]
    UnsupportedFormatVersion {
        /// Version found in the manifest
        found: u32,
        /// Version this runtime understands
        expected: u32,
    },
    /// The weight file could not be read or written
    #[error("package weights error: {0}")]
    Weights(#[from] candle_core::Error),
    /// A parameter required by the declared architecture is absent
    #[error("package weights are missing parameter `{0}`")]
    MissingParameter(String),
    /// A stored parameter does not match the declared architecture
    #[error("parameter `{name}` has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Parameter name
        name: String,
        /// Shape found in the weight file
        found: Vec<usize>,
        /// Shape the architecture requires
        expected: Vec<usize>,
    },
}

/// An exported model package: manifest plus named weight tensors
#[derive(Debug, Clone)]
pub struct ModelPackage {
    /// The declared contracts and export configuration
    pub manifest: PackageManifest,
    /// Wrapped network parameters, keyed by their architecture names
    pub weights: HashMap<String, Tensor>,
}

impl ModelPackage {
    /// Persists the package as a directory at `dir`
    ///
    /// Any existing artifact at the path is overwritten without confirmation.
    /// The write is not transactional: a crash mid-save can leave a partial
    /// package behind.
    pub fn save(&self, dir: &Path) -> Result<(), PackageError> {
        if dir.is_file() {
            std::fs::remove_file(dir)?;
        }
        std::fs::create_dir_all(dir)?;

        let manifest_json = serde_json::to_string_pretty(&self.manifest)?;
        std::fs::write(dir.join(MANIFEST_FILE), manifest_json)?;

        candle_core::safetensors::save(&self.weights, dir.join(WEIGHTS_FILE))?;
        Ok(())
    }

    /// Loads a package directory, validating the manifest and weight set
    ///
    /// The format version must match [`FORMAT_VERSION`], and every parameter
    /// the declared architecture requires must be present with its expected
    /// shape. Weight dtype is not constrained here; the predictor converts to
    /// its compute dtype.
    pub fn load(dir: &Path, device: &Device) -> Result<Self, PackageError> {
        let manifest_json = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
        let manifest: PackageManifest = serde_json::from_str(&manifest_json)?;

        if manifest.format_version != FORMAT_VERSION {
            return Err(PackageError::UnsupportedFormatVersion {
                found: manifest.format_version,
                expected: FORMAT_VERSION,
            });
        }

        let weights = candle_core::safetensors::load(dir.join(WEIGHTS_FILE), device)?;
        validate_weights(&manifest.architecture, &weights)?;

        Ok(Self { manifest, weights })
    }
}

/// Checks that `weights` contains every parameter the architecture requires,
/// each with its expected shape
fn validate_weights(arch: &ArchConfig, weights: &HashMap<String, Tensor>) -> Result<(), PackageError> {
    for (name, expected) in arch.parameter_shapes() {
        let tensor = weights.get(&name).ok_or_else(|| PackageError::MissingParameter(name.clone()))?;
        if tensor.dims() != expected.as_slice() {
            return Err(PackageError::ShapeMismatch {
                name,
                found: tensor.dims().to_vec(),
                expected,
            });
        }
    }
    Ok(())
}
