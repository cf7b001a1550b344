//! Package-backed prediction
//!
//! This module executes an exported model package against a single image.
//! The predictor reconstructs the wrapped network from the package weights,
//! applies the manifest's input-side normalization, and publishes outputs as
//! tagged values under their declared names. Outputs are create-on-predict:
//! nothing is cached across invocations.

use std::collections::BTreeMap;

use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder};
use image::{Rgb32FImage, RgbImage};
use thiserror::Error;

use crate::arch::{ClampedModel, RrdbNet};
use crate::package::{ColorLayout, DimRange, ModelPackage, PackageManifest};

/// Error types for prediction
#[derive(Debug, Error)]
pub enum PredictError {
    /// The input image dimensions fall outside the declared contract
    #[error("input image is {width}x{height}, outside the declared ranges (width {width_range}, height {height_range})")]
    InputOutOfRange {
        /// Input image width
        width: u32,
        /// Input image height
        height: u32,
        /// Accepted width range
        width_range: DimRange,
        /// Accepted height range
        height_range: DimRange,
    },
    /// The underlying tensor graph failed
    #[error("inference failed: {0}")]
    Inference(#[from] candle_core::Error),
    /// The network produced a tensor that cannot be viewed as an image
    #[error("prediction produced a malformed output image")]
    MalformedOutput,
}

/// A single named prediction output
///
/// Exported models declare an image output, so image-typed values are the
/// only variant a well-formed package produces; the variant tag lets callers
/// reject anything else at the boundary instead of inspecting values ad hoc.
#[derive(Debug, Clone)]
pub enum PredictionValue {
    /// A float RGB image, one sample per channel in the model's output range
    Image(Rgb32FImage),
    /// A raw tensor, for model outputs with no image interpretation
    Array(Tensor),
}

impl PredictionValue {
    /// Returns the human-readable kind of this value
    pub fn kind(&self) -> &'static str {
        match self {
            PredictionValue::Image(_) => "image",
            PredictionValue::Array(_) => "array",
        }
    }
}

/// The named outputs of one prediction call
#[derive(Debug, Clone, Default)]
pub struct Prediction {
    /// Output values keyed by their declared names
    pub outputs: BTreeMap<String, PredictionValue>,
}

impl Prediction {
    /// Looks up an output by its declared name, falling back to the first
    /// available key when the declared name is absent
    ///
    /// Returns the key that was actually selected alongside the value, so
    /// callers can report the fallback. Returns `None` only when the
    /// prediction produced no outputs at all.
    pub fn lookup<'a>(&'a self, name: &'a str) -> Option<(&'a str, &'a PredictionValue)> {
        if let Some(value) = self.outputs.get(name) {
            return Some((name, value));
        }
        self.outputs.iter().next().map(|(key, value)| (key.as_str(), value))
    }
}

/// Executes one exported package against single images
pub struct Predictor {
    manifest: PackageManifest,
    model: ClampedModel,
    device: Device,
}

impl Predictor {
    /// Reconstructs the wrapped network from a loaded package
    ///
    /// Weights are converted to the f32 compute dtype; fp16 packages store
    /// half-width weights and are upcast here, mirroring precision-at-rest
    /// versus precision-in-compute.
    pub fn new(package: ModelPackage, device: &Device) -> Result<Self, PredictError> {
        let mut compute = std::collections::HashMap::new();
        for (name, tensor) in &package.weights {
            compute.insert(name.clone(), tensor.to_dtype(DType::F32)?);
        }

        let vb = VarBuilder::from_tensors(compute, DType::F32, device);
        let net = RrdbNet::new(&package.manifest.architecture, vb)?;

        Ok(Self {
            manifest: package.manifest,
            model: ClampedModel::new(net),
            device: device.clone(),
        })
    }

    /// Returns the manifest of the loaded package
    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    /// Runs the model on one image bound to the declared input name
    ///
    /// The image carries raw 0-255 samples; the declared input scale and bias
    /// are applied here, before the network. The result is published under
    /// the declared output name.
    pub fn predict(&self, image: &RgbImage) -> Result<Prediction, PredictError> {
        let (width, height) = image.dimensions();
        let input_spec = &self.manifest.input;
        if !input_spec.width.contains(width) || !input_spec.height.contains(height) {
            return Err(PredictError::InputOutOfRange {
                width,
                height,
                width_range: input_spec.width,
                height_range: input_spec.height,
            });
        }

        let samples = image_to_nchw(image, input_spec.color_layout);
        let input = Tensor::from_vec(samples, (1, 3, height as usize, width as usize), &self.device)?;
        let input = input.affine(input_spec.scale.to_f64(), 0.0)?;
        let input = if input_spec.bias == [0.0, 0.0, 0.0] {
            input
        } else {
            let bias = Tensor::from_slice(&input_spec.bias, (1, 3, 1, 1), &self.device)?;
            input.broadcast_add(&bias)?
        };

        let output = self.model.forward(&input)?;
        let image = tensor_to_rgb32f(&output, self.manifest.output.color_layout)?;

        let mut outputs = BTreeMap::new();
        outputs.insert(self.manifest.output.name.clone(), PredictionValue::Image(image));
        Ok(Prediction { outputs })
    }
}

/// Flattens an 8-bit RGB image into raw 0-255 float samples in NCHW order,
/// reordering channels when the network expects BGR
fn image_to_nchw(image: &RgbImage, layout: ColorLayout) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);
    let raw = image.as_raw();

    let channel_order: [usize; 3] = match layout {
        ColorLayout::Rgb => [0, 1, 2],
        ColorLayout::Bgr => [2, 1, 0],
    };

    let mut samples = vec![0f32; 3 * height * width];
    for (plane, &channel) in channel_order.iter().enumerate() {
        let base = plane * height * width;
        for y in 0..height {
            for x in 0..width {
                samples[base + y * width + x] = f32::from(raw[(y * width + x) * 3 + channel]);
            }
        }
    }
    samples
}

/// Views a `(1, 3, H, W)` output tensor as a float RGB image
fn tensor_to_rgb32f(tensor: &Tensor, layout: ColorLayout) -> Result<Rgb32FImage, PredictError> {
    let (batch, channels, height, width) = tensor.dims4()?;
    if batch != 1 || channels != 3 {
        return Err(PredictError::MalformedOutput);
    }

    // NCHW -> HWC, reordering back to RGB when the network emitted BGR
    let hwc = tensor.squeeze(0)?.permute((1, 2, 0))?.contiguous()?;
    let values = hwc.flatten_all()?.to_vec1::<f32>()?;
    let values = match layout {
        ColorLayout::Rgb => values,
        ColorLayout::Bgr => {
            let mut reordered = values;
            for pixel in reordered.chunks_exact_mut(3) {
                pixel.swap(0, 2);
            }
            reordered
        }
    };

    Rgb32FImage::from_raw(width as u32, height as u32, values).ok_or(PredictError::MalformedOutput)
}
