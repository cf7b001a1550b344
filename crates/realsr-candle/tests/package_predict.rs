//! Package and prediction integration tests
//!
//! These tests drive the runtime the way the `infer` tool does: a package
//! saved to disk, reloaded, and executed against a real image. A reduced
//! architecture keeps the forward passes fast; the contracts under test are
//! the same as for the full-size network.

use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use realsr_candle::arch::{ArchConfig, RrdbNet};
use realsr_candle::output::save_output_image;
use realsr_candle::package::{
    ColorLayout, DeploymentTarget, DimRange, FORMAT_VERSION, ImageInputSpec, ImageOutputSpec, ModelPackage, PackageError,
    PackageManifest, Precision, ScaleRatio,
};
use realsr_candle::predictor::{PredictError, PredictionValue, Predictor};

fn tiny_arch() -> ArchConfig {
    ArchConfig {
        in_channels: 3,
        out_channels: 3,
        num_features: 8,
        num_blocks: 1,
        growth_channels: 4,
        scale: 4,
    }
}

/// Randomly initialized weights for the reduced architecture
fn tiny_weights(arch: &ArchConfig) -> HashMap<String, Tensor> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    RrdbNet::new(arch, vb).unwrap();

    varmap
        .data()
        .lock()
        .unwrap()
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
        .collect()
}

fn tiny_manifest(arch: ArchConfig) -> PackageManifest {
    PackageManifest {
        format_version: FORMAT_VERSION,
        name: "tiny".to_string(),
        architecture: arch,
        input: ImageInputSpec {
            name: "input_image".to_string(),
            color_layout: ColorLayout::Rgb,
            height: DimRange::new(4, 64),
            width: DimRange::new(4, 64),
            scale: ScaleRatio::new(1, 255),
            bias: [0.0, 0.0, 0.0],
        },
        output: ImageOutputSpec {
            name: "output_image".to_string(),
            color_layout: ColorLayout::Rgb,
        },
        precision: Precision::Float32,
        target: DeploymentTarget::Mac,
    }
}

fn test_input(width: u32, height: u32) -> image::RgbImage {
    image::RgbImage::from_fn(width, height, |x, y| image::Rgb([(x * 16) as u8, (y * 16) as u8, 128]))
}

#[test]
fn test_package_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiny_package");

    let arch = tiny_arch();
    let package = ModelPackage {
        manifest: tiny_manifest(arch),
        weights: tiny_weights(&arch),
    };
    package.save(&path).unwrap();

    assert!(path.join("manifest.json").exists());
    assert!(path.join("weights.safetensors").exists());

    let loaded = ModelPackage::load(&path, &Device::Cpu).unwrap();
    assert_eq!(loaded.manifest, package.manifest);
    assert_eq!(loaded.weights.len(), package.weights.len());
    for tensor in loaded.weights.values() {
        assert_eq!(tensor.dtype(), DType::F32);
    }
}

#[test]
fn test_load_rejects_unsupported_format_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future_package");

    let arch = tiny_arch();
    let mut manifest = tiny_manifest(arch);
    manifest.format_version = 99;
    let package = ModelPackage {
        manifest,
        weights: tiny_weights(&arch),
    };
    package.save(&path).unwrap();

    let error = ModelPackage::load(&path, &Device::Cpu).unwrap_err();
    assert!(matches!(error, PackageError::UnsupportedFormatVersion { found: 99, .. }));
}

#[test]
fn test_load_rejects_incomplete_weights() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("incomplete_package");

    let arch = tiny_arch();
    let mut weights = tiny_weights(&arch);
    weights.remove("conv_hr.bias").unwrap();

    let package = ModelPackage {
        manifest: tiny_manifest(arch),
        weights,
    };
    package.save(&path).unwrap();

    let error = ModelPackage::load(&path, &Device::Cpu).unwrap_err();
    match error {
        PackageError::MissingParameter(name) => assert_eq!(name, "conv_hr.bias"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_predict_upscales_and_bounds_values() {
    let arch = tiny_arch();
    let package = ModelPackage {
        manifest: tiny_manifest(arch),
        weights: tiny_weights(&arch),
    };
    let predictor = Predictor::new(package, &Device::Cpu).unwrap();

    let input = test_input(8, 6);
    let prediction = predictor.predict(&input).unwrap();

    let (key, value) = prediction.lookup("output_image").unwrap();
    assert_eq!(key, "output_image");
    let image = match value {
        PredictionValue::Image(image) => image,
        other => panic!("expected an image output, got {}", other.kind()),
    };

    // 4x upscale in both dimensions
    assert_eq!(image.dimensions(), (32, 24));
    // The baked output transform bounds every sample
    for &value in image.as_raw() {
        assert!((0.0..=255.0).contains(&value), "value {value} out of range");
    }
}

#[test]
fn test_predict_rejects_out_of_range_input() {
    let arch = tiny_arch();
    let package = ModelPackage {
        manifest: tiny_manifest(arch),
        weights: tiny_weights(&arch),
    };
    let predictor = Predictor::new(package, &Device::Cpu).unwrap();

    // The manifest accepts 4-64 px; 2 px is below the minimum
    let input = test_input(2, 8);
    let error = predictor.predict(&input).unwrap_err();
    assert!(matches!(error, PredictError::InputOutOfRange { .. }));
}

#[test]
fn test_fp16_package_predicts_after_upcast() {
    let arch = tiny_arch();
    let mut manifest = tiny_manifest(arch);
    manifest.precision = Precision::Float16;

    let weights: HashMap<String, Tensor> = tiny_weights(&arch)
        .into_iter()
        .map(|(name, tensor)| (name, tensor.to_dtype(DType::F16).unwrap()))
        .collect();

    let predictor = Predictor::new(ModelPackage { manifest, weights }, &Device::Cpu).unwrap();
    let prediction = predictor.predict(&test_input(4, 4)).unwrap();
    assert!(prediction.lookup("output_image").is_some());
}

#[test]
fn test_saved_output_round_trips_as_rgb8() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("upscaled.png");

    let arch = tiny_arch();
    let package = ModelPackage {
        manifest: tiny_manifest(arch),
        weights: tiny_weights(&arch),
    };
    let predictor = Predictor::new(package, &Device::Cpu).unwrap();

    let prediction = predictor.predict(&test_input(4, 4)).unwrap();
    let (_, value) = prediction.lookup("output_image").unwrap();
    let image = match value {
        PredictionValue::Image(image) => image,
        other => panic!("expected an image output, got {}", other.kind()),
    };

    save_output_image(image, &out_path).unwrap();

    let reloaded = image::open(&out_path).unwrap();
    assert_eq!(reloaded.color(), image::ColorType::Rgb8);
    assert_eq!(reloaded.to_rgb8().dimensions(), image.dimensions());
}
