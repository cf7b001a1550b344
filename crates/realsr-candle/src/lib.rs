//! Real-ESRGAN super-resolution inference on candle
//!
//! This crate provides the runtime half of a super-resolution workflow: the
//! exported model package format, the RRDBNet architecture reconstruction,
//! a single-image prediction API, and the inspection utilities the `infer`
//! command-line tool writes its diagnostics with. Packages are produced by
//! the companion converter crate.

pub mod arch;
pub mod diagnostics;
pub mod output;
pub mod package;
pub mod predictor;

pub use arch::{ArchConfig, ClampedModel, RrdbNet};
pub use package::{ModelPackage, PackageError, PackageManifest};
pub use predictor::{PredictError, Prediction, PredictionValue, Predictor};
