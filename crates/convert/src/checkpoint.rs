//! PyTorch checkpoint loading
//!
//! Trained weights arrive as `.pth` archives whose state dict is nested
//! under one of two recognized top-level keys. This module selects the key,
//! materializes every tensor, and reports missing keys as configuration
//! errors before any conversion work starts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::Tensor;
use candle_core::pickle::PthTensors;
use thiserror::Error;

/// Recognized top-level state-dict keys, in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKey {
    /// Exponential-moving-average weights (`params_ema`), preferred
    Ema,
    /// Plain training weights (`params`), fallback
    Plain,
}

impl ParamKey {
    /// All recognized keys, most preferred first
    pub const ALL: [ParamKey; 2] = [ParamKey::Ema, ParamKey::Plain];

    /// Returns the key's name inside the checkpoint dict
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKey::Ema => "params_ema",
            ParamKey::Plain => "params",
        }
    }
}

/// Error types for checkpoint loading
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The checkpoint path does not exist
    #[error("checkpoint not found: {0}")]
    NotFound(PathBuf),
    /// The archive could not be deserialized at all
    #[error("failed to read checkpoint: {0}")]
    Read(#[source] candle_core::Error),
    /// Neither recognized state-dict key is present
    #[error("checkpoint contains neither `params_ema` nor `params`")]
    MissingParamsKey,
    /// A tensor listed in the archive could not be materialized
    #[error("checkpoint is missing tensor data for `{0}`")]
    MissingTensor(String),
}

/// A loaded checkpoint: the selected key and its tensors
#[derive(Debug)]
pub struct Checkpoint {
    key: ParamKey,
    tensors: HashMap<String, Tensor>,
}

impl Checkpoint {
    /// Opens a `.pth` checkpoint and materializes the selected state dict
    ///
    /// `params_ema` is preferred over `params`; a checkpoint carrying
    /// neither fails here, before any export work or file write happens.
    pub fn open(path: &Path) -> Result<Self, CheckpointError> {
        if !path.exists() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }

        // Probe the archive once without a key so a corrupt file surfaces
        // as a read error rather than as a missing-key error
        PthTensors::new(path, None).map_err(CheckpointError::Read)?;

        for key in ParamKey::ALL {
            let Ok(pth) = PthTensors::new(path, Some(key.as_str())) else {
                continue;
            };
            let names: Vec<String> = pth.tensor_infos().keys().cloned().collect();
            if names.is_empty() {
                continue;
            }

            let mut tensors = HashMap::new();
            for name in names {
                let tensor = pth
                    .get(&name)
                    .map_err(CheckpointError::Read)?
                    .ok_or_else(|| CheckpointError::MissingTensor(name.clone()))?;
                tensors.insert(name, tensor);
            }
            return Ok(Self { key, tensors });
        }

        Err(CheckpointError::MissingParamsKey)
    }

    /// Returns the state-dict key the weights were loaded from
    pub fn key(&self) -> ParamKey {
        self.key
    }

    /// Returns the loaded tensors by name
    pub fn tensors(&self) -> &HashMap<String, Tensor> {
        &self.tensors
    }

    /// Consumes the checkpoint, yielding its tensors
    pub fn into_tensors(self) -> HashMap<String, Tensor> {
        self.tensors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_key_preference_order() {
        assert_eq!(ParamKey::ALL[0], ParamKey::Ema);
        assert_eq!(ParamKey::ALL[0].as_str(), "params_ema");
        assert_eq!(ParamKey::ALL[1].as_str(), "params");
    }

    #[test]
    fn test_open_missing_file() {
        let error = Checkpoint::open(Path::new("/nonexistent/weights.pth")).unwrap_err();
        assert!(matches!(error, CheckpointError::NotFound(_)));
    }

    #[test]
    fn test_open_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.pth");
        std::fs::write(&path, b"not a checkpoint").unwrap();

        let error = Checkpoint::open(&path).unwrap_err();
        assert!(matches!(error, CheckpointError::Read(_)));
    }
}
