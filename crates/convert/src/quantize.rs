//! Post-conversion weight quantization
//!
//! A second, optional compression pass over an already-assembled package:
//! distinct from declaring fp16 compute precision in the manifest, this
//! actually narrows the stored weights to 16-bit floats.

use std::collections::HashMap;

use candle_core::{DType, Result, Tensor};

/// Quantizes every weight tensor to 16-bit floating point
///
/// The returned map replaces the package weights; the runtime upcasts back
/// to its compute dtype at load time.
pub fn quantize_weights(weights: &HashMap<String, Tensor>) -> Result<HashMap<String, Tensor>> {
    let mut quantized = HashMap::with_capacity(weights.len());
    for (name, tensor) in weights {
        quantized.insert(name.clone(), tensor.to_dtype(DType::F16)?);
    }
    Ok(quantized)
}
