//! Prediction inspection utilities
//!
//! This module provides the diagnostic artifacts the inference runner writes
//! alongside its output image: value statistics for stdout reporting, value
//! histograms rendered to PNG, and a raw float dump in npy form for offline
//! analysis of whether the baked output transform behaved.

use std::path::Path;

use candle_core::{Device, Tensor};
use image::Rgb32FImage;
use plotters::prelude::*;
use thiserror::Error;

/// Error types for diagnostic artifact generation
#[derive(Debug, Error)]
pub enum DiagnosticsError {
    /// Histogram rendering failed
    #[error("failed to render histogram: {0}")]
    Render(String),
    /// The raw float dump could not be written
    #[error("failed to write float dump: {0}")]
    Dump(#[from] candle_core::Error),
}

/// Summary statistics over a prediction's float samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueStats {
    /// Smallest sample
    pub min: f32,
    /// Largest sample
    pub max: f32,
    /// Arithmetic mean of all samples
    pub mean: f32,
    /// Number of samples
    pub len: usize,
}

impl ValueStats {
    /// Computes statistics over `samples`; `None` when there are no samples
    pub fn from_samples(samples: &[f32]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0f64;
        for &value in samples {
            min = min.min(value);
            max = max.max(value);
            sum += f64::from(value);
        }

        Some(Self {
            min,
            max,
            mean: (sum / samples.len() as f64) as f32,
            len: samples.len(),
        })
    }
}

/// Buckets `values` into `bins` equal-width counts over `range`
///
/// Buckets are half-open on the left edge; the final bucket also includes
/// the range maximum. Values outside the range are dropped, matching a
/// display-range-restricted histogram.
pub fn bucket_counts(values: &[f32], range: (f32, f32), bins: usize) -> Vec<u32> {
    if bins == 0 {
        return Vec::new();
    }

    let (lo, hi) = range;
    let width = (hi - lo) / bins as f32;
    let mut counts = vec![0u32; bins];

    for &value in values {
        if value < lo || value > hi {
            continue;
        }
        let index = (((value - lo) / width) as usize).min(bins - 1);
        counts[index] += 1;
    }
    counts
}

/// Renders a value histogram to a PNG at `path`
///
/// The x axis is restricted to `range`; out-of-range values do not appear.
pub fn render_histogram(values: &[f32], range: (f32, f32), bins: usize, title: &str, path: &Path) -> Result<(), DiagnosticsError> {
    let counts = bucket_counts(values, range, bins);
    let max_count = counts.iter().copied().max().unwrap_or(0).max(1);

    let root = BitMapBackend::new(path, (640, 480)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| DiagnosticsError::Render(e.to_string()))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(f64::from(range.0)..f64::from(range.1), 0u32..max_count)
        .map_err(|e| DiagnosticsError::Render(e.to_string()))?;

    chart
        .configure_mesh()
        .x_desc("Value")
        .y_desc("Count")
        .draw()
        .map_err(|e| DiagnosticsError::Render(e.to_string()))?;

    let bucket_width = f64::from(range.1 - range.0) / bins as f64;
    chart
        .draw_series(counts.iter().enumerate().map(|(i, &count)| {
            let x0 = f64::from(range.0) + i as f64 * bucket_width;
            Rectangle::new([(x0, 0u32), (x0 + bucket_width, count)], BLUE.filled())
        }))
        .map_err(|e| DiagnosticsError::Render(e.to_string()))?;

    root.present().map_err(|e| DiagnosticsError::Render(e.to_string()))?;
    Ok(())
}

/// Persists the raw float samples of `image` as an npy array at `path`
///
/// The array is written with shape `(height, width, 3)`, the row-major
/// layout numpy-based inspection tooling expects.
pub fn write_float_dump(image: &Rgb32FImage, path: &Path) -> Result<(), DiagnosticsError> {
    let (width, height) = image.dimensions();
    let tensor = Tensor::from_vec(image.as_raw().clone(), (height as usize, width as usize, 3), &Device::Cpu)?;
    tensor.write_npy(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_stats() {
        let stats = ValueStats::from_samples(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.len, 4);

        assert!(ValueStats::from_samples(&[]).is_none());
    }

    #[test]
    fn test_bucket_counts_exhaustive_in_range() {
        let values = [0.0, 0.1, 0.25, 0.5, 0.75, 0.99, 1.0];
        let counts = bucket_counts(&values, (0.0, 1.0), 4);

        // Every in-range value lands in exactly one bucket
        assert_eq!(counts.iter().sum::<u32>(), values.len() as u32);
        // The range maximum belongs to the final bucket
        assert_eq!(counts[3], 3);
    }

    #[test]
    fn test_bucket_counts_drops_out_of_range() {
        let values = [-0.5, 0.5, 1.5, 200.0];
        let counts = bucket_counts(&values, (0.0, 1.0), 2);
        assert_eq!(counts.iter().sum::<u32>(), 1);
        assert_eq!(counts[1], 1);
    }

    #[test]
    fn test_render_histogram_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hist.png");

        let values: Vec<f32> = (0..1000).map(|v| (v % 256) as f32).collect();
        render_histogram(&values, (0.0, 255.0), 256, "Output Image Histogram", &path).unwrap();

        assert!(path.exists());
        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.width(), 640);
        assert_eq!(decoded.height(), 480);
    }

    #[test]
    fn test_write_float_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output_float.npy");

        let image = Rgb32FImage::from_raw(2, 2, (0..12).map(|v| v as f32).collect()).unwrap();
        write_float_dump(&image, &path).unwrap();

        let tensor = Tensor::read_npy(&path).unwrap();
        assert_eq!(tensor.dims(), &[2, 2, 3]);
        let values = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values, (0..12).map(|v| v as f32).collect::<Vec<_>>());
    }
}
