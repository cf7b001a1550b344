//! Materializing float predictions as 8-bit images
//!
//! Exported packages emit float samples. Depending on whether the package
//! carried the output-scaling step, those samples arrive either normalized
//! (0-1) or already in the 0-255 range; the dual-path heuristic here
//! accommodates both before the final 8-bit conversion.

use std::path::Path;

use image::{Rgb32FImage, RgbImage};

/// Converts float samples to the final 8-bit image
///
/// If the maximum sample is <= 1.0 the values are treated as normalized and
/// rescaled by 255 first; otherwise they are clipped to [0, 255] directly.
/// Either path rounds to the nearest 8-bit value.
pub fn to_u8_image(image: &Rgb32FImage) -> RgbImage {
    let samples = image.as_raw();
    let max = samples.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let factor = if max <= 1.0 { 255.0 } else { 1.0 };

    let bytes: Vec<u8> = samples.iter().map(|&v| (v * factor).clamp(0.0, 255.0).round() as u8).collect();

    let (width, height) = image.dimensions();
    RgbImage::from_raw(width, height, bytes).expect("sample count matches dimensions")
}

/// Saves the final 8-bit image at `path`
///
/// The encoding is chosen from the file extension, as the image crate does.
pub fn save_output_image(image: &Rgb32FImage, path: &Path) -> Result<(), image::ImageError> {
    to_u8_image(image).save(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_from(values: &[f32], width: u32, height: u32) -> Rgb32FImage {
        Rgb32FImage::from_raw(width, height, values.to_vec()).unwrap()
    }

    #[test]
    fn test_normalized_samples_are_rescaled() {
        // Max value 0.8: the normalized path multiplies by 255 and rounds
        let values = [0.0, 0.5, 0.8, 0.25, 0.1, 0.75];
        let image = image_from(&values, 2, 1);

        let out = to_u8_image(&image);
        let expected: Vec<u8> = values.iter().map(|v| (v * 255.0).clamp(0.0, 255.0).round() as u8).collect();
        assert_eq!(out.as_raw(), &expected);
    }

    #[test]
    fn test_full_range_samples_pass_through() {
        // Max value 200: already 0-255, so values are clipped and rounded only
        let values = [0.0, 199.6, 200.0, -3.0, 128.4, 54.5];
        let image = image_from(&values, 2, 1);

        let out = to_u8_image(&image);
        let expected: Vec<u8> = values.iter().map(|v| v.clamp(0.0, 255.0).round() as u8).collect();
        assert_eq!(out.as_raw(), &expected);
        // The 255-multiply path must not have been taken
        assert_eq!(out.as_raw()[2], 200);
    }

    #[test]
    fn test_out_of_range_samples_are_clipped() {
        let values = [-10.0, 300.0, 255.0, 0.0, 1.5, 99.9];
        let image = image_from(&values, 2, 1);

        let out = to_u8_image(&image);
        assert_eq!(out.as_raw()[0], 0);
        assert_eq!(out.as_raw()[1], 255);
        assert_eq!(out.as_raw()[2], 255);
    }

    #[test]
    fn test_round_trip_preserves_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");

        let values: Vec<f32> = (0..27).map(|v| v as f32 * 9.0).collect();
        let image = image_from(&values, 3, 3);
        save_output_image(&image, &path).unwrap();

        let reloaded = image::open(&path).unwrap();
        assert_eq!(reloaded.color(), image::ColorType::Rgb8);
        let reloaded = reloaded.to_rgb8();
        assert_eq!(reloaded.dimensions(), (3, 3));
    }
}
