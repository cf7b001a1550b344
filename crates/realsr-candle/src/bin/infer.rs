//! Super-resolution inference runner
//!
//! A command-line tool that runs an exported model package on a single image
//! and writes the upscaled result together with diagnostic artifacts: value
//! histograms and a raw float dump of the prediction.
//!
//! # Usage
//! ```bash
//! infer model_package input.png output.png --hist-dir output
//! ```

use std::path::PathBuf;
use std::time::Instant;

use candle_core::Device;
use clap::Parser;
use realsr_candle::diagnostics::{ValueStats, render_histogram, write_float_dump};
use realsr_candle::output::save_output_image;
use realsr_candle::{ModelPackage, PredictionValue, Predictor};

/// Command-line arguments for the inference runner
#[derive(Parser)]
#[command(version, about = "Runs an exported super-resolution package on a single image")]
struct Args {
    /// Path to the exported model package directory
    model: PathBuf,

    /// Input image file (jpg/png)
    input: PathBuf,

    /// Output image file (png)
    output: PathBuf,

    /// Directory for histogram and raw float artifacts
    #[arg(long, default_value = "output")]
    hist_dir: PathBuf,
}

fn main() -> std::process::ExitCode {
    let subscriber = tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("✗ {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

/// Executes the full inference-and-inspection flow
///
/// Every failure propagates here and yields a nonzero exit status; the tool
/// performs no retries and leaves partially written artifacts in place.
fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let device = Device::Cpu;

    // Model loading and prediction failures are reported with their own
    // context so a caller can tell the stages apart
    let package = ModelPackage::load(&args.model, &device).map_err(|e| format!("failed to load model package: {e}"))?;
    let predictor = Predictor::new(package, &device)?;
    tracing::info!("loaded model package from {}", args.model.display());

    let input = image::open(&args.input)?.to_rgb8();
    let (input_width, input_height) = input.dimensions();
    println!("Input image: {input_width}x{input_height}");

    // Time the predict call only; load and decode are excluded
    let start = Instant::now();
    let prediction = predictor.predict(&input).map_err(|e| format!("prediction failed: {e}"))?;
    let elapsed = start.elapsed();
    println!("Inference time: {:.2} ms", elapsed.as_secs_f64() * 1000.0);

    // Locate the output by its declared name, falling back to whatever key
    // the model actually produced
    let declared = predictor.manifest().output.name.clone();
    let (key, value) = prediction.lookup(&declared).ok_or("model returned no outputs")?;
    if key != declared {
        println!("Output key `{declared}` not found; falling back to `{key}`");
    }

    // Anything but an image output is a contract violation for this tool
    let image = match value {
        PredictionValue::Image(image) => image,
        other => return Err(format!("model output `{key}` is not an image (got {})", other.kind()).into()),
    };

    let samples = image.as_raw();
    let stats = ValueStats::from_samples(samples).ok_or("model returned an empty image")?;
    let (out_width, out_height) = image.dimensions();
    println!(
        "Output values: min {:.4}, max {:.4}, mean {:.4}, dtype f32, shape ({out_height}, {out_width}, 3)",
        stats.min, stats.max, stats.mean
    );

    // All diagnostic artifacts live under the histogram directory
    std::fs::create_dir_all(&args.hist_dir)?;

    // The samples are floating point: dump them raw and histogram the 0-1
    // display range to check whether the baked output transform behaved
    let float_dump = args.hist_dir.join("output_float.npy");
    write_float_dump(image, &float_dump)?;
    println!("✓ Raw float output saved: {}", float_dump.display());

    let float_hist = args.hist_dir.join("hist_output_float.png");
    render_histogram(samples, (0.0, 1.0), 100, "Output Float Value Histogram (0-1)", &float_hist)?;
    println!("✓ Float histogram saved: {}", float_hist.display());

    save_output_image(image, &args.output)?;
    println!("✓ Output image saved: {}", args.output.display());

    // Second histogram over the 0-255 display range, rescaling first when
    // the values were normalized
    let display: Vec<f32> = if stats.max <= 1.0 {
        samples.iter().map(|v| v * 255.0).collect()
    } else {
        samples.clone()
    };
    let image_hist = args.hist_dir.join("hist_output.png");
    render_histogram(&display, (0.0, 255.0), 256, "Output Image Histogram", &image_hist)?;
    println!("✓ Histogram saved: {}", image_hist.display());

    Ok(())
}
