//! Checkpoint converter CLI
//!
//! A command-line tool that exports a pretrained Real-ESRGAN checkpoint
//! (`.pth`) to a self-contained inference model package with fixed pre- and
//! post-processing baked in.
//!
//! # Usage
//! ```bash
//! convert --pth weights/RealESRGAN_x4plus.pth --out output/realesrgan_x4plus --float16 --target mac --min-dim 64 --max-dim 2048
//! ```

use std::path::PathBuf;

use clap::Parser;
use realsr_candle::package::DeploymentTarget;
use realsr_candle_convert::{ConvertOptions, convert_checkpoint};

/// Command-line arguments for the checkpoint converter
#[derive(Parser)]
#[command(version, about = "Converts a Real-ESRGAN .pth checkpoint to an inference model package")]
struct Args {
    /// Path to the PyTorch weight file
    #[arg(long)]
    pth: PathBuf,

    /// Output model package path
    #[arg(long)]
    out: PathBuf,

    /// Export with fp16 precision (fp32 when omitted)
    #[arg(long)]
    float16: bool,

    /// Deployment target (mac/ios)
    #[arg(long, default_value = "mac")]
    target: String,

    /// Minimum supported resolution in pixels
    #[arg(long, default_value_t = 64)]
    min_dim: u32,

    /// Maximum supported resolution in pixels
    #[arg(long, default_value_t = 2048)]
    max_dim: u32,

    /// Synthetic image size used to exercise the graph during export
    #[arg(long, default_value_t = 64)]
    trace_size: u32,
}

fn main() {
    let subscriber = tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let args = Args::parse();

    // Parse and validate the deployment target
    let target = match args.target.to_lowercase().as_str() {
        "mac" => DeploymentTarget::Mac,
        "ios" => DeploymentTarget::Ios,
        _ => {
            eprintln!("Invalid target '{}'. Valid targets: mac, ios", args.target);
            std::process::exit(1);
        }
    };

    let options = ConvertOptions {
        float16: args.float16,
        target,
        min_dim: args.min_dim,
        max_dim: args.max_dim,
        trace_size: args.trace_size,
    };

    println!("[INFO] Input: RGB, uint8, 0-255, normalized to 0-1 by the package (scale = 1/255)");
    println!("[INFO] Output: RGB, float32, 0-255, saved directly as an 8-bit image");
    println!("[INFO] Input shape: (1, 3, H, W), H and W in {}-{} px", args.min_dim, args.max_dim);
    if args.float16 {
        println!("[INFO] Exporting with fp16 precision and quantized weights");
    }

    match convert_checkpoint(&args.pth, &args.out, &options) {
        Ok(report) => {
            println!(
                "Traced output: shape {:?}, value range {:.4}-{:.4}",
                report.output_shape, report.min, report.max
            );
            println!("✓ Conversion complete: {}", args.out.display());
        }
        Err(e) => {
            eprintln!("✗ Conversion error: {e}");
            std::process::exit(1);
        }
    }
}
