//! snap - GPU thumbnail and YUV readback CLI
//!
//! Runs the readback helper against the CPU reference device.

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "snap")]
#[command(author, version, about = "GPU crop, scale, YUV conversion and readback")]
#[command(long_about = "
Crops and scales images through the GPU readback helper, the way a
compositor produces tab thumbnails and video capture frames.

Examples:
  snap thumbnail page.png -o thumb.png -w 320 -H 200
  snap thumbnail page.png -o thumb.png -w 64 -H 64 --crop 0,0,512,512 --quality best
  snap thumbnail page.png -o thumb.png -w 160 -H 100 --rgb565
  snap yuv frame.png -o frame.yuv -w 640 -H 360
  snap info
  snap -vv --config snap.yaml yuv frame.png -o frame.yuv -w 320 -H 180 --no-mrt
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Helper configuration (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Crop, scale and read back an image as a PNG thumbnail
    #[command(visible_alias = "t")]
    Thumbnail(ThumbnailArgs),

    /// Scale an image and read it back as a raw YV12 frame
    Yuv(YuvArgs),

    /// Show device capabilities and the effective configuration
    #[command(visible_alias = "i")]
    Info(InfoArgs),
}

#[derive(Args)]
struct ThumbnailArgs {
    /// Input image
    input: PathBuf,

    /// Output PNG
    #[arg(short, long)]
    output: PathBuf,

    /// Thumbnail width
    #[arg(short, long)]
    width: u32,

    /// Thumbnail height
    #[arg(short = 'H', long)]
    height: u32,

    /// Source crop as x,y,w,h (top-left origin)
    #[arg(long)]
    crop: Option<String>,

    /// Scaler quality: fast, good, best
    #[arg(short, long)]
    quality: Option<String>,

    /// Read back as 16-bit RGB565
    #[arg(long)]
    rgb565: bool,
}

#[derive(Args)]
struct YuvArgs {
    /// Input image
    input: PathBuf,

    /// Output planar YV12 file
    #[arg(short, long)]
    output: PathBuf,

    /// Frame width (even)
    #[arg(short, long)]
    width: u32,

    /// Frame height (even)
    #[arg(short = 'H', long)]
    height: u32,

    /// Scaler quality: fast, good, best
    #[arg(short, long)]
    quality: Option<String>,

    /// Draw each plane separately instead of one multi-target pass
    #[arg(long)]
    no_mrt: bool,
}

#[derive(Args)]
struct InfoArgs {
    /// Print the configuration as YAML
    #[arg(long)]
    yaml: bool,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Thumbnail(args) => commands::thumbnail::run(args, config),
        Commands::Yuv(args) => commands::yuv::run(args, config),
        Commands::Info(args) => commands::info::run(args, config),
    }
}
