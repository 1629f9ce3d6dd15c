//! Device info command.
//!
//! Reports what the reference device supports and which paths the helper
//! will take on it.

use crate::InfoArgs;
use anyhow::{Context, Result};
use snap_gpu::device::{EXT_DRAW_BUFFERS, EXT_READ_FORMAT_BGRA};
use snap_gpu::{GlHelper, GlParam, GraphicsDevice, HelperConfig, SoftDevice};

/// Runs the info command.
pub fn run(args: InfoArgs, config: HelperConfig) -> Result<()> {
    let device = SoftDevice::new();
    let max_texture = device.get_integer(GlParam::MaxTextureSize);
    let helper = GlHelper::with_config(&device, config);

    println!("Device: CPU reference (stream {})", device.stream_id());
    println!("  Threads:          {}", rayon::current_num_threads());
    println!("  Max texture size: {}", max_texture);
    println!(
        "  Largest texture:  {}",
        super::format_size(max_texture as u64 * max_texture as u64 * 4)
    );
    println!("  Draw buffers:     {}", helper.max_draw_buffers());
    println!("  BGRA readback:    {}", yes_no(device.has_extension(EXT_READ_FORMAT_BGRA)));
    println!("  RGB565 readback:  {}", yes_no(helper.can_use_rgb565_readback()));
    println!("  Draw buffers ext: {}", yes_no(device.has_extension(EXT_DRAW_BUFFERS)));

    let config = helper.config();
    let mrt = config.allow_mrt && helper.max_draw_buffers() >= 3;
    println!("Helper:");
    println!("  Default quality:  {}", config.default_quality);
    println!("  Scaler cache:     {}", config.scaler_cache_capacity);
    println!("  Flip readback:    {}", yes_no(config.flip_readback));
    println!("  YUV path:         {}", if mrt { "multi-target" } else { "per-plane" });

    if args.yaml {
        let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
        print!("{}", yaml);
    }
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
