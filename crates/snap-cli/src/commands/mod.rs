//! CLI command implementations

pub mod info;
pub mod thumbnail;
pub mod yuv;

use anyhow::{Context, Result, bail};
use snap_core::{PixelFormat, Rect, Size};
use snap_gpu::{GlHelper, HelperConfig, ReadbackCallback, ScalerQuality, SoftDevice, TextureId};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Loads the helper configuration.
///
/// A YAML file replaces the defaults; `SNAP_*` variables apply on top.
pub fn load_config(path: Option<&Path>) -> Result<HelperConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: HelperConfig = serde_yaml::from_str(&text)
                .with_context(|| format!("Invalid config: {}", path.display()))?;
            config.with_env_overrides()
        }
        None => HelperConfig::from_env(),
    };
    debug!(?config, "Helper configuration");
    Ok(config)
}

/// An RGBA8 image in host memory, rows top to bottom.
pub struct HostImage {
    pub size: Size,
    pub pixels: Vec<u8>,
}

/// Load image from path
pub fn load_image(path: &Path) -> Result<HostImage> {
    let image = image::open(path)
        .with_context(|| format!("Failed to load: {}", path.display()))?
        .to_rgba8();
    Ok(HostImage {
        size: Size::new(image.width(), image.height()),
        pixels: image.into_raw(),
    })
}

/// Save RGBA8 pixels as an image
pub fn save_image(path: &Path, size: Size, rgba: Vec<u8>) -> Result<()> {
    let image = image::RgbaImage::from_raw(size.width, size.height, rgba)
        .context("Readback size does not match the output dimensions")?;
    image
        .save(path)
        .with_context(|| format!("Failed to save: {}", path.display()))
}

/// Uploads `image` as a texture.
///
/// With `bottom_up` the rows are stored last-to-first, the layout of a
/// rendered surface that readback flips back.
pub fn upload(device: &SoftDevice, image: &HostImage, bottom_up: bool) -> Result<TextureId> {
    let row = image.size.width as usize * 4;
    let data = if bottom_up && row > 0 {
        image.pixels.chunks_exact(row).rev().flatten().copied().collect()
    } else {
        image.pixels.clone()
    };
    device
        .create_texture_with_data(image.size, PixelFormat::Rgba8, &data)
        .context("Failed to upload source texture")
}

/// Maps a top-left origin rectangle onto the uploaded texture.
pub fn texture_rect(rect: Rect, size: Size, bottom_up: bool) -> Rect {
    if bottom_up {
        let y = size.height.saturating_sub(rect.bottom());
        Rect::new(rect.x, y, rect.width, rect.height)
    } else {
        rect
    }
}

/// Parses `x,y,w,h`.
pub fn parse_rect(text: &str) -> Result<Rect> {
    let parts = text
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid rectangle '{}'", text))?;
    match parts.as_slice() {
        &[x, y, w, h] => Ok(Rect::new(x, y, w, h)),
        _ => bail!("Rectangle '{}' must be x,y,w,h", text),
    }
}

/// Parses an optional quality name.
pub fn parse_quality(text: Option<&str>) -> Result<Option<ScalerQuality>> {
    text.map(|t| t.parse::<ScalerQuality>().map_err(anyhow::Error::from))
        .transpose()
}

/// Completion state written by a readback callback.
pub type Completion = Arc<Mutex<Option<bool>>>;

/// Creates a callback that records its result in the returned state.
pub fn completion() -> (Completion, ReadbackCallback) {
    let state: Completion = Arc::new(Mutex::new(None));
    let writer = Arc::clone(&state);
    let callback: ReadbackCallback = Box::new(move |ok| {
        *writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(ok);
    });
    (state, callback)
}

/// Drains the helper and checks the readback succeeded.
pub fn wait_for(helper: &GlHelper<'_, SoftDevice>, state: &Completion) -> Result<()> {
    helper.finish();
    match *state.lock().unwrap_or_else(PoisonError::into_inner) {
        Some(true) => Ok(()),
        Some(false) => bail!("Readback failed"),
        None => bail!("Readback did not complete"),
    }
}

/// Format byte count for display
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
