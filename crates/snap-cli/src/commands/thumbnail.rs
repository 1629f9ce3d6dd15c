//! Thumbnail command
//!
//! Crops and scales an image through the readback helper and writes a PNG.

use crate::ThumbnailArgs;
use anyhow::{Context, Result, bail};
use snap_core::{PixelFormat, Rect, Size};
use snap_gpu::{CropScaleRequest, GlHelper, HelperConfig, SoftDevice};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

pub fn run(args: ThumbnailArgs, config: HelperConfig) -> Result<()> {
    let image = super::load_image(&args.input)?;
    let bottom_up = config.flip_readback;

    let crop = match args.crop.as_deref() {
        Some(text) => super::parse_rect(text)?,
        None => Rect::from_size(image.size),
    };
    if !crop.is_within(image.size) {
        bail!("Crop {} lies outside the {} image", crop, image.size);
    }
    let dst_size = Size::new(args.width, args.height);
    if dst_size.is_empty() {
        bail!("Thumbnail size must be non-zero");
    }

    let format = if args.rgb565 {
        PixelFormat::Rgb565
    } else {
        PixelFormat::Rgba8
    };
    let mut request =
        CropScaleRequest::new(image.size, super::texture_rect(crop, image.size, bottom_up), dst_size)
            .with_format(format);
    if let Some(quality) = super::parse_quality(args.quality.as_deref())? {
        request = request.with_quality(quality);
    }

    let device = SoftDevice::new();
    let texture = super::upload(&device, &image, bottom_up)?;
    let mut helper = GlHelper::with_config(&device, config);
    if args.rgb565 && !helper.can_use_rgb565_readback() {
        bail!("Device cannot read back RGB565");
    }

    let out = Arc::new(Mutex::new(vec![0u8; request.output_bytes()]));
    let (state, callback) = super::completion();
    helper
        .crop_scale_readback_and_clean_texture(texture, &request, Arc::clone(&out), callback)
        .context("Crop/scale readback failed")?;
    super::wait_for(&helper, &state)?;
    helper.delete_texture(texture);

    let bytes = std::mem::take(&mut *out.lock().unwrap_or_else(PoisonError::into_inner));
    let rgba = match format {
        PixelFormat::Rgba8 => bytes,
        other => bytes
            .chunks_exact(other.bytes_per_pixel())
            .flat_map(|texel| other.decode(texel))
            .collect(),
    };
    super::save_image(&args.output, dst_size, rgba)?;

    info!(
        input = %args.input.display(),
        crop = %crop,
        size = %dst_size,
        format = %format,
        "Thumbnail written to {}",
        args.output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::write_split_png;

    fn args(dir: &std::path::Path) -> ThumbnailArgs {
        ThumbnailArgs {
            input: dir.join("in.png"),
            output: dir.join("out.png"),
            width: 4,
            height: 4,
            crop: None,
            quality: Some("good".into()),
            rgb565: false,
        }
    }

    #[test]
    fn test_thumbnail_keeps_orientation() {
        let dir = tempfile::tempdir().unwrap();
        write_split_png(&dir.path().join("in.png"), 16, 16);
        run(args(dir.path()), HelperConfig::default()).unwrap();

        let out = image::open(dir.path().join("out.png")).unwrap().to_rgba8();
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(3, 3).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_thumbnail_crop_and_rgb565() {
        let dir = tempfile::tempdir().unwrap();
        write_split_png(&dir.path().join("in.png"), 16, 16);
        let args = ThumbnailArgs {
            crop: Some("0,8,16,8".into()),
            rgb565: true,
            ..args(dir.path())
        };
        run(args, HelperConfig::default()).unwrap();

        let out = image::open(dir.path().join("out.png")).unwrap().to_rgba8();
        assert!(out.pixels().all(|p| p.0 == [0, 0, 255, 255]));
    }

    #[test]
    fn test_thumbnail_rejects_bad_crop() {
        let dir = tempfile::tempdir().unwrap();
        write_split_png(&dir.path().join("in.png"), 8, 8);
        let args = ThumbnailArgs {
            crop: Some("4,4,8,8".into()),
            ..args(dir.path())
        };
        assert!(run(args, HelperConfig::default()).is_err());
    }
}
