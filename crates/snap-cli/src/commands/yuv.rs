//! YUV command
//!
//! Scales an image into a YV12 frame and writes the planes back to back.

use crate::YuvArgs;
use anyhow::{Context, Result, bail};
use snap_core::{FrameFormat, Rect, Size, VideoFrame};
use snap_gpu::{GlHelper, HelperConfig, SoftDevice};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

pub fn run(args: YuvArgs, config: HelperConfig) -> Result<()> {
    let image = super::load_image(&args.input)?;
    let dst_size = Size::new(args.width, args.height);
    let quality = super::parse_quality(args.quality.as_deref())?.unwrap_or(config.default_quality);
    let frame = VideoFrame::new(FrameFormat::Yv12, dst_size)
        .with_context(|| format!("Invalid frame size {}", dst_size))?;

    let device = SoftDevice::new();
    let flip = config.flip_readback;
    let texture = super::upload(&device, &image, flip)?;
    let mut helper = GlHelper::with_config(&device, config);

    let pipeline = helper
        .create_readback_pipeline_yuv(
            quality,
            image.size,
            Rect::from_size(image.size),
            dst_size,
            Rect::from_size(dst_size),
            flip,
            !args.no_mrt,
        )
        .context("Failed to build YUV pipeline")?;

    let holder = helper.produce_mailbox_from_texture(texture);
    if holder.is_empty() {
        bail!("Failed to publish source texture");
    }

    let frame = Arc::new(Mutex::new(frame));
    let (state, callback) = super::completion();
    pipeline
        .readback_yuv(&holder.mailbox, holder.sync_point, Arc::clone(&frame), callback)
        .context("YUV readback failed")?;
    super::wait_for(&helper, &state)?;
    helper.delete_texture(texture);

    let bytes = frame
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .to_planar_bytes();
    std::fs::write(&args.output, &bytes)
        .with_context(|| format!("Failed to save: {}", args.output.display()))?;

    info!(
        input = %args.input.display(),
        size = %dst_size,
        quality = pipeline.scaler().quality().name(),
        mrt = pipeline.uses_mrt(),
        bytes = bytes.len(),
        "Frame written to {}",
        args.output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::write_split_png;

    fn args(dir: &std::path::Path, no_mrt: bool) -> YuvArgs {
        YuvArgs {
            input: dir.join("in.png"),
            output: dir.join(if no_mrt { "planar.yuv" } else { "mrt.yuv" }),
            width: 8,
            height: 8,
            quality: Some("fast".into()),
            no_mrt,
        }
    }

    #[test]
    fn test_yuv_layout_and_orientation() {
        let dir = tempfile::tempdir().unwrap();
        write_split_png(&dir.path().join("in.png"), 32, 32);
        run(args(dir.path(), false), HelperConfig::default()).unwrap();

        let bytes = std::fs::read(dir.path().join("mrt.yuv")).unwrap();
        assert_eq!(bytes.len(), 8 * 8 + 2 * 4 * 4);
        // Red on top, blue below.
        assert_eq!(bytes[0], 81);
        assert_eq!(bytes[63], 41);
    }

    #[test]
    fn test_yuv_paths_write_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        write_split_png(&dir.path().join("in.png"), 32, 32);
        run(args(dir.path(), false), HelperConfig::default()).unwrap();
        run(args(dir.path(), true), HelperConfig::default()).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("mrt.yuv")).unwrap(),
            std::fs::read(dir.path().join("planar.yuv")).unwrap()
        );
    }

    #[test]
    fn test_yuv_rejects_odd_size() {
        let dir = tempfile::tempdir().unwrap();
        write_split_png(&dir.path().join("in.png"), 8, 8);
        let args = YuvArgs {
            width: 5,
            ..args(dir.path(), true)
        };
        assert!(run(args, HelperConfig::default()).is_err());
    }
}
