//! Scaler engine tests against the reference device.

use snap_core::{PixelFormat, Rect, Size};
use snap_gpu::{
    FramebufferId, GlHelper, GpuError, GraphicsDevice, SamplerParams, ScalerInterface,
    ScalerQuality, SoftDevice, TextureId,
};

fn solid(device: &SoftDevice, size: Size, rgba: [u8; 4]) -> TextureId {
    let data = rgba.repeat(size.area() as usize);
    device
        .create_texture_with_data(size, PixelFormat::Rgba8, &data)
        .unwrap()
}

fn full(size: Size) -> Rect {
    Rect::from_size(size)
}

#[test]
fn test_good_512_to_64_has_three_passes() {
    let device = SoftDevice::new();
    let mut helper = GlHelper::new(&device);
    let src = Size::new(512, 512);
    let scaler = helper
        .create_scaler(ScalerQuality::Good, src, full(src), Size::new(64, 64), false, false)
        .unwrap();

    assert_eq!(scaler.pass_count(), 3);
    assert_eq!(scaler.quality(), ScalerQuality::Good);
    assert_eq!(scaler.src_subrect(), full(src));
    assert_eq!(scaler.dst_size(), Size::new(64, 64));
}

#[test]
fn test_scale_preserves_solid_color() {
    let device = SoftDevice::new();
    let mut helper = GlHelper::new(&device);
    let color = [40, 80, 120, 255];
    let src = solid(&device, Size::new(256, 128), color);
    let dst = solid(&device, Size::new(32, 32), [0; 4]);

    for quality in ScalerQuality::ALL {
        let scaler = helper
            .create_scaler(
                quality,
                Size::new(256, 128),
                Rect::new(0, 0, 256, 128),
                Size::new(32, 32),
                false,
                false,
            )
            .unwrap();
        scaler.scale(src, dst).unwrap();
        let pixels = device.read_texture(dst).unwrap();
        assert!(
            pixels.chunks_exact(4).all(|p| p == color),
            "{quality} changed a solid color"
        );
    }
}

#[test]
fn test_scale_sets_source_sampling() {
    let device = SoftDevice::new();
    let mut helper = GlHelper::new(&device);
    let src = solid(&device, Size::new(8, 8), [1, 2, 3, 4]);
    let dst = solid(&device, Size::new(4, 4), [0; 4]);
    assert_ne!(device.texture_sampler(src), Some(SamplerParams::LINEAR_CLAMP));

    let scaler = helper
        .create_scaler(ScalerQuality::Fast, Size::new(8, 8), full(Size::new(8, 8)), Size::new(4, 4), false, false)
        .unwrap();
    scaler.scale(src, dst).unwrap();
    assert_eq!(device.texture_sampler(src), Some(SamplerParams::LINEAR_CLAMP));
}

#[test]
fn test_intermediates_are_reused() {
    let device = SoftDevice::new();
    let mut helper = GlHelper::new(&device);
    let src = solid(&device, Size::new(64, 64), [9, 9, 9, 255]);
    let dst = solid(&device, Size::new(8, 8), [0; 4]);
    let scaler = helper
        .create_scaler(ScalerQuality::Best, Size::new(64, 64), full(Size::new(64, 64)), Size::new(8, 8), false, false)
        .unwrap();

    scaler.scale(src, dst).unwrap();
    let after_first = device.stats();
    scaler.scale(src, dst).unwrap();
    assert_eq!(device.stats(), after_first);
    assert_eq!(device.bound_framebuffer(), FramebufferId::NULL);
    assert_eq!(device.bound_texture(), TextureId::NULL);
}

#[test]
fn test_flip_on_last_pass() {
    let device = SoftDevice::new();
    let mut helper = GlHelper::new(&device);
    let mut data = [255u8, 0, 0, 255].repeat(2);
    data.extend([0u8, 0, 255, 255].repeat(2));
    let src = device
        .create_texture_with_data(Size::new(2, 2), PixelFormat::Rgba8, &data)
        .unwrap();
    let dst = solid(&device, Size::new(2, 2), [0; 4]);

    let scaler = helper
        .create_scaler(ScalerQuality::Fast, Size::new(2, 2), full(Size::new(2, 2)), Size::new(2, 2), true, false)
        .unwrap();
    scaler.scale(src, dst).unwrap();
    let pixels = device.read_texture(dst).unwrap();
    assert_eq!(&pixels[..4], &[0, 0, 255, 255]);
    assert_eq!(&pixels[8..12], &[255, 0, 0, 255]);
}

#[test]
fn test_best_degrades_without_bicubic() {
    let device = SoftDevice::builder()
        .reject_shaders_containing("bicubic_weight")
        .build();
    let mut helper = GlHelper::new(&device);
    let scaler = helper
        .create_scaler(ScalerQuality::Best, Size::new(128, 128), full(Size::new(128, 128)), Size::new(16, 16), false, false)
        .unwrap();
    assert_eq!(scaler.quality(), ScalerQuality::Good);
    assert_eq!(scaler.pass_count(), 3);
}

#[test]
fn test_memory_pressure_degrades_to_fast() {
    let device = SoftDevice::builder()
        .texture_memory_limit(512 * 512 * 4 + 100_000)
        .build();
    let src = solid(&device, Size::new(512, 512), [50, 60, 70, 255]);
    let mut helper = GlHelper::new(&device);

    let scaler = helper
        .create_scaler(ScalerQuality::Good, Size::new(512, 512), full(Size::new(512, 512)), Size::new(64, 64), false, false)
        .unwrap();
    assert_eq!(scaler.quality(), ScalerQuality::Fast);
    assert_eq!(scaler.pass_count(), 1);

    let dst = solid(&device, Size::new(64, 64), [0; 4]);
    scaler.scale(src, dst).unwrap();
    assert_eq!(&device.read_texture(dst).unwrap()[..4], &[50, 60, 70, 255]);
}

#[test]
fn test_fast_failure_is_an_error() {
    let device = SoftDevice::builder()
        .reject_shaders_containing("texture2D")
        .build();
    let mut helper = GlHelper::new(&device);
    let result = helper.create_scaler(
        ScalerQuality::Best,
        Size::new(64, 64),
        full(Size::new(64, 64)),
        Size::new(8, 8),
        false,
        false,
    );
    assert!(matches!(result, Err(GpuError::ShaderCompilation(_))));
}

#[test]
fn test_destination_over_device_limit() {
    let device = SoftDevice::builder().max_texture_size(32).build();
    let mut helper = GlHelper::new(&device);
    let result = helper.create_scaler(
        ScalerQuality::Good,
        Size::new(32, 32),
        full(Size::new(32, 32)),
        Size::new(64, 64),
        false,
        false,
    );
    assert!(matches!(result, Err(GpuError::TextureTooLarge { limit: 32, .. })));
}

#[test]
fn test_invalid_subrect_rejected() {
    let device = SoftDevice::new();
    let mut helper = GlHelper::new(&device);
    let result = helper.create_scaler(
        ScalerQuality::Good,
        Size::new(100, 100),
        Rect::new(0, 0, 101, 101),
        Size::new(10, 10),
        false,
        false,
    );
    match result {
        Err(GpuError::Core(err)) => assert!(err.is_geometry_error()),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("subrect outside the source was accepted"),
    }
}

#[test]
fn test_subrect_past_u32_max_rejected() {
    let device = SoftDevice::new();
    let mut helper = GlHelper::new(&device);
    let result = helper.create_scaler(
        ScalerQuality::Fast,
        Size::new(8, 8),
        Rect::new(u32::MAX, 0, 2, 2),
        Size::new(2, 2),
        false,
        false,
    );
    match result {
        Err(GpuError::Core(err)) => assert!(err.is_geometry_error()),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("wrapping subrect was accepted"),
    }
    assert!(device.stats().is_clean());
}

#[test]
fn test_dropping_scalers_releases_everything() {
    let device = SoftDevice::new();
    let src = solid(&device, Size::new(64, 64), [0, 0, 0, 255]);
    {
        let mut helper = GlHelper::new(&device);
        let a = helper
            .create_scaler(ScalerQuality::Best, Size::new(64, 64), full(Size::new(64, 64)), Size::new(4, 4), false, false)
            .unwrap();
        let b = helper
            .create_scaler(ScalerQuality::Good, Size::new(64, 64), full(Size::new(64, 64)), Size::new(8, 8), true, true)
            .unwrap();
        drop(helper);
        assert!(device.stats().programs > 0);
        drop((a, b));
    }
    device.delete_texture(src);
    assert!(device.stats().is_clean());
}
