//! Mailbox production, consumption and cross-stream synchronization.

use std::sync::{Arc, Mutex};

use snap_core::{PixelFormat, Rect, Size};
use snap_gpu::{
    CropScaleRequest, GlHelper, GpuError, Mailbox, ShareGroup, SoftDevice, SyncPoint, TextureId,
};

fn gradient(device: &SoftDevice, size: Size) -> TextureId {
    let mut data = Vec::with_capacity(size.area() as usize * 4);
    for y in 0..size.height {
        for x in 0..size.width {
            data.extend([(x * 16) as u8, (y * 16) as u8, 128, 255]);
        }
    }
    device
        .create_texture_with_data(size, PixelFormat::Rgba8, &data)
        .unwrap()
}

#[test]
fn test_two_produces_yield_distinct_tokens() {
    let device = SoftDevice::new();
    let texture = gradient(&device, Size::new(4, 4));
    let helper = GlHelper::new(&device);

    let a = helper.produce_mailbox_from_texture(texture);
    let b = helper.produce_mailbox_from_texture(texture);
    assert!(!a.is_empty() && !b.is_empty());
    assert_ne!(a.mailbox, b.mailbox);
    assert!(b.sync_point > a.sync_point);

    for holder in [a, b] {
        let consumed = helper.consume_mailbox_to_texture(&holder.mailbox, holder.sync_point);
        assert!(!consumed.is_null());
        helper.delete_texture(consumed);
    }
}

#[test]
fn test_produce_wait_consume_preserves_content() {
    let device = SoftDevice::new();
    let texture = gradient(&device, Size::new(8, 8));
    let helper = GlHelper::new(&device);

    let holder = helper.produce_mailbox_from_texture(texture);
    helper.wait_sync_point(holder.sync_point);
    let first = helper.consume_mailbox_to_texture(&holder.mailbox, holder.sync_point);
    let second = helper.consume_mailbox_to_texture(&holder.mailbox, holder.sync_point);

    assert_ne!(first, second);
    let original = device.read_texture(texture).unwrap();
    assert_eq!(device.read_texture(first).unwrap(), original);
    assert_eq!(device.read_texture(second).unwrap(), original);

    helper.delete_texture(first);
    assert_eq!(device.read_texture(second).unwrap(), original);
    helper.delete_texture(second);
    helper.delete_texture(texture);
    assert!(device.stats().is_clean());
}

#[test]
fn test_repeated_publish_leaves_no_mailboxes() {
    let device = SoftDevice::new();
    let helper = GlHelper::new(&device);

    for _ in 0..100 {
        let texture = gradient(&device, Size::new(4, 4));
        let holder = helper.produce_mailbox_from_texture(texture);
        let consumed = helper.consume_mailbox_to_texture(&holder.mailbox, holder.sync_point);
        assert!(!consumed.is_null());
        assert_eq!(device.share_group().mailbox_count(), 1);

        helper.delete_texture(consumed);
        helper.delete_texture(texture);
        assert_eq!(device.share_group().mailbox_count(), 0);
        assert!(helper
            .consume_mailbox_to_texture(&holder.mailbox, holder.sync_point)
            .is_null());
    }
    drop(helper);
    assert!(device.stats().is_clean());
}

#[test]
fn test_cross_stream_consume_needs_wait() {
    let group = ShareGroup::new();
    let producer = SoftDevice::builder().share_group(&group).build();
    let consumer = SoftDevice::builder().share_group(&group).build();
    let texture = gradient(&producer, Size::new(4, 4));

    let producer_helper = GlHelper::new(&producer);
    let consumer_helper = GlHelper::new(&consumer);
    let holder = producer_helper.produce_mailbox_from_texture(texture);
    assert_eq!(group.mailbox_count(), 1);

    let early = consumer_helper.consume_mailbox_to_texture(&holder.mailbox, SyncPoint::NONE);
    assert!(early.is_null());
    assert_eq!(consumer.stats().textures, 0);

    let consumed = consumer_helper.consume_mailbox_to_texture(&holder.mailbox, holder.sync_point);
    assert!(!consumed.is_null());
    assert_eq!(
        consumer.read_texture(consumed).unwrap(),
        producer.read_texture(texture).unwrap()
    );
}

#[test]
fn test_empty_and_unknown_mailboxes() {
    let device = SoftDevice::new();
    let helper = GlHelper::new(&device);
    assert!(helper
        .consume_mailbox_to_texture(&Mailbox::EMPTY, SyncPoint::NONE)
        .is_null());

    let unknown = Mailbox::from_bytes([7; Mailbox::LEN]);
    assert!(helper
        .consume_mailbox_to_texture(&unknown, SyncPoint::NONE)
        .is_null());
    assert!(device.stats().is_clean());
}

#[test]
fn test_produce_after_context_loss_is_empty() {
    let device = SoftDevice::new();
    let texture = gradient(&device, Size::new(2, 2));
    let helper = GlHelper::new(&device);
    device.lose_context();
    assert!(helper.produce_mailbox_from_texture(texture).is_empty());
}

#[test]
fn test_produce_texture_without_storage_is_empty() {
    let device = SoftDevice::new();
    let helper = GlHelper::new(&device);
    let texture = helper.create_texture();
    assert!(helper.produce_mailbox_from_texture(texture).is_empty());
}

#[test]
fn test_crop_scale_from_mailbox_across_streams() {
    let group = ShareGroup::new();
    let producer = SoftDevice::builder().share_group(&group).build();
    let consumer = SoftDevice::builder().share_group(&group).build();
    let data = [90u8, 60, 30, 255].repeat(64);
    let texture = producer
        .create_texture_with_data(Size::new(8, 8), PixelFormat::Rgba8, &data)
        .unwrap();
    let holder = GlHelper::new(&producer).produce_mailbox_from_texture(texture);

    let mut helper = GlHelper::new(&consumer);
    let request = CropScaleRequest::new(Size::new(8, 8), Rect::new(0, 0, 8, 8), Size::new(2, 2));
    let out = Arc::new(Mutex::new(vec![0u8; 16]));
    helper
        .crop_scale_readback_and_clean_mailbox(
            &holder.mailbox,
            holder.sync_point,
            &request,
            out.clone(),
            Box::new(|ok| assert!(ok)),
        )
        .unwrap();
    assert_eq!(helper.finish(), 1);
    assert_eq!(&out.lock().unwrap()[..4], &[30, 60, 90, 255]);

    let err = helper
        .crop_scale_readback_and_clean_mailbox(
            &Mailbox::from_bytes([1; Mailbox::LEN]),
            SyncPoint::NONE,
            &request,
            out,
            Box::new(|_| {}),
        )
        .unwrap_err();
    assert!(matches!(err, GpuError::InvalidMailbox));

    // Consumed sources were released with each call.
    drop(helper);
    assert!(consumer.stats().is_clean());
}
