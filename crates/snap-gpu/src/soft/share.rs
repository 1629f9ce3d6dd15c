//! Share groups: mailboxes and sync points common to several command streams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::trace;

use super::sampler::{SharedSurface, Surface};
use crate::mailbox::{Mailbox, SyncPoint};
use crate::{GpuError, GpuResult};

static NEXT_GROUP: AtomicU64 = AtomicU64::new(1);

/// A published texture image. The entry lapses once every texture
/// holding the image has been deleted.
struct MailboxEntry {
    surface: Weak<Mutex<Surface>>,
    producer: u32,
    /// First sync point inserted by the producer after production.
    fence: Option<SyncPoint>,
}

struct ShareState {
    next_stream: u32,
    next_mailbox: u64,
    last_sync_point: u32,
    mailboxes: HashMap<Mailbox, MailboxEntry>,
}

impl ShareState {
    fn prune(&mut self) {
        self.mailboxes.retain(|_, entry| entry.surface.strong_count() > 0);
    }
}

/// Mailbox and sync-point namespace shared by [`SoftDevice`](super::SoftDevice)s.
///
/// Every device built from the same group is a separate command stream. A
/// stream may consume a mailbox produced by another stream only after
/// waiting on a sync point the producer inserted after producing it.
#[derive(Clone)]
pub struct ShareGroup {
    id: u64,
    state: Arc<Mutex<ShareState>>,
}

impl ShareGroup {
    pub fn new() -> Self {
        Self {
            id: NEXT_GROUP.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(Mutex::new(ShareState {
                next_stream: 1,
                next_mailbox: 1,
                last_sync_point: 0,
                mailboxes: HashMap::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ShareState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of published mailboxes whose image is still alive.
    pub fn mailbox_count(&self) -> usize {
        let mut state = self.state();
        state.prune();
        state.mailboxes.len()
    }

    /// Most recently inserted sync point.
    pub fn last_sync_point(&self) -> SyncPoint {
        SyncPoint(self.state().last_sync_point)
    }

    pub(crate) fn register_stream(&self) -> u32 {
        let mut state = self.state();
        let stream = state.next_stream;
        state.next_stream += 1;
        stream
    }

    pub(crate) fn gen_mailbox(&self) -> Mailbox {
        let mut state = self.state();
        let serial = state.next_mailbox;
        state.next_mailbox += 1;

        let mut bytes = [0u8; Mailbox::LEN];
        bytes[..8].copy_from_slice(&serial.to_le_bytes());
        bytes[8..].copy_from_slice(&self.id.to_le_bytes());
        Mailbox::from_bytes(bytes)
    }

    pub(crate) fn produce(&self, mailbox: Mailbox, surface: SharedSurface, stream: u32) {
        trace!(%mailbox, stream, "produce");
        let mut state = self.state();
        state.prune();
        state.mailboxes.insert(
            mailbox,
            MailboxEntry {
                surface: Arc::downgrade(&surface),
                producer: stream,
                fence: None,
            },
        );
    }

    /// Inserts a sync point for `stream`, fencing its unfenced productions.
    pub(crate) fn insert_sync_point(&self, stream: u32) -> SyncPoint {
        let mut state = self.state();
        state.last_sync_point += 1;
        let sync_point = SyncPoint(state.last_sync_point);
        state.prune();
        for entry in state.mailboxes.values_mut() {
            if entry.producer == stream && entry.fence.is_none() {
                entry.fence = Some(sync_point);
            }
        }
        sync_point
    }

    /// Returns `true` once `sync_point` has been inserted by some stream.
    pub(crate) fn has_passed(&self, sync_point: SyncPoint) -> bool {
        sync_point.0 <= self.state().last_sync_point
    }

    /// Resolves `mailbox` for `stream`, which has waited up to `waited`.
    pub(crate) fn consume(
        &self,
        mailbox: &Mailbox,
        stream: u32,
        waited: SyncPoint,
    ) -> GpuResult<SharedSurface> {
        let state = self.state();
        let entry = state
            .mailboxes
            .get(mailbox)
            .ok_or_else(|| GpuError::invalid_operation(format!("unknown mailbox {mailbox}")))?;
        if entry.producer != stream {
            match entry.fence {
                Some(fence) if waited >= fence => {}
                _ => {
                    return Err(GpuError::invalid_operation(format!(
                        "mailbox {mailbox} consumed before its sync point was waited on"
                    )));
                }
            }
        }
        entry.surface.upgrade().ok_or_else(|| {
            GpuError::invalid_operation(format!("mailbox {mailbox} outlived its texture"))
        })
    }
}

impl Default for ShareGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShareGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareGroup")
            .field("id", &self.id)
            .field("mailboxes", &self.mailbox_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snap_core::{PixelFormat, Size};

    fn surface() -> SharedSurface {
        Arc::new(Mutex::new(Surface::new(Size::new(1, 1), PixelFormat::Rgba8)))
    }

    #[test]
    fn test_mailboxes_unique_and_non_empty() {
        let group = ShareGroup::new();
        let a = group.gen_mailbox();
        let b = group.gen_mailbox();
        assert_ne!(a, b);
        assert!(!a.is_empty());
        assert_ne!(a, ShareGroup::new().gen_mailbox());
    }

    #[test]
    fn test_cross_stream_needs_wait() {
        let group = ShareGroup::new();
        let producer = group.register_stream();
        let consumer = group.register_stream();
        let mailbox = group.gen_mailbox();
        let image = surface();
        group.produce(mailbox, Arc::clone(&image), producer);

        // Same stream needs no wait.
        assert!(group.consume(&mailbox, producer, SyncPoint::NONE).is_ok());
        assert!(group.consume(&mailbox, consumer, SyncPoint::NONE).is_err());

        let sync_point = group.insert_sync_point(producer);
        assert!(group.has_passed(sync_point));
        assert!(group.consume(&mailbox, consumer, SyncPoint::NONE).is_err());
        assert!(group.consume(&mailbox, consumer, sync_point).is_ok());
    }

    #[test]
    fn test_other_stream_sync_point_does_not_fence() {
        let group = ShareGroup::new();
        let producer = group.register_stream();
        let other = group.register_stream();
        let mailbox = group.gen_mailbox();
        let image = surface();
        group.produce(mailbox, Arc::clone(&image), producer);

        let unrelated = group.insert_sync_point(other);
        assert!(group.consume(&mailbox, other, unrelated).is_err());
    }

    #[test]
    fn test_mailbox_lapses_with_its_image() {
        let group = ShareGroup::new();
        let stream = group.register_stream();
        let mailbox = group.gen_mailbox();
        let image = surface();
        group.produce(mailbox, Arc::clone(&image), stream);
        assert_eq!(group.mailbox_count(), 1);

        let consumed = group.consume(&mailbox, stream, SyncPoint::NONE).unwrap();
        drop(image);
        // A consumer still holds the image.
        assert_eq!(group.mailbox_count(), 1);

        drop(consumed);
        assert_eq!(group.mailbox_count(), 0);
        assert!(group.consume(&mailbox, stream, SyncPoint::NONE).is_err());
    }
}
