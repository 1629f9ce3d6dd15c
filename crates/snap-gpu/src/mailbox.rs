//! Mailbox names and sync points for cross-context texture sharing.
//!
//! A producer publishes a texture under a [`Mailbox`] and inserts a
//! [`SyncPoint`] marking the texture's contents as final. A consumer in
//! another command stream waits on that sync point before consuming the
//! mailbox into a texture of its own.

/// Opaque 16-byte share token. All zeros is the empty mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mailbox([u8; 16]);

impl Mailbox {
    /// Length of a mailbox name in bytes.
    pub const LEN: usize = 16;

    /// The empty mailbox.
    pub const EMPTY: Self = Self([0; 16]);

    /// Wraps raw name bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw name bytes.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns `true` when no texture can be named by this mailbox.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Monotonic completion marker in a share group. Zero means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SyncPoint(pub u32);

impl SyncPoint {
    /// No synchronization required.
    pub const NONE: Self = Self(0);

    /// Returns `true` for [`SyncPoint::NONE`].
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }
}

/// A mailbox with the sync point that makes its contents safe to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MailboxHolder {
    pub mailbox: Mailbox,
    pub sync_point: SyncPoint,
}

impl MailboxHolder {
    pub fn new(mailbox: Mailbox, sync_point: SyncPoint) -> Self {
        Self {
            mailbox,
            sync_point,
        }
    }

    /// Returns `true` when production failed.
    pub fn is_empty(&self) -> bool {
        self.mailbox.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert!(Mailbox::default().is_empty());
        assert!(MailboxHolder::default().is_empty());
        let mut bytes = [0u8; 16];
        bytes[15] = 1;
        assert!(!Mailbox::from_bytes(bytes).is_empty());
    }

    #[test]
    fn test_display_hex() {
        let mut bytes = [0u8; 16];
        bytes[0] = 0xab;
        let text = Mailbox::from_bytes(bytes).to_string();
        assert_eq!(text.len(), 32);
        assert!(text.starts_with("ab00"));
    }

    #[test]
    fn test_sync_point_order() {
        assert!(SyncPoint::NONE.is_none());
        assert!(SyncPoint(3) > SyncPoint(2));
    }
}
