use parking_lot::Mutex;

use crate::fs::InodeAddr;

/// Monotonically increasing inode allocator shared by every node type.
///
/// Identities are never reused and are unrelated to the on-disk inode numbers of either tier.
#[derive(Debug)]
pub struct IdentityAllocator {
    last: Mutex<InodeAddr>,
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityAllocator {
    /// Creates an allocator whose first identity is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: Mutex::new(0),
        }
    }

    /// Returns an identity strictly greater than every identity handed out before it.
    pub fn next(&self) -> InodeAddr {
        let mut last = self.last.lock();
        *last += 1;
        *last
    }
}
