//! Key-value store configuration.

/// Options for [`crate::BTreeKeyValueDb`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Sync the commit log after every committed write transaction.
    ///
    /// When false, frames are only flushed to the OS and may be lost on a
    /// crash. A lost frame is detected on the next open and discarded.
    pub sync_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
        }
    }
}

impl StoreConfig {
    /// Sets whether commits are synced to durable storage.
    #[must_use]
    pub const fn sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }
}
