//! In-memory document cache keyed by storage-issued document id.
//!
//! The [`DocumentCache`] handle is cheap to clone; the conversion orchestrator
//! writes through it and the chat session reads through it. Its lifetime is the
//! owning session's: nothing survives a process restart.
//!
//! **Capacity policy:** with a non-zero capacity the cache evicts the oldest
//! inserted entry once full. Overwriting an id refreshes its position. A
//! capacity of `0` keeps every entry for the life of the cache.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use docchat_shared::{DocChatError, DocumentId, Result};
use tracing::{debug, warn};

/// What a [`DocumentCache::put`] did to the existing entry, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The id was new.
    Inserted,
    /// The id was already cached and its content was overwritten.
    Replaced,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<DocumentId, String>,
    /// Insertion order, oldest first.
    order: VecDeque<DocumentId>,
    capacity: usize,
}

/// Shared handle to the document content store.
#[derive(Debug, Clone, Default)]
pub struct DocumentCache {
    inner: Arc<RwLock<Inner>>,
}

impl DocumentCache {
    /// Create a cache holding at most `capacity` documents (`0` = unbounded).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                capacity,
                ..Inner::default()
            })),
        }
    }

    /// Create a cache with no capacity bound.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Store `content` under `id`.
    ///
    /// An existing entry is overwritten; the overwrite is logged and reported
    /// as [`PutOutcome::Replaced`] since ids are expected to be unique.
    pub fn put(&self, id: DocumentId, content: String) -> PutOutcome {
        let mut inner = self.write();
        let content_len = content.len();

        if let Some(previous) = inner.entries.insert(id.clone(), content) {
            warn!(
                doc_id = %id,
                previous_len = previous.len(),
                content_len,
                "document id already cached, overwriting"
            );
            inner.order.retain(|existing| existing != &id);
            inner.order.push_back(id);
            return PutOutcome::Replaced;
        }

        inner.order.push_back(id.clone());
        debug!(doc_id = %id, content_len, "document cached");

        while inner.capacity > 0 && inner.entries.len() > inner.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
            debug!(doc_id = %oldest, capacity = inner.capacity, "evicted oldest document");
        }

        PutOutcome::Inserted
    }

    /// Fetch the content cached under `id`.
    pub fn get(&self, id: &DocumentId) -> Result<String> {
        self.read()
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| DocChatError::not_found(id.as_str()))
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.read().entries.contains_key(id)
    }

    /// Drop a single entry, returning its content if it was present.
    pub fn remove(&self, id: &DocumentId) -> Option<String> {
        let mut inner = self.write();
        let removed = inner.entries.remove(id);
        if removed.is_some() {
            inner.order.retain(|existing| existing != id);
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Configured bound; `0` means unbounded.
    pub fn capacity(&self) -> usize {
        self.read().capacity
    }

    // Entries are plain strings, so a panic mid-write cannot leave them torn.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
