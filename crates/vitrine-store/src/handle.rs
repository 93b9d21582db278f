//! Transient display handles for image blobs.
//!
//! A [`DisplayHandle`] is what a renderer holds to show an image: a
//! short-lived `blob:` URL plus the bytes behind it. Handles are memoized per
//! image key in a [`HandleCache`] and revoked when their blob is deleted.
//! The cache is purely derived; dropping it only costs a re-read.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use uuid::Uuid;
use vitrine_types::ImageKey;

const URL_SCHEME: &str = "blob:vitrine/";

struct HandleInner {
    key: ImageKey,
    url: String,
    bytes: Bytes,
    revoked: AtomicBool,
}

/// Revocable view of one stored image.
///
/// Clones share revocation state: once any clone is revoked, none of them
/// yields bytes any more and callers must request a new handle.
#[derive(Clone)]
pub struct DisplayHandle {
    inner: Arc<HandleInner>,
}

impl DisplayHandle {
    fn new(key: ImageKey, bytes: Bytes) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                key,
                url: format!("{URL_SCHEME}{}", Uuid::now_v7()),
                bytes,
                revoked: AtomicBool::new(false),
            }),
        }
    }

    pub fn key(&self) -> &ImageKey {
        &self.inner.key
    }

    /// The view URL. Still readable after revocation, but no longer valid.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Blob content, or `None` once the handle has been revoked.
    pub fn bytes(&self) -> Option<Bytes> {
        if self.is_revoked() {
            None
        } else {
            Some(self.inner.bytes.clone())
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.inner.revoked.load(Ordering::Acquire)
    }

    fn revoke(&self) {
        self.inner.revoked.store(true, Ordering::Release);
    }

    /// `true` if both values are clones of the same handle.
    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for DisplayHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_handle(other)
    }
}

impl Eq for DisplayHandle {}

impl fmt::Debug for DisplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayHandle")
            .field("key", &self.inner.key)
            .field("url", &self.inner.url)
            .field("len", &self.inner.bytes.len())
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

/// Snapshot of a key's revocation state, taken before reading its blob.
///
/// [`HandleCache::insert`] refuses to cache a handle if the key was
/// invalidated (or the cache cleared) after the ticket was taken, so a read
/// that races a delete cannot resurrect the deleted blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandleTicket {
    epoch: u64,
    revocations: u64,
}

#[derive(Default)]
struct CacheState {
    handles: HashMap<ImageKey, DisplayHandle>,
    revocations: HashMap<ImageKey, u64>,
    epoch: u64,
}

impl CacheState {
    fn ticket(&self, key: &ImageKey) -> HandleTicket {
        HandleTicket {
            epoch: self.epoch,
            revocations: self.revocations.get(key).copied().unwrap_or(0),
        }
    }
}

/// Per-key memo of live display handles.
///
/// The lock is only held for map access, never across an `.await`. A
/// poisoned lock is recovered rather than propagated: the maps hold no
/// invariant a panicking writer could break.
#[derive(Default)]
pub struct HandleCache {
    state: RwLock<CacheState>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached live handle for `key`, if any.
    pub fn get(&self, key: &ImageKey) -> Option<DisplayHandle> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.handles.get(key).filter(|h| !h.is_revoked()).cloned()
    }

    /// Take a ticket for `key` before reading its blob from the backend.
    pub fn ticket(&self, key: &ImageKey) -> HandleTicket {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ticket(key)
    }

    /// Cache a handle for bytes read under `ticket` and return it.
    ///
    /// If a concurrent reader already cached a live handle for the key, that
    /// handle wins and `bytes` is dropped, so every caller sees one handle.
    /// Returns `None` when the key was invalidated since the ticket was
    /// taken: the bytes belong to a blob that has since been deleted.
    pub fn insert(&self, key: ImageKey, bytes: Bytes, ticket: HandleTicket) -> Option<DisplayHandle> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = state.handles.get(&key).filter(|h| !h.is_revoked()) {
            return Some(existing.clone());
        }
        if state.ticket(&key) != ticket {
            return None;
        }
        let handle = DisplayHandle::new(key.clone(), bytes);
        state.handles.insert(key, handle.clone());
        Some(handle)
    }

    /// Revoke and evict the handle for `key`, and void outstanding tickets
    /// for it. Returns `true` if a handle was cached.
    pub fn invalidate(&self, key: &ImageKey) -> bool {
        let removed = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            *state.revocations.entry(key.clone()).or_default() += 1;
            state.handles.remove(key)
        };
        match removed {
            Some(handle) => {
                handle.revoke();
                true
            }
            None => false,
        }
    }

    /// Revoke and evict every cached handle and void every ticket.
    pub fn clear(&self) {
        let drained: Vec<DisplayHandle> = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.epoch += 1;
            state.revocations.clear();
            state.handles.drain().map(|(_, h)| h).collect()
        };
        for handle in drained {
            handle.revoke();
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handles
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleCache")
            .field("cached", &self.len())
            .finish()
    }
}
