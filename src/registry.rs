//! Per-raster state shared between tag operations and readers.
//!
//! Each project owns one [`RasterSlot`]. Readers take a cheap snapshot of the
//! slot's current [`TaggedRef`] and never wait on a tag operation. Tag
//! operations are serialised per slot by an async lock; the guard is released
//! on every exit path, including when the owning future is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::raster::RawImage;

/// Reference to an immutable tagged raster container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedRef {
    /// Storage key of the container
    pub key: Arc<str>,
    /// Incremented on every swap within a slot
    pub version: u64,
}

#[derive(Default)]
struct SlotState {
    upload: Option<Arc<RawImage>>,
    current: Option<TaggedRef>,
    version: u64,
}

/// Upload, current tagged raster and tag lock of one project
#[derive(Default)]
pub struct RasterSlot {
    state: RwLock<SlotState>,
    tag_lock: Arc<Mutex<()>>,
}

/// Proof that the holder has exclusive tag access to a slot
pub struct TagGuard {
    _guard: OwnedMutexGuard<()>,
}

impl RasterSlot {
    /// Wait for exclusive tag access
    pub async fn lock_for_tag(&self) -> TagGuard {
        TagGuard {
            _guard: Arc::clone(&self.tag_lock).lock_owned().await,
        }
    }

    /// True while a tag operation holds the lock
    #[must_use]
    pub fn is_tagging(&self) -> bool {
        self.tag_lock.try_lock().is_err()
    }

    #[must_use]
    pub fn upload(&self) -> Option<Arc<RawImage>> {
        self.state.read().upload.clone()
    }

    /// Snapshot of the current tagged raster reference
    #[must_use]
    pub fn current(&self) -> Option<TaggedRef> {
        self.state.read().current.clone()
    }

    /// Replace the upload. The tagged raster no longer matches it and is
    /// dropped from the slot; its reference is returned.
    pub fn set_upload(&self, _guard: &TagGuard, image: Arc<RawImage>) -> Option<TaggedRef> {
        let mut state = self.state.write();
        state.upload = Some(image);
        state.current.take()
    }

    /// Cache a decoded upload without changing the tagged reference
    pub fn remember_upload(&self, image: Arc<RawImage>) {
        let mut state = self.state.write();
        if state.upload.is_none() {
            state.upload = Some(image);
        }
    }

    /// Atomically point the slot at a new container, returning the
    /// reference it replaces
    pub fn swap(&self, _guard: &TagGuard, key: &str) -> (TaggedRef, Option<TaggedRef>) {
        let mut state = self.state.write();
        state.version += 1;
        let new = TaggedRef {
            key: Arc::from(key),
            version: state.version,
        };
        let old = state.current.replace(new.clone());
        (new, old)
    }

    /// Run `f` only if `tagged` is still current. Swaps and uploads wait
    /// until `f` returns.
    pub fn if_current<R>(&self, tagged: &TaggedRef, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.state.read();
        (state.current.as_ref() == Some(tagged)).then(f)
    }

    /// Drop the tagged reference of a slot that is being discarded
    pub fn detach(&self) -> Option<TaggedRef> {
        self.state.write().current.take()
    }
}

/// Slots by project id
#[derive(Default)]
pub struct RasterRegistry {
    slots: RwLock<HashMap<u64, Arc<RasterSlot>>>,
}

impl RasterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `id`, created on first use
    pub fn slot(&self, id: u64) -> Arc<RasterSlot> {
        if let Some(slot) = self.slots.read().get(&id) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(id).or_default())
    }

    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<RasterSlot>> {
        self.slots.read().get(&id).cloned()
    }

    pub fn remove(&self, id: u64) -> Option<Arc<RasterSlot>> {
        self.slots.write().remove(&id)
    }
}
