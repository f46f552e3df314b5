//! Id-keyed lookup of surfaces, streams and buffers.
//!
//! The channel never owns the map. It holds a [`SurfaceMapHandle`] whose
//! lookups return `None` once the owner tears the map down or swaps it for
//! another one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dsrpc_frame::{BufferId, BufferStreamId, Event, SurfaceId};

use crate::buffer::{BufferReceiver, ClientBuffer};

/// A surface that accepts events addressed to it.
pub trait SurfaceEventReceiver: Send + Sync {
    fn handle_event(&self, event: &Event);
}

pub trait SurfaceMap: Send + Sync {
    fn surface(&self, id: SurfaceId) -> Option<Arc<dyn SurfaceEventReceiver>>;
    fn stream(&self, id: BufferStreamId) -> Option<Arc<dyn BufferReceiver>>;
    /// Every live stream.
    fn streams(&self) -> Vec<Arc<dyn BufferReceiver>>;
    fn buffer(&self, id: BufferId) -> Option<Arc<dyn ClientBuffer>>;
    fn insert_buffer(&self, id: BufferId, buffer: Arc<dyn ClientBuffer>);
    fn erase_buffer(&self, id: BufferId) -> Option<Arc<dyn ClientBuffer>>;
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory [`SurfaceMap`].
#[derive(Default)]
pub struct SurfaceRegistry {
    surfaces: RwLock<HashMap<SurfaceId, Arc<dyn SurfaceEventReceiver>>>,
    streams: RwLock<HashMap<BufferStreamId, Arc<dyn BufferReceiver>>>,
    buffers: RwLock<HashMap<BufferId, Arc<dyn ClientBuffer>>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_surface(&self, id: SurfaceId, surface: Arc<dyn SurfaceEventReceiver>) {
        write(&self.surfaces).insert(id, surface);
    }

    pub fn remove_surface(&self, id: SurfaceId) -> Option<Arc<dyn SurfaceEventReceiver>> {
        write(&self.surfaces).remove(&id)
    }

    pub fn insert_stream(&self, id: BufferStreamId, stream: Arc<dyn BufferReceiver>) {
        write(&self.streams).insert(id, stream);
    }

    pub fn remove_stream(&self, id: BufferStreamId) -> Option<Arc<dyn BufferReceiver>> {
        write(&self.streams).remove(&id)
    }

    pub fn buffer_ids(&self) -> Vec<BufferId> {
        let mut ids: Vec<BufferId> = read(&self.buffers).keys().copied().collect();
        ids.sort();
        ids
    }
}

impl SurfaceMap for SurfaceRegistry {
    fn surface(&self, id: SurfaceId) -> Option<Arc<dyn SurfaceEventReceiver>> {
        read(&self.surfaces).get(&id).cloned()
    }

    fn stream(&self, id: BufferStreamId) -> Option<Arc<dyn BufferReceiver>> {
        read(&self.streams).get(&id).cloned()
    }

    fn streams(&self) -> Vec<Arc<dyn BufferReceiver>> {
        read(&self.streams).values().cloned().collect()
    }

    fn buffer(&self, id: BufferId) -> Option<Arc<dyn ClientBuffer>> {
        read(&self.buffers).get(&id).cloned()
    }

    fn insert_buffer(&self, id: BufferId, buffer: Arc<dyn ClientBuffer>) {
        write(&self.buffers).insert(id, buffer);
    }

    fn erase_buffer(&self, id: BufferId) -> Option<Arc<dyn ClientBuffer>> {
        write(&self.buffers).remove(&id)
    }
}

struct Slot {
    generation: AtomicU64,
    map: RwLock<Option<Arc<dyn SurfaceMap>>>,
}

/// Owns a surface map and hands out generation-checked handles to it.
///
/// Dropping the owner tears the map down.
pub struct SurfaceMapOwner {
    slot: Arc<Slot>,
}

impl SurfaceMapOwner {
    pub fn new(map: Arc<dyn SurfaceMap>) -> Self {
        Self {
            slot: Arc::new(Slot {
                generation: AtomicU64::new(0),
                map: RwLock::new(Some(map)),
            }),
        }
    }

    /// A handle that resolves to the current map until it is torn down or
    /// replaced.
    pub fn handle(&self) -> SurfaceMapHandle {
        let map = read(&self.slot.map);
        SurfaceMapHandle {
            slot: Some(Arc::clone(&self.slot)),
            generation: if map.is_some() {
                self.slot.generation.load(Ordering::SeqCst)
            } else {
                u64::MAX
            },
        }
    }

    /// Swap in a new map. Existing handles stop resolving.
    pub fn replace(&self, map: Arc<dyn SurfaceMap>) {
        let mut slot = write(&self.slot.map);
        self.slot.generation.fetch_add(1, Ordering::SeqCst);
        *slot = Some(map);
    }

    /// Drop the map. Existing handles stop resolving.
    pub fn tear_down(&self) {
        let mut slot = write(&self.slot.map);
        self.slot.generation.fetch_add(1, Ordering::SeqCst);
        *slot = None;
    }
}

impl Drop for SurfaceMapOwner {
    fn drop(&mut self) {
        self.tear_down();
    }
}

/// Non-owning, generation-checked view of a surface map.
#[derive(Clone)]
pub struct SurfaceMapHandle {
    slot: Option<Arc<Slot>>,
    generation: u64,
}

impl SurfaceMapHandle {
    /// A handle that never resolves.
    pub fn detached() -> Self {
        Self {
            slot: None,
            generation: 0,
        }
    }

    /// The map, if it is still the one this handle was issued for.
    pub fn get(&self) -> Option<Arc<dyn SurfaceMap>> {
        let slot = self.slot.as_ref()?;
        let map = read(&slot.map);
        if slot.generation.load(Ordering::SeqCst) != self.generation {
            return None;
        }
        map.clone()
    }
}

impl std::fmt::Debug for SurfaceMapHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceMapHandle")
            .field("generation", &self.generation)
            .field("live", &self.get().is_some())
            .finish()
    }
}
