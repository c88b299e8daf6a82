//! Process-wide registry of raster buffers shared with renderer processes.
//!
//! Renderers either ask the browser to allocate shared memory for them
//! ([`SharedBitmapRegistry::allocate_for_child`]) or donate memory they
//! allocated themselves ([`SharedBitmapRegistry::child_allocated_shared_bitmap`]).
//! Either way the bitmap is later found again by id when a compositor frame
//! references it. The map is the only state here, guarded by one lock that is
//! held just for the map operation.

use ipc_channel::ipc::IpcSharedMemory;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tessera_core::ProcessId;
use tessera_core::geometry::Size;
use uuid::Uuid;

const BYTES_PER_PIXEL: usize = 4;

/// Opaque 128-bit bitmap id, chosen by whoever allocates the bitmap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SharedBitmapId(pub Uuid);

impl SharedBitmapId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Debug for SharedBitmapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedBitmapId({})", self.0.simple())
    }
}

/// Bytes needed for an RGBA bitmap of `size`, or `None` when the size is
/// empty, negative or overflows.
pub fn size_in_bytes(size: Size) -> Option<usize> {
    if size.width <= 0 || size.height <= 0 {
        return None;
    }
    (size.width as usize)
        .checked_mul(BYTES_PER_PIXEL)?
        .checked_mul(size.height as usize)
}

enum BitmapMemory {
    /// Plain buffer for bitmaps only the browser touches.
    Local(RwLock<Box<[u8]>>),
    /// Shared region; read-only from the browser's side.
    Shared(IpcSharedMemory),
}

struct BitmapData {
    owner: Option<ProcessId>,
    memory: BitmapMemory,
    byte_size: usize,
}

/// A handle to registered pixels.
///
/// Handles returned by [`SharedBitmapRegistry::allocate_in_process`] own their
/// id and free it on drop; handles returned by lookups do not.
pub struct SharedBitmap {
    id: SharedBitmapId,
    data: Arc<BitmapData>,
    registry: Option<Arc<SharedBitmapRegistry>>,
}

impl SharedBitmap {
    pub fn id(&self) -> SharedBitmapId {
        self.id
    }

    pub fn byte_size(&self) -> usize {
        self.data.byte_size
    }

    pub fn owner(&self) -> Option<ProcessId> {
        self.data.owner
    }

    pub fn is_shared_memory(&self) -> bool {
        matches!(self.data.memory, BitmapMemory::Shared(_))
    }

    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        match &self.data.memory {
            BitmapMemory::Local(pixels) => f(&pixels.read()[..]),
            BitmapMemory::Shared(memory) => f(&**memory),
        }
    }

    /// Writes into a browser-local bitmap. Shared regions belong to the
    /// renderer and return `None`.
    pub fn with_pixels_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        match &self.data.memory {
            BitmapMemory::Local(pixels) => Some(f(&mut pixels.write()[..])),
            BitmapMemory::Shared(_) => None,
        }
    }
}

impl Drop for SharedBitmap {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.free_by_id(self.id);
        }
    }
}

impl fmt::Debug for SharedBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBitmap")
            .field("id", &self.id)
            .field("byte_size", &self.data.byte_size)
            .field("owner", &self.data.owner)
            .field("owning", &self.registry.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct SharedBitmapRegistry {
    handle_map: Mutex<HashMap<SharedBitmapId, Arc<BitmapData>>>,
}

impl SharedBitmapRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The registry shared by the whole browser process.
    pub fn current() -> Arc<Self> {
        static CURRENT: OnceLock<Arc<SharedBitmapRegistry>> = OnceLock::new();
        CURRENT.get_or_init(SharedBitmapRegistry::new).clone()
    }

    /// Creates a shared region of `byte_size` bytes for `owner` and returns the
    /// handle to send to it. Returns `None` when `id` is already registered.
    pub fn allocate_for_child(
        &self,
        owner: ProcessId,
        byte_size: usize,
        id: SharedBitmapId,
    ) -> Option<IpcSharedMemory> {
        if byte_size == 0 {
            warn!("Rejecting empty shared bitmap {:?} from {}", id, owner);
            return None;
        }
        if self.handle_map.lock().contains_key(&id) {
            warn!("Rejecting duplicate shared bitmap id {:?} from {}", id, owner);
            return None;
        }

        // Region creation happens outside the lock.
        let memory = IpcSharedMemory::from_byte(0, byte_size);
        let handle = memory.clone();

        let mut map = self.handle_map.lock();
        if map.contains_key(&id) {
            warn!("Shared bitmap id {:?} registered concurrently", id);
            return None;
        }
        map.insert(
            id,
            Arc::new(BitmapData {
                owner: Some(owner),
                memory: BitmapMemory::Shared(memory),
                byte_size,
            }),
        );
        debug!("Allocated {} byte shared bitmap {:?} for {}", byte_size, id, owner);
        Some(handle)
    }

    /// Registers a region the child allocated itself. Duplicate ids are
    /// ignored; the return value tells whether the entry was added.
    pub fn child_allocated_shared_bitmap(
        &self,
        byte_size: usize,
        handle: IpcSharedMemory,
        owner: ProcessId,
        id: SharedBitmapId,
    ) -> bool {
        let mut map = self.handle_map.lock();
        if map.contains_key(&id) {
            warn!("Ignoring duplicate child allocated bitmap {:?} from {}", id, owner);
            return false;
        }
        if handle.len() < byte_size {
            warn!(
                "Child bitmap {:?} claims {} bytes but the region holds {}",
                id,
                byte_size,
                handle.len()
            );
        }
        map.insert(
            id,
            Arc::new(BitmapData {
                owner: Some(owner),
                byte_size: byte_size.min(handle.len()),
                memory: BitmapMemory::Shared(handle),
            }),
        );
        true
    }

    /// Allocates a browser-only bitmap under a fresh id. Dropping the returned
    /// handle frees the entry.
    pub fn allocate_in_process(self: &Arc<Self>, size: Size) -> Option<SharedBitmap> {
        let byte_size = size_in_bytes(size)?;
        let id = SharedBitmapId::generate();
        let data = Arc::new(BitmapData {
            owner: None,
            memory: BitmapMemory::Local(RwLock::new(vec![0u8; byte_size].into_boxed_slice())),
            byte_size,
        });
        self.handle_map.lock().insert(id, data.clone());
        Some(SharedBitmap {
            id,
            data,
            registry: Some(self.clone()),
        })
    }

    /// Finds the bitmap registered as `id` if it is large enough for `size`.
    pub fn lookup_by_id(&self, size: Size, id: SharedBitmapId) -> Option<SharedBitmap> {
        let data = self.handle_map.lock().get(&id).cloned()?;
        let needed = size_in_bytes(size)?;
        if needed > data.byte_size {
            warn!(
                "Bitmap {:?} looked up for {} bytes but only holds {}",
                id, needed, data.byte_size
            );
            return None;
        }
        Some(SharedBitmap {
            id,
            data,
            registry: None,
        })
    }

    /// Removes the entry unconditionally. Callers that share ownership of an
    /// id coordinate among themselves before calling this.
    pub fn free_by_id(&self, id: SharedBitmapId) {
        if self.handle_map.lock().remove(&id).is_some() {
            debug!("Freed shared bitmap {:?}", id);
        }
    }

    pub fn allocated_bitmap_count(&self) -> usize {
        self.handle_map.lock().len()
    }
}
