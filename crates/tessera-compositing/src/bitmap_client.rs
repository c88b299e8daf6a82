use crate::shared_bitmap::{SharedBitmapId, SharedBitmapRegistry};
use ipc_channel::ipc::IpcSharedMemory;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tessera_core::ProcessId;

/// The registry as seen by one renderer connection.
///
/// Every id the renderer registers through this client is remembered, so the
/// connection can release exactly its own entries once it goes away. The
/// registry frees unconditionally; this is where ownership is counted.
pub struct SharedBitmapManagerClient {
    process_id: ProcessId,
    registry: Arc<SharedBitmapRegistry>,
    owned_bitmaps: Mutex<HashSet<SharedBitmapId>>,
}

impl SharedBitmapManagerClient {
    pub fn new(process_id: ProcessId, registry: Arc<SharedBitmapRegistry>) -> Self {
        Self {
            process_id,
            registry,
            owned_bitmaps: Mutex::new(HashSet::new()),
        }
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Handles a synchronous allocation request from the renderer.
    pub fn allocate_shared_bitmap_for_child(
        &self,
        byte_size: usize,
        id: SharedBitmapId,
    ) -> Option<IpcSharedMemory> {
        let handle = self
            .registry
            .allocate_for_child(self.process_id, byte_size, id)?;
        self.owned_bitmaps.lock().insert(id);
        Some(handle)
    }

    pub fn child_allocated_shared_bitmap(
        &self,
        byte_size: usize,
        handle: IpcSharedMemory,
        id: SharedBitmapId,
    ) {
        let mut owned = self.owned_bitmaps.lock();
        if owned.contains(&id) {
            warn!("{} donated bitmap {:?} twice", self.process_id, id);
            return;
        }
        if self
            .registry
            .child_allocated_shared_bitmap(byte_size, handle, self.process_id, id)
        {
            owned.insert(id);
        }
    }

    /// Releases an id this connection registered. Ids owned by someone else
    /// are left alone.
    pub fn deleted_shared_bitmap(&self, id: SharedBitmapId) {
        if self.owned_bitmaps.lock().remove(&id) {
            self.registry.free_by_id(id);
        } else {
            warn!(
                "{} deleted bitmap {:?} it does not own",
                self.process_id, id
            );
        }
    }

    pub fn owns(&self, id: SharedBitmapId) -> bool {
        self.owned_bitmaps.lock().contains(&id)
    }

    pub fn owned_bitmap_count(&self) -> usize {
        self.owned_bitmaps.lock().len()
    }

    /// Frees everything this connection still owns. Safe to call repeatedly.
    pub fn release_all(&self) {
        let owned: Vec<_> = self.owned_bitmaps.lock().drain().collect();
        if !owned.is_empty() {
            debug!(
                "Releasing {} shared bitmaps held by {}",
                owned.len(),
                self.process_id
            );
        }
        for id in owned {
            self.registry.free_by_id(id);
        }
    }
}

impl Drop for SharedBitmapManagerClient {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::geometry::Size;

    #[test]
    fn teardown_frees_each_owned_id_once() {
        let registry = SharedBitmapRegistry::new();
        let client = SharedBitmapManagerClient::new(ProcessId(4), registry.clone());
        let a = SharedBitmapId::generate();
        let b = SharedBitmapId::generate();
        client.allocate_shared_bitmap_for_child(16, a).unwrap();
        client.child_allocated_shared_bitmap(16, IpcSharedMemory::from_byte(1, 16), b);
        assert_eq!(client.owned_bitmap_count(), 2);
        assert_eq!(registry.allocated_bitmap_count(), 2);

        client.release_all();
        client.release_all();
        assert_eq!(registry.allocated_bitmap_count(), 0);
        assert_eq!(client.owned_bitmap_count(), 0);
    }

    #[test]
    fn clients_do_not_free_each_others_bitmaps() {
        let registry = SharedBitmapRegistry::new();
        let first = SharedBitmapManagerClient::new(ProcessId(1), registry.clone());
        let second = SharedBitmapManagerClient::new(ProcessId(2), registry.clone());
        let id = SharedBitmapId::generate();

        first.allocate_shared_bitmap_for_child(16, id).unwrap();
        assert!(second.allocate_shared_bitmap_for_child(16, id).is_none());
        second.child_allocated_shared_bitmap(16, IpcSharedMemory::from_byte(0, 16), id);
        assert!(!second.owns(id));

        second.deleted_shared_bitmap(id);
        drop(second);
        assert!(registry.lookup_by_id(Size::new(2, 2), id).is_some());

        drop(first);
        assert_eq!(registry.allocated_bitmap_count(), 0);
    }

    #[test]
    fn deleting_an_owned_id_removes_it() {
        let registry = SharedBitmapRegistry::new();
        let client = SharedBitmapManagerClient::new(ProcessId(1), registry.clone());
        let id = SharedBitmapId::generate();
        client.allocate_shared_bitmap_for_child(8, id).unwrap();
        client.deleted_shared_bitmap(id);
        assert!(!client.owns(id));
        assert_eq!(registry.allocated_bitmap_count(), 0);
    }
}
