//! Independently composited surfaces and their lifetime bookkeeping.
//!
//! A surface is owned by the view that submits frames into it, referenced by
//! the embedding compositor, and kept alive past `destroy_surface` until every
//! destruction dependency (a [`SurfaceSequence`]) has been satisfied by the
//! embedder.

use crate::error::CompositingError;
use crate::frame::{CompositorFrame, ResourceId, ReturnedResource};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tessera_core::FrameRoute;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId {
    pub id_namespace: u32,
    pub local_id: u32,
}

/// A destruction dependency token. Satisfied by the embedder once it stopped
/// referencing the surface it was attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceSequence {
    pub id_namespace: u32,
    pub sequence: u32,
}

/// Hands out surface ids within one namespace.
#[derive(Debug)]
pub struct SurfaceIdAllocator {
    id_namespace: u32,
    next_id: u32,
}

impl SurfaceIdAllocator {
    pub fn new(id_namespace: u32) -> Self {
        Self {
            id_namespace,
            next_id: 1,
        }
    }

    pub fn id_namespace(&self) -> u32 {
        self.id_namespace
    }

    pub fn generate_id(&mut self) -> SurfaceId {
        let id = SurfaceId {
            id_namespace: self.id_namespace,
            local_id: self.next_id,
        };
        self.next_id += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawStatus {
    Drawn,
    /// The frame was replaced or its surface deleted before it was drawn.
    Skipped,
}

/// Acknowledgement owed to the client that submitted a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCallback {
    pub client: FrameRoute,
    pub output_surface_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedDraw {
    pub callback: DrawCallback,
    pub status: DrawStatus,
}

/// Side effects of a surface operation, to be routed back to the owning clients.
///
/// Draw acknowledgements are listed in the order they fired.
#[derive(Debug, Default, PartialEq)]
pub struct SurfaceUpdates {
    pub draws: Vec<CompletedDraw>,
    pub returned: Vec<(FrameRoute, Vec<ReturnedResource>)>,
}

impl SurfaceUpdates {
    pub fn is_empty(&self) -> bool {
        self.draws.is_empty() && self.returned.is_empty()
    }

    pub fn append(&mut self, mut other: SurfaceUpdates) {
        self.draws.append(&mut other.draws);
        for (client, resources) in other.returned {
            self.push_returned(client, resources);
        }
    }

    fn push_returned(&mut self, client: FrameRoute, resources: Vec<ReturnedResource>) {
        if resources.is_empty() {
            return;
        }
        match self.returned.iter_mut().find(|(owner, _)| *owner == client) {
            Some((_, existing)) => existing.extend(resources),
            None => self.returned.push((client, resources)),
        }
    }
}

#[derive(Debug)]
struct Surface {
    owner: FrameRoute,
    current_frame: Option<CompositorFrame>,
    draw_callback: Option<DrawCallback>,
    destruction_dependencies: Vec<SurfaceSequence>,
    destroyed: bool,
}

/// Process-wide surface registry of the display compositor.
#[derive(Debug, Default)]
pub struct SurfaceManager {
    surfaces: HashMap<SurfaceId, Surface>,
    valid_namespaces: HashSet<u32>,
    satisfied_sequences: HashSet<SurfaceSequence>,
    // Number of live frames referencing each resource of each client.
    resource_refs: HashMap<(FrameRoute, ResourceId), u32>,
}

impl SurfaceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_namespace(&mut self, id_namespace: u32) {
        self.valid_namespaces.insert(id_namespace);
    }

    /// Dependencies in an invalidated namespace can never be satisfied, so they
    /// stop holding surfaces alive.
    pub fn invalidate_namespace(&mut self, id_namespace: u32) -> SurfaceUpdates {
        self.valid_namespaces.remove(&id_namespace);
        self.garbage_collect()
    }

    pub fn create_surface(
        &mut self,
        owner: FrameRoute,
        surface_id: SurfaceId,
    ) -> Result<(), CompositingError> {
        if self.surfaces.contains_key(&surface_id) {
            return Err(CompositingError::DuplicateSurface(surface_id));
        }
        debug!("Creating surface {:?} for {}", surface_id, owner);
        self.surfaces.insert(
            surface_id,
            Surface {
                owner,
                current_frame: None,
                draw_callback: None,
                destruction_dependencies: Vec::new(),
                destroyed: false,
            },
        );
        Ok(())
    }

    /// Marks a surface for destruction; it is deleted once no dependency holds it.
    pub fn destroy_surface(&mut self, surface_id: SurfaceId) -> SurfaceUpdates {
        match self.surfaces.get_mut(&surface_id) {
            Some(surface) => {
                debug!("Destroying surface {:?}", surface_id);
                surface.destroyed = true;
            }
            None => warn!("Destroy requested for unknown surface {:?}", surface_id),
        }
        self.garbage_collect()
    }

    pub fn require_sequence(
        &mut self,
        surface_id: SurfaceId,
        sequence: SurfaceSequence,
    ) -> Result<(), CompositingError> {
        let surface = self
            .surfaces
            .get_mut(&surface_id)
            .ok_or(CompositingError::UnknownSurface(surface_id))?;
        trace!("Surface {:?} now requires {:?}", surface_id, sequence);
        surface.destruction_dependencies.push(sequence);
        Ok(())
    }

    pub fn satisfy_sequence(
        &mut self,
        sequence: SurfaceSequence,
    ) -> Result<SurfaceUpdates, CompositingError> {
        if !self.valid_namespaces.contains(&sequence.id_namespace) {
            return Err(CompositingError::UnknownNamespace(sequence));
        }
        self.satisfied_sequences.insert(sequence);
        Ok(self.garbage_collect())
    }

    /// Queues `frame` on the surface. The previous frame, if still undrawn, is
    /// acknowledged as skipped before the new one is stored. Frames for a
    /// surface that is gone are acknowledged as skipped straight away.
    pub fn submit_frame(
        &mut self,
        surface_id: SurfaceId,
        frame: CompositorFrame,
        callback: DrawCallback,
    ) -> SurfaceUpdates {
        let mut updates = SurfaceUpdates::default();
        let surface = match self.surfaces.get_mut(&surface_id) {
            Some(surface) if !surface.destroyed => surface,
            _ => {
                warn!("Frame submitted to missing surface {:?}", surface_id);
                updates.draws.push(CompletedDraw {
                    callback,
                    status: DrawStatus::Skipped,
                });
                return updates;
            }
        };

        let owner = surface.owner;
        for resource in frame.resources() {
            *self.resource_refs.entry((owner, resource.id)).or_insert(0) += 1;
        }
        let previous_frame = surface.current_frame.replace(frame);
        if let Some(previous) = surface.draw_callback.replace(callback) {
            updates.draws.push(CompletedDraw {
                callback: previous,
                status: DrawStatus::Skipped,
            });
        }
        if let Some(previous_frame) = previous_frame {
            let returned = self.unref_resources(owner, &previous_frame);
            updates.push_returned(owner, returned);
        }
        updates
    }

    /// The display compositor drew `surface_id`.
    pub fn surface_drawn(&mut self, surface_id: SurfaceId) -> SurfaceUpdates {
        let mut updates = SurfaceUpdates::default();
        if let Some(callback) = self
            .surfaces
            .get_mut(&surface_id)
            .and_then(|surface| surface.draw_callback.take())
        {
            updates.draws.push(CompletedDraw {
                callback,
                status: DrawStatus::Drawn,
            });
        }
        updates
    }

    /// Acknowledges the undrawn frame of `surface_id` as skipped. The frame
    /// and its resources stay with the surface until it is collected.
    pub fn skip_pending_draw(&mut self, surface_id: SurfaceId) -> SurfaceUpdates {
        let mut updates = SurfaceUpdates::default();
        if let Some(callback) = self
            .surfaces
            .get_mut(&surface_id)
            .and_then(|surface| surface.draw_callback.take())
        {
            trace!("Skipping undrawn frame of {:?}", surface_id);
            updates.draws.push(CompletedDraw {
                callback,
                status: DrawStatus::Skipped,
            });
        }
        updates
    }

    pub fn contains(&self, surface_id: SurfaceId) -> bool {
        self.surfaces.contains_key(&surface_id)
    }

    pub fn is_destroyed(&self, surface_id: SurfaceId) -> bool {
        self.surfaces
            .get(&surface_id)
            .is_none_or(|surface| surface.destroyed)
    }

    pub fn owner(&self, surface_id: SurfaceId) -> Option<FrameRoute> {
        self.surfaces.get(&surface_id).map(|surface| surface.owner)
    }

    /// Surfaces of `owner` that were not yet marked for destruction.
    pub fn live_surfaces_of(&self, owner: FrameRoute) -> Vec<SurfaceId> {
        let mut ids: Vec<SurfaceId> = self
            .surfaces
            .iter()
            .filter(|(_, surface)| surface.owner == owner && !surface.destroyed)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    fn unref_resources(
        &mut self,
        owner: FrameRoute,
        frame: &CompositorFrame,
    ) -> Vec<ReturnedResource> {
        let mut returned = Vec::new();
        for resource in frame.resources() {
            let key = (owner, resource.id);
            let Some(count) = self.resource_refs.get_mut(&key) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                self.resource_refs.remove(&key);
                returned.push(ReturnedResource {
                    id: resource.id,
                    count: 1,
                    lost: false,
                });
            }
        }
        returned
    }

    fn garbage_collect(&mut self) -> SurfaceUpdates {
        let mut updates = SurfaceUpdates::default();
        let satisfied = &mut self.satisfied_sequences;
        let valid = &self.valid_namespaces;

        let mut dead = Vec::new();
        for (id, surface) in self.surfaces.iter_mut() {
            if !surface.destroyed {
                continue;
            }
            surface.destruction_dependencies.retain(|sequence| {
                if satisfied.remove(sequence) {
                    return false;
                }
                valid.contains(&sequence.id_namespace)
            });
            if surface.destruction_dependencies.is_empty() {
                dead.push(*id);
            }
        }
        dead.sort();

        for id in dead {
            let Some(surface) = self.surfaces.remove(&id) else {
                continue;
            };
            debug!("Deleting surface {:?}", id);
            if let Some(callback) = surface.draw_callback {
                updates.draws.push(CompletedDraw {
                    callback,
                    status: DrawStatus::Skipped,
                });
            }
            if let Some(frame) = surface.current_frame {
                let returned = self.unref_resources(surface.owner, &frame);
                updates.push_returned(surface.owner, returned);
            }
        }
        updates
    }
}
