//! The browser's view of a child frame rendered out of process.
//!
//! The child renderer's compositor submits frames here. In surface mode each
//! frame is queued on a surface the view owns, and the embedder is told which
//! surface to draw; otherwise frames are proxied whole to the embedder.
//! Acknowledgements go back to the child in submission order, carrying any
//! resources the display compositor returned in the meantime.

use crate::child_frames::ViewId;
use crate::connector::FrameConnector;
use log::{debug, error, trace, warn};
use tessera_compositing::{
    CompositingError, CompositorFrame, DrawCallback, ReturnedResource, SurfaceId,
    SurfaceIdAllocator, SurfaceManager, SurfaceSequence, SurfaceUpdates,
};
use tessera_core::config::CompositingConfig;
use tessera_core::geometry::{Rect, ScreenInfo, ScrollOffset, Size};
use tessera_core::{FrameRoute, FrameTreeNodeId};
use tessera_ipc::{FrameMsg, ProcessHost};

#[derive(Debug)]
pub struct ChildFrameSurfaceView {
    id: ViewId,
    widget: FrameRoute,
    pub(crate) connector: Option<FrameTreeNodeId>,
    // Cleared once the view is destroyed; nothing is sent to the widget after that.
    host_attached: bool,
    use_surfaces: bool,
    max_pending_acks: u32,

    id_allocator: SurfaceIdAllocator,
    surface_id: Option<SurfaceId>,
    next_surface_sequence: u32,
    last_output_surface_id: u32,
    current_surface_size: Size,
    current_surface_scale_factor: f32,
    ack_pending_count: u32,
    surface_returned_resources: Vec<ReturnedResource>,

    size: Size,
    scale_factor: f32,
    last_scroll_offset: ScrollOffset,
}

impl ChildFrameSurfaceView {
    pub fn new(
        id: ViewId,
        widget: FrameRoute,
        id_namespace: u32,
        config: &CompositingConfig,
    ) -> Self {
        Self {
            id,
            widget,
            connector: None,
            host_attached: true,
            use_surfaces: config.use_surfaces,
            max_pending_acks: config.max_pending_acks,
            id_allocator: SurfaceIdAllocator::new(id_namespace),
            surface_id: None,
            next_surface_sequence: 1,
            last_output_surface_id: 0,
            current_surface_size: Size::zero(),
            current_surface_scale_factor: 1.0,
            ack_pending_count: 0,
            surface_returned_resources: Vec::new(),
            size: Size::zero(),
            scale_factor: 1.0,
            last_scroll_offset: ScrollOffset::zero(),
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    /// The child frame's widget in the child renderer.
    pub fn widget(&self) -> FrameRoute {
        self.widget
    }

    pub fn connector(&self) -> Option<FrameTreeNodeId> {
        self.connector
    }

    pub fn id_namespace(&self) -> u32 {
        self.id_allocator.id_namespace()
    }

    pub fn surface_id(&self) -> Option<SurfaceId> {
        self.surface_id
    }

    pub fn ack_pending_count(&self) -> u32 {
        self.ack_pending_count
    }

    pub fn queued_resources(&self) -> &[ReturnedResource] {
        &self.surface_returned_resources
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    pub fn last_scroll_offset(&self) -> ScrollOffset {
        self.last_scroll_offset
    }

    pub fn is_destroyed(&self) -> bool {
        !self.host_attached
    }

    /// Applies geometry pushed by the connector and resizes the child widget.
    pub(crate) fn resize(&mut self, rect: Rect, scale_factor: f32, host: &dyn ProcessHost) {
        self.size = rect.size;
        self.scale_factor = scale_factor;
        self.send(host, FrameMsg::Resize { rect, scale_factor });
    }

    pub(crate) fn update_screen_info(&self, screen_info: ScreenInfo, host: &dyn ProcessHost) {
        self.send(host, FrameMsg::UpdateScreenInfo { screen_info });
    }

    pub(crate) fn forward_input(&self, message: FrameMsg, host: &dyn ProcessHost) {
        self.send(host, message);
    }

    /// A frame arrived from the child's compositor.
    pub fn on_swap_compositor_frame(
        &mut self,
        output_surface_id: u32,
        frame: CompositorFrame,
        connector: Option<&FrameConnector>,
        surfaces: &mut SurfaceManager,
        host: &dyn ProcessHost,
    ) -> Result<SurfaceUpdates, CompositingError> {
        self.last_scroll_offset = frame.metadata.root_scroll_offset;

        let Some(connector) = connector else {
            // Nobody would draw it; hand the resources straight back.
            debug!("{:?} is detached, dropping frame and surface", self.id);
            let updates = self.clear_compositor_surface(surfaces, host);
            let resources = frame
                .resources()
                .iter()
                .map(|resource| ReturnedResource {
                    id: resource.id,
                    count: 1,
                    lost: false,
                })
                .collect();
            self.send(
                host,
                FrameMsg::SwapCompositorFrameAck {
                    output_surface_id,
                    resources,
                },
            );
            return Ok(updates);
        };

        let root_size = frame.root_pass().map(|pass| pass.output_rect.size);
        let frame_size = match root_size {
            Some(size) if self.use_surfaces => size,
            _ => {
                connector.on_child_surface_swapped(output_surface_id, self.widget, frame, host);
                return Ok(SurfaceUpdates::default());
            }
        };
        let scale_factor = frame.metadata.device_scale_factor;

        let mut updates = SurfaceUpdates::default();
        if output_surface_id != self.last_output_surface_id
            || frame_size != self.current_surface_size
            || scale_factor != self.current_surface_scale_factor
        {
            updates.append(self.clear_compositor_surface(surfaces, host));
            self.last_output_surface_id = output_surface_id;
            self.current_surface_size = frame_size;
            self.current_surface_scale_factor = scale_factor;
        }

        let surface_id = match self.surface_id {
            Some(surface_id) => surface_id,
            None => {
                let surface_id = self.id_allocator.generate_id();
                surfaces.create_surface(self.widget, surface_id)?;
                // The embedder satisfies this once it draws the surface.
                let sequence = SurfaceSequence {
                    id_namespace: self.id_allocator.id_namespace(),
                    sequence: self.next_surface_sequence,
                };
                self.next_surface_sequence += 1;
                surfaces.require_sequence(surface_id, sequence)?;
                self.surface_id = Some(surface_id);
                connector.set_child_frame_surface(
                    surface_id,
                    frame_size,
                    scale_factor,
                    sequence,
                    host,
                );
                surface_id
            }
        };

        self.ack_pending_count += 1;
        if self.ack_pending_count >= self.max_pending_acks {
            error!(
                "{:?} has {} unacknowledged frames; the display compositor is not drawing them",
                self.id, self.ack_pending_count
            );
        }
        debug_assert!(self.ack_pending_count < self.max_pending_acks);

        trace!(
            "{:?} queued frame on {:?} (output surface {})",
            self.id, surface_id, output_surface_id
        );
        updates.append(surfaces.submit_frame(
            surface_id,
            frame,
            DrawCallback {
                client: self.widget,
                output_surface_id,
            },
        ));
        Ok(updates)
    }

    /// The frame submitted for `output_surface_id` was drawn or skipped.
    /// Acknowledgements nothing is waiting for are dropped.
    pub fn surface_drawn(&mut self, output_surface_id: u32, host: &dyn ProcessHost) {
        if self.ack_pending_count == 0 {
            warn!(
                "{:?} dropped a draw acknowledgement for output surface {} it was not waiting for",
                self.id, output_surface_id
            );
            return;
        }
        let resources = std::mem::take(&mut self.surface_returned_resources);
        self.send(
            host,
            FrameMsg::SwapCompositorFrameAck {
                output_surface_id,
                resources,
            },
        );
        self.ack_pending_count -= 1;
    }

    /// Resources the display compositor no longer uses. They ride on the next
    /// acknowledgement, or go out on their own when none is pending.
    pub fn return_resources(&mut self, resources: Vec<ReturnedResource>, host: &dyn ProcessHost) {
        if resources.is_empty() {
            return;
        }
        if self.ack_pending_count == 0 && self.host_attached {
            self.send(
                host,
                FrameMsg::ReclaimCompositorResources {
                    output_surface_id: self.last_output_surface_id,
                    resources,
                },
            );
            return;
        }
        self.surface_returned_resources.extend(resources);
    }

    /// Drops the current surface. The next frame allocates a new one.
    ///
    /// A frame still waiting on the old surface is acknowledged as skipped
    /// before this returns, so it is never acked after a later frame. The
    /// surface itself lives on until its destruction dependency is satisfied.
    pub fn clear_compositor_surface(
        &mut self,
        surfaces: &mut SurfaceManager,
        host: &dyn ProcessHost,
    ) -> SurfaceUpdates {
        let Some(surface_id) = self.surface_id.take() else {
            return SurfaceUpdates::default();
        };
        debug!("{:?} releasing {:?}", self.id, surface_id);
        self.current_surface_size = Size::zero();
        self.current_surface_scale_factor = 1.0;
        let mut updates = surfaces.skip_pending_draw(surface_id);
        updates.append(surfaces.destroy_surface(surface_id));
        self.apply_own_updates(updates, host)
    }

    /// The child's renderer died: nothing it submitted will be acknowledged.
    pub(crate) fn render_process_gone(
        &mut self,
        surfaces: &mut SurfaceManager,
        host: &dyn ProcessHost,
    ) -> SurfaceUpdates {
        self.host_attached = false;
        let updates = self.clear_compositor_surface(surfaces, host);
        self.ack_pending_count = 0;
        self.surface_returned_resources.clear();
        updates
    }

    // Handles the part of `updates` addressed to this view and hands back the rest.
    fn apply_own_updates(
        &mut self,
        updates: SurfaceUpdates,
        host: &dyn ProcessHost,
    ) -> SurfaceUpdates {
        let mut rest = SurfaceUpdates::default();
        for (owner, resources) in updates.returned {
            if owner == self.widget {
                self.return_resources(resources, host);
            } else {
                rest.returned.push((owner, resources));
            }
        }
        for draw in updates.draws {
            if draw.callback.client == self.widget {
                self.surface_drawn(draw.callback.output_surface_id, host);
            } else {
                rest.draws.push(draw);
            }
        }
        rest
    }

    /// Detaches from the widget; the view is deleted later.
    pub(crate) fn detach_host(&mut self) {
        self.host_attached = false;
    }

    fn send(&self, host: &dyn ProcessHost, message: FrameMsg) {
        if !self.host_attached {
            trace!("{:?} is destroyed, not sending {}", self.id, message.name());
            return;
        }
        if let Err(e) = host.send_to(self.widget, message) {
            warn!("Could not reach child widget {}: {}", self.widget, e);
        }
    }
}
