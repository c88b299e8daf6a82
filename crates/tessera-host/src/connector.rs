//! The embedder-side bridge of a cross-process child frame.
//!
//! A connector lives as long as its child frame is rendered by a process
//! other than its parent's. It knows where the embedding frame is and what
//! geometry it gave the child; the view currently rendering the child is
//! attached and detached through [`ChildFrames::set_view`].
//!
//! [`ChildFrames::set_view`]: crate::child_frames::ChildFrames::set_view

use crate::child_frames::ViewId;
use log::{debug, warn};
use tessera_compositing::{CompositorFrame, SurfaceId, SurfaceSequence};
use tessera_core::geometry::{Rect, ScreenInfo, Size};
use tessera_core::{FrameRoute, FrameTreeNodeId};
use tessera_ipc::{FrameMsg, InputEvent, KeyboardEvent, ProcessHost, WidgetInputEvent};

#[derive(Debug)]
pub struct FrameConnector {
    child: FrameTreeNodeId,
    embedder: FrameRoute,
    pub(crate) view: Option<ViewId>,
    child_frame_rect: Rect,
    device_scale_factor: f32,
    // The child's tree is itself embedded in an outer page.
    nested: bool,
}

impl FrameConnector {
    pub fn new(child: FrameTreeNodeId, embedder: FrameRoute, nested: bool) -> Self {
        Self {
            child,
            embedder,
            view: None,
            child_frame_rect: Rect::zero(),
            device_scale_factor: 1.0,
            nested,
        }
    }

    pub fn child(&self) -> FrameTreeNodeId {
        self.child
    }

    /// The parent frame drawing this child.
    pub fn embedder(&self) -> FrameRoute {
        self.embedder
    }

    pub fn view(&self) -> Option<ViewId> {
        self.view
    }

    pub fn child_frame_rect(&self) -> Rect {
        self.child_frame_rect
    }

    pub fn device_scale_factor(&self) -> f32 {
        self.device_scale_factor
    }

    pub fn is_nested(&self) -> bool {
        self.nested
    }

    /// Records new geometry. Returns whether anything changed.
    pub(crate) fn set_rect(&mut self, rect: Rect, scale_factor: f32) -> bool {
        let changed = self.child_frame_rect != rect || self.device_scale_factor != scale_factor;
        self.child_frame_rect = rect;
        self.device_scale_factor = scale_factor;
        changed
    }

    /// Tells the embedder that the child's renderer died, so it can draw the
    /// child as gone. The frame tree learns about the death separately.
    pub fn on_render_process_gone(&self, host: &dyn ProcessHost) {
        self.send_to_embedder(
            host,
            FrameMsg::ChildFrameProcessGone { child: self.child },
        );
    }

    /// Hands a whole frame produced by `source` to the embedder.
    pub fn on_child_surface_swapped(
        &self,
        output_surface_id: u32,
        source: FrameRoute,
        frame: CompositorFrame,
        host: &dyn ProcessHost,
    ) {
        self.send_to_embedder(
            host,
            FrameMsg::CompositorFrameSwapped {
                child: self.child,
                output_surface_id,
                source,
                frame,
            },
        );
    }

    /// Points the embedder at the surface now holding the child's content.
    /// The surface outlives its replacement until the embedder satisfies
    /// `sequence`.
    pub fn set_child_frame_surface(
        &self,
        surface_id: SurfaceId,
        frame_size: Size,
        scale_factor: f32,
        sequence: SurfaceSequence,
        host: &dyn ProcessHost,
    ) {
        self.send_to_embedder(
            host,
            FrameMsg::SetChildFrameSurface {
                child: self.child,
                surface_id,
                frame_size,
                scale_factor,
                sequence,
            },
        );
    }

    /// The screen the child is shown on, as reported by the embedder's view.
    /// Nested embedding is not supported: `None` leaves the caller's value as is.
    pub fn get_screen_info(&self, embedder_screen: &ScreenInfo) -> Option<ScreenInfo> {
        if self.nested {
            return None;
        }
        Some(embedder_screen.clone())
    }

    /// Turns an event the embedder forwarded into the event delivered to the
    /// child widget. Keyboard events replay `last_keyboard_event`, the last
    /// key event the embedder's widget handled.
    pub fn on_forward_input_event(
        &self,
        event: InputEvent,
        last_keyboard_event: Option<&KeyboardEvent>,
    ) -> Option<WidgetInputEvent> {
        self.view?;
        match event {
            InputEvent::Keyboard => match last_keyboard_event {
                Some(key) => Some(WidgetInputEvent::Keyboard(key.clone())),
                None => {
                    debug!("No keyboard event to forward to {}", self.child);
                    None
                }
            },
            InputEvent::Mouse(mouse) => Some(WidgetInputEvent::Mouse(mouse)),
            InputEvent::Wheel(wheel) => Some(WidgetInputEvent::Wheel(wheel)),
        }
    }

    fn send_to_embedder(&self, host: &dyn ProcessHost, message: FrameMsg) {
        if self.view.is_none() {
            debug!(
                "Dropping {} for {}: no view attached",
                message.name(),
                self.child
            );
            return;
        }
        if let Err(e) = host.send_to(self.embedder, message) {
            warn!("Could not reach embedder {} of {}: {}", self.embedder, self.child, e);
        }
    }
}
