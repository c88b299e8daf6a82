//! Owner of every frame connector and child frame view of the browser, and
//! of the surface manager they submit to.
//!
//! Connectors and views reference each other by id only. The pairing is
//! changed exclusively through [`ChildFrames::set_view`], which detaches the
//! previous partners before attaching new ones.

use crate::child_frame_view::ChildFrameSurfaceView;
use crate::connector::FrameConnector;
use crate::error::HostError;
use log::{debug, info, warn};
use std::collections::HashMap;
use tessera_compositing::{
    CompositorFrame, DrawStatus, ReturnedResource, SurfaceId, SurfaceManager, SurfaceSequence,
    SurfaceUpdates,
};
use tessera_core::config::CompositingConfig;
use tessera_core::geometry::{Rect, ScreenInfo};
use tessera_core::{FrameRoute, FrameTreeNodeId, ProcessId};
use tessera_ipc::{FrameMsg, InputEvent, KeyboardEvent, ProcessHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u32);

pub struct ChildFrames {
    config: CompositingConfig,
    next_view_id: u32,
    next_id_namespace: u32,
    connectors: HashMap<FrameTreeNodeId, FrameConnector>,
    views: HashMap<ViewId, ChildFrameSurfaceView>,
    views_by_widget: HashMap<FrameRoute, ViewId>,
    // Destroyed views, deleted on the next collection pass.
    pending_deletion: Vec<ViewId>,
    surfaces: SurfaceManager,
}

impl ChildFrames {
    pub fn new(config: &CompositingConfig) -> Self {
        Self {
            config: config.clone(),
            next_view_id: 1,
            next_id_namespace: config.surface_namespace_base.max(1),
            connectors: HashMap::new(),
            views: HashMap::new(),
            views_by_widget: HashMap::new(),
            pending_deletion: Vec::new(),
            surfaces: SurfaceManager::new(),
        }
    }

    pub fn connector(&self, child: FrameTreeNodeId) -> Option<&FrameConnector> {
        self.connectors.get(&child)
    }

    pub fn view(&self, id: ViewId) -> Option<&ChildFrameSurfaceView> {
        self.views.get(&id)
    }

    pub fn view_for_widget(&self, widget: FrameRoute) -> Option<&ChildFrameSurfaceView> {
        self.views_by_widget
            .get(&widget)
            .and_then(|id| self.views.get(id))
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    /// Views still alive, including destroyed ones awaiting deletion.
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn surfaces(&self) -> &SurfaceManager {
        &self.surfaces
    }

    /// Creates the connector of a child frame embedded by `embedder`. An
    /// existing connector for the child is kept, with its geometry.
    pub fn create_connector(
        &mut self,
        child: FrameTreeNodeId,
        embedder: FrameRoute,
        nested: bool,
    ) -> &FrameConnector {
        self.connectors.entry(child).or_insert_with(|| {
            debug!("Creating connector for {} embedded by {}", child, embedder);
            FrameConnector::new(child, embedder, nested)
        })
    }

    /// Drops the connector of `child`; its view is destroyed with it.
    pub fn remove_connector(&mut self, child: FrameTreeNodeId, host: &dyn ProcessHost) {
        let view = self.connectors.get(&child).and_then(FrameConnector::view);
        if let Some(view) = view {
            self.destroy_view(view, host);
        }
        if self.connectors.remove(&child).is_some() {
            debug!("Removed connector for {}", child);
        }
    }

    /// Creates a view for the child frame widget at `widget`, with its own
    /// surface id namespace.
    pub fn create_view(&mut self, widget: FrameRoute) -> ViewId {
        let id = ViewId(self.next_view_id);
        self.next_view_id += 1;
        let id_namespace = self.next_id_namespace;
        self.next_id_namespace += 1;

        self.surfaces.register_namespace(id_namespace);
        if let Some(previous) = self.views_by_widget.insert(widget, id) {
            warn!("{} had view {:?}, replacing it with {:?}", widget, previous, id);
        }
        self.views.insert(
            id,
            ChildFrameSurfaceView::new(id, widget, id_namespace, &self.config),
        );
        info!("Created {:?} for {} (namespace {})", id, widget, id_namespace);
        id
    }

    /// Pairs the connector of `child` with `view`, or unpairs it.
    ///
    /// The connector's current view and the new view's current connector are
    /// detached first. The newly attached view immediately receives the
    /// connector's geometry and, unless nested, the embedder's screen info.
    pub fn set_view(
        &mut self,
        child: FrameTreeNodeId,
        view: Option<ViewId>,
        screen_info: &ScreenInfo,
        host: &dyn ProcessHost,
    ) -> Result<(), HostError> {
        if !self.connectors.contains_key(&child) {
            return Err(HostError::UnknownConnector(child));
        }
        if let Some(view) = view {
            if !self.views.get(&view).is_some_and(|v| !v.is_destroyed()) {
                return Err(HostError::UnknownView(view));
            }
        }

        let previous = self.connectors.get_mut(&child).and_then(|c| c.view.take());
        if let Some(previous) = previous {
            self.detach_view(previous, host);
        }
        let Some(view_id) = view else {
            return Ok(());
        };
        let other = self.views.get(&view_id).and_then(ChildFrameSurfaceView::connector);
        if let Some(other) = other {
            if let Some(connector) = self.connectors.get_mut(&other) {
                connector.view = None;
            }
            self.detach_view(view_id, host);
        }

        let (Some(connector), Some(view)) =
            (self.connectors.get_mut(&child), self.views.get_mut(&view_id))
        else {
            return Ok(());
        };
        connector.view = Some(view_id);
        view.connector = Some(child);
        debug!("Attached {:?} to connector of {}", view_id, child);

        view.resize(
            connector.child_frame_rect(),
            connector.device_scale_factor(),
            host,
        );
        if let Some(screen_info) = connector.get_screen_info(screen_info) {
            view.update_screen_info(screen_info, host);
        }
        Ok(())
    }

    // Clears the view's side of a pairing. Its surface belonged to the old
    // embedder, so the next frame starts a new one.
    fn detach_view(&mut self, view_id: ViewId, host: &dyn ProcessHost) {
        let Some(view) = self.views.get_mut(&view_id) else {
            return;
        };
        view.connector = None;
        let updates = view.clear_compositor_surface(&mut self.surfaces, host);
        self.route_updates(updates, host);
    }

    /// New geometry from the embedder, pushed to the attached view.
    pub fn frame_rect_changed(
        &mut self,
        child: FrameTreeNodeId,
        rect: Rect,
        scale_factor: f32,
        host: &dyn ProcessHost,
    ) -> Result<(), HostError> {
        let connector = self
            .connectors
            .get_mut(&child)
            .ok_or(HostError::UnknownConnector(child))?;
        connector.set_rect(rect, scale_factor);
        if let Some(view) = connector.view.and_then(|id| self.views.get_mut(&id)) {
            view.resize(rect, scale_factor, host);
        }
        Ok(())
    }

    /// Pushes new screen info to every attached view of `children`.
    pub fn screen_info_changed(
        &self,
        children: &[FrameTreeNodeId],
        screen_info: &ScreenInfo,
        host: &dyn ProcessHost,
    ) {
        for child in children {
            let Some(connector) = self.connectors.get(child) else {
                continue;
            };
            let Some(view) = connector.view.and_then(|id| self.views.get(&id)) else {
                continue;
            };
            if let Some(screen_info) = connector.get_screen_info(screen_info) {
                view.update_screen_info(screen_info, host);
            }
        }
    }

    /// Forwards an input event from the embedder to the child widget.
    pub fn forward_input_event(
        &self,
        child: FrameTreeNodeId,
        event: InputEvent,
        last_keyboard_event: Option<&KeyboardEvent>,
        host: &dyn ProcessHost,
    ) -> Result<(), HostError> {
        let connector = self
            .connectors
            .get(&child)
            .ok_or(HostError::UnknownConnector(child))?;
        let Some(event) = connector.on_forward_input_event(event, last_keyboard_event) else {
            return Ok(());
        };
        if let Some(view) = connector.view.and_then(|id| self.views.get(&id)) {
            view.forward_input(FrameMsg::InputEvent { event }, host);
        }
        Ok(())
    }

    /// A compositor frame from the child widget at `widget`.
    pub fn swap_compositor_frame(
        &mut self,
        widget: FrameRoute,
        output_surface_id: u32,
        frame: CompositorFrame,
        host: &dyn ProcessHost,
    ) -> Result<(), HostError> {
        let view_id = *self
            .views_by_widget
            .get(&widget)
            .ok_or(HostError::UnknownRoute(widget))?;
        let view = self
            .views
            .get_mut(&view_id)
            .ok_or(HostError::UnknownView(view_id))?;
        let connector = view.connector.and_then(|child| self.connectors.get(&child));
        let updates =
            view.on_swap_compositor_frame(output_surface_id, frame, connector, &mut self.surfaces, host)?;
        self.route_updates(updates, host);
        Ok(())
    }

    /// The display compositor drew `surface_id`.
    pub fn surface_drawn(&mut self, surface_id: SurfaceId, host: &dyn ProcessHost) {
        let updates = self.surfaces.surface_drawn(surface_id);
        self.route_updates(updates, host);
    }

    pub fn require_sequence(
        &mut self,
        surface_id: SurfaceId,
        sequence: SurfaceSequence,
    ) -> Result<(), HostError> {
        self.surfaces.require_sequence(surface_id, sequence)?;
        Ok(())
    }

    pub fn satisfy_sequence(
        &mut self,
        sequence: SurfaceSequence,
        host: &dyn ProcessHost,
    ) -> Result<(), HostError> {
        let updates = self.surfaces.satisfy_sequence(sequence)?;
        self.route_updates(updates, host);
        Ok(())
    }

    /// Tears a view down: it leaves its connector and its widget now and is
    /// deleted on the next [`collect_destroyed_views`] pass.
    ///
    /// [`collect_destroyed_views`]: ChildFrames::collect_destroyed_views
    pub fn destroy_view(&mut self, view_id: ViewId, host: &dyn ProcessHost) -> bool {
        if self.pending_deletion.contains(&view_id) {
            return false;
        }
        let Some(connector) = self.views.get(&view_id).map(ChildFrameSurfaceView::connector) else {
            return false;
        };
        if let Some(connector) = connector.and_then(|child| self.connectors.get_mut(&child)) {
            connector.view = None;
        }
        self.detach_view(view_id, host);

        if let Some(view) = self.views.get_mut(&view_id) {
            view.detach_host();
            let widget = view.widget();
            if self.views_by_widget.get(&widget) == Some(&view_id) {
                self.views_by_widget.remove(&widget);
            }
        }
        self.pending_deletion.push(view_id);
        debug!("Destroyed {:?}, deletion pending", view_id);
        true
    }

    pub fn has_pending_deletions(&self) -> bool {
        !self.pending_deletion.is_empty()
    }

    /// Deletes views destroyed since the last pass. Their surface namespaces
    /// are invalidated, so surfaces only they could release are collected.
    pub fn collect_destroyed_views(&mut self, host: &dyn ProcessHost) -> usize {
        let pending = std::mem::take(&mut self.pending_deletion);
        let mut deleted = 0;
        for view_id in pending {
            let Some(view) = self.views.remove(&view_id) else {
                continue;
            };
            let updates = self.surfaces.invalidate_namespace(view.id_namespace());
            self.route_updates(updates, host);
            deleted += 1;
        }
        if deleted > 0 {
            debug!("Deleted {} child frame views", deleted);
        }
        deleted
    }

    /// The renderer `process_id` died. Embedders of children it rendered are
    /// told, its views are torn down with their surfaces and pending acks,
    /// and connectors whose embedder lived there are dropped.
    pub fn render_process_gone(&mut self, process_id: ProcessId, host: &dyn ProcessHost) {
        let mut dead_views: Vec<ViewId> = self
            .views
            .values()
            .filter(|view| view.widget().process_id == process_id && !view.is_destroyed())
            .map(ChildFrameSurfaceView::id)
            .collect();
        dead_views.sort();

        for view_id in dead_views {
            let child = self.views.get(&view_id).and_then(ChildFrameSurfaceView::connector);
            if let Some(connector) = child.and_then(|child| self.connectors.get(&child)) {
                connector.on_render_process_gone(host);
            }
            if let Some(view) = self.views.get_mut(&view_id) {
                let updates = view.render_process_gone(&mut self.surfaces, host);
                self.route_updates(updates, host);
            }
            self.destroy_view(view_id, host);
        }

        let mut orphaned: Vec<FrameTreeNodeId> = self
            .connectors
            .values()
            .filter(|connector| connector.embedder().process_id == process_id)
            .map(FrameConnector::child)
            .collect();
        orphaned.sort();
        for child in orphaned {
            self.remove_connector(child, host);
        }
    }

    /// Sends draw acknowledgements and returned resources to the views they
    /// belong to: resources first, so they ride on the acknowledgements.
    fn route_updates(&mut self, updates: SurfaceUpdates, host: &dyn ProcessHost) {
        for (owner, resources) in updates.returned {
            self.return_resources(owner, resources, host);
        }
        for draw in updates.draws {
            let Some(view) = self
                .views_by_widget
                .get(&draw.callback.client)
                .and_then(|id| self.views.get_mut(id))
            else {
                continue;
            };
            if draw.status == DrawStatus::Skipped {
                debug!(
                    "Frame of {} for output surface {} was skipped",
                    draw.callback.client, draw.callback.output_surface_id
                );
            }
            view.surface_drawn(draw.callback.output_surface_id, host);
        }
    }

    fn return_resources(
        &mut self,
        owner: FrameRoute,
        resources: Vec<ReturnedResource>,
        host: &dyn ProcessHost,
    ) {
        match self
            .views_by_widget
            .get(&owner)
            .and_then(|id| self.views.get_mut(id))
        {
            Some(view) => view.return_resources(resources, host),
            None => debug!(
                "Dropping {} returned resources of deleted view at {}",
                resources.len(),
                owner
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingHost;
    use tessera_core::geometry::Size;
    use tessera_core::RoutingId;

    const CHILD: FrameTreeNodeId = FrameTreeNodeId(2);

    fn embedder() -> FrameRoute {
        FrameRoute::new(ProcessId(1), RoutingId(1))
    }

    fn widget(routing_id: i32) -> FrameRoute {
        FrameRoute::new(ProcessId(2), RoutingId(routing_id))
    }

    fn setup() -> (ChildFrames, RecordingHost) {
        let mut frames = ChildFrames::new(&CompositingConfig::default());
        frames.create_connector(CHILD, embedder(), false);
        (frames, RecordingHost::default())
    }

    fn frame() -> CompositorFrame {
        CompositorFrame::with_root_pass(Size::new(30, 20), 1.0)
    }

    #[test]
    fn reattaching_moves_the_pairing_and_pushes_geometry() {
        let (mut frames, host) = setup();
        let rect = Rect::new(tessera_core::geometry::Point::new(4, 8), Size::new(30, 20));
        frames.frame_rect_changed(CHILD, rect, 2.0, &host).unwrap();
        assert!(host.take().is_empty());

        let v1 = frames.create_view(widget(5));
        let v2 = frames.create_view(widget(6));
        frames.set_view(CHILD, Some(v1), &ScreenInfo::default(), &host).unwrap();
        frames.set_view(CHILD, Some(v2), &ScreenInfo::default(), &host).unwrap();

        assert_eq!(frames.view(v1).unwrap().connector(), None);
        assert_eq!(frames.view(v2).unwrap().connector(), Some(CHILD));
        assert_eq!(frames.connector(CHILD).unwrap().view(), Some(v2));

        let sent = host.take();
        let resize = FrameMsg::Resize {
            rect,
            scale_factor: 2.0,
        };
        assert!(sent.contains(&(widget(5), resize.clone())));
        assert!(sent.contains(&(widget(6), resize)));
        assert_eq!(frames.view(v2).unwrap().size(), Size::new(30, 20));
        assert_eq!(frames.view(v2).unwrap().scale_factor(), 2.0);
    }

    #[test]
    fn geometry_updates_reach_the_attached_view() {
        let (mut frames, host) = setup();
        let view = frames.create_view(widget(5));
        frames.set_view(CHILD, Some(view), &ScreenInfo::default(), &host).unwrap();
        host.take();

        let rect = Rect::from_size(Size::new(64, 48));
        frames.frame_rect_changed(CHILD, rect, 1.5, &host).unwrap();
        assert_eq!(
            host.take(),
            vec![(widget(5), FrameMsg::Resize { rect, scale_factor: 1.5 })]
        );
        assert!(matches!(
            frames.frame_rect_changed(FrameTreeNodeId(9), rect, 1.0, &host),
            Err(HostError::UnknownConnector(_))
        ));
    }

    #[test]
    fn a_view_moving_to_another_connector_leaves_the_first() {
        let (mut frames, host) = setup();
        let other = FrameTreeNodeId(3);
        frames.create_connector(other, embedder(), false);
        let view = frames.create_view(widget(5));
        frames.set_view(CHILD, Some(view), &ScreenInfo::default(), &host).unwrap();
        frames.set_view(other, Some(view), &ScreenInfo::default(), &host).unwrap();

        assert_eq!(frames.connector(CHILD).unwrap().view(), None);
        assert_eq!(frames.connector(other).unwrap().view(), Some(view));
        assert_eq!(frames.view(view).unwrap().connector(), Some(other));
    }

    #[test]
    fn reattaching_forces_a_new_surface() {
        let (mut frames, host) = setup();
        let view = frames.create_view(widget(5));
        frames.set_view(CHILD, Some(view), &ScreenInfo::default(), &host).unwrap();
        frames.swap_compositor_frame(widget(5), 1, frame(), &host).unwrap();
        let first = frames.view(view).unwrap().surface_id().unwrap();

        frames.set_view(CHILD, None, &ScreenInfo::default(), &host).unwrap();
        assert_eq!(frames.view(view).unwrap().surface_id(), None);
        frames.set_view(CHILD, Some(view), &ScreenInfo::default(), &host).unwrap();
        frames.swap_compositor_frame(widget(5), 1, frame(), &host).unwrap();
        let second = frames.view(view).unwrap().surface_id().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn drawing_a_surface_acks_the_child() {
        let (mut frames, host) = setup();
        let view = frames.create_view(widget(5));
        frames.set_view(CHILD, Some(view), &ScreenInfo::default(), &host).unwrap();
        frames.swap_compositor_frame(widget(5), 3, frame(), &host).unwrap();
        let surface = frames.view(view).unwrap().surface_id().unwrap();
        host.take();

        frames.surface_drawn(surface, &host);
        assert_eq!(
            host.take(),
            vec![(
                widget(5),
                FrameMsg::SwapCompositorFrameAck {
                    output_surface_id: 3,
                    resources: Vec::new()
                }
            )]
        );
        assert_eq!(frames.view(view).unwrap().ack_pending_count(), 0);
    }

    #[test]
    fn replaced_frames_are_acked_in_submission_order() {
        let (mut frames, host) = setup();
        let view = frames.create_view(widget(5));
        frames.set_view(CHILD, Some(view), &ScreenInfo::default(), &host).unwrap();
        frames.swap_compositor_frame(widget(5), 3, frame(), &host).unwrap();
        frames.swap_compositor_frame(widget(5), 3, frame(), &host).unwrap();

        let acks: Vec<_> = host
            .take()
            .into_iter()
            .filter(|(_, msg)| matches!(msg, FrameMsg::SwapCompositorFrameAck { .. }))
            .collect();
        // The first frame was replaced before being drawn.
        assert_eq!(acks.len(), 1);
        assert_eq!(frames.view(view).unwrap().ack_pending_count(), 1);
    }

    #[test]
    fn a_new_output_surface_keeps_acks_in_submission_order() {
        let (mut frames, host) = setup();
        let view = frames.create_view(widget(5));
        frames.set_view(CHILD, Some(view), &ScreenInfo::default(), &host).unwrap();
        frames.swap_compositor_frame(widget(5), 5, frame(), &host).unwrap();
        let old_surface = frames.view(view).unwrap().surface_id().unwrap();
        frames.swap_compositor_frame(widget(5), 6, frame(), &host).unwrap();
        let new_surface = frames.view(view).unwrap().surface_id().unwrap();
        assert_ne!(old_surface, new_surface);

        frames.surface_drawn(new_surface, &host);
        let acks: Vec<u32> = host
            .take()
            .into_iter()
            .filter_map(|(_, msg)| match msg {
                FrameMsg::SwapCompositorFrameAck {
                    output_surface_id, ..
                } => Some(output_surface_id),
                _ => None,
            })
            .collect();
        assert_eq!(acks, vec![5, 6]);
        assert_eq!(frames.view(view).unwrap().ack_pending_count(), 0);
        // The old surface is still held by the embedder's destruction dependency.
        assert!(frames.surfaces().contains(old_surface));
        assert!(frames.surfaces().is_destroyed(old_surface));
    }

    #[test]
    fn unknown_widgets_are_ignored() {
        let (mut frames, host) = setup();
        assert!(matches!(
            frames.swap_compositor_frame(widget(77), 1, frame(), &host),
            Err(HostError::UnknownRoute(_))
        ));
        assert!(matches!(
            frames.set_view(CHILD, Some(ViewId(42)), &ScreenInfo::default(), &host),
            Err(HostError::UnknownView(ViewId(42)))
        ));
    }

    #[test]
    fn destroyed_views_are_deleted_on_the_next_pass() {
        let (mut frames, host) = setup();
        let view = frames.create_view(widget(5));
        frames.set_view(CHILD, Some(view), &ScreenInfo::default(), &host).unwrap();
        frames.swap_compositor_frame(widget(5), 1, frame(), &host).unwrap();
        let surface = frames.view(view).unwrap().surface_id().unwrap();

        assert!(frames.destroy_view(view, &host));
        assert!(!frames.destroy_view(view, &host));
        assert_eq!(frames.connector(CHILD).unwrap().view(), None);
        assert!(frames.view(view).unwrap().is_destroyed());
        assert!(frames.view_for_widget(widget(5)).is_none());
        assert!(frames.surfaces().contains(surface));

        assert_eq!(frames.collect_destroyed_views(&host), 1);
        assert!(frames.view(view).is_none());
        // Only the dead view could have released the surface.
        assert!(!frames.surfaces().contains(surface));
        assert!(!frames.has_pending_deletions());
    }

    #[test]
    fn process_death_notifies_the_embedder_and_drops_the_view() {
        let (mut frames, host) = setup();
        let view = frames.create_view(widget(5));
        frames.set_view(CHILD, Some(view), &ScreenInfo::default(), &host).unwrap();
        frames.swap_compositor_frame(widget(5), 1, frame(), &host).unwrap();
        host.take();

        frames.render_process_gone(ProcessId(2), &host);
        assert_eq!(
            host.take(),
            vec![(embedder(), FrameMsg::ChildFrameProcessGone { child: CHILD })]
        );
        let dead = frames.view(view).unwrap();
        assert!(dead.is_destroyed());
        assert_eq!(dead.ack_pending_count(), 0);
        assert_eq!(dead.surface_id(), None);
        assert_eq!(frames.connector(CHILD).unwrap().view(), None);
    }

    #[test]
    fn embedder_death_drops_its_connectors() {
        let (mut frames, host) = setup();
        let view = frames.create_view(widget(5));
        frames.set_view(CHILD, Some(view), &ScreenInfo::default(), &host).unwrap();

        frames.render_process_gone(ProcessId(1), &host);
        assert!(frames.connector(CHILD).is_none());
        assert!(frames.view(view).unwrap().is_destroyed());
    }

    #[test]
    fn nested_connectors_do_not_push_screen_info() {
        let mut frames = ChildFrames::new(&CompositingConfig::default());
        let host = RecordingHost::default();
        frames.create_connector(CHILD, embedder(), true);
        let view = frames.create_view(widget(5));
        frames.set_view(CHILD, Some(view), &ScreenInfo::default(), &host).unwrap();
        assert!(
            !host
                .take()
                .iter()
                .any(|(_, msg)| matches!(msg, FrameMsg::UpdateScreenInfo { .. }))
        );
    }
}
