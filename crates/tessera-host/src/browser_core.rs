//! The browser's main sequence.
//!
//! `BrowserCore` owns every frame tree, frame connector and child frame view.
//! Frame messages reach it from the router already decoded; everything it
//! sends goes out through the [`ProcessHost`]. Tree notifications are queued
//! by the tree delegate while the trees are being mutated and handled once
//! the mutation returned.

use crate::bad_message::BadMessage;
use crate::child_frame_view::ChildFrameSurfaceView;
use crate::child_frames::ChildFrames;
use crate::error::HostError;
use crate::messages::*;
use actix::prelude::*;
use log::{debug, error, info, trace, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tessera_core::geometry::ScreenInfo;
use tessera_core::{
    Config, ErrorClass, FrameRoute, FrameTreeError, FrameTreeNodeId, ProcessId,
};
use tessera_frame_tree::{
    FrameReplicationState, FrameTree, FrameTreeDelegate, FrameTreeId, FrameTreeNode, FrameTrees,
    NavigationRequest,
};
use tessera_ipc::{FrameHostMsg, FrameMsg, KeyboardEvent, OutgoingMessage, ProcessHost};

enum CoreEvent {
    ProxyNeeded {
        node: FrameTreeNodeId,
        parent: Option<FrameTreeNodeId>,
        replication_state: FrameReplicationState,
        process_id: ProcessId,
    },
    FrameRemoved {
        tree: FrameTreeId,
        node: FrameTreeNodeId,
        route: FrameRoute,
    },
    CleanUpNavigation {
        node: FrameTreeNodeId,
        speculative_route: Option<FrameRoute>,
    },
    Published(TreeEvent),
}

// Shared by every tree; callbacks only record what happened.
#[derive(Default)]
struct CoreDelegate {
    queue: RefCell<Vec<CoreEvent>>,
}

impl CoreDelegate {
    fn push(&self, event: CoreEvent) {
        self.queue.borrow_mut().push(event);
    }

    fn take(&self) -> Vec<CoreEvent> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }
}

impl FrameTreeDelegate for CoreDelegate {
    fn did_start_loading(&self, tree: &FrameTree, node: FrameTreeNodeId, to_different_document: bool) {
        self.push(CoreEvent::Published(TreeEvent::LoadingStarted {
            tree: tree.id(),
            node,
            to_different_document,
        }));
    }

    fn did_stop_loading(&self, tree: &FrameTree) {
        self.push(CoreEvent::Published(TreeEvent::LoadingStopped { tree: tree.id() }));
    }

    fn did_change_load_progress(&self, tree: &FrameTree, progress: f64) {
        self.push(CoreEvent::Published(TreeEvent::LoadProgressChanged {
            tree: tree.id(),
            progress,
        }));
    }

    fn frame_removed(&self, tree: &FrameTree, node: &FrameTreeNode) {
        self.push(CoreEvent::FrameRemoved {
            tree: tree.id(),
            node: node.id(),
            route: node.route(),
        });
    }

    fn create_proxy(&self, tree: &FrameTree, node: FrameTreeNodeId, process_id: ProcessId) {
        let Some(frame) = tree.node(node) else {
            return;
        };
        self.push(CoreEvent::ProxyNeeded {
            node,
            parent: frame.parent(),
            replication_state: frame.replication_state().clone(),
            process_id,
        });
    }

    fn clean_up_navigation(&self, _tree: &FrameTree, node: FrameTreeNodeId, request: &NavigationRequest) {
        self.push(CoreEvent::CleanUpNavigation {
            node,
            speculative_route: request.speculative_route,
        });
    }

    fn opener_cleared(&self, tree: &FrameTree, node: FrameTreeNodeId) {
        self.push(CoreEvent::Published(TreeEvent::OpenerCleared {
            tree: tree.id(),
            node,
        }));
    }
}

#[derive(Debug, Default)]
struct TreeInfo {
    screen_info: ScreenInfo,
    embedded: bool,
}

pub struct BrowserCore {
    config: Config,
    host: Arc<dyn ProcessHost>,
    bad_messages: Recipient<BadMessage>,
    frame_trees: FrameTrees,
    child_frames: ChildFrames,
    delegate: Rc<CoreDelegate>,
    trees: HashMap<FrameTreeId, TreeInfo>,
    // Last key event each widget handled, replayed into its children.
    last_keyboard_events: HashMap<FrameRoute, KeyboardEvent>,
    observers: Vec<Recipient<TreeEvent>>,
    collection_scheduled: bool,
}

impl BrowserCore {
    pub fn new(
        config: &Config,
        host: Arc<dyn ProcessHost>,
        bad_messages: Recipient<BadMessage>,
    ) -> Self {
        Self {
            config: config.clone(),
            host,
            bad_messages,
            frame_trees: FrameTrees::new(&config.frame_tree),
            child_frames: ChildFrames::new(&config.compositing),
            delegate: Rc::new(CoreDelegate::default()),
            trees: HashMap::new(),
            last_keyboard_events: HashMap::new(),
            observers: Vec::new(),
            collection_scheduled: false,
        }
    }

    fn dispatch(&mut self, msg: RouteFrameMessage) -> Result<(), HostError> {
        let sender = msg.sender();
        let host = self.host.clone();
        match msg.message {
            FrameHostMsg::SwapCompositorFrame {
                output_surface_id,
                frame,
            } => self
                .child_frames
                .swap_compositor_frame(sender, output_surface_id, frame, &*host),
            FrameHostMsg::KeyboardEvent { event } => {
                self.last_keyboard_events.insert(sender, event);
                Ok(())
            }
            FrameHostMsg::SatisfySequence { sequence } => {
                self.child_frames.satisfy_sequence(sequence, &*host)
            }
            FrameHostMsg::RequireSequence {
                surface_id,
                sequence,
            } => self.child_frames.require_sequence(surface_id, sequence),
            FrameHostMsg::FrameRectChanged {
                child,
                rect,
                scale_factor,
            } => {
                self.check_embedder(sender, child)?;
                self.child_frames
                    .frame_rect_changed(child, rect, scale_factor, &*host)
            }
            FrameHostMsg::ForwardInputEvent { child, event } => {
                self.check_embedder(sender, child)?;
                let last = self.last_keyboard_events.get(&sender);
                self.child_frames
                    .forward_input_event(child, event, last, &*host)
            }
            message @ (FrameHostMsg::AllocateSharedBitmap { .. }
            | FrameHostMsg::AllocatedSharedBitmap { .. }
            | FrameHostMsg::DeletedSharedBitmap { .. }) => {
                warn!("{} from {} bypassed the router", message.name(), sender);
                Ok(())
            }
            message => {
                let node = self
                    .frame_trees
                    .find_by_route(sender)
                    .ok_or(HostError::UnknownRoute(sender))?;
                self.dispatch_to_node(node, sender, msg.request_id, message)
            }
        }
    }

    fn dispatch_to_node(
        &mut self,
        node: FrameTreeNodeId,
        sender: FrameRoute,
        request_id: Option<u64>,
        message: FrameHostMsg,
    ) -> Result<(), HostError> {
        match message {
            FrameHostMsg::CreateChildFrame {
                new_routing_id,
                name,
                scope,
                sandbox_flags,
            } => {
                let request_id =
                    request_id.ok_or(HostError::MissingRequestId("CreateChildFrame"))?;
                let replication_state = FrameReplicationState {
                    scope,
                    name,
                    sandbox_flags,
                    origin: None,
                };
                let child = self.frame_trees.create_child(
                    node,
                    sender.process_id,
                    new_routing_id,
                    replication_state,
                )?;
                let reply = OutgoingMessage::new(
                    sender.routing_id,
                    FrameMsg::ChildFrameCreated {
                        frame_tree_node_id: child,
                    },
                )
                .reply_to(Some(request_id));
                self.host.send(sender.process_id, reply)?;
            }
            FrameHostMsg::FrameDetached => self.frame_trees.detach_frame(node)?,
            FrameHostMsg::DidStartLoading {
                to_different_document,
            } => self
                .frame_trees
                .did_start_loading(node, to_different_document)?,
            FrameHostMsg::DidStopLoading => self.frame_trees.did_stop_loading(node)?,
            FrameHostMsg::DidChangeLoadProgress { progress } => {
                self.frame_trees.did_change_load_progress(node, progress)?
            }
            FrameHostMsg::BeginNavigation { url } => self
                .frame_trees
                .created_navigation_request(node, NavigationRequest::new(url))?,
            FrameHostMsg::DidCommitNavigation { url } => {
                if self.frame_trees.did_commit_navigation(node, url)? {
                    debug!("{} now enforces new sandbox flags", node);
                }
            }
            FrameHostMsg::DidFailNavigation { error_code } => {
                debug!("Navigation of {} failed ({})", node, error_code);
                self.frame_trees.reset_navigation_request(node, false)?;
            }
            FrameHostMsg::DidChangeName { name } => self.frame_trees.set_frame_name(node, name)?,
            FrameHostMsg::DidChangeOpener { opener } => self.frame_trees.set_opener(node, opener)?,
            FrameHostMsg::DidSetSandboxFlags { child, flags } => self
                .frame_trees
                .set_child_sandbox_flags(node, child, flags)?,
            other => warn!("No handler for {} from {}", other.name(), sender),
        }
        Ok(())
    }

    // Only the frame embedding `child` may report its geometry or forward it input.
    fn check_embedder(&self, sender: FrameRoute, child: FrameTreeNodeId) -> Result<(), HostError> {
        let parent = self
            .frame_trees
            .globally_find_by_id(child)
            .ok_or(FrameTreeError::NodeNotFound(child))?
            .parent();
        match (parent, self.frame_trees.find_by_route(sender)) {
            (Some(parent), Some(sender_node)) if parent == sender_node => Ok(()),
            _ => Err(HostError::NotEmbedder { sender, child }),
        }
    }

    fn transfer_frame(
        &mut self,
        node: FrameTreeNodeId,
        new_route: FrameRoute,
    ) -> Result<(), HostError> {
        let host = self.host.clone();
        let tree_id = self
            .frame_trees
            .tree_of(node)
            .map(FrameTree::id)
            .ok_or(FrameTreeError::NodeNotFound(node))?;
        let embedder = self
            .frame_trees
            .globally_find_by_id(node)
            .and_then(FrameTreeNode::parent)
            .and_then(|parent| self.frame_trees.globally_find_by_id(parent))
            .map(FrameTreeNode::route);

        let old_route = self.frame_trees.transfer_frame(node, new_route)?;
        if let Some(view) = self
            .child_frames
            .view_for_widget(old_route)
            .map(ChildFrameSurfaceView::id)
        {
            self.child_frames.destroy_view(view, &*host);
        }
        self.last_keyboard_events.remove(&old_route);

        let Some(embedder) = embedder else {
            return Ok(());
        };
        if embedder.process_id == new_route.process_id {
            // Back in the parent's process: drawn by the parent directly.
            self.child_frames.remove_connector(node, &*host);
            return Ok(());
        }

        let info = self.trees.get(&tree_id);
        let nested = info.is_some_and(|info| info.embedded);
        let screen_info = info.map(|info| info.screen_info.clone()).unwrap_or_default();
        self.child_frames.create_connector(node, embedder, nested);
        let view = self.child_frames.create_view(new_route);
        self.child_frames
            .set_view(node, Some(view), &screen_info, &*host)
    }

    /// Handles what the tree delegate recorded during the last mutation.
    fn flush_tree_events(&mut self, ctx: &mut Context<Self>) {
        let host = self.host.clone();
        for event in self.delegate.take() {
            match event {
                CoreEvent::ProxyNeeded {
                    node,
                    parent,
                    replication_state,
                    process_id,
                } => {
                    let message = FrameMsg::CreateFrameProxy {
                        frame_tree_node_id: node,
                        parent,
                        replication_state,
                    };
                    if let Err(e) = host.send(process_id, OutgoingMessage::control(message)) {
                        warn!("Could not create a proxy for {} in {}: {}", node, process_id, e);
                    }
                }
                CoreEvent::FrameRemoved { tree, node, route } => {
                    self.child_frames.remove_connector(node, &*host);
                    if let Some(view) = self
                        .child_frames
                        .view_for_widget(route)
                        .map(ChildFrameSurfaceView::id)
                    {
                        self.child_frames.destroy_view(view, &*host);
                    }
                    self.last_keyboard_events.remove(&route);
                    self.publish(TreeEvent::FrameRemoved { tree, node });
                }
                CoreEvent::CleanUpNavigation {
                    node,
                    speculative_route,
                } => match speculative_route {
                    Some(route) => {
                        if let Err(e) = host.send_to(route, FrameMsg::CleanUpNavigation) {
                            warn!("Could not clean up navigation of {} at {}: {}", node, route, e);
                        }
                    }
                    None => trace!("Cancelled navigation of {} had no speculative frame", node),
                },
                CoreEvent::Published(event) => self.publish(event),
            }
        }

        if self.child_frames.has_pending_deletions() && !self.collection_scheduled {
            self.collection_scheduled = true;
            ctx.notify(CollectDestroyedViews);
        }
    }

    fn publish(&mut self, event: TreeEvent) {
        self.observers.retain(Recipient::connected);
        for observer in &self.observers {
            if observer.try_send(event.clone()).is_err() {
                warn!("Dropped {:?} for a full subscriber", event);
            }
        }
    }

    fn report(&self, process_id: ProcessId, name: &str, e: HostError) {
        match e.class() {
            ErrorClass::ProtocolViolation => self.bad_messages.do_send(BadMessage {
                process_id,
                reason: format!("{}: {}", name, e),
            }),
            ErrorClass::GracefulAbsence => debug!("Dropped {} from {}: {}", name, process_id, e),
            ErrorClass::ProcessDeath => warn!("{} from {} failed: {}", name, process_id, e),
            ErrorClass::ResourceExhaustion => {
                error!("{} from {} broke an invariant: {}", name, process_id, e)
            }
        }
    }
}

impl Actor for BrowserCore {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        ctx.set_mailbox_capacity(self.config.actor_system.mailbox_capacity);
        info!("BrowserCore started.");
    }

    fn stopping(&mut self, _ctx: &mut Context<Self>) -> Running {
        info!(
            "BrowserCore stopping with {} frames and {} child frame views.",
            self.frame_trees.node_count(),
            self.child_frames.view_count()
        );
        self.observers.clear();
        Running::Stop
    }
}

impl Handler<RouteFrameMessage> for BrowserCore {
    type Result = ();

    fn handle(&mut self, msg: RouteFrameMessage, ctx: &mut Context<Self>) {
        let process_id = msg.process_id;
        let name = msg.message.name();
        trace!("<- {} {} ({})", process_id, name, msg.routing_id);
        let result = self.dispatch(msg);
        self.flush_tree_events(ctx);
        if let Err(e) = result {
            self.report(process_id, name, e);
        }
    }
}

impl Handler<CreateFrameTree> for BrowserCore {
    type Result = Result<FrameTreeId, HostError>;

    fn handle(&mut self, msg: CreateFrameTree, _ctx: &mut Context<Self>) -> Self::Result {
        let delegate: Rc<dyn FrameTreeDelegate> = self.delegate.clone();
        let tree = self.frame_trees.create_frame_tree(
            msg.root_route,
            FrameReplicationState::named(msg.name),
            delegate,
        )?;
        self.trees.insert(
            tree,
            TreeInfo {
                embedded: msg.embedded,
                ..TreeInfo::default()
            },
        );
        Ok(tree)
    }
}

impl Handler<DestroyFrameTree> for BrowserCore {
    type Result = Result<(), HostError>;

    fn handle(&mut self, msg: DestroyFrameTree, ctx: &mut Context<Self>) -> Self::Result {
        let destroyed = self.frame_trees.destroy_frame_tree(msg.tree);
        self.trees.remove(&msg.tree);
        self.flush_tree_events(ctx);
        if destroyed {
            Ok(())
        } else {
            Err(HostError::UnknownTree(msg.tree))
        }
    }
}

impl Handler<TransferFrame> for BrowserCore {
    type Result = Result<(), HostError>;

    fn handle(&mut self, msg: TransferFrame, ctx: &mut Context<Self>) -> Self::Result {
        let result = self.transfer_frame(msg.node, msg.new_route);
        self.flush_tree_events(ctx);
        result
    }
}

impl Handler<CreateNavigationRequest> for BrowserCore {
    type Result = Result<(), HostError>;

    fn handle(&mut self, msg: CreateNavigationRequest, ctx: &mut Context<Self>) -> Self::Result {
        let mut request = NavigationRequest::new(msg.url);
        if let Some(route) = msg.speculative_route {
            request = request.with_speculative_route(route);
        }
        let result = self.frame_trees.created_navigation_request(msg.node, request);
        self.flush_tree_events(ctx);
        Ok(result?)
    }
}

impl Handler<CancelNavigation> for BrowserCore {
    type Result = Result<(), HostError>;

    fn handle(&mut self, msg: CancelNavigation, ctx: &mut Context<Self>) -> Self::Result {
        let result = self.frame_trees.reset_navigation_request(msg.node, false);
        self.flush_tree_events(ctx);
        Ok(result?)
    }
}

impl Handler<SetScreenInfo> for BrowserCore {
    type Result = Result<(), HostError>;

    fn handle(&mut self, msg: SetScreenInfo, _ctx: &mut Context<Self>) -> Self::Result {
        let nodes = self
            .frame_trees
            .tree(msg.tree)
            .ok_or(HostError::UnknownTree(msg.tree))?
            .nodes_in_order();
        self.child_frames
            .screen_info_changed(&nodes, &msg.screen_info, &*self.host);
        self.trees.entry(msg.tree).or_default().screen_info = msg.screen_info;
        Ok(())
    }
}

impl Handler<SurfaceDrawn> for BrowserCore {
    type Result = ();

    fn handle(&mut self, msg: SurfaceDrawn, _ctx: &mut Context<Self>) {
        self.child_frames.surface_drawn(msg.surface_id, &*self.host);
    }
}

impl Handler<RenderProcessGone> for BrowserCore {
    type Result = ();

    fn handle(&mut self, msg: RenderProcessGone, ctx: &mut Context<Self>) {
        let rendered = self.frame_trees.process_gone(msg.process_id);
        info!(
            "{} gone ({:?}); it rendered {} frames",
            msg.process_id,
            msg.status,
            rendered.len()
        );
        self.child_frames
            .render_process_gone(msg.process_id, &*self.host);
        self.last_keyboard_events
            .retain(|route, _| route.process_id != msg.process_id);
        self.flush_tree_events(ctx);
    }
}

impl Handler<CollectDestroyedViews> for BrowserCore {
    type Result = usize;

    fn handle(&mut self, _msg: CollectDestroyedViews, _ctx: &mut Context<Self>) -> usize {
        self.collection_scheduled = false;
        self.child_frames.collect_destroyed_views(&*self.host)
    }
}

impl Handler<SubscribeTreeEvents> for BrowserCore {
    type Result = ();

    fn handle(&mut self, msg: SubscribeTreeEvents, _ctx: &mut Context<Self>) {
        debug!("Adding tree event subscriber");
        self.observers.push(msg.0);
    }
}

impl Handler<GetFrameTree> for BrowserCore {
    type Result = Option<TreeSnapshot>;

    fn handle(&mut self, msg: GetFrameTree, _ctx: &mut Context<Self>) -> Self::Result {
        let tree = self.frame_trees.tree(msg.tree)?;
        let nodes = tree
            .nodes_in_order()
            .into_iter()
            .filter_map(|id| tree.node(id))
            .map(|node| NodeSnapshot {
                id: node.id(),
                parent: node.parent(),
                route: node.route(),
                name: node.frame_name().to_string(),
                loading_progress: node.loading_progress(),
                proxies: node.proxy_processes().iter().copied().collect(),
            })
            .collect();
        Some(TreeSnapshot {
            id: tree.id(),
            nodes,
            is_loading: tree.is_loading(),
            load_progress: tree.load_progress(),
        })
    }
}

impl Handler<FindFrame> for BrowserCore {
    type Result = Option<FrameTreeNodeId>;

    fn handle(&mut self, msg: FindFrame, _ctx: &mut Context<Self>) -> Self::Result {
        self.frame_trees.find_by_route(msg.route)
    }
}

impl Handler<GetChildFrame> for BrowserCore {
    type Result = Option<ChildFrameSnapshot>;

    fn handle(&mut self, msg: GetChildFrame, _ctx: &mut Context<Self>) -> Self::Result {
        let connector = self.child_frames.connector(msg.child)?;
        let view = connector.view().and_then(|id| self.child_frames.view(id));
        Some(ChildFrameSnapshot {
            child: connector.child(),
            embedder: connector.embedder(),
            rect: connector.child_frame_rect(),
            scale_factor: connector.device_scale_factor(),
            view: connector.view(),
            widget: view.map(ChildFrameSurfaceView::widget),
            surface_id: view.and_then(ChildFrameSurfaceView::surface_id),
            ack_pending_count: view.map_or(0, ChildFrameSurfaceView::ack_pending_count),
        })
    }
}
