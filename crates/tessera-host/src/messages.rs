//! Messages accepted by the browser core actor.

use crate::child_frames::ViewId;
use crate::error::HostError;
use actix::prelude::*;
use tessera_compositing::SurfaceId;
use tessera_core::geometry::{Rect, ScreenInfo};
use tessera_core::{FrameRoute, FrameTreeNodeId, ProcessId, RoutingId};
use tessera_frame_tree::FrameTreeId;
use tessera_ipc::{FrameHostMsg, TerminationStatus};
use url::Url;

/// A decoded renderer message addressed to a frame, forwarded by the router.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct RouteFrameMessage {
    pub process_id: ProcessId,
    pub routing_id: RoutingId,
    pub request_id: Option<u64>,
    pub message: FrameHostMsg,
}

impl RouteFrameMessage {
    pub fn sender(&self) -> FrameRoute {
        FrameRoute::new(self.process_id, self.routing_id)
    }
}

/// Creates a page whose main frame is rendered at `root_route`. `embedded`
/// marks trees that are themselves shown inside another page.
#[derive(Message, Debug)]
#[rtype(result = "Result<FrameTreeId, HostError>")]
pub struct CreateFrameTree {
    pub root_route: FrameRoute,
    pub name: String,
    pub embedded: bool,
}

#[derive(Message, Debug)]
#[rtype(result = "Result<(), HostError>")]
pub struct DestroyFrameTree {
    pub tree: FrameTreeId,
}

/// Hands `node` to the frame at `new_route`, typically in another process.
#[derive(Message, Debug)]
#[rtype(result = "Result<(), HostError>")]
pub struct TransferFrame {
    pub node: FrameTreeNodeId,
    pub new_route: FrameRoute,
}

/// A browser-initiated navigation of `node`.
#[derive(Message, Debug)]
#[rtype(result = "Result<(), HostError>")]
pub struct CreateNavigationRequest {
    pub node: FrameTreeNodeId,
    pub url: Url,
    pub speculative_route: Option<FrameRoute>,
}

#[derive(Message, Debug)]
#[rtype(result = "Result<(), HostError>")]
pub struct CancelNavigation {
    pub node: FrameTreeNodeId,
}

/// The screen of the view showing `tree` changed.
#[derive(Message, Debug)]
#[rtype(result = "Result<(), HostError>")]
pub struct SetScreenInfo {
    pub tree: FrameTreeId,
    pub screen_info: ScreenInfo,
}

/// The display compositor drew a surface.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct SurfaceDrawn {
    pub surface_id: SurfaceId,
}

#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct RenderProcessGone {
    pub process_id: ProcessId,
    pub status: TerminationStatus,
}

/// Deletes child frame views destroyed since the last pass.
#[derive(Message, Debug)]
#[rtype(result = "usize")]
pub struct CollectDestroyedViews;

/// Tree-level notifications published to subscribers.
#[derive(Message, Debug, Clone, PartialEq)]
#[rtype(result = "()")]
pub enum TreeEvent {
    LoadingStarted {
        tree: FrameTreeId,
        node: FrameTreeNodeId,
        to_different_document: bool,
    },
    LoadingStopped {
        tree: FrameTreeId,
    },
    LoadProgressChanged {
        tree: FrameTreeId,
        progress: f64,
    },
    FrameRemoved {
        tree: FrameTreeId,
        node: FrameTreeNodeId,
    },
    OpenerCleared {
        tree: FrameTreeId,
        node: FrameTreeNodeId,
    },
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SubscribeTreeEvents(pub Recipient<TreeEvent>);

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub id: FrameTreeNodeId,
    pub parent: Option<FrameTreeNodeId>,
    pub route: FrameRoute,
    pub name: String,
    pub loading_progress: f64,
    pub proxies: Vec<ProcessId>,
}

/// A copy of one frame tree, nodes in pre-order.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeSnapshot {
    pub id: FrameTreeId,
    pub nodes: Vec<NodeSnapshot>,
    pub is_loading: bool,
    pub load_progress: f64,
}

#[derive(Message, Debug)]
#[rtype(result = "Option<TreeSnapshot>")]
pub struct GetFrameTree {
    pub tree: FrameTreeId,
}

#[derive(Message, Debug)]
#[rtype(result = "Option<FrameTreeNodeId>")]
pub struct FindFrame {
    pub route: FrameRoute,
}

/// Connector and view state of a cross-process child frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildFrameSnapshot {
    pub child: FrameTreeNodeId,
    pub embedder: FrameRoute,
    pub rect: Rect,
    pub scale_factor: f32,
    pub view: Option<ViewId>,
    pub widget: Option<FrameRoute>,
    pub surface_id: Option<SurfaceId>,
    pub ack_pending_count: u32,
}

#[derive(Message, Debug)]
#[rtype(result = "Option<ChildFrameSnapshot>")]
pub struct GetChildFrame {
    pub child: FrameTreeNodeId,
}
