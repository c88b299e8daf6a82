//! Messages exchanged between the browser and renderer processes.
//!
//! The envelope's routing id names the frame or widget a message is about;
//! payloads only carry what the routing id does not already say. Shared
//! memory travels out of band and is referenced by [`HandleIndex`].

use serde::{Deserialize, Serialize};
use tessera_compositing::frame::{CompositorFrame, ReturnedResource};
use tessera_compositing::shared_bitmap::SharedBitmapId;
use tessera_compositing::surface::{SurfaceId, SurfaceSequence};
use tessera_core::geometry::{Point, Rect, ScreenInfo, Size};
use tessera_core::{FrameRoute, FrameTreeNodeId, RoutingId};
use tessera_frame_tree::{FrameReplicationState, SandboxFlags, TreeScopeType};
use url::Url;

/// Position of a shared memory handle in the message's attachment list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleIndex(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseEventKind {
    Down,
    Up,
    Move,
    Enter,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseEvent {
    pub kind: MouseEventKind,
    pub position: Point,
    pub button: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WheelEvent {
    pub position: Point,
    pub delta_x: f32,
    pub delta_y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyEventKind {
    RawKeyDown,
    KeyDown,
    KeyUp,
    Char,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardEvent {
    pub kind: KeyEventKind,
    pub key_code: u32,
    pub text: String,
    pub modifiers: u32,
}

/// An input event as the parent process forwards it. Keyboard events carry
/// no payload: the browser replays the last key event the parent saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputEvent {
    Keyboard,
    Mouse(MouseEvent),
    Wheel(WheelEvent),
}

/// An input event as delivered to a widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WidgetInputEvent {
    Keyboard(KeyboardEvent),
    Mouse(MouseEvent),
    Wheel(WheelEvent),
}

/// How a renderer process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationStatus {
    NormalTermination,
    AbnormalTermination,
    ProcessWasKilled,
    ProcessCrashed,
}

/// Renderer to browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameHostMsg {
    /// Synchronous; answered with [`FrameMsg::ChildFrameCreated`].
    CreateChildFrame {
        new_routing_id: RoutingId,
        name: String,
        scope: TreeScopeType,
        sandbox_flags: SandboxFlags,
    },
    FrameDetached,
    DidStartLoading {
        to_different_document: bool,
    },
    DidStopLoading,
    DidChangeLoadProgress {
        progress: f64,
    },
    BeginNavigation {
        url: Url,
    },
    DidCommitNavigation {
        url: Url,
    },
    DidFailNavigation {
        error_code: i32,
    },
    DidChangeName {
        name: String,
    },
    DidChangeOpener {
        opener: Option<FrameTreeNodeId>,
    },
    DidSetSandboxFlags {
        child: FrameTreeNodeId,
        flags: SandboxFlags,
    },
    /// Sent by a widget whose compositor produced a frame.
    SwapCompositorFrame {
        output_surface_id: u32,
        frame: CompositorFrame,
    },
    /// Sent by the parent frame about its cross-process `child`.
    FrameRectChanged {
        child: FrameTreeNodeId,
        rect: Rect,
        scale_factor: f32,
    },
    ForwardInputEvent {
        child: FrameTreeNodeId,
        event: InputEvent,
    },
    /// The widget handled a key event; it becomes its last keyboard event.
    KeyboardEvent {
        event: KeyboardEvent,
    },
    SatisfySequence {
        sequence: SurfaceSequence,
    },
    RequireSequence {
        surface_id: SurfaceId,
        sequence: SurfaceSequence,
    },
    /// Synchronous; answered with [`FrameMsg::SharedBitmapAllocated`].
    AllocateSharedBitmap {
        byte_size: usize,
        id: SharedBitmapId,
    },
    AllocatedSharedBitmap {
        byte_size: usize,
        handle: HandleIndex,
        id: SharedBitmapId,
    },
    DeletedSharedBitmap {
        id: SharedBitmapId,
    },
}

impl FrameHostMsg {
    pub fn name(&self) -> &'static str {
        match self {
            FrameHostMsg::CreateChildFrame { .. } => "CreateChildFrame",
            FrameHostMsg::FrameDetached => "FrameDetached",
            FrameHostMsg::DidStartLoading { .. } => "DidStartLoading",
            FrameHostMsg::DidStopLoading => "DidStopLoading",
            FrameHostMsg::DidChangeLoadProgress { .. } => "DidChangeLoadProgress",
            FrameHostMsg::BeginNavigation { .. } => "BeginNavigation",
            FrameHostMsg::DidCommitNavigation { .. } => "DidCommitNavigation",
            FrameHostMsg::DidFailNavigation { .. } => "DidFailNavigation",
            FrameHostMsg::DidChangeName { .. } => "DidChangeName",
            FrameHostMsg::DidChangeOpener { .. } => "DidChangeOpener",
            FrameHostMsg::DidSetSandboxFlags { .. } => "DidSetSandboxFlags",
            FrameHostMsg::SwapCompositorFrame { .. } => "SwapCompositorFrame",
            FrameHostMsg::FrameRectChanged { .. } => "FrameRectChanged",
            FrameHostMsg::ForwardInputEvent { .. } => "ForwardInputEvent",
            FrameHostMsg::KeyboardEvent { .. } => "KeyboardEvent",
            FrameHostMsg::SatisfySequence { .. } => "SatisfySequence",
            FrameHostMsg::RequireSequence { .. } => "RequireSequence",
            FrameHostMsg::AllocateSharedBitmap { .. } => "AllocateSharedBitmap",
            FrameHostMsg::AllocatedSharedBitmap { .. } => "AllocatedSharedBitmap",
            FrameHostMsg::DeletedSharedBitmap { .. } => "DeletedSharedBitmap",
        }
    }
}

/// Browser to renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameMsg {
    ChildFrameCreated {
        frame_tree_node_id: FrameTreeNodeId,
    },
    /// Sent to a process with `RoutingId::NONE`.
    CreateFrameProxy {
        frame_tree_node_id: FrameTreeNodeId,
        parent: Option<FrameTreeNodeId>,
        replication_state: FrameReplicationState,
    },
    DeleteFrame,
    /// Tells the parent that the process rendering `child` died.
    ChildFrameProcessGone {
        child: FrameTreeNodeId,
    },
    /// A whole frame from `source`, to be drawn in place of `child`.
    CompositorFrameSwapped {
        child: FrameTreeNodeId,
        output_surface_id: u32,
        source: FrameRoute,
        frame: CompositorFrame,
    },
    SetChildFrameSurface {
        child: FrameTreeNodeId,
        surface_id: SurfaceId,
        frame_size: Size,
        scale_factor: f32,
        sequence: SurfaceSequence,
    },
    SwapCompositorFrameAck {
        output_surface_id: u32,
        resources: Vec<ReturnedResource>,
    },
    ReclaimCompositorResources {
        output_surface_id: u32,
        resources: Vec<ReturnedResource>,
    },
    Resize {
        rect: Rect,
        scale_factor: f32,
    },
    UpdateScreenInfo {
        screen_info: ScreenInfo,
    },
    InputEvent {
        event: WidgetInputEvent,
    },
    SharedBitmapAllocated {
        id: SharedBitmapId,
        handle: Option<HandleIndex>,
    },
    CleanUpNavigation,
}

impl FrameMsg {
    pub fn name(&self) -> &'static str {
        match self {
            FrameMsg::ChildFrameCreated { .. } => "ChildFrameCreated",
            FrameMsg::CreateFrameProxy { .. } => "CreateFrameProxy",
            FrameMsg::DeleteFrame => "DeleteFrame",
            FrameMsg::ChildFrameProcessGone { .. } => "ChildFrameProcessGone",
            FrameMsg::CompositorFrameSwapped { .. } => "CompositorFrameSwapped",
            FrameMsg::SetChildFrameSurface { .. } => "SetChildFrameSurface",
            FrameMsg::SwapCompositorFrameAck { .. } => "SwapCompositorFrameAck",
            FrameMsg::ReclaimCompositorResources { .. } => "ReclaimCompositorResources",
            FrameMsg::Resize { .. } => "Resize",
            FrameMsg::UpdateScreenInfo { .. } => "UpdateScreenInfo",
            FrameMsg::InputEvent { .. } => "InputEvent",
            FrameMsg::SharedBitmapAllocated { .. } => "SharedBitmapAllocated",
            FrameMsg::CleanUpNavigation => "CleanUpNavigation",
        }
    }
}
