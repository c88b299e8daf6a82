//! # Tessera Host
//!
//! The browser-process side of out-of-process child frames. The
//! [`RenderMessageRouter`] receives everything renderers send and forwards
//! frame traffic to the [`BrowserCore`], which owns the frame trees and
//! pairs each cross-process child's [`FrameConnector`] in the embedder with
//! the [`ChildFrameSurfaceView`] drawing it.

pub mod bad_message;
pub mod browser_core;
pub mod child_frame_view;
pub mod child_frames;
pub mod connector;
pub mod error;
pub mod messages;
pub mod router;

#[cfg(test)]
mod testing;

pub use bad_message::{BadMessage, BadMessageSink, GetBadMessageCount};
pub use browser_core::BrowserCore;
pub use child_frame_view::ChildFrameSurfaceView;
pub use child_frames::{ChildFrames, ViewId};
pub use connector::FrameConnector;
pub use error::HostError;
pub use messages::{
    CancelNavigation, ChildFrameSnapshot, CollectDestroyedViews, CreateFrameTree,
    CreateNavigationRequest, DestroyFrameTree, FindFrame, GetChildFrame, GetFrameTree,
    NodeSnapshot, RenderProcessGone, RouteFrameMessage, SetScreenInfo, SubscribeTreeEvents,
    SurfaceDrawn, TransferFrame, TreeEvent, TreeSnapshot,
};
pub use router::{GetOwnedBitmapCount, ProcessGone, RenderMessageRouter};
