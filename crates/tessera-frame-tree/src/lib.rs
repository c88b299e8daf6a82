//! # Tessera Frame Tree
//!
//! The browser's model of every page's frames: which process renders each
//! frame, which processes hold proxies for it, how far it has loaded and
//! which frame opened it.

pub mod delegate;
pub mod navigation;
pub mod node;
pub mod registry;
pub mod sandbox;
pub mod tree;

pub use delegate::{FrameTreeDelegate, NullDelegate};
pub use navigation::NavigationRequest;
pub use node::{
    FrameReplicationState, FrameTreeId, FrameTreeNode, LOADING_PROGRESS_DONE,
    LOADING_PROGRESS_MINIMUM, LOADING_PROGRESS_NOT_STARTED,
};
pub use registry::FrameTrees;
pub use sandbox::{SandboxFlags, TreeScopeType};
pub use tree::FrameTree;
