use crate::navigation::NavigationRequest;
use crate::node::FrameTreeNode;
use crate::tree::FrameTree;
use tessera_core::{FrameTreeNodeId, ProcessId};

/// Receives the tree-level notifications of one frame tree.
///
/// Every callback runs after the tree has been updated, so `tree` always
/// reflects the new state. Implementations must not re-enter the frame trees.
pub trait FrameTreeDelegate {
    /// The tree went from idle to loading.
    fn did_start_loading(&self, _tree: &FrameTree, _node: FrameTreeNodeId, _to_different_document: bool) {}

    /// No node of the tree is loading any more.
    fn did_stop_loading(&self, _tree: &FrameTree) {}

    /// The aggregate progress of the tree increased.
    fn did_change_load_progress(&self, _tree: &FrameTree, _progress: f64) {}

    /// `node` has been unlinked and dropped from every index.
    fn frame_removed(&self, _tree: &FrameTree, _node: &FrameTreeNode) {}

    /// `process_id` needs a proxy for `node`.
    fn create_proxy(&self, _tree: &FrameTree, _node: FrameTreeNodeId, _process_id: ProcessId) {}

    /// A cancelled navigation left a speculative frame behind.
    fn clean_up_navigation(&self, _tree: &FrameTree, _node: FrameTreeNodeId, _request: &NavigationRequest) {}

    /// The opener of `node` was destroyed.
    fn opener_cleared(&self, _tree: &FrameTree, _node: FrameTreeNodeId) {}
}

/// A delegate for trees nobody observes.
#[derive(Debug, Default)]
pub struct NullDelegate;

impl FrameTreeDelegate for NullDelegate {}
