use crate::navigation::NavigationRequest;
use crate::sandbox::{SandboxFlags, TreeScopeType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tessera_core::{FrameRoute, FrameTreeNodeId, ProcessId};
use url::Url;

/// Loading progress of a node that has not started loading.
pub const LOADING_PROGRESS_NOT_STARTED: f64 = 0.0;
/// Progress reported as soon as a load starts.
pub const LOADING_PROGRESS_MINIMUM: f64 = 0.1;
pub const LOADING_PROGRESS_DONE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameTreeId(pub u32);

impl fmt::Display for FrameTreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tree#{}", self.0)
    }
}

/// Frame state mirrored into every process that holds a proxy for the frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameReplicationState {
    pub scope: TreeScopeType,
    pub name: String,
    /// Flags set by the parent, enforced once the frame navigates.
    pub sandbox_flags: SandboxFlags,
    /// ASCII serialization of the committed origin.
    pub origin: Option<String>,
}

impl FrameReplicationState {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One frame of a frame tree.
///
/// Nodes only hold ids of their relatives; the owning [`FrameTrees`]
/// keeps them consistent.
///
/// [`FrameTrees`]: crate::FrameTrees
#[derive(Debug)]
pub struct FrameTreeNode {
    pub(crate) id: FrameTreeNodeId,
    pub(crate) frame_tree_id: FrameTreeId,
    pub(crate) parent: Option<FrameTreeNodeId>,
    pub(crate) children: Vec<FrameTreeNodeId>,
    pub(crate) route: FrameRoute,
    pub(crate) opener: Option<FrameTreeNodeId>,
    // Nodes whose opener is this node.
    pub(crate) opened: HashSet<FrameTreeNodeId>,
    pub(crate) replication_state: FrameReplicationState,
    pub(crate) effective_sandbox_flags: SandboxFlags,
    pub(crate) current_url: Option<Url>,
    pub(crate) loading_progress: f64,
    // The frame's renderer reported a load in progress.
    pub(crate) frame_loading: bool,
    pub(crate) navigation_request: Option<NavigationRequest>,
    pub(crate) proxy_processes: BTreeSet<ProcessId>,
}

impl FrameTreeNode {
    pub(crate) fn new(
        id: FrameTreeNodeId,
        frame_tree_id: FrameTreeId,
        parent: Option<FrameTreeNodeId>,
        route: FrameRoute,
        replication_state: FrameReplicationState,
    ) -> Self {
        Self {
            id,
            frame_tree_id,
            parent,
            children: Vec::new(),
            route,
            opener: None,
            opened: HashSet::new(),
            effective_sandbox_flags: replication_state.sandbox_flags,
            replication_state,
            current_url: None,
            loading_progress: LOADING_PROGRESS_NOT_STARTED,
            frame_loading: false,
            navigation_request: None,
            proxy_processes: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> FrameTreeNodeId {
        self.id
    }

    pub fn frame_tree_id(&self) -> FrameTreeId {
        self.frame_tree_id
    }

    pub fn parent(&self) -> Option<FrameTreeNodeId> {
        self.parent
    }

    pub fn is_main_frame(&self) -> bool {
        self.parent.is_none()
    }

    pub fn children(&self) -> &[FrameTreeNodeId] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn child_at(&self, index: usize) -> Option<FrameTreeNodeId> {
        self.children.get(index).copied()
    }

    /// The (process, routing id) of the frame currently rendering this node.
    pub fn route(&self) -> FrameRoute {
        self.route
    }

    pub fn process_id(&self) -> ProcessId {
        self.route.process_id
    }

    pub fn opener(&self) -> Option<FrameTreeNodeId> {
        self.opener
    }

    pub fn replication_state(&self) -> &FrameReplicationState {
        &self.replication_state
    }

    pub fn frame_name(&self) -> &str {
        &self.replication_state.name
    }

    /// Flags currently enforced on the frame's document.
    pub fn effective_sandbox_flags(&self) -> SandboxFlags {
        self.effective_sandbox_flags
    }

    /// Flags waiting for the next navigation to take effect.
    pub fn pending_sandbox_flags(&self) -> SandboxFlags {
        self.replication_state.sandbox_flags
    }

    pub(crate) fn set_pending_sandbox_flags(&mut self, flags: SandboxFlags) {
        self.replication_state.sandbox_flags = flags;
    }

    /// Enforces the pending flags. Returns whether the effective flags changed.
    pub fn commit_pending_sandbox_flags(&mut self) -> bool {
        let changed = self.effective_sandbox_flags != self.replication_state.sandbox_flags;
        self.effective_sandbox_flags = self.replication_state.sandbox_flags;
        changed
    }

    pub fn current_url(&self) -> Option<&Url> {
        self.current_url.as_ref()
    }

    pub(crate) fn set_current_url(&mut self, url: Url) {
        let origin = url.origin();
        self.replication_state.origin = origin.is_tuple().then(|| origin.ascii_serialization());
        self.current_url = Some(url);
    }

    pub fn loading_progress(&self) -> f64 {
        self.loading_progress
    }

    /// Loading as reported by the renderer, or waiting on a browser-side navigation.
    pub fn is_loading(&self) -> bool {
        self.frame_loading || self.navigation_request.is_some()
    }

    pub fn navigation_request(&self) -> Option<&NavigationRequest> {
        self.navigation_request.as_ref()
    }

    /// Processes holding a proxy for this frame.
    pub fn proxy_processes(&self) -> &BTreeSet<ProcessId> {
        &self.proxy_processes
    }

    pub fn has_proxy_in(&self, process_id: ProcessId) -> bool {
        self.proxy_processes.contains(&process_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::RoutingId;

    fn node() -> FrameTreeNode {
        FrameTreeNode::new(
            FrameTreeNodeId(1),
            FrameTreeId(1),
            None,
            FrameRoute::new(ProcessId(1), RoutingId(1)),
            FrameReplicationState::named("main"),
        )
    }

    #[test]
    fn sandbox_flags_only_change_on_commit() {
        let mut node = node();
        node.set_pending_sandbox_flags(SandboxFlags::SCRIPTS);
        assert_eq!(node.effective_sandbox_flags(), SandboxFlags::empty());
        assert_eq!(node.pending_sandbox_flags(), SandboxFlags::SCRIPTS);

        assert!(node.commit_pending_sandbox_flags());
        assert_eq!(node.effective_sandbox_flags(), SandboxFlags::SCRIPTS);
        assert!(!node.commit_pending_sandbox_flags());
    }

    #[test]
    fn committed_url_updates_the_replicated_origin() {
        let mut node = node();
        node.set_current_url(Url::parse("https://example.com:8443/a/b").unwrap());
        assert_eq!(
            node.replication_state().origin.as_deref(),
            Some("https://example.com:8443")
        );

        node.set_current_url(Url::parse("data:text/html,hi").unwrap());
        assert_eq!(node.replication_state().origin, None);
    }

    #[test]
    fn pending_navigation_counts_as_loading() {
        let mut node = node();
        assert!(!node.is_loading());
        node.navigation_request = Some(NavigationRequest::new(
            Url::parse("https://example.com/").unwrap(),
        ));
        assert!(node.is_loading());
    }
}
