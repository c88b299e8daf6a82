//! The browser process's owner of every frame tree.
//!
//! Node ids are allocated here, so they are unique across trees and never
//! reused. The global id index and the route index are updated together with
//! the trees, and notifications are only sent after both are consistent.

use crate::delegate::FrameTreeDelegate;
use crate::navigation::NavigationRequest;
use crate::node::{
    FrameReplicationState, FrameTreeId, FrameTreeNode, LOADING_PROGRESS_DONE,
    LOADING_PROGRESS_MINIMUM,
};
use crate::sandbox::SandboxFlags;
use crate::tree::FrameTree;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use tessera_core::config::FrameTreeConfig;
use tessera_core::{FrameRoute, FrameTreeError, FrameTreeNodeId, ProcessId, RoutingId};
use url::Url;

pub struct FrameTrees {
    site_per_process: bool,
    next_node_id: u32,
    next_tree_id: u32,
    trees: HashMap<FrameTreeId, FrameTree>,
    node_index: HashMap<FrameTreeNodeId, FrameTreeId>,
    route_index: HashMap<FrameRoute, FrameTreeNodeId>,
}

impl FrameTrees {
    pub fn new(config: &FrameTreeConfig) -> Self {
        Self {
            site_per_process: config.site_per_process,
            next_node_id: 1,
            next_tree_id: 1,
            trees: HashMap::new(),
            node_index: HashMap::new(),
            route_index: HashMap::new(),
        }
    }

    pub fn site_per_process(&self) -> bool {
        self.site_per_process
    }

    fn allocate_node_id(&mut self) -> FrameTreeNodeId {
        let id = FrameTreeNodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    /// Creates a tree whose main frame is rendered at `root_route`.
    pub fn create_frame_tree(
        &mut self,
        root_route: FrameRoute,
        replication_state: FrameReplicationState,
        delegate: Rc<dyn FrameTreeDelegate>,
    ) -> Result<FrameTreeId, FrameTreeError> {
        if self.route_index.contains_key(&root_route) {
            return Err(FrameTreeError::RouteInUse(root_route));
        }
        let tree_id = FrameTreeId(self.next_tree_id);
        self.next_tree_id += 1;
        let root_id = self.allocate_node_id();

        let root = FrameTreeNode::new(root_id, tree_id, None, root_route, replication_state);
        self.trees
            .insert(tree_id, FrameTree::new(tree_id, root, delegate));
        self.node_index.insert(root_id, tree_id);
        self.route_index.insert(root_route, root_id);
        info!("Created {} with root {} at {}", tree_id, root_id, root_route);
        Ok(tree_id)
    }

    /// Tears down a whole tree. Returns false if it did not exist.
    pub fn destroy_frame_tree(&mut self, tree_id: FrameTreeId) -> bool {
        let Some(tree) = self.trees.remove(&tree_id) else {
            return false;
        };
        let order = tree.nodes_in_order();
        for node in tree.nodes.values() {
            self.unindex(node);
        }
        let mut cleared = Vec::new();
        for node in tree.nodes.values() {
            cleared.extend(self.detach_opener_links(node));
        }

        self.notify_openers_cleared(&cleared);
        for id in order.iter().rev() {
            if let Some(node) = tree.node(*id) {
                tree.delegate.frame_removed(&tree, node);
            }
        }
        info!("Destroyed {} ({} nodes)", tree_id, order.len());
        true
    }

    pub fn tree(&self, tree_id: FrameTreeId) -> Option<&FrameTree> {
        self.trees.get(&tree_id)
    }

    pub fn trees(&self) -> impl Iterator<Item = &FrameTree> {
        self.trees.values()
    }

    /// The tree containing `node`.
    pub fn tree_of(&self, node: FrameTreeNodeId) -> Option<&FrameTree> {
        self.trees.get(self.node_index.get(&node)?)
    }

    pub fn globally_find_by_id(&self, id: FrameTreeNodeId) -> Option<&FrameTreeNode> {
        self.tree_of(id)?.node(id)
    }

    pub fn find_by_route(&self, route: FrameRoute) -> Option<FrameTreeNodeId> {
        self.route_index.get(&route).copied()
    }

    /// Number of live nodes across all trees.
    pub fn node_count(&self) -> usize {
        self.node_index.len()
    }

    /// Nodes currently rendered by `process_id`, in id order.
    pub fn nodes_in_process(&self, process_id: ProcessId) -> Vec<FrameTreeNodeId> {
        let mut ids: Vec<_> = self
            .route_index
            .iter()
            .filter(|(route, _)| route.process_id == process_id)
            .map(|(_, id)| *id)
            .collect();
        ids.sort();
        ids
    }

    fn locate(&self, id: FrameTreeNodeId) -> Result<FrameTreeId, FrameTreeError> {
        self.node_index
            .get(&id)
            .copied()
            .filter(|tree_id| self.trees.get(tree_id).is_some_and(|tree| tree.contains(id)))
            .ok_or(FrameTreeError::NodeNotFound(id))
    }

    fn tree_mut(
        &mut self,
        tree_id: FrameTreeId,
        id: FrameTreeNodeId,
    ) -> Result<&mut FrameTree, FrameTreeError> {
        self.trees
            .get_mut(&tree_id)
            .ok_or(FrameTreeError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: FrameTreeNodeId) -> Result<&mut FrameTreeNode, FrameTreeError> {
        let tree_id = self.locate(id)?;
        self.tree_mut(tree_id, id)?
            .node_mut(id)
            .ok_or(FrameTreeError::NodeNotFound(id))
    }

    /// Adds a frame created by the parent's own process as the last child of
    /// `parent`.
    pub fn create_child(
        &mut self,
        parent: FrameTreeNodeId,
        process_id: ProcessId,
        routing_id: RoutingId,
        replication_state: FrameReplicationState,
    ) -> Result<FrameTreeNodeId, FrameTreeError> {
        let tree_id = self.locate(parent)?;
        let (parent_process, parent_proxies) = {
            let parent_node = self
                .tree_mut(tree_id, parent)?
                .node(parent)
                .ok_or(FrameTreeError::NodeNotFound(parent))?;
            (parent_node.process_id(), parent_node.proxy_processes.clone())
        };
        if parent_process != process_id {
            return Err(FrameTreeError::ProcessMismatch {
                parent,
                expected: parent_process,
                actual: process_id,
            });
        }
        let route = FrameRoute::new(process_id, routing_id);
        if self.route_index.contains_key(&route) {
            return Err(FrameTreeError::RouteInUse(route));
        }

        let id = self.allocate_node_id();
        let mut node = FrameTreeNode::new(id, tree_id, Some(parent), route, replication_state);
        let proxies = if self.site_per_process {
            parent_proxies
        } else {
            BTreeSet::new()
        };
        node.proxy_processes = proxies.clone();

        let tree = self.tree_mut(tree_id, parent)?;
        tree.nodes.insert(id, node);
        if let Some(parent_node) = tree.node_mut(parent) {
            parent_node.children.push(id);
        }
        self.node_index.insert(id, tree_id);
        self.route_index.insert(route, id);
        debug!("Created {} under {} at {}", id, parent, route);

        if let Some(tree) = self.trees.get(&tree_id) {
            for process_id in proxies {
                tree.delegate.create_proxy(tree, id, process_id);
            }
        }
        Ok(id)
    }

    /// Unlinks `child` from `parent` and destroys its subtree.
    pub fn remove_child(
        &mut self,
        parent: FrameTreeNodeId,
        child: FrameTreeNodeId,
    ) -> Result<(), FrameTreeError> {
        let tree_id = self.locate(parent)?;
        let parent_node = self.node_mut(parent)?;
        let Some(position) = parent_node.children.iter().position(|id| *id == child) else {
            return Err(FrameTreeError::NotAChild { parent, child });
        };
        parent_node.children.remove(position);
        self.destroy_subtree(tree_id, child);
        Ok(())
    }

    /// Removes a frame at the request of its own renderer.
    pub fn detach_frame(&mut self, id: FrameTreeNodeId) -> Result<(), FrameTreeError> {
        let parent = self
            .globally_find_by_id(id)
            .ok_or(FrameTreeError::NodeNotFound(id))?
            .parent()
            .ok_or(FrameTreeError::RootRemoval(id))?;
        self.remove_child(parent, id)
    }

    // `id` must already be unlinked from its parent.
    fn destroy_subtree(&mut self, tree_id: FrameTreeId, id: FrameTreeNodeId) {
        let Some(tree) = self.trees.get_mut(&tree_id) else {
            return;
        };
        let was_loading = tree.is_loading();
        let order = tree.subtree(id);
        let removed: Vec<FrameTreeNode> = order
            .iter()
            .rev()
            .filter_map(|id| tree.nodes.remove(id))
            .collect();
        let progress = tree.update_load_progress();

        for node in &removed {
            self.unindex(node);
        }
        let mut cleared = Vec::new();
        for node in &removed {
            cleared.extend(self.detach_opener_links(node));
        }
        debug!("Removed {} frames rooted at {}", removed.len(), id);

        self.notify_openers_cleared(&cleared);
        let Some(tree) = self.trees.get(&tree_id) else {
            return;
        };
        for node in &removed {
            tree.delegate.frame_removed(tree, node);
        }
        if let Some(progress) = progress {
            tree.delegate.did_change_load_progress(tree, progress);
        }
        if was_loading && !tree.is_loading() {
            tree.delegate.did_stop_loading(tree);
        }
    }

    fn unindex(&mut self, node: &FrameTreeNode) {
        self.node_index.remove(&node.id);
        if self.route_index.get(&node.route) == Some(&node.id) {
            self.route_index.remove(&node.route);
        }
    }

    /// Breaks every opener link touching `node`. Returns the surviving nodes
    /// that lost their opener.
    fn detach_opener_links(&mut self, node: &FrameTreeNode) -> Vec<FrameTreeNodeId> {
        if let Some(opener) = node.opener {
            if let Ok(opener_node) = self.node_mut(opener) {
                opener_node.opened.remove(&node.id);
            }
        }
        let mut cleared = Vec::new();
        for referrer in &node.opened {
            if let Ok(referrer_node) = self.node_mut(*referrer) {
                referrer_node.opener = None;
                cleared.push(*referrer);
            }
        }
        cleared
    }

    fn notify_openers_cleared(&self, cleared: &[FrameTreeNodeId]) {
        for id in cleared {
            if let Some(tree) = self.tree_of(*id) {
                tree.delegate.opener_cleared(tree, *id);
            }
        }
    }

    /// Clears the node's document and destroys its children, ready for the
    /// node to be handed to another renderer process.
    pub fn reset_for_process_swap(&mut self, id: FrameTreeNodeId) -> Result<(), FrameTreeError> {
        let tree_id = self.locate(id)?;
        let node = self.node_mut(id)?;
        node.current_url = None;
        node.replication_state.origin = None;
        let children = std::mem::take(&mut node.children);
        for child in children {
            self.destroy_subtree(tree_id, child);
        }
        Ok(())
    }

    /// Moves `id` to the frame at `new_route`. The previous process keeps a
    /// proxy for the node and the new process gets proxies for the rest of the
    /// tree. Returns the previous route.
    pub fn transfer_frame(
        &mut self,
        id: FrameTreeNodeId,
        new_route: FrameRoute,
    ) -> Result<FrameRoute, FrameTreeError> {
        if self.route_index.get(&new_route).is_some_and(|owner| *owner != id) {
            return Err(FrameTreeError::RouteInUse(new_route));
        }
        let tree_id = self.locate(id)?;
        self.reset_for_process_swap(id)?;

        let site_per_process = self.site_per_process;
        let node = self.node_mut(id)?;
        let old_route = std::mem::replace(&mut node.route, new_route);
        let process_changed = old_route.process_id != new_route.process_id;
        node.proxy_processes.remove(&new_route.process_id);
        let keep_old_proxy = site_per_process
            && process_changed
            && node.proxy_processes.insert(old_route.process_id);

        if self.route_index.get(&old_route) == Some(&id) {
            self.route_index.remove(&old_route);
        }
        self.route_index.insert(new_route, id);
        info!("Transferred {} from {} to {}", id, old_route, new_route);

        if keep_old_proxy {
            if let Some(tree) = self.trees.get(&tree_id) {
                tree.delegate.create_proxy(tree, id, old_route.process_id);
            }
        }
        if site_per_process && process_changed {
            self.create_proxies_for_process(id, new_route.process_id)?;
        }
        Ok(old_route)
    }

    /// Gives `process_id` a proxy for every node of `source`'s tree except
    /// `source` itself and the nodes it already renders.
    pub fn create_proxies_for_process(
        &mut self,
        source: FrameTreeNodeId,
        process_id: ProcessId,
    ) -> Result<(), FrameTreeError> {
        let tree_id = self.locate(source)?;
        let tree = self.tree_mut(tree_id, source)?;
        let mut created = Vec::new();
        for id in tree.nodes_in_order() {
            if id == source {
                continue;
            }
            let Some(node) = tree.node_mut(id) else {
                continue;
            };
            if node.process_id() == process_id || !node.proxy_processes.insert(process_id) {
                continue;
            }
            created.push(id);
        }
        let tree = &*tree;
        for id in created {
            tree.delegate.create_proxy(tree, id, process_id);
        }
        Ok(())
    }

    /// Forgets a dead renderer process: its proxies disappear and the frames
    /// it rendered stop loading. Returns the nodes it rendered.
    pub fn process_gone(&mut self, process_id: ProcessId) -> Vec<FrameTreeNodeId> {
        for tree in self.trees.values_mut() {
            for node in tree.nodes.values_mut() {
                node.proxy_processes.remove(&process_id);
            }
        }
        let rendered = self.nodes_in_process(process_id);
        for id in &rendered {
            let Ok(node) = self.node_mut(*id) else {
                continue;
            };
            if node.frame_loading {
                node.frame_loading = false;
                if let Ok(tree_id) = self.locate(*id) {
                    self.node_did_stop_loading(tree_id, *id);
                }
            }
        }
        rendered
    }

    /// Makes `opener` the opener of `id`, or clears it.
    pub fn set_opener(
        &mut self,
        id: FrameTreeNodeId,
        opener: Option<FrameTreeNodeId>,
    ) -> Result<(), FrameTreeError> {
        if let Some(opener) = opener {
            self.locate(opener)?;
        }
        let node = self.node_mut(id)?;
        let previous = std::mem::replace(&mut node.opener, opener);
        if let Some(previous) = previous {
            if let Ok(previous_node) = self.node_mut(previous) {
                previous_node.opened.remove(&id);
            }
        }
        if let Some(opener) = opener {
            self.node_mut(opener)?.opened.insert(id);
        }
        Ok(())
    }

    pub fn set_frame_name(
        &mut self,
        id: FrameTreeNodeId,
        name: impl Into<String>,
    ) -> Result<(), FrameTreeError> {
        self.node_mut(id)?.replication_state.name = name.into();
        Ok(())
    }

    /// Records new sandbox flags the parent set on one of its children. They
    /// take effect when the child next commits a navigation.
    pub fn set_child_sandbox_flags(
        &mut self,
        parent: FrameTreeNodeId,
        child: FrameTreeNodeId,
        flags: SandboxFlags,
    ) -> Result<(), FrameTreeError> {
        self.locate(parent)?;
        let child_node = self.node_mut(child)?;
        if child_node.parent != Some(parent) {
            return Err(FrameTreeError::NotAChild { parent, child });
        }
        child_node.set_pending_sandbox_flags(flags);
        Ok(())
    }

    /// The renderer committed a navigation. Returns whether the enforced
    /// sandbox flags changed.
    pub fn did_commit_navigation(
        &mut self,
        id: FrameTreeNodeId,
        url: Url,
    ) -> Result<bool, FrameTreeError> {
        let node = self.node_mut(id)?;
        node.set_current_url(url);
        let changed = node.commit_pending_sandbox_flags();
        self.reset_navigation_request(id, true)?;
        Ok(changed)
    }

    /// The renderer of `id` started loading.
    pub fn did_start_loading(
        &mut self,
        id: FrameTreeNodeId,
        to_different_document: bool,
    ) -> Result<(), FrameTreeError> {
        let tree_id = self.locate(id)?;
        // Observers already heard the start of a load this one replaces.
        let tree_was_loading = self
            .trees
            .get(&tree_id)
            .is_some_and(FrameTree::is_loading);
        let node = self.node_mut(id)?;
        // A new main document replaces the page, including a load in flight.
        if to_different_document && node.is_main_frame() {
            node.frame_loading = false;
        }
        if node.frame_loading {
            warn!("{} reported a load start while already loading", id);
            return Ok(());
        }
        self.node_did_start_loading(tree_id, id, to_different_document, tree_was_loading);
        self.node_mut(id)?.frame_loading = true;
        Ok(())
    }

    /// The renderer of `id` finished loading.
    pub fn did_stop_loading(&mut self, id: FrameTreeNodeId) -> Result<(), FrameTreeError> {
        let tree_id = self.locate(id)?;
        let node = self.node_mut(id)?;
        if !node.frame_loading {
            warn!("{} reported a load stop while not loading", id);
            return Ok(());
        }
        node.frame_loading = false;
        self.node_did_stop_loading(tree_id, id);
        Ok(())
    }

    pub fn did_change_load_progress(
        &mut self,
        id: FrameTreeNodeId,
        progress: f64,
    ) -> Result<(), FrameTreeError> {
        let tree_id = self.locate(id)?;
        self.node_did_change_load_progress(tree_id, id, progress);
        Ok(())
    }

    /// Attaches a browser-side navigation to `id`. A navigation replacing one
    /// that is already loading keeps the loading state as it is.
    pub fn created_navigation_request(
        &mut self,
        id: FrameTreeNodeId,
        request: NavigationRequest,
    ) -> Result<(), FrameTreeError> {
        let tree_id = self.locate(id)?;
        let was_loading = self
            .trees
            .get(&tree_id)
            .is_some_and(FrameTree::is_loading);
        if was_loading {
            self.reset_navigation_request(id, true)?;
        }
        let starts_loading = !was_loading && !request.is_javascript();
        self.node_mut(id)?.navigation_request = Some(request);
        if starts_loading {
            self.node_did_start_loading(tree_id, id, true, was_loading);
        }
        Ok(())
    }

    /// Drops the navigation request of `id`. With `keep_state` the request
    /// simply goes away (it committed or is being replaced); otherwise the
    /// load is cancelled and the speculative frame cleaned up.
    pub fn reset_navigation_request(
        &mut self,
        id: FrameTreeNodeId,
        keep_state: bool,
    ) -> Result<(), FrameTreeError> {
        let tree_id = self.locate(id)?;
        let Some(request) = self.node_mut(id)?.navigation_request.take() else {
            return Ok(());
        };
        if keep_state {
            return Ok(());
        }
        debug!("Cancelled navigation of {} to {}", id, request.url);
        self.node_did_stop_loading(tree_id, id);
        if let Some(tree) = self.trees.get(&tree_id) {
            tree.delegate.clean_up_navigation(tree, id, &request);
        }
        Ok(())
    }

    fn node_did_start_loading(
        &mut self,
        tree_id: FrameTreeId,
        id: FrameTreeNodeId,
        to_different_document: bool,
        tree_was_loading: bool,
    ) {
        if let Some(tree) = self.trees.get_mut(&tree_id) {
            if to_different_document && tree.root == id {
                tree.reset_load_progress();
            }
            if !tree_was_loading {
                let tree = &*tree;
                tree.delegate
                    .did_start_loading(tree, id, to_different_document);
            }
        }
        self.node_did_change_load_progress(tree_id, id, LOADING_PROGRESS_MINIMUM);
    }

    fn node_did_stop_loading(&mut self, tree_id: FrameTreeId, id: FrameTreeNodeId) {
        self.node_did_change_load_progress(tree_id, id, LOADING_PROGRESS_DONE);
        if let Some(tree) = self.trees.get(&tree_id) {
            if !tree.is_loading() {
                tree.delegate.did_stop_loading(tree);
            }
        }
    }

    fn node_did_change_load_progress(
        &mut self,
        tree_id: FrameTreeId,
        id: FrameTreeNodeId,
        progress: f64,
    ) {
        let Some(tree) = self.trees.get_mut(&tree_id) else {
            return;
        };
        let Some(node) = tree.node_mut(id) else {
            return;
        };
        node.loading_progress = progress;
        if let Some(total) = tree.update_load_progress() {
            let tree = &*tree;
            tree.delegate.did_change_load_progress(tree, total);
        }
    }
}

impl Default for FrameTrees {
    fn default() -> Self {
        Self::new(&FrameTreeConfig::default())
    }
}
