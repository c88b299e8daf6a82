use crate::delegate::FrameTreeDelegate;
use crate::node::{FrameTreeId, FrameTreeNode, LOADING_PROGRESS_NOT_STARTED};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tessera_core::FrameTreeNodeId;

/// The frames of one page, rooted at its main frame.
pub struct FrameTree {
    pub(crate) id: FrameTreeId,
    pub(crate) root: FrameTreeNodeId,
    pub(crate) nodes: HashMap<FrameTreeNodeId, FrameTreeNode>,
    pub(crate) load_progress: f64,
    pub(crate) delegate: Rc<dyn FrameTreeDelegate>,
}

impl FrameTree {
    pub(crate) fn new(
        id: FrameTreeId,
        root: FrameTreeNode,
        delegate: Rc<dyn FrameTreeDelegate>,
    ) -> Self {
        let root_id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Self {
            id,
            root: root_id,
            nodes,
            load_progress: 0.0,
            delegate,
        }
    }

    pub fn id(&self) -> FrameTreeId {
        self.id
    }

    pub fn root(&self) -> FrameTreeNodeId {
        self.root
    }

    pub fn root_node(&self) -> Option<&FrameTreeNode> {
        self.nodes.get(&self.root)
    }

    pub fn node(&self, id: FrameTreeNodeId) -> Option<&FrameTreeNode> {
        self.nodes.get(&id)
    }

    pub(crate) fn node_mut(&mut self, id: FrameTreeNodeId) -> Option<&mut FrameTreeNode> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: FrameTreeNodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FrameTreeNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn delegate(&self) -> &Rc<dyn FrameTreeDelegate> {
        &self.delegate
    }

    /// Node ids in pre-order, starting at the root.
    pub fn nodes_in_order(&self) -> Vec<FrameTreeNodeId> {
        self.subtree(self.root)
    }

    /// `id` and all of its descendants, in pre-order.
    pub fn subtree(&self, id: FrameTreeNodeId) -> Vec<FrameTreeNodeId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(node) = self.nodes.get(&next) else {
                continue;
            };
            order.push(next);
            stack.extend(node.children.iter().rev());
        }
        order
    }

    pub fn find_by_name(&self, name: &str) -> Option<FrameTreeNodeId> {
        self.nodes_in_order()
            .into_iter()
            .find(|id| self.nodes.get(id).is_some_and(|node| node.frame_name() == name))
    }

    /// Whether walking up from `id` reaches `ancestor`. A node is not its own
    /// descendant, and a leaf is nobody's ancestor.
    pub fn is_descendant_of(&self, id: FrameTreeNodeId, ancestor: FrameTreeNodeId) -> bool {
        let Some(ancestor_node) = self.nodes.get(&ancestor) else {
            return false;
        };
        if ancestor_node.child_count() == 0 {
            return false;
        }

        let mut current = self.nodes.get(&id).and_then(|node| node.parent);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.nodes.get(&parent).and_then(|node| node.parent);
        }
        false
    }

    pub fn is_loading(&self) -> bool {
        self.nodes.values().any(FrameTreeNode::is_loading)
    }

    /// Aggregate progress last reported to the delegate.
    pub fn load_progress(&self) -> f64 {
        self.load_progress
    }

    pub(crate) fn reset_load_progress(&mut self) {
        for node in self.nodes.values_mut() {
            node.loading_progress = LOADING_PROGRESS_NOT_STARTED;
        }
        self.load_progress = 0.0;
    }

    /// Recomputes the average progress of the nodes that started loading.
    /// Returns the new aggregate if it increased.
    pub(crate) fn update_load_progress(&mut self) -> Option<f64> {
        let (sum, count) = self
            .nodes
            .values()
            .filter(|node| node.loading_progress != LOADING_PROGRESS_NOT_STARTED)
            .fold((0.0, 0usize), |(sum, count), node| {
                (sum + node.loading_progress, count + 1)
            });
        let progress = if count == 0 { 0.0 } else { sum / count as f64 };
        if progress <= self.load_progress {
            return None;
        }
        self.load_progress = progress;
        Some(progress)
    }
}

impl fmt::Debug for FrameTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameTree")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .field("load_progress", &self.load_progress)
            .finish()
    }
}
