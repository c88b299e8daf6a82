//! Identifiers shared by every layer of the browser process.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one renderer (or the browser) process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

/// Per-process routing id of a frame, frame proxy or widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoutingId(pub i32);

impl RoutingId {
    /// Addresses a process as a whole rather than one of its frames.
    pub const NONE: RoutingId = RoutingId(-2);
}

/// Process-wide unique id of a frame tree node. Allocated monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameTreeNodeId(pub u32);

/// A (process, routing id) pair naming one IPC endpoint across the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameRoute {
    pub process_id: ProcessId,
    pub routing_id: RoutingId,
}

impl FrameRoute {
    pub fn new(process_id: ProcessId, routing_id: RoutingId) -> Self {
        Self {
            process_id,
            routing_id,
        }
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process#{}", self.0)
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route#{}", self.0)
    }
}

impl fmt::Display for FrameTreeNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl fmt::Display for FrameRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.process_id, self.routing_id)
    }
}
