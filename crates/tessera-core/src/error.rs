use crate::ids::{FrameRoute, FrameTreeNodeId, ProcessId};
use thiserror::Error;

pub use actix::MailboxError;
pub use config::ConfigError;

/// How the dispatch layer should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The sending process misbehaved; report it to the bad-message sink.
    ProtocolViolation,
    /// The target is not there (yet, or any more); drop the operation.
    GracefulAbsence,
    /// A programming-level invariant broke; log loudly and refuse the operation.
    ResourceExhaustion,
    /// The peer process is gone.
    ProcessDeath,
}

/// Structural errors reported by frame tree mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameTreeError {
    #[error("frame tree node {0} not found")]
    NodeNotFound(FrameTreeNodeId),

    #[error("child of {parent} must be created in {expected}, but the request came from {actual}")]
    ProcessMismatch {
        parent: FrameTreeNodeId,
        expected: ProcessId,
        actual: ProcessId,
    },

    #[error("{child} is not a child of {parent}")]
    NotAChild {
        parent: FrameTreeNodeId,
        child: FrameTreeNodeId,
    },

    #[error("root node {0} cannot be removed by a frame message")]
    RootRemoval(FrameTreeNodeId),

    #[error("route {0} is already bound to a frame")]
    RouteInUse(FrameRoute),

    #[error("no frame is bound to route {0}")]
    RouteNotFound(FrameRoute),
}

impl FrameTreeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FrameTreeError::NodeNotFound(_) | FrameTreeError::RouteNotFound(_) => {
                ErrorClass::GracefulAbsence
            }
            FrameTreeError::ProcessMismatch { .. }
            | FrameTreeError::NotAChild { .. }
            | FrameTreeError::RootRemoval(_)
            | FrameTreeError::RouteInUse(_) => ErrorClass::ProtocolViolation,
        }
    }
}

/// Errors from the core crate itself (configuration and process setup).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration loading failed: {0}")]
    ConfigLoad(#[from] ConfigError),

    #[error("Logging setup failed: {0}")]
    LoggingSetup(String),

    #[error("Actor mailbox error: {0}")]
    ActorMailbox(#[from] MailboxError),

    #[error("Frame tree error: {0}")]
    FrameTree(#[from] FrameTreeError),
}
