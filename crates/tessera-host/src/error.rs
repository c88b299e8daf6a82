use crate::child_frames::ViewId;
use tessera_compositing::CompositingError;
use tessera_core::error::MailboxError;
use tessera_core::{ErrorClass, FrameRoute, FrameTreeError, FrameTreeNodeId};
use tessera_frame_tree::FrameTreeId;
use tessera_ipc::IpcError;
use thiserror::Error;

/// Errors surfaced by the browser-side frame coordination actors.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Frame tree error: {0}")]
    FrameTree(#[from] FrameTreeError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Compositing error: {0}")]
    Compositing(#[from] CompositingError),

    #[error("Actor mailbox error: {0}")]
    ActorMailbox(#[from] MailboxError),

    #[error("No frame is bound to {0}")]
    UnknownRoute(FrameRoute),

    #[error("Frame tree {0} does not exist")]
    UnknownTree(FrameTreeId),

    #[error("No child frame view {0:?}")]
    UnknownView(ViewId),

    #[error("{0} has no frame connector")]
    UnknownConnector(FrameTreeNodeId),

    #[error("{sender} may not act on {child}, which it does not embed")]
    NotEmbedder {
        sender: FrameRoute,
        child: FrameTreeNodeId,
    },

    #[error("Synchronous {0} arrived without a request id")]
    MissingRequestId(&'static str),
}

impl HostError {
    pub fn class(&self) -> ErrorClass {
        match self {
            HostError::FrameTree(e) => e.class(),
            HostError::Ipc(e) => e.class(),
            HostError::Compositing(e) => e.class(),
            HostError::ActorMailbox(_) => ErrorClass::ProcessDeath,
            HostError::UnknownRoute(_)
            | HostError::UnknownTree(_)
            | HostError::UnknownView(_)
            | HostError::UnknownConnector(_) => ErrorClass::GracefulAbsence,
            HostError::NotEmbedder { .. } | HostError::MissingRequestId(_) => {
                ErrorClass::ProtocolViolation
            }
        }
    }
}
