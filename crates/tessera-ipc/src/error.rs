use tessera_core::{ErrorClass, ProcessId};
use thiserror::Error;

/// Errors of the renderer connection layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IpcError {
    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Malformed message: {0}")]
    Decode(String),

    #[error("Protocol version {actual} does not match {expected}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Message on the connection of {connection} claims to come from {claimed}")]
    ProcessScopeMismatch {
        connection: ProcessId,
        claimed: ProcessId,
    },

    #[error("Message references missing handle #{0}")]
    MissingHandle(usize),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("No connection to {0}")]
    UnknownProcess(ProcessId),

    #[error("Connection closed: {0}")]
    ChannelClosed(String),

    #[error("Send operation failed: {0}")]
    SendFailed(String),
}

impl IpcError {
    pub fn class(&self) -> ErrorClass {
        match self {
            IpcError::Decode(_)
            | IpcError::VersionMismatch { .. }
            | IpcError::ProcessScopeMismatch { .. }
            | IpcError::MissingHandle(_)
            | IpcError::UnexpectedMessage(_) => ErrorClass::ProtocolViolation,
            IpcError::UnknownProcess(_) => ErrorClass::GracefulAbsence,
            IpcError::ChannelClosed(_) | IpcError::SendFailed(_) => ErrorClass::ProcessDeath,
            IpcError::Encode(_) => ErrorClass::ResourceExhaustion,
        }
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        IpcError::Decode(err.to_string())
    }
}
