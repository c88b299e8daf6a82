//! Framing of messages on a renderer connection.
//!
//! Every message is a JSON [`Envelope`] plus an ordered list of shared memory
//! handles sent alongside it. Decoding checks the protocol version and the
//! sender's process before looking at the message body, so a peer speaking
//! another version is reported as such rather than as a malformed message.

use crate::error::IpcError;
use crate::messages::HandleIndex;
use ipc_channel::ipc::IpcSharedMemory;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_core::{PROTOCOL_VERSION, ProcessId, RoutingId};

/// Bytes as they cross a connection.
#[derive(Clone, Default)]
pub struct RawMessage {
    pub payload: String,
    pub handles: Vec<IpcSharedMemory>,
}

impl RawMessage {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            handles: Vec::new(),
        }
    }
}

impl fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMessage")
            .field("payload", &self.payload)
            .field("handles", &self.handles.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<M> {
    pub version: u32,
    /// Renderer the message is from (host messages) or for (frame messages).
    pub process_id: ProcessId,
    pub routing_id: RoutingId,
    /// Set on synchronous requests and echoed on their replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub message: M,
}

impl<M> Envelope<M> {
    pub fn new(process_id: ProcessId, routing_id: RoutingId, message: M) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            process_id,
            routing_id,
            request_id: None,
            message,
        }
    }

    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

#[derive(Deserialize)]
struct Header {
    version: u32,
    process_id: ProcessId,
}

pub fn encode<M: Serialize>(
    envelope: &Envelope<M>,
    handles: Vec<IpcSharedMemory>,
) -> Result<RawMessage, IpcError> {
    let payload =
        serde_json::to_string(envelope).map_err(|e| IpcError::Encode(e.to_string()))?;
    Ok(RawMessage { payload, handles })
}

/// A decoded envelope whose attached handles can be claimed by index.
pub struct Decoded<M> {
    pub envelope: Envelope<M>,
    handles: Vec<Option<IpcSharedMemory>>,
}

impl<M> Decoded<M> {
    /// Takes the handle at `index`. Each handle can be taken once.
    pub fn take_handle(&mut self, index: HandleIndex) -> Result<IpcSharedMemory, IpcError> {
        self.handles
            .get_mut(index.0)
            .and_then(Option::take)
            .ok_or(IpcError::MissingHandle(index.0))
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }
}

impl<M: fmt::Debug> fmt::Debug for Decoded<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoded")
            .field("envelope", &self.envelope)
            .field("handles", &self.handles.len())
            .finish()
    }
}

/// Decodes a message received on the connection of `connection`.
pub fn decode<M: DeserializeOwned>(
    raw: RawMessage,
    connection: ProcessId,
    expected_version: u32,
) -> Result<Decoded<M>, IpcError> {
    let header: Header = serde_json::from_str(&raw.payload)?;
    if header.version != expected_version {
        return Err(IpcError::VersionMismatch {
            expected: expected_version,
            actual: header.version,
        });
    }
    if header.process_id != connection {
        return Err(IpcError::ProcessScopeMismatch {
            connection,
            claimed: header.process_id,
        });
    }

    let envelope: Envelope<M> = serde_json::from_str(&raw.payload)?;
    Ok(Decoded {
        envelope,
        handles: raw.handles.into_iter().map(Some).collect(),
    })
}
