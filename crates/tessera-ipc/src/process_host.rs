//! Outgoing side of the renderer connections.
//!
//! The browser's sequences never talk to a [`ConnectionActor`] directly; they
//! go through a [`ProcessHost`], which knows the live connections and how to
//! frame a [`FrameMsg`] for them.

use crate::connection::{CloseConnection, ConnectionActor, SendMessage};
use crate::envelope::{Envelope, encode};
use crate::error::IpcError;
use crate::messages::FrameMsg;
use actix::Addr;
use ipc_channel::ipc::IpcSharedMemory;
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use tessera_core::{FrameRoute, ProcessId, RoutingId};

/// A browser to renderer message before framing.
#[derive(Clone)]
pub struct OutgoingMessage {
    pub routing_id: RoutingId,
    pub request_id: Option<u64>,
    pub message: FrameMsg,
    pub handles: Vec<IpcSharedMemory>,
}

impl OutgoingMessage {
    pub fn new(routing_id: RoutingId, message: FrameMsg) -> Self {
        Self {
            routing_id,
            request_id: None,
            message,
            handles: Vec::new(),
        }
    }

    /// Addressed to the process rather than one of its frames.
    pub fn control(message: FrameMsg) -> Self {
        Self::new(RoutingId::NONE, message)
    }

    pub fn reply_to(mut self, request_id: Option<u64>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_handles(mut self, handles: Vec<IpcSharedMemory>) -> Self {
        self.handles = handles;
        self
    }
}

impl std::fmt::Debug for OutgoingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingMessage")
            .field("routing_id", &self.routing_id)
            .field("request_id", &self.request_id)
            .field("message", &self.message)
            .field("handles", &self.handles.len())
            .finish()
    }
}

/// Delivers messages to renderer processes and kills misbehaving ones.
pub trait ProcessHost: Send + Sync {
    fn send(&self, process_id: ProcessId, message: OutgoingMessage) -> Result<(), IpcError>;

    fn terminate(&self, process_id: ProcessId, reason: &str);

    fn is_connected(&self, process_id: ProcessId) -> bool;

    fn send_to(&self, route: FrameRoute, message: FrameMsg) -> Result<(), IpcError> {
        self.send(route.process_id, OutgoingMessage::new(route.routing_id, message))
    }
}

/// The live renderer connections, keyed by process.
pub struct ConnectionRegistry {
    protocol_version: u32,
    connections: RwLock<HashMap<ProcessId, Addr<ConnectionActor>>>,
}

impl ConnectionRegistry {
    pub fn new(protocol_version: u32) -> Self {
        Self {
            protocol_version,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, process_id: ProcessId, addr: Addr<ConnectionActor>) {
        if self.connections.write().insert(process_id, addr).is_some() {
            warn!("Replaced an existing connection for {}", process_id);
        }
    }

    pub fn unregister(&self, process_id: ProcessId) -> bool {
        self.connections.write().remove(&process_id).is_some()
    }

    pub fn connected_processes(&self) -> Vec<ProcessId> {
        let mut processes: Vec<_> = self.connections.read().keys().copied().collect();
        processes.sort();
        processes
    }
}

impl ProcessHost for ConnectionRegistry {
    fn send(&self, process_id: ProcessId, message: OutgoingMessage) -> Result<(), IpcError> {
        let addr = self
            .connections
            .read()
            .get(&process_id)
            .cloned()
            .ok_or(IpcError::UnknownProcess(process_id))?;

        let name = message.message.name();
        let mut envelope = Envelope::new(process_id, message.routing_id, message.message);
        envelope.version = self.protocol_version;
        envelope.request_id = message.request_id;
        let raw = encode(&envelope, message.handles)?;

        debug!("-> {} {} ({})", process_id, name, message.routing_id);
        addr.try_send(SendMessage(raw))
            .map_err(|e| IpcError::SendFailed(format!("{} to {}: {}", name, process_id, e)))
    }

    fn terminate(&self, process_id: ProcessId, reason: &str) {
        let Some(addr) = self.connections.write().remove(&process_id) else {
            debug!("{} already gone, nothing to terminate", process_id);
            return;
        };
        warn!("Terminating {}: {}", process_id, reason);
        addr.do_send(CloseConnection {
            reason: reason.to_string(),
        });
    }

    fn is_connected(&self, process_id: ProcessId) -> bool {
        self.connections
            .read()
            .get(&process_id)
            .is_some_and(Addr::connected)
    }
}
