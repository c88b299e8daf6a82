//! The browser's IO sequence.
//!
//! Every message a renderer sends arrives here first. The envelope is
//! checked against the connection it came in on; shared bitmap traffic is
//! answered on the spot, so a renderer blocked on an allocation never waits
//! for the main sequence. Everything else is forwarded to [`BrowserCore`].
//!
//! [`BrowserCore`]: crate::browser_core::BrowserCore

use crate::bad_message::BadMessage;
use crate::messages::{RenderProcessGone, RouteFrameMessage};
use actix::prelude::*;
use ipc_channel::ipc::IpcSharedMemory;
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tessera_compositing::{SharedBitmapId, SharedBitmapManagerClient, SharedBitmapRegistry};
use tessera_core::{ErrorClass, ProcessId, RoutingId};
use tessera_ipc::{
    Decoded, Envelope, FrameHostMsg, FrameMsg, HandleIndex, IncomingMessage, IpcError,
    OutgoingMessage, ProcessHost, TerminationStatus, decode,
};

/// The renderer's connection is gone. Whatever it owned is released, and
/// the core hears of the death after every message the process sent.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct ProcessGone {
    pub process_id: ProcessId,
    pub status: TerminationStatus,
}

#[derive(Message, Debug)]
#[rtype(result = "usize")]
pub struct GetOwnedBitmapCount {
    pub process_id: ProcessId,
}

pub struct RenderMessageRouter {
    protocol_version: u32,
    mailbox_capacity: usize,
    core: Recipient<RouteFrameMessage>,
    process_gone: Recipient<RenderProcessGone>,
    bad_messages: Recipient<BadMessage>,
    host: Arc<dyn ProcessHost>,
    bitmaps: Arc<SharedBitmapRegistry>,
    clients: HashMap<ProcessId, SharedBitmapManagerClient>,
}

impl RenderMessageRouter {
    pub fn new(
        protocol_version: u32,
        mailbox_capacity: usize,
        core: Recipient<RouteFrameMessage>,
        process_gone: Recipient<RenderProcessGone>,
        bad_messages: Recipient<BadMessage>,
        host: Arc<dyn ProcessHost>,
        bitmaps: Arc<SharedBitmapRegistry>,
    ) -> Self {
        Self {
            protocol_version,
            mailbox_capacity,
            core,
            process_gone,
            bad_messages,
            host,
            bitmaps,
            clients: HashMap::new(),
        }
    }

    fn client(&mut self, process_id: ProcessId) -> &SharedBitmapManagerClient {
        let bitmaps = &self.bitmaps;
        self.clients
            .entry(process_id)
            .or_insert_with(|| SharedBitmapManagerClient::new(process_id, bitmaps.clone()))
    }

    fn route(
        &mut self,
        process_id: ProcessId,
        mut decoded: Decoded<FrameHostMsg>,
    ) -> Result<(), IpcError> {
        if let FrameHostMsg::AllocatedSharedBitmap {
            byte_size,
            handle,
            id,
        } = decoded.envelope.message
        {
            let memory = decoded.take_handle(handle)?;
            self.client(process_id)
                .child_allocated_shared_bitmap(byte_size, memory, id);
            return Ok(());
        }

        let Envelope {
            routing_id,
            request_id,
            message,
            ..
        } = decoded.envelope;
        match message {
            FrameHostMsg::AllocateSharedBitmap { byte_size, id } => {
                let request_id = request_id.ok_or_else(|| {
                    IpcError::UnexpectedMessage("AllocateSharedBitmap without a request id".into())
                })?;
                let handle = self
                    .client(process_id)
                    .allocate_shared_bitmap_for_child(byte_size, id);
                self.reply_allocated(process_id, routing_id, request_id, id, handle)
            }
            FrameHostMsg::DeletedSharedBitmap { id } => {
                self.client(process_id).deleted_shared_bitmap(id);
                Ok(())
            }
            message => {
                self.core.do_send(RouteFrameMessage {
                    process_id,
                    routing_id,
                    request_id,
                    message,
                });
                Ok(())
            }
        }
    }

    fn reply_allocated(
        &self,
        process_id: ProcessId,
        routing_id: RoutingId,
        request_id: u64,
        id: SharedBitmapId,
        handle: Option<IpcSharedMemory>,
    ) -> Result<(), IpcError> {
        // A refused allocation is answered too; the renderer is blocked on it.
        let reply = FrameMsg::SharedBitmapAllocated {
            id,
            handle: handle.as_ref().map(|_| HandleIndex(0)),
        };
        let outgoing = OutgoingMessage::new(routing_id, reply)
            .reply_to(Some(request_id))
            .with_handles(handle.into_iter().collect());
        self.host.send(process_id, outgoing)
    }
}

impl Actor for RenderMessageRouter {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        ctx.set_mailbox_capacity(self.mailbox_capacity);
        info!("RenderMessageRouter started.");
    }

    fn stopped(&mut self, _ctx: &mut Context<Self>) {
        for (_, client) in self.clients.drain() {
            client.release_all();
        }
        info!("RenderMessageRouter stopped.");
    }
}

impl Handler<IncomingMessage> for RenderMessageRouter {
    type Result = ();

    fn handle(&mut self, msg: IncomingMessage, _ctx: &mut Context<Self>) {
        let process_id = msg.process_id;
        let result = decode::<FrameHostMsg>(msg.raw, process_id, self.protocol_version)
            .and_then(|decoded| {
                trace!(
                    "<- {} {} ({})",
                    process_id,
                    decoded.envelope.message.name(),
                    decoded.envelope.routing_id
                );
                self.route(process_id, decoded)
            });
        if let Err(e) = result {
            if e.class() != ErrorClass::ProtocolViolation {
                warn!("Could not answer {}: {}", process_id, e);
                return;
            }
            self.bad_messages.do_send(BadMessage {
                process_id,
                reason: e.to_string(),
            });
        }
    }
}

impl Handler<ProcessGone> for RenderMessageRouter {
    type Result = ();

    fn handle(&mut self, msg: ProcessGone, _ctx: &mut Context<Self>) {
        match self.clients.remove(&msg.process_id) {
            Some(client) => {
                debug!("Releasing shared bitmaps of {}", msg.process_id);
                client.release_all();
            }
            None => trace!("{} held no shared bitmaps", msg.process_id),
        }
        self.process_gone.do_send(RenderProcessGone {
            process_id: msg.process_id,
            status: msg.status,
        });
    }
}

impl Handler<GetOwnedBitmapCount> for RenderMessageRouter {
    type Result = usize;

    fn handle(&mut self, msg: GetOwnedBitmapCount, _ctx: &mut Context<Self>) -> usize {
        self.clients
            .get(&msg.process_id)
            .map_or(0, SharedBitmapManagerClient::owned_bitmap_count)
    }
}
