use crate::envelope::RawMessage;
use crate::error::IpcError;
use crate::traits::Transport;
use actix::prelude::*;
use log::{error, info, trace, warn};
use tessera_core::ProcessId;
use tokio::sync::mpsc;

/// Actor owning the connection to one renderer process.
///
/// It runs the read/write loop over the transport, forwards every incoming
/// message to the handler tagged with the process it came from, accepts
/// outgoing messages, and reports status changes to its supervisor.
pub struct ConnectionActor {
    process_id: ProcessId,
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    message_handler: Recipient<IncomingMessage>,
    supervisor: Recipient<ConnectionStatusUpdate>,
    channel_capacity: usize,
    outgoing_tx: Option<mpsc::Sender<RawMessage>>,
    connection_task: Option<SpawnHandle>,
}

impl ConnectionActor {
    pub fn new(
        process_id: ProcessId,
        transport: Box<dyn Transport>,
        message_handler: Recipient<IncomingMessage>,
        supervisor: Recipient<ConnectionStatusUpdate>,
        channel_capacity: usize,
    ) -> Self {
        ConnectionActor {
            process_id,
            state: ConnectionState::Idle,
            transport: Some(transport),
            message_handler,
            supervisor,
            channel_capacity: channel_capacity.max(1),
            outgoing_tx: None,
            connection_task: None,
        }
    }

    fn start_connection_task(&mut self, ctx: &mut Context<Self>) {
        let Some(mut transport) = self.transport.take() else {
            warn!(
                "Connection task for {} already started ({:?}). Ignoring start request.",
                self.process_id, self.state
            );
            return;
        };

        let addr = ctx.address();
        let message_handler = self.message_handler.clone();
        let process_id = self.process_id;

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<RawMessage>(self.channel_capacity);
        self.outgoing_tx = Some(outgoing_tx);

        let connection_fut = async move {
            loop {
                tokio::select! {
                    maybe_msg_to_send = outgoing_rx.recv() => {
                        if let Some(msg_to_send) = maybe_msg_to_send {
                            trace!("Sending to {}: {}", process_id, msg_to_send.payload);
                            if let Err(e) = transport.send(msg_to_send).await {
                                error!("Send to {} failed: {}. Disconnecting.", process_id, e);
                                addr.do_send(TransportEvent::Disconnected(Some(e)));
                                break;
                            }
                        } else {
                            info!("Outgoing channel of {} closed, ending connection loop.", process_id);
                            addr.do_send(TransportEvent::Disconnected(None));
                            break;
                        }
                    },

                    receive_result = transport.receive() => {
                        match receive_result {
                            Some(Ok(raw)) => {
                                trace!("Received from {}: {}", process_id, raw.payload);
                                let incoming = IncomingMessage { process_id, raw };
                                let delivered = match message_handler.try_send(incoming) {
                                    Ok(()) => true,
                                    // A busy handler holds back reading from this renderer.
                                    Err(SendError::Full(incoming)) => {
                                        trace!("Message handler busy, {} waits.", process_id);
                                        message_handler.send(incoming).await.is_ok()
                                    }
                                    Err(SendError::Closed(_)) => false,
                                };
                                if !delivered {
                                    error!("Message handler for {} is gone. Disconnecting.", process_id);
                                    addr.do_send(TransportEvent::Disconnected(Some(
                                        IpcError::ChannelClosed("message handler disconnected".into()),
                                    )));
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                error!("Receive from {} failed: {}. Disconnecting.", process_id, e);
                                addr.do_send(TransportEvent::Disconnected(Some(e)));
                                break;
                            }
                            None => {
                                info!("{} closed its connection.", process_id);
                                addr.do_send(TransportEvent::Disconnected(None));
                                break;
                            }
                        }
                    }
                }
            }
            if let Err(e) = transport.disconnect().await {
                warn!("Error disconnecting from {}: {}", process_id, e);
            }
        };

        self.connection_task = Some(ctx.spawn(connection_fut.into_actor(self)));
    }

    fn notify_supervisor(&self, state: ConnectionState) {
        let update = ConnectionStatusUpdate {
            process_id: self.process_id,
            state,
        };
        if self.supervisor.try_send(update).is_err() {
            warn!(
                "Failed to send status update for {} to supervisor.",
                self.process_id
            );
        }
    }

    fn stop_connection_task(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.connection_task.take() {
            ctx.cancel_future(handle);
        }
        self.outgoing_tx.take();
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        if self.state == new_state {
            trace!("Ignoring redundant state update: {:?}", new_state);
            return;
        }
        info!(
            "Connection to {}: {:?} -> {:?}",
            self.process_id, self.state, new_state
        );
        self.state = new_state.clone();
        self.notify_supervisor(new_state);
    }
}

/// Lifecycle of a renderer connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Idle,
    Connected,
    Disconnecting,
    /// `Some(err)` when the connection failed, `None` for an orderly close.
    Disconnected(Option<IpcError>),
}

/// Queues raw bytes for the renderer.
#[derive(Message, Clone, Debug)]
#[rtype(result = "Result<(), IpcError>")]
pub struct SendMessage(pub RawMessage);

/// A message the renderer sent, tagged with the connection's process.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct IncomingMessage {
    pub process_id: ProcessId,
    pub raw: RawMessage,
}

/// Closes the connection, e.g. to terminate a misbehaving renderer.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct CloseConnection {
    pub reason: String,
}

#[derive(Message)]
#[rtype(result = "()")]
enum TransportEvent {
    Disconnected(Option<IpcError>),
}

/// Reported to the supervisor whenever a connection changes state.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct ConnectionStatusUpdate {
    pub process_id: ProcessId,
    pub state: ConnectionState,
}

impl Actor for ConnectionActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("ConnectionActor starting for {}", self.process_id);
        self.start_connection_task(ctx);
        self.set_state(ConnectionState::Connected);
    }

    fn stopping(&mut self, ctx: &mut Self::Context) -> Running {
        info!("ConnectionActor for {} stopping.", self.process_id);
        self.stop_connection_task(ctx);
        if !matches!(self.state, ConnectionState::Disconnected(_)) {
            self.set_state(ConnectionState::Disconnecting);
        }
        Running::Stop
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if !matches!(self.state, ConnectionState::Disconnected(_)) {
            self.set_state(ConnectionState::Disconnected(None));
        }
    }
}

impl Handler<TransportEvent> for ConnectionActor {
    type Result = ();

    fn handle(&mut self, msg: TransportEvent, ctx: &mut Context<Self>) {
        let TransportEvent::Disconnected(err) = msg;
        self.set_state(ConnectionState::Disconnected(err));
        self.stop_connection_task(ctx);
        ctx.stop();
    }
}

impl Handler<CloseConnection> for ConnectionActor {
    type Result = ();

    fn handle(&mut self, msg: CloseConnection, ctx: &mut Context<Self>) {
        warn!("Closing connection to {}: {}", self.process_id, msg.reason);
        ctx.stop();
    }
}

impl Handler<SendMessage> for ConnectionActor {
    type Result = ResponseFuture<Result<(), IpcError>>;

    fn handle(&mut self, msg: SendMessage, _ctx: &mut Context<Self>) -> Self::Result {
        let current_state = self.state.clone();
        let maybe_tx = self.outgoing_tx.clone();
        let process_id = self.process_id;

        Box::pin(async move {
            match (current_state, maybe_tx) {
                (ConnectionState::Connected, Some(tx)) => tx.send(msg.0).await.map_err(|e| {
                    error!("Outgoing channel of {} rejected a message: {}", process_id, e);
                    IpcError::SendFailed(format!("outgoing channel closed: {}", e))
                }),
                (state, _) => {
                    warn!(
                        "Attempted to send to {} while not connected (state: {:?})",
                        process_id, state
                    );
                    Err(IpcError::ChannelClosed(format!("state: {:?}", state)))
                }
            }
        })
    }
}
