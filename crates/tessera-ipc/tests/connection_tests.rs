use actix::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tessera_core::{FrameTreeNodeId, PROTOCOL_VERSION, ProcessId, RoutingId};
use tessera_ipc::{
    ChannelTransport, ConnectionActor, ConnectionRegistry, ConnectionState, ConnectionStatusUpdate,
    Envelope, FrameHostMsg, FrameMsg, IncomingMessage, IpcError, OutgoingMessage, ProcessHost,
    RawMessage, SendMessage, Transport, decode, encode,
};

const RENDERER: ProcessId = ProcessId(4);

#[derive(Default)]
struct Seen {
    incoming: Vec<IncomingMessage>,
    statuses: Vec<ConnectionStatusUpdate>,
}

struct Collector {
    seen: Arc<Mutex<Seen>>,
}

impl Actor for Collector {
    type Context = Context<Self>;
}

impl Handler<IncomingMessage> for Collector {
    type Result = ();

    fn handle(&mut self, msg: IncomingMessage, _ctx: &mut Context<Self>) {
        self.seen.lock().unwrap().incoming.push(msg);
    }
}

impl Handler<ConnectionStatusUpdate> for Collector {
    type Result = ();

    fn handle(&mut self, msg: ConnectionStatusUpdate, _ctx: &mut Context<Self>) {
        self.seen.lock().unwrap().statuses.push(msg);
    }
}

fn start_connection(
    seen: &Arc<Mutex<Seen>>,
) -> (Addr<ConnectionActor>, ChannelTransport) {
    let (browser_end, renderer_end) = ChannelTransport::pair(8);
    let collector = Collector { seen: seen.clone() }.start();
    let connection = ConnectionActor::new(
        RENDERER,
        Box::new(browser_end),
        collector.clone().recipient(),
        collector.recipient(),
        8,
    )
    .start();
    (connection, renderer_end)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[actix_rt::test]
async fn incoming_messages_are_tagged_with_their_process() {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let (_connection, mut renderer) = start_connection(&seen);

    let envelope = Envelope::new(RENDERER, RoutingId(1), FrameHostMsg::DidStopLoading);
    renderer
        .send(encode(&envelope, Vec::new()).unwrap())
        .await
        .unwrap();

    wait_until(|| !seen.lock().unwrap().incoming.is_empty()).await;
    let incoming = seen.lock().unwrap().incoming.remove(0);
    assert_eq!(incoming.process_id, RENDERER);
    let decoded = decode::<FrameHostMsg>(incoming.raw, RENDERER, PROTOCOL_VERSION).unwrap();
    assert_eq!(decoded.envelope.message, FrameHostMsg::DidStopLoading);
}

#[actix_rt::test]
async fn outgoing_messages_reach_the_renderer() {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let (connection, mut renderer) = start_connection(&seen);

    connection
        .send(SendMessage(RawMessage::text("hello")))
        .await
        .unwrap()
        .unwrap();
    let got = renderer.receive().await.unwrap().unwrap();
    assert_eq!(got.payload, "hello");
}

#[actix_rt::test]
async fn renderer_hangup_is_reported_to_the_supervisor() {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let (connection, renderer) = start_connection(&seen);
    drop(renderer);

    wait_until(|| {
        seen.lock()
            .unwrap()
            .statuses
            .iter()
            .any(|s| s.state == ConnectionState::Disconnected(None))
    })
    .await;
    let states: Vec<_> = seen
        .lock()
        .unwrap()
        .statuses
        .iter()
        .map(|s| (s.process_id, s.state.clone()))
        .collect();
    assert_eq!(states[0], (RENDERER, ConnectionState::Connected));
    wait_until(|| !connection.connected()).await;

    let err = connection
        .send(SendMessage(RawMessage::text("late")))
        .await;
    assert!(err.is_err());
}

#[actix_rt::test]
async fn registry_frames_messages_for_the_target_process() {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let (connection, mut renderer) = start_connection(&seen);
    let registry = ConnectionRegistry::new(PROTOCOL_VERSION);
    registry.register(RENDERER, connection);
    assert!(registry.is_connected(RENDERER));

    registry
        .send(
            RENDERER,
            OutgoingMessage::new(
                RoutingId(9),
                FrameMsg::ChildFrameCreated {
                    frame_tree_node_id: FrameTreeNodeId(2),
                },
            )
            .reply_to(Some(11)),
        )
        .unwrap();

    let raw = renderer.receive().await.unwrap().unwrap();
    let decoded = decode::<FrameMsg>(raw, RENDERER, PROTOCOL_VERSION).unwrap();
    assert_eq!(decoded.envelope.routing_id, RoutingId(9));
    assert_eq!(decoded.envelope.request_id, Some(11));

    assert_eq!(
        registry
            .send(ProcessId(99), OutgoingMessage::control(FrameMsg::DeleteFrame))
            .unwrap_err(),
        IpcError::UnknownProcess(ProcessId(99))
    );
}

#[actix_rt::test]
async fn terminate_closes_the_connection() {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let (connection, mut renderer) = start_connection(&seen);
    let registry = ConnectionRegistry::new(PROTOCOL_VERSION);
    registry.register(RENDERER, connection);

    registry.terminate(RENDERER, "bad message");
    assert!(!registry.is_connected(RENDERER));
    assert!(registry.connected_processes().is_empty());
    assert!(renderer.receive().await.is_none());
}

/// Records payloads through a mailbox that holds a single message.
struct NarrowHandler {
    payloads: Arc<Mutex<Vec<String>>>,
}

impl Actor for NarrowHandler {
    type Context = Context<Self>;
}

impl Handler<IncomingMessage> for NarrowHandler {
    type Result = ();

    fn handle(&mut self, msg: IncomingMessage, _ctx: &mut Context<Self>) {
        self.payloads.lock().unwrap().push(msg.raw.payload);
    }
}

#[actix_rt::test]
async fn a_busy_handler_slows_the_renderer_down_instead_of_dropping_it() {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let handler = NarrowHandler::create({
        let payloads = payloads.clone();
        |ctx| {
            ctx.set_mailbox_capacity(1);
            NarrowHandler { payloads }
        }
    });
    let status = Collector { seen: seen.clone() }.start();
    let (browser_end, mut renderer) = ChannelTransport::pair(32);
    let _connection = ConnectionActor::new(
        RENDERER,
        Box::new(browser_end),
        handler.recipient(),
        status.recipient(),
        8,
    )
    .start();

    let sent: Vec<String> = (0..32).map(|i| format!("burst {}", i)).collect();
    for payload in &sent {
        renderer
            .send(RawMessage::text(payload.as_str()))
            .await
            .unwrap();
    }

    wait_until(|| payloads.lock().unwrap().len() == sent.len()).await;
    assert_eq!(*payloads.lock().unwrap(), sent);
    let statuses = seen.lock().unwrap();
    assert!(
        statuses
            .statuses
            .iter()
            .all(|s| s.state == ConnectionState::Connected)
    );
}
