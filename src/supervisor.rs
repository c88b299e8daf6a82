//! The top-level actor wiring the browser's sequences together.

use crate::error::LaunchError;
use actix::prelude::*;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tessera_compositing::SharedBitmapRegistry;
use tessera_core::{Config, ProcessId};
use tessera_host::{BadMessageSink, BrowserCore, ProcessGone, RenderMessageRouter};
use tessera_ipc::{
    ConnectionActor, ConnectionRegistry, ConnectionState, ConnectionStatusUpdate, ProcessHost,
    TerminationStatus, Transport,
};

/// Starts the sink, the browser core and the router.
#[derive(Message)]
#[rtype(result = "Result<CoreActorsInfo, LaunchError>")]
pub struct StartCoreActors;

#[derive(Clone)]
pub struct CoreActorsInfo {
    pub bad_messages: Addr<BadMessageSink>,
    pub core: Addr<BrowserCore>,
    pub router: Addr<RenderMessageRouter>,
}

/// Attaches a renderer's transport and starts pumping it.
#[derive(Message)]
#[rtype(result = "Result<(), LaunchError>")]
pub struct ConnectRenderer {
    pub process_id: ProcessId,
    pub transport: Box<dyn Transport>,
}

/// Closes every renderer connection and stops the supervisor.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

pub struct SupervisorActor {
    config: Config,
    connections: Arc<ConnectionRegistry>,
    bitmaps: Arc<SharedBitmapRegistry>,
    core_actors: Option<CoreActorsInfo>,
    // Renderers whose disconnection has not been handled yet.
    live: HashSet<ProcessId>,
}

impl SupervisorActor {
    pub fn new(
        config: Config,
        connections: Arc<ConnectionRegistry>,
        bitmaps: Arc<SharedBitmapRegistry>,
    ) -> Self {
        info!("SupervisorActor created.");
        SupervisorActor {
            config,
            connections,
            bitmaps,
            core_actors: None,
            live: HashSet::new(),
        }
    }

    fn renderer_gone(&mut self, process_id: ProcessId, status: TerminationStatus) {
        if !self.live.remove(&process_id) {
            debug!("{} already handled as gone", process_id);
            return;
        }
        self.connections.unregister(process_id);
        // The router forwards the death to the core behind the messages it
        // already holds from this process.
        if let Some(actors) = &self.core_actors {
            actors.router.do_send(ProcessGone { process_id, status });
        }
    }
}

impl Actor for SupervisorActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!("SupervisorActor started.");
    }

    fn stopping(&mut self, _ctx: &mut Context<Self>) -> Running {
        info!("SupervisorActor stopping.");
        for process_id in self.connections.connected_processes() {
            self.connections.terminate(process_id, "browser shutting down");
        }
        self.core_actors = None;
        Running::Stop
    }
}

impl Handler<StartCoreActors> for SupervisorActor {
    type Result = Result<CoreActorsInfo, LaunchError>;

    fn handle(&mut self, _msg: StartCoreActors, _ctx: &mut Context<Self>) -> Self::Result {
        if let Some(actors) = &self.core_actors {
            warn!("Core actors already started. Ignoring request.");
            return Ok(actors.clone());
        }

        info!("Supervisor starting core actors...");
        let bad_messages = BadMessageSink::new(
            self.connections.clone(),
            self.config.ipc.terminate_misbehaving_processes,
        )
        .start();

        let core = BrowserCore::new(
            &self.config,
            self.connections.clone(),
            bad_messages.clone().recipient(),
        )
        .start();

        let router = RenderMessageRouter::new(
            self.config.ipc.protocol_version,
            self.config.actor_system.mailbox_capacity,
            core.clone().recipient(),
            core.clone().recipient(),
            bad_messages.clone().recipient(),
            self.connections.clone(),
            self.bitmaps.clone(),
        )
        .start();

        let actors = CoreActorsInfo {
            bad_messages,
            core,
            router,
        };
        self.core_actors = Some(actors.clone());
        Ok(actors)
    }
}

impl Handler<ConnectRenderer> for SupervisorActor {
    type Result = Result<(), LaunchError>;

    fn handle(&mut self, msg: ConnectRenderer, ctx: &mut Context<Self>) -> Self::Result {
        let router = self
            .core_actors
            .as_ref()
            .map(|actors| actors.router.clone())
            .ok_or(LaunchError::NotStarted)?;
        if self.live.contains(&msg.process_id) {
            return Err(LaunchError::AlreadyConnected(msg.process_id));
        }

        let connection = ConnectionActor::new(
            msg.process_id,
            msg.transport,
            router.recipient(),
            ctx.address().recipient(),
            self.config.ipc.channel_capacity,
        )
        .start();
        self.connections.register(msg.process_id, connection);
        self.live.insert(msg.process_id);
        info!("Renderer {} connected.", msg.process_id);
        Ok(())
    }
}

impl Handler<ConnectionStatusUpdate> for SupervisorActor {
    type Result = ();

    fn handle(&mut self, msg: ConnectionStatusUpdate, _ctx: &mut Context<Self>) {
        match msg.state {
            ConnectionState::Disconnected(Some(ref err)) => {
                warn!("Connection to {} failed: {}", msg.process_id, err);
                self.renderer_gone(msg.process_id, TerminationStatus::AbnormalTermination);
            }
            ConnectionState::Disconnected(None) => {
                info!("Connection to {} closed.", msg.process_id);
                self.renderer_gone(msg.process_id, TerminationStatus::NormalTermination);
            }
            ref state => debug!("Connection to {} is {:?}", msg.process_id, state),
        }
    }
}

impl Handler<Shutdown> for SupervisorActor {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Context<Self>) {
        ctx.stop();
    }
}
