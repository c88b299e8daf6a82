//! Browser process startup and the handle returned to embedders.

use crate::error::LaunchError;
use crate::supervisor::{
    ConnectRenderer, CoreActorsInfo, Shutdown, StartCoreActors, SupervisorActor,
};
use actix::prelude::*;
use log::{debug, info};
use std::sync::Arc;
use tessera_compositing::SharedBitmapRegistry;
use tessera_core::ProcessId;
use tessera_core::config::{self, Config};
use tessera_core::logging;
use tessera_host::{BadMessageSink, BrowserCore, RenderMessageRouter};
use tessera_ipc::{ConnectionRegistry, Transport};

/// Starts the browser side of frame coordination on the current actix system.
///
/// # Arguments
/// * `config` - Optional pre-loaded configuration. If None, calls `load_config()`.
///
/// # Returns
/// A [`BrowserProcess`] handle for attaching renderers and driving the frame trees.
pub async fn launch(config: Option<Config>) -> Result<BrowserProcess, LaunchError> {
    let cfg = match config {
        Some(c) => c,
        None => config::load_config()?,
    };

    if let Err(e) = logging::setup_logging(&cfg.global.log_level) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    info!("Tessera browser process starting...");
    debug!("Loaded configuration: {:?}", cfg);

    if System::try_current().is_none() {
        return Err(LaunchError::NoActorSystem);
    }

    let connections = Arc::new(ConnectionRegistry::new(cfg.ipc.protocol_version));
    let shared_bitmaps = SharedBitmapRegistry::new();
    let supervisor =
        SupervisorActor::new(cfg, connections.clone(), shared_bitmaps.clone()).start();

    let actors = supervisor.send(StartCoreActors).await??;
    info!("Tessera browser process ready.");

    Ok(BrowserProcess {
        supervisor,
        actors,
        connections,
        shared_bitmaps,
    })
}

/// A running browser process.
///
/// Cloning shares the same actors.
#[derive(Clone)]
pub struct BrowserProcess {
    supervisor: Addr<SupervisorActor>,
    actors: CoreActorsInfo,
    connections: Arc<ConnectionRegistry>,
    shared_bitmaps: Arc<SharedBitmapRegistry>,
}

impl BrowserProcess {
    /// Starts pumping a renderer's transport. Its messages reach the router
    /// tagged with `process_id`.
    pub async fn connect_renderer<T>(
        &self,
        process_id: ProcessId,
        transport: T,
    ) -> Result<(), LaunchError>
    where
        T: Transport + 'static,
    {
        self.supervisor
            .send(ConnectRenderer {
                process_id,
                transport: Box::new(transport),
            })
            .await?
    }

    /// The UI sequence owning the frame trees.
    pub fn core(&self) -> &Addr<BrowserCore> {
        &self.actors.core
    }

    /// The IO sequence every renderer message passes through.
    pub fn router(&self) -> &Addr<RenderMessageRouter> {
        &self.actors.router
    }

    pub fn bad_messages(&self) -> &Addr<BadMessageSink> {
        &self.actors.bad_messages
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn shared_bitmaps(&self) -> &Arc<SharedBitmapRegistry> {
        &self.shared_bitmaps
    }

    /// Closes every renderer connection.
    pub async fn shutdown(&self) -> Result<(), LaunchError> {
        info!("Tessera browser process shutting down.");
        self.supervisor.send(Shutdown).await?;
        Ok(())
    }
}
