//! Errors of the launch and wiring logic.

use actix::MailboxError;
use tessera_core::{CoreError, ProcessId};
use tessera_host::HostError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Configuration loading failed: {0}")]
    ConfigError(#[from] CoreError),

    #[error("No actix system is running on this thread")]
    NoActorSystem,

    #[error("Supervisor actor failed: {0}")]
    SupervisorError(#[from] MailboxError),

    #[error("Core actors have not been started")]
    NotStarted,

    #[error("{0} is already connected")]
    AlreadyConnected(ProcessId),

    #[error(transparent)]
    Host(#[from] HostError),
}
