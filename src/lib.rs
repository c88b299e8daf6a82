//! # Tessera
//!
//! Browser-process coordination of out-of-process child frames.
//!
//! [`launch`] starts the actors on the current actix system and returns a
//! [`BrowserProcess`]. Renderers are attached with
//! [`BrowserProcess::connect_renderer`]; from then on the router answers
//! shared bitmap traffic and forwards frame messages to the browser core,
//! which keeps the frame trees and pairs cross-process children with the
//! views drawing them.

pub mod error;
pub mod launch;
pub mod supervisor;

pub use error::LaunchError;
pub use launch::{BrowserProcess, launch};
pub use supervisor::{ConnectRenderer, CoreActorsInfo, StartCoreActors, SupervisorActor};
