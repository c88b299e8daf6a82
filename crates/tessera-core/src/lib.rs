//! # Tessera Core
//!
//! Identifiers, geometry, the error taxonomy, configuration and logging
//! setup shared by every tessera crate.

pub mod config;
pub mod error;
pub mod geometry;
pub mod ids;
pub mod logging;

pub use config::{Config, PROTOCOL_VERSION};
pub use error::{CoreError, ErrorClass, FrameTreeError};
pub use ids::{FrameRoute, FrameTreeNodeId, ProcessId, RoutingId};
