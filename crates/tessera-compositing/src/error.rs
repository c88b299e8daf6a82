use crate::surface::{SurfaceId, SurfaceSequence};
use tessera_core::ErrorClass;
use thiserror::Error;

/// Errors raised by the surface bookkeeping.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositingError {
    #[error("surface {0:?} does not exist")]
    UnknownSurface(SurfaceId),

    #[error("surface {0:?} already exists")]
    DuplicateSurface(SurfaceId),

    #[error("sequence {0:?} refers to an unregistered id namespace")]
    UnknownNamespace(SurfaceSequence),
}

impl CompositingError {
    pub fn class(&self) -> ErrorClass {
        match self {
            // Surface and sequence ids arrive from renderers; bad ones are their fault.
            CompositingError::UnknownSurface(_) | CompositingError::UnknownNamespace(_) => {
                ErrorClass::ProtocolViolation
            }
            CompositingError::DuplicateSurface(_) => ErrorClass::ResourceExhaustion,
        }
    }
}
