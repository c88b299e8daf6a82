//! # Tessera Compositing
//!
//! The compositor-side contract between child frame views and the display
//! compositor: the frame model, surfaces with their destruction
//! dependencies, and the shared bitmap registry renderers raster into.

pub mod bitmap_client;
pub mod error;
pub mod frame;
pub mod shared_bitmap;
pub mod surface;

pub use bitmap_client::SharedBitmapManagerClient;
pub use error::CompositingError;
pub use frame::{CompositorFrame, ReturnedResource, TransferableResource};
pub use shared_bitmap::{SharedBitmap, SharedBitmapId, SharedBitmapRegistry};
pub use surface::{
    CompletedDraw, DrawCallback, DrawStatus, SurfaceId, SurfaceIdAllocator, SurfaceManager,
    SurfaceSequence, SurfaceUpdates,
};
