//! Geometry aliases used across the IPC boundary.
//!
//! Frame rectangles and surface sizes are in integer device-independent
//! pixels; scroll offsets keep fractional precision.

use euclid::default;

pub type Rect = default::Rect<i32>;
pub type Size = default::Size2D<i32>;
pub type Point = default::Point2D<i32>;
pub type ScrollOffset = default::Vector2D<f32>;

/// Screen properties reported by the embedder's view.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScreenInfo {
    pub device_scale_factor: f32,
    pub depth: u32,
    pub rect: Rect,
    pub available_rect: Rect,
}

impl Default for ScreenInfo {
    fn default() -> Self {
        Self {
            device_scale_factor: 1.0,
            depth: 24,
            rect: Rect::zero(),
            available_rect: Rect::zero(),
        }
    }
}
