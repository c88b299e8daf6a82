//! The compositor frame model exchanged between renderers and the browser.
//!
//! Only the parts the frame coordination layer inspects are modelled: the
//! root render pass geometry, the scale factor and the resources a frame
//! references.

use crate::shared_bitmap::SharedBitmapId;
use serde::{Deserialize, Serialize};
use tessera_core::geometry::{Rect, ScrollOffset, Size};

/// Renderer-assigned id of a transferable resource. Unique per output surface.
pub type ResourceId = u32;

/// A resource (texture or shared bitmap) lent to the browser compositor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferableResource {
    pub id: ResourceId,
    pub size: Size,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_bitmap_id: Option<SharedBitmapId>,
}

/// A resource handed back to the renderer once no frame references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnedResource {
    pub id: ResourceId,
    pub count: u32,
    pub lost: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderPass {
    pub id: u64,
    pub output_rect: Rect,
    pub damage_rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DelegatedFrameData {
    pub resource_list: Vec<TransferableResource>,
    /// Render passes in draw order; the last one is the root pass.
    pub render_pass_list: Vec<RenderPass>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub device_scale_factor: f32,
    pub root_scroll_offset: ScrollOffset,
}

impl Default for FrameMetadata {
    fn default() -> Self {
        Self {
            device_scale_factor: 1.0,
            root_scroll_offset: ScrollOffset::zero(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompositorFrame {
    pub metadata: FrameMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_frame_data: Option<DelegatedFrameData>,
}

impl CompositorFrame {
    /// A delegated frame with a single root pass covering `size`.
    pub fn with_root_pass(size: Size, device_scale_factor: f32) -> Self {
        let output_rect = Rect::from_size(size);
        Self {
            metadata: FrameMetadata {
                device_scale_factor,
                ..FrameMetadata::default()
            },
            delegated_frame_data: Some(DelegatedFrameData {
                resource_list: Vec::new(),
                render_pass_list: vec![RenderPass {
                    id: 1,
                    output_rect,
                    damage_rect: output_rect,
                }],
            }),
        }
    }

    pub fn with_resources(mut self, resources: Vec<TransferableResource>) -> Self {
        self.delegated_frame_data
            .get_or_insert_with(DelegatedFrameData::default)
            .resource_list = resources;
        self
    }

    pub fn root_pass(&self) -> Option<&RenderPass> {
        self.delegated_frame_data
            .as_ref()
            .and_then(|data| data.render_pass_list.last())
    }

    pub fn resources(&self) -> &[TransferableResource] {
        self.delegated_frame_data
            .as_ref()
            .map(|data| data.resource_list.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_pass_is_the_last_pass() {
        let mut frame = CompositorFrame::with_root_pass(Size::new(100, 50), 2.0);
        let data = frame.delegated_frame_data.as_mut().unwrap();
        data.render_pass_list.insert(
            0,
            RenderPass {
                id: 7,
                output_rect: Rect::from_size(Size::new(10, 10)),
                damage_rect: Rect::zero(),
            },
        );
        assert_eq!(frame.root_pass().unwrap().id, 1);
        assert_eq!(frame.root_pass().unwrap().output_rect.size, Size::new(100, 50));
    }

    #[test]
    fn frames_without_delegated_data_have_no_root_pass() {
        let frame = CompositorFrame::default();
        assert!(frame.root_pass().is_none());
        assert!(frame.resources().is_empty());
    }
}
