use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Features an iframe's `sandbox` attribute takes away from the framed document.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
    pub struct SandboxFlags: u32 {
        const NAVIGATION = 1 << 0;
        const PLUGINS = 1 << 1;
        const ORIGIN = 1 << 2;
        const FORMS = 1 << 3;
        const SCRIPTS = 1 << 4;
        const TOP_NAVIGATION = 1 << 5;
        const POPUPS = 1 << 6;
        const AUTOMATIC_FEATURES = 1 << 7;
        const POINTER_LOCK = 1 << 8;
        const DOCUMENT_DOMAIN = 1 << 9;
        const ORIENTATION_LOCK = 1 << 10;
    }
}

/// Whether a frame lives in the document tree or in a shadow tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum TreeScopeType {
    #[default]
    Document,
    Shadow,
}
