//! Browser-side navigation requests.

use serde::{Deserialize, Serialize};
use tessera_core::FrameRoute;
use url::Url;

/// A navigation the browser is handling on behalf of a frame, from the moment
/// it starts until it commits or is cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationRequest {
    pub url: Url,
    /// Frame created in another process to receive the navigation, if the
    /// destination is not rendered by the frame's current process.
    pub speculative_route: Option<FrameRoute>,
}

impl NavigationRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            speculative_route: None,
        }
    }

    pub fn with_speculative_route(mut self, route: FrameRoute) -> Self {
        self.speculative_route = Some(route);
        self
    }

    /// `javascript:` URLs run in the current document and never show a loading state.
    pub fn is_javascript(&self) -> bool {
        self.url.scheme() == "javascript"
    }
}
