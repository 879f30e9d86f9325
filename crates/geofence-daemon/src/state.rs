//! Application state shared across handlers.

use std::sync::Arc;

use geofence_core::PresenceView;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    presence: Arc<dyn PresenceView>,
}

/// State type the routers are built with.
pub type SharedState = AppState;

impl AppState {
    /// Create application state over a presence view.
    #[must_use]
    pub fn new(presence: Arc<dyn PresenceView>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { presence }),
        }
    }

    /// Read access to presence.
    #[must_use]
    pub fn presence(&self) -> &dyn PresenceView {
        self.inner.presence.as_ref()
    }
}
