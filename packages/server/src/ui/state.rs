//! Server state shared across handlers.

use std::sync::Arc;

use crate::hub::Hub;

/// Shared application state passed to all handlers via axum State extractor.
pub struct AppState {
    /// The connection hub (registry + router + sweeper facade)
    pub hub: Arc<Hub>,
}
