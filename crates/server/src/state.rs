use std::sync::Arc;

use signoff_core::config::TransportConfig;
use signoff_core::{Dispatcher, RequestOrchestrator};

/// Shared by the request-side and processing-side routes.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RequestOrchestrator>,
    pub dispatcher: Arc<Dispatcher>,
    pub transport: Arc<TransportConfig>,
}
