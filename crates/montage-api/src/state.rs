//! Application state.

use std::sync::Arc;

use montage_worker::JobOrchestrator;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub orchestrator: JobOrchestrator,
}

impl AppState {
    pub fn new(config: ApiConfig, orchestrator: JobOrchestrator) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
        }
    }
}
