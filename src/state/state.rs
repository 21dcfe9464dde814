use std::sync::Arc;

use tokio::time::Instant;

use crate::hub::Hub;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Uptime
    pub uptime: Instant,
    /// Handle to the broadcast hub dispatcher
    pub hub: Hub,
    /// Current configuration
    pub config: Arc<super::Config>,
}

impl AppState {
    pub fn new(hub: Hub, config: super::Config) -> Self {
        Self {
            uptime: Instant::now(),
            hub,
            config: Arc::new(config),
        }
    }
}
