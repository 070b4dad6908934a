//! Shared application state for the host server.

use std::sync::Arc;

use panel::bus::{MessageBus, Outbound};
use panel::cancel::CancellationToken;
use panel::host::HostCoordinator;
use tokio::sync::Mutex;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub host: HostCoordinator,
    /// Frames posted by the host, drained by the single attached view.
    pub outbound: Arc<Mutex<Outbound>>,
    /// Fired on shutdown so open event streams end.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(host: HostCoordinator, outbound: Outbound, shutdown: CancellationToken) -> Self {
        Self {
            host,
            outbound: Arc::new(Mutex::new(outbound)),
            shutdown,
        }
    }

    pub fn bus(&self) -> &MessageBus {
        self.host.bus()
    }
}
