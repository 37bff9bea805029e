use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::info;

use crate::config::CoordinatorConfig;
use crate::error::VigilError;
use crate::monitor::StalenessMonitor;
use crate::receiver::LivenessReceiver;
use crate::recovery::{RecoveryActuator, Restarter};
use crate::registry::SharedRegistry;

/// A coordinator whose liveness endpoint is already bound.
pub struct Coordinator {
    receiver: LivenessReceiver,
    monitor: StalenessMonitor,
}

impl Coordinator {
    /// Validate `config` and bind the endpoint. Either failing is fatal.
    pub async fn bind(
        config: &CoordinatorConfig,
        registry: SharedRegistry,
        restarter: Arc<dyn Restarter>,
    ) -> Result<Self, VigilError> {
        config.validate()?;
        let receiver = LivenessReceiver::bind(config.listen_addr(), registry.clone()).await?;
        let monitor = StalenessMonitor::new(
            registry,
            RecoveryActuator::new(restarter),
            config.heartbeat_timeout(),
            config.sweep_interval(),
        );
        Ok(Self { receiver, monitor })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.receiver.local_addr()
    }

    /// Run the receive and sweep loops side by side until shutdown.
    pub async fn run(self, shutdown: Arc<Notify>) {
        let receiver_handle = tokio::spawn(self.receiver.run(shutdown.clone()));
        let monitor_handle = tokio::spawn(self.monitor.run(shutdown));

        let _ = tokio::join!(receiver_handle, monitor_handle);
        info!("Coordinator exited");
    }
}
