//! Periodic staleness sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::recovery::RecoveryActuator;
use crate::registry::SharedRegistry;

/// Outcome counts for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub stale: usize,
    pub restarted: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.stale == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "Sweep: {} stale, {} restarted, {} failed",
            self.stale, self.restarted, self.failed
        )
    }
}

pub struct StalenessMonitor {
    registry: SharedRegistry,
    actuator: RecoveryActuator,
    timeout: Duration,
    interval: Duration,
}

impl StalenessMonitor {
    pub fn new(
        registry: SharedRegistry,
        actuator: RecoveryActuator,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            actuator,
            timeout,
            interval,
        }
    }

    /// Sweep every `interval` until shutdown is signalled.
    pub async fn run(self, shutdown: Arc<Notify>) {
        info!(
            "Monitor active | timeout: {:?} | sweep interval: {:?}",
            self.timeout, self.interval
        );

        // first tick one interval from now, matching a sleep-then-check loop
        let mut interval = time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // registered up front so a signal sent mid-sweep is not lost
        let shutdown_signal = shutdown.notified();
        tokio::pin!(shutdown_signal);
        shutdown_signal.as_mut().enable();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tokio::select! {
                        _ = self.sweep() => {}
                        _ = &mut shutdown_signal => {
                            info!("Monitor: shutdown signal received, abandoning sweep");
                            break;
                        }
                    }
                }
                _ = &mut shutdown_signal => {
                    info!("Monitor: shutdown signal received");
                    break;
                }
            }
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    /// Recover and drop every node stale as of `now`.
    ///
    /// Recovery runs outside the registry lock, one node at a time. The
    /// record is dropped whatever the outcome, unless the node announced
    /// again while its restart was running.
    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        let stale = self.registry.snapshot_stale(self.timeout, now);
        let mut report = SweepReport {
            stale: stale.len(),
            ..SweepReport::default()
        };

        for node in stale {
            let address = node
                .last_address
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "<none>".to_string());
            warn!("{} missed heartbeats, restarting...", node.node_id);

            match self.actuator.recover(&node.node_id, node.last_address).await {
                Ok(output) => {
                    report.restarted += 1;
                    info!(
                        "Node {} restarted successfully at {}. Output: {}",
                        node.node_id,
                        address,
                        output.trim_end()
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Failed to restart node {} ({}): {}", node.node_id, address, e);
                }
            }

            if self.registry.remove_if_unchanged(&node.node_id, node.last_seen) {
                info!(
                    "Node {} dropped from monitoring until it re-announces",
                    node.node_id
                );
            } else {
                info!("Node {} re-announced during recovery, keeping it", node.node_id);
            }
        }

        if !report.is_empty() {
            info!("{}", report.summary());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecoveryError;
    use crate::recovery::Restarter;
    use crate::registry::new_registry;
    use async_trait::async_trait;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    /// Records each restart and fails for addresses in `failing`.
    #[derive(Default)]
    struct MockRestarter {
        calls: Mutex<Vec<(String, IpAddr)>>,
        failing: Vec<IpAddr>,
        delay: Duration,
    }

    #[async_trait]
    impl Restarter for MockRestarter {
        async fn restart(&self, node_id: &str, address: IpAddr) -> Result<String, RecoveryError> {
            self.calls.lock().unwrap().push((node_id.to_string(), address));
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            if self.failing.contains(&address) {
                Err(RecoveryError::Failed {
                    status: "exit status: 255".to_string(),
                    output: "connection refused".to_string(),
                })
            } else {
                Ok(String::new())
            }
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn monitor(registry: SharedRegistry, restarter: Arc<MockRestarter>) -> StalenessMonitor {
        StalenessMonitor::new(
            registry,
            RecoveryActuator::new(restarter),
            Duration::from_secs(15),
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn stale_node_is_recovered_once_and_removed() {
        let registry = new_registry();
        let restarter = Arc::new(MockRestarter::default());
        let monitor = monitor(registry.clone(), restarter.clone());

        registry.record_heartbeat("node_1", Some(ip(5)));

        time::advance(Duration::from_secs(15)).await;
        assert_eq!(monitor.sweep().await, SweepReport::default());
        assert_eq!(registry.len(), 1);

        time::advance(Duration::from_secs(1)).await;
        let report = monitor.sweep().await;
        assert_eq!(
            report,
            SweepReport {
                stale: 1,
                restarted: 1,
                failed: 0
            }
        );
        assert!(registry.is_empty());
        assert_eq!(
            *restarter.calls.lock().unwrap(),
            vec![("node_1".to_string(), ip(5))]
        );

        // gone from the registry, so the next sweep does nothing
        time::advance(Duration::from_secs(1)).await;
        assert_eq!(monitor.sweep().await.stale, 0);
        assert_eq!(restarter.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_restart_still_removes_node() {
        let registry = new_registry();
        let restarter = Arc::new(MockRestarter {
            failing: vec![ip(9)],
            ..MockRestarter::default()
        });
        let monitor = monitor(registry.clone(), restarter.clone());

        registry.record_heartbeat("node_9", Some(ip(9)));
        time::advance(Duration::from_secs(16)).await;

        let report = monitor.sweep().await;
        assert_eq!(report.failed, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn node_without_address_is_reported_and_removed() {
        let registry = new_registry();
        let restarter = Arc::new(MockRestarter::default());
        let monitor = monitor(registry.clone(), restarter.clone());

        registry.record_heartbeat("node_4", None);
        time::advance(Duration::from_secs(16)).await;

        let report = monitor.sweep().await;
        assert_eq!(report.failed, 1);
        assert!(restarter.calls.lock().unwrap().is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_nodes_are_left_alone() {
        let registry = new_registry();
        let restarter = Arc::new(MockRestarter::default());
        let monitor = monitor(registry.clone(), restarter.clone());

        registry.record_heartbeat("old", Some(ip(1)));
        time::advance(Duration::from_secs(10)).await;
        registry.record_heartbeat("young", Some(ip(2)));
        time::advance(Duration::from_secs(6)).await;

        let report = monitor.sweep().await;
        assert_eq!(report.stale, 1);
        assert!(registry.get("old").is_none());
        assert!(registry.get("young").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_sweeps_on_each_tick() {
        let registry = new_registry();
        let restarter = Arc::new(MockRestarter::default());
        let shutdown = Arc::new(Notify::new());

        registry.record_heartbeat("node_1", Some(ip(5)));
        let task = tokio::spawn(monitor(registry.clone(), restarter.clone()).run(shutdown.clone()));

        time::sleep(Duration::from_millis(15_500)).await;
        assert_eq!(registry.len(), 1);

        time::sleep(Duration::from_secs(1)).await;
        assert!(registry.is_empty());
        assert_eq!(restarter.calls.lock().unwrap().len(), 1);

        shutdown.notify_waiters();
        time::timeout(Duration::from_secs(1), task)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_slow_restart_stops_the_monitor() {
        let registry = new_registry();
        let restarter = Arc::new(MockRestarter {
            delay: Duration::from_secs(20),
            ..MockRestarter::default()
        });
        let shutdown = Arc::new(Notify::new());

        registry.record_heartbeat("node_1", Some(ip(5)));
        let task = tokio::spawn(monitor(registry.clone(), restarter.clone()).run(shutdown.clone()));

        // the sweep at t=16 is now blocked inside the restart
        time::sleep(Duration::from_millis(16_500)).await;
        assert_eq!(restarter.calls.lock().unwrap().len(), 1);

        shutdown.notify_waiters();
        time::timeout(Duration::from_secs(1), task)
            .await
            .expect("monitor ignored shutdown during a sweep")
            .unwrap();
    }
}
