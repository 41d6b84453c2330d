use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use domain::ipcache::engine::IpLearningEngine;
use domain::ipcache::entity::IpCacheConfig;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Application-level IP learning service.
///
/// Wraps the domain cache with thread-safe access and publishes every
/// accepted observation upward as a `{"<bridge>-<ofport>" → IP}` map
/// for the management-plane consumer.
pub struct IpLearningService {
    engine: RwLock<IpLearningEngine>,
    update_tx: mpsc::Sender<HashMap<String, IpAddr>>,
    metrics: Arc<dyn MetricsPort>,
    sweep_interval: Duration,
}

impl IpLearningService {
    pub fn new(
        config: IpCacheConfig,
        update_tx: mpsc::Sender<HashMap<String, IpAddr>>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        let sweep_interval = Duration::from_secs(config.sweep_interval_secs);
        Self {
            engine: RwLock::new(IpLearningEngine::new(config)),
            update_tx,
            metrics,
            sweep_interval,
        }
    }

    /// Record one observation. Returns `true` if it was admitted by
    /// the per-key rate limit; admitted observations are forwarded on
    /// the upward channel.
    pub async fn learn(&self, key: String, ip: IpAddr) -> bool {
        let accepted = {
            let mut engine = self
                .engine
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let accepted = engine.learn(&key, ip, now_ns());
            if accepted {
                self.metrics.set_learned_ips(engine.entry_count() as u64);
            }
            accepted
        };

        if accepted {
            let update = HashMap::from([(key, ip)]);
            if self.update_tx.send(update).await.is_err() {
                tracing::debug!("ip update channel closed, dropping learned address");
            }
        }
        accepted
    }

    /// Run the background expiry loop until cancelled.
    pub async fn sweep_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("ip cache sweeper shutting down");
                    return;
                }
                _ = interval.tick() => self.purge_expired(),
            }
        }
    }

    fn purge_expired(&self) {
        let mut engine = self
            .engine
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let evicted = engine.purge_expired(now_ns());
        let remaining = engine.entry_count();
        drop(engine);

        if evicted > 0 {
            tracing::debug!(evicted, remaining, "ip cache sweep complete");
        }
        self.metrics.set_learned_ips(remaining as u64);
    }

    /// Snapshot for downstream consumers.
    pub fn snapshot(&self) -> HashMap<String, Vec<IpAddr>> {
        self.engine
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .snapshot()
    }

    pub fn addresses(&self, key: &str) -> Vec<IpAddr> {
        self.engine
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .addresses(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ports::test_utils::NoopMetrics;
    use std::net::Ipv4Addr;

    fn make_service() -> (Arc<IpLearningService>, mpsc::Receiver<HashMap<String, IpAddr>>) {
        let (tx, rx) = mpsc::channel(16);
        let svc = Arc::new(IpLearningService::new(
            IpCacheConfig::default(),
            tx,
            Arc::new(NoopMetrics),
        ));
        (svc, rx)
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn accepted_observation_is_published_upward() {
        let (svc, mut rx) = make_service();
        assert!(svc.learn("br0-7".to_string(), ip(2)).await);

        let update = rx.recv().await.unwrap();
        assert_eq!(update.get("br0-7"), Some(&ip(2)));
        assert_eq!(svc.addresses("br0-7"), vec![ip(2)]);
    }

    #[tokio::test]
    async fn rate_limited_observation_is_not_published() {
        let (svc, mut rx) = make_service();
        for i in 0..5u8 {
            assert!(svc.learn("br0-7".to_string(), ip(i)).await);
        }
        assert!(!svc.learn("br0-7".to_string(), ip(200)).await);

        // Drain: exactly the five admitted updates arrived.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 5);
    }

    #[tokio::test]
    async fn snapshot_reflects_all_keys() {
        let (svc, _rx) = make_service();
        svc.learn("br0-7".to_string(), ip(1)).await;
        svc.learn("br1-3".to_string(), ip(2)).await;

        let snap = svc.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["br1-3"], vec![ip(2)]);
    }
}
