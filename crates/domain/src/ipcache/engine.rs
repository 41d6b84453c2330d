use std::collections::HashMap;
use std::net::IpAddr;

use super::entity::{IpCacheConfig, LearnedIp};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Per-key token window for learning-rate limiting.
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    window_start_ns: u64,
    accepted: u32,
}

/// In-memory IP learning cache.
///
/// Maps `"<bridge>-<ofport>"` to the set of addresses recently observed
/// on that port. Callers pass `now_ns` explicitly so expiry and rate
/// limiting are deterministic under test.
#[derive(Debug)]
pub struct IpLearningEngine {
    config: IpCacheConfig,
    entries: HashMap<String, Vec<LearnedIp>>,
    rates: HashMap<String, RateWindow>,
}

impl IpLearningEngine {
    pub fn new(config: IpCacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            rates: HashMap::new(),
        }
    }

    /// Record an observation of `ip` on `key`.
    ///
    /// Returns `true` if the observation was accepted, `false` if it
    /// was dropped by the per-key rate limit. An accepted observation
    /// refreshes `last_seen` of an existing address or appends a new
    /// one.
    pub fn learn(&mut self, key: &str, ip: IpAddr, now_ns: u64) -> bool {
        if !self.admit(key, now_ns) {
            return false;
        }

        let ips = self.entries.entry(key.to_string()).or_default();
        match ips.iter_mut().find(|entry| entry.ip == ip) {
            Some(entry) => entry.last_seen_ns = now_ns,
            None => ips.push(LearnedIp {
                ip,
                last_seen_ns: now_ns,
            }),
        }
        true
    }

    fn admit(&mut self, key: &str, now_ns: u64) -> bool {
        let window = self
            .rates
            .entry(key.to_string())
            .or_insert(RateWindow {
                window_start_ns: now_ns,
                accepted: 0,
            });

        if now_ns.saturating_sub(window.window_start_ns) >= NANOS_PER_SEC {
            window.window_start_ns = now_ns;
            window.accepted = 0;
        }
        if window.accepted >= self.config.max_learning_per_sec {
            return false;
        }
        window.accepted += 1;
        true
    }

    /// Drop entries whose last observation is older than the TTL.
    /// Returns the number of addresses evicted.
    pub fn purge_expired(&mut self, now_ns: u64) -> usize {
        let ttl_ns = self.config.ttl_secs * NANOS_PER_SEC;
        let mut evicted = 0;

        self.entries.retain(|_, ips| {
            let before = ips.len();
            ips.retain(|entry| now_ns.saturating_sub(entry.last_seen_ns) < ttl_ns);
            evicted += before - ips.len();
            !ips.is_empty()
        });

        // Stale rate windows go with their entries.
        let entries = &self.entries;
        self.rates.retain(|key, _| entries.contains_key(key));

        evicted
    }

    /// Addresses currently learned for a key, most recent first.
    pub fn addresses(&self, key: &str) -> Vec<IpAddr> {
        let mut ips: Vec<&LearnedIp> = self
            .entries
            .get(key)
            .map(|v| v.iter().collect())
            .unwrap_or_default();
        ips.sort_by(|a, b| b.last_seen_ns.cmp(&a.last_seen_ns));
        ips.into_iter().map(|entry| entry.ip).collect()
    }

    /// Full snapshot for downstream consumers.
    pub fn snapshot(&self) -> HashMap<String, Vec<IpAddr>> {
        self.entries
            .keys()
            .map(|key| (key.clone(), self.addresses(key)))
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn engine() -> IpLearningEngine {
        IpLearningEngine::new(IpCacheConfig::default())
    }

    #[test]
    fn learn_and_snapshot() {
        let mut eng = engine();
        assert!(eng.learn("br0-7", ip(1), 0));
        let snap = eng.snapshot();
        assert_eq!(snap["br0-7"], vec![ip(1)]);
    }

    #[test]
    fn refresh_updates_last_seen_without_duplicating() {
        let mut eng = engine();
        eng.learn("br0-7", ip(1), 0);
        eng.learn("br0-7", ip(1), 2 * NANOS_PER_SEC);
        assert_eq!(eng.entry_count(), 1);

        // Refreshed at t=2s, so still alive at t=61s.
        eng.purge_expired(61 * NANOS_PER_SEC);
        assert_eq!(eng.entry_count(), 1);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut eng = engine();
        eng.learn("br0-7", ip(1), 0);
        assert_eq!(eng.purge_expired(59 * NANOS_PER_SEC), 0);
        assert_eq!(eng.purge_expired(60 * NANOS_PER_SEC), 1);
        assert!(eng.snapshot().is_empty());
    }

    #[test]
    fn rate_limit_caps_at_five_per_second() {
        let mut eng = engine();
        for i in 0..5u8 {
            assert!(eng.learn("br0-7", ip(i), 100));
        }
        // Sixth update in the same window is dropped silently.
        assert!(!eng.learn("br0-7", ip(99), 100));
        assert_eq!(eng.entry_count(), 5);

        // A fresh window admits again.
        assert!(eng.learn("br0-7", ip(99), 100 + NANOS_PER_SEC));
    }

    #[test]
    fn rate_limit_is_per_key() {
        let mut eng = engine();
        for i in 0..5u8 {
            eng.learn("br0-7", ip(i), 0);
        }
        assert!(!eng.learn("br0-7", ip(50), 0));
        assert!(eng.learn("br0-8", ip(50), 0));
    }

    #[test]
    fn addresses_sorted_most_recent_first() {
        let mut eng = engine();
        eng.learn("br0-7", ip(1), 0);
        eng.learn("br0-7", ip(2), 5);
        assert_eq!(eng.addresses("br0-7"), vec![ip(2), ip(1)]);
    }
}
