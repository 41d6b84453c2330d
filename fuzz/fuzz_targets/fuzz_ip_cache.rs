#![no_main]

use std::net::{IpAddr, Ipv4Addr};

use libfuzzer_sys::fuzz_target;

use domain::ipcache::engine::IpLearningEngine;
use domain::ipcache::entity::IpCacheConfig;

// Drive a learn/purge sequence from fuzz data.
//
// Consumed in 10-byte chunks:
//   [0]     = op selector (learn / purge / snapshot)
//   [1]     = key selector
//   [2..6]  = IPv4 address
//   [6..10] = time delta (milliseconds)
fuzz_target!(|data: &[u8]| {
    let mut engine = IpLearningEngine::new(IpCacheConfig::default());
    let mut now_ns: u64 = 0;

    for chunk in data.chunks_exact(10) {
        let key = format!("br0-{}", chunk[1] % 4);
        let ip = IpAddr::V4(Ipv4Addr::new(chunk[2], chunk[3], chunk[4], chunk[5]));
        let delta_ms = u64::from(u32::from_le_bytes([chunk[6], chunk[7], chunk[8], chunk[9]]));
        now_ns = now_ns.saturating_add(delta_ms * 1_000_000);

        match chunk[0] % 3 {
            0 => {
                let _ = engine.learn(&key, ip, now_ns);
            }
            1 => {
                let _ = engine.purge_expired(now_ns);
            }
            _ => {
                // Snapshots must agree with the per-key view.
                let snapshot = engine.snapshot();
                for (key, ips) in &snapshot {
                    assert_eq!(engine.addresses(key), *ips);
                    assert!(!ips.is_empty());
                }
            }
        }
    }
});
