// ── Paths ──────────────────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ovsentinel/config.yaml";
pub const DEFAULT_OVS_RUN_DIR: &str = "/var/run/openvswitch";
pub const DEFAULT_OVSDB_SOCKET: &str = "/var/run/openvswitch/db.sock";

// ── Channel capacities ─────────────────────────────────────────────

pub const SWITCH_EVENT_CHANNEL_CAPACITY: usize = 1_024;
pub const IP_UPDATE_CHANNEL_CAPACITY: usize = 1_024;
pub const RECOVERY_CHANNEL_CAPACITY: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_socket_lives_in_run_dir() {
        assert!(DEFAULT_OVSDB_SOCKET.starts_with(DEFAULT_OVS_RUN_DIR));
    }

    #[test]
    fn channel_capacities_are_positive() {
        assert!(SWITCH_EVENT_CHANNEL_CAPACITY > 0);
        assert!(IP_UPDATE_CHANNEL_CAPACITY > 0);
        assert!(RECOVERY_CHANNEL_CAPACITY > 0);
    }
}
