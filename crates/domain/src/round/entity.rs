use super::error::RoundError;

/// External-ids key under which the restart round is persisted on each
/// LOCAL bridge.
pub const RESTART_ROUND_KEY: &str = "datapathRestartRound";

/// A restart-round pair. `current` is always `previous + 1`; on first
/// boot (key absent) there is no previous round and `current` is 1.
///
/// The round is persisted only after the settle window, so a crash
/// mid-initialisation re-reads the same `previous` and re-derives the
/// same `current`; leftover current-round flows from the crashed
/// attempt are swept before re-install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundInfo {
    pub previous: u64,
    pub current: u64,
}

impl RoundInfo {
    /// Derive the round pair from the persisted external-ids value.
    /// `None` (key absent or external-ids empty) means first boot.
    pub fn from_persisted(value: Option<&str>) -> Result<Self, RoundError> {
        match value {
            None => Ok(Self {
                previous: 0,
                current: 1,
            }),
            Some(raw) => {
                let previous: u64 = raw.parse().map_err(|e: std::num::ParseIntError| {
                    RoundError::BadFormat {
                        value: raw.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                let current = previous.checked_add(1).ok_or_else(|| RoundError::BadFormat {
                    value: raw.to_string(),
                    reason: "round number overflow".to_string(),
                })?;
                Ok(Self { previous, current })
            }
        }
    }

    /// The decimal string persisted back into external-ids once the
    /// current round's flows are stable.
    pub fn persisted_value(&self) -> String {
        self.current.to_string()
    }
}
