// crates/ingest-core/src/config.rs
//
// Every enumerated knob from the facade's configuration table in one place.
// The engine reads this struct; it never reads a file or an env var itself —
// an external loader (CLI, config crate, whatever the caller already uses)
// is responsible for populating it and handing it to `initialize`.

use serde::{Deserialize, Serialize};

/// Process-wide engine configuration, handed to `Registry::initialize`.
///
/// `Serialize`/`Deserialize`-derived so a caller can load it from TOML, JSON
/// or env vars with whichever crate they already use for that — none of
/// that parsing lives in this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed-size slot table capacity. Compile-time default in the original
    /// C library; kept runtime-configurable here since nothing forces it
    /// to be a const in Rust.
    pub max_slots: usize,
    /// Frame buffer pool capacity (number of distinct buffers retained).
    pub pool_capacity: usize,
    /// Bounded connect timeout, milliseconds.
    pub connect_timeout_ms: u64,
    /// Bounded read-packet timeout (watchdog), milliseconds.
    pub read_timeout_ms: u64,
    /// Reconnect supervisor scan cadence, seconds.
    pub reconnect_interval_secs: u64,
    /// Hard deadline for `stop_camera`'s join, milliseconds.
    pub stop_join_timeout_ms: u64,
    /// Hard deadline for `shutdown`'s global join, milliseconds.
    pub shutdown_grace_ms: u64,
    /// Whether the Reconnect Supervisor thread is started at all. Tests that
    /// want deterministic control over reconnection disable it and drive
    /// reconnects by hand.
    pub auto_reconnect: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_slots: 64,
            pool_capacity: 32,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 10_000,
            reconnect_interval_secs: 30,
            stop_join_timeout_ms: 3_000,
            shutdown_grace_ms: 5_000,
            auto_reconnect: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_knobs() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_slots, 64);
        assert_eq!(cfg.connect_timeout_ms, 5_000);
        assert_eq!(cfg.read_timeout_ms, 10_000);
        assert_eq!(cfg.reconnect_interval_secs, 30);
        assert_eq!(cfg.stop_join_timeout_ms, 3_000);
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = EngineConfig { max_slots: 8, ..Default::default() };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_slots, 8);
    }
}
