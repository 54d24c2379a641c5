//! Configuration – reads `twinlink.toml` from the working directory.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use twinlink_channel::WireKind;
use twinlink_engine::DeltaMode;

/// Persisted channel/session configuration.  Every field has a default so a
/// partial (or absent) file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwinConfig {
    /// WebSocket relay endpoint.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Naming prefix of the robot's part entities.
    #[serde(default = "default_part_prefix")]
    pub part_prefix: String,

    /// What an update frame's location triple means: `rotation` (Euler
    /// degrees) or `translation`.
    #[serde(default)]
    pub wire_kind: WireKind,

    /// Propagation mode for decoded deltas: `additive_local` or
    /// `world_frame`.
    #[serde(default = "default_delta_mode")]
    pub delta_mode: DeltaMode,

    /// Capacity of the channel's not-yet-ready holding queue.
    #[serde(default = "default_pending_capacity")]
    pub pending_capacity: usize,

    /// Number of chained parts in the demo twin scene.
    #[serde(default = "default_demo_parts")]
    pub demo_parts: usize,
}

fn default_relay_url() -> String {
    "ws://localhost:8767".to_string()
}
fn default_part_prefix() -> String {
    "part_".to_string()
}
fn default_delta_mode() -> DeltaMode {
    DeltaMode::AdditiveLocal
}
fn default_pending_capacity() -> usize {
    32
}
fn default_demo_parts() -> usize {
    6
}

impl Default for TwinConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            part_prefix: default_part_prefix(),
            wire_kind: WireKind::default(),
            delta_mode: default_delta_mode(),
            pending_capacity: default_pending_capacity(),
            demo_parts: default_demo_parts(),
        }
    }
}

/// Default config file location.
pub fn config_path() -> PathBuf {
    PathBuf::from("twinlink.toml")
}

/// Load the config.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<TwinConfig>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<TwinConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: TwinConfig =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `TWINLINK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TWINLINK_RELAY_URL` | `relay_url` |
/// | `TWINLINK_PART_PREFIX` | `part_prefix` |
pub fn apply_env_overrides(cfg: &mut TwinConfig) {
    if let Ok(v) = std::env::var("TWINLINK_RELAY_URL") {
        cfg.relay_url = v;
    }
    if let Ok(v) = std::env::var("TWINLINK_PART_PREFIX") {
        cfg.part_prefix = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twinlink.toml");
        assert_eq!(load_from(&path).unwrap(), None);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twinlink.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "relay_url = \"ws://robot.local:8767\"").unwrap();
        writeln!(file, "wire_kind = \"translation\"").unwrap();

        let cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.relay_url, "ws://robot.local:8767");
        assert_eq!(cfg.wire_kind, WireKind::Translation);
        assert_eq!(cfg.part_prefix, "part_");
        assert_eq!(cfg.delta_mode, DeltaMode::AdditiveLocal);
        assert_eq!(cfg.pending_capacity, 32);
    }

    #[test]
    fn garbage_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twinlink.toml");
        fs::write(&path, "relay_url = [not toml").unwrap();
        assert!(load_from(&path).is_err());
    }
}
