//! Anonymous installation identity and identify-deduplication state.
//!
//! The anonymous ID identifies an installation, not a person. Resolution
//! priority: explicit env override (validated as a UUID) → UUID cached in
//! the per-platform config directory → deterministic UUID derived from the
//! server URL when running in a container without writable storage →
//! ephemeral random UUID for this process only.

use std::fs;
use std::path::PathBuf;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::TelemetryConfig;

const ID_FILE: &str = "anonymous_id";
const TRAITS_HASH_FILE: &str = "traits_hash";
const STATE_DIR_NAME: &str = "pipeforge-mcp";

/// Resolve the stable anonymous user ID for this installation.
pub(crate) fn resolve_user_id(config: &TelemetryConfig) -> String {
    // Env override, useful for pinning an ID in Docker. Invalid values are
    // ignored rather than forwarded to the collector.
    if let Some(raw) = &config.user_id_override {
        if let Ok(id) = Uuid::parse_str(raw.trim()) {
            return id.to_string();
        }
    }

    match read_or_create_cached_id(config) {
        Some(id) => id,
        None => {
            // No writable storage. In a container, derive a deterministic ID
            // from the server URL so restarts keep the same identity.
            if is_running_in_container() {
                if let Some(url) = &config.server_url {
                    let name = format!("pipeforge-mcp:{}", url);
                    return Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string();
                }
            }
            Uuid::new_v4().to_string()
        }
    }
}

fn read_or_create_cached_id(config: &TelemetryConfig) -> Option<String> {
    let dir = state_dir(config)?;
    let path = dir.join(ID_FILE);

    if let Ok(contents) = fs::read_to_string(&path) {
        let cached = contents.trim();
        if Uuid::parse_str(cached).is_ok() {
            return Some(cached.to_string());
        }
    }

    let id = Uuid::new_v4().to_string();
    fs::create_dir_all(&dir).ok()?;
    fs::write(&path, &id).ok()?;
    Some(id)
}

/// Per-platform state directory: Roaming AppData on Windows, Application
/// Support on macOS, XDG config (or `~/.config`) elsewhere.
fn state_dir(config: &TelemetryConfig) -> Option<PathBuf> {
    if let Some(dir) = &config.state_dir {
        return Some(dir.clone());
    }
    dirs::config_dir().map(|base| base.join(STATE_DIR_NAME))
}

/// Best-effort container detection: the `/.dockerenv` marker or a docker
/// entry in PID 1's cgroup.
pub(crate) fn is_running_in_container() -> bool {
    if std::path::Path::new("/.dockerenv").exists() {
        return true;
    }
    fs::read_to_string("/proc/1/cgroup")
        .map(|contents| contents.contains("docker"))
        .unwrap_or(false)
}

/// Whether an identify event should be emitted for the given traits.
///
/// Compares a content hash of the traits against the hash stored from the
/// previous session, and persists the new hash. If the stored state cannot
/// be read or written we identify anyway.
pub(crate) fn should_identify(config: &TelemetryConfig, traits: &Map<String, Value>) -> bool {
    let current = traits_hash(traits);

    let Some(dir) = state_dir(config) else {
        return true;
    };
    let path = dir.join(TRAITS_HASH_FILE);

    if let Ok(stored) = fs::read_to_string(&path) {
        if stored.trim() == current {
            return false;
        }
    }

    if fs::create_dir_all(&dir).is_ok() {
        let _ = fs::write(&path, &current);
    }
    true
}

fn traits_hash(traits: &Map<String, Value>) -> String {
    // Serialize a sorted copy so the hash never depends on map iteration
    // order.
    let mut sorted: Vec<(&String, &Value)> = traits.iter().collect();
    sorted.sort_by_key(|(k, _)| k.as_str());
    let canonical = serde_json::to_string(&sorted).unwrap_or_default();

    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}
