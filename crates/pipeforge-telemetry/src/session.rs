//! Process-lifetime session state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Instant;

use serde_json::{Map, Value};
use uuid::Uuid;

/// Counters and enrichment data for one server session.
///
/// Created once at telemetry init. All mutation goes through short critical
/// sections; no lock is held across I/O.
pub struct Session {
    id: Uuid,
    started: Instant,
    stats: Mutex<Stats>,
    client: Mutex<ClientInfo>,
    properties: Mutex<BTreeMap<String, Value>>,
}

#[derive(Default)]
struct Stats {
    tool_call_count: u64,
    tools_used: BTreeSet<String>,
}

#[derive(Default, Clone)]
struct ClientInfo {
    name: Option<String>,
    version: Option<String>,
}

/// Point-in-time copy of the session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub total_tool_calls: u64,
    pub unique_tools_used: usize,
}

impl Session {
    pub fn new() -> Self {
        Session {
            id: Uuid::new_v4(),
            started: Instant::now(),
            stats: Mutex::new(Stats::default()),
            client: Mutex::new(ClientInfo::default()),
            properties: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Record one tool call against the session counters.
    pub fn record_call(&self, tool_name: &str) {
        let mut stats = lock_or_recover(&self.stats);
        stats.tool_call_count += 1;
        stats.tools_used.insert(tool_name.to_string());
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let stats = lock_or_recover(&self.stats);
        SessionSnapshot {
            total_tool_calls: stats.tool_call_count,
            unique_tools_used: stats.tools_used.len(),
        }
    }

    /// Capture the calling client's identity, first-write-wins.
    ///
    /// Blank or missing values never overwrite an already-captured real
    /// value, and once both fields are set later calls are ignored entirely.
    pub fn set_client_info_once(&self, name: Option<&str>, version: Option<&str>) {
        let mut client = lock_or_recover(&self.client);
        if client.name.is_none() {
            if let Some(name) = non_blank(name) {
                client.name = Some(name);
            }
        }
        if client.version.is_none() {
            if let Some(version) = non_blank(version) {
                client.version = Some(version);
            }
        }
    }

    pub fn client_info(&self) -> (Option<String>, Option<String>) {
        let client = lock_or_recover(&self.client);
        (client.name.clone(), client.version.clone())
    }

    /// Merge session-scoped properties, first-write-wins per key.
    pub fn set_properties(&self, new: Map<String, Value>) {
        let mut properties = lock_or_recover(&self.properties);
        for (key, value) in new {
            properties.entry(key).or_insert(value);
        }
    }

    pub fn properties(&self) -> BTreeMap<String, Value> {
        lock_or_recover(&self.properties).clone()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Telemetry must never panic; a poisoned lock just means a previous holder
/// panicked mid-update, and stale counters are acceptable.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counters_track_calls_and_distinct_tools() {
        let session = Session::new();
        session.record_call("list_pipelines");
        session.record_call("list_pipelines");
        session.record_call("get_stack");

        let snapshot = session.snapshot();
        assert_eq!(snapshot.total_tool_calls, 3);
        assert_eq!(snapshot.unique_tools_used, 2);
    }

    #[test]
    fn client_info_first_write_wins() {
        let session = Session::new();
        session.set_client_info_once(Some("claude-desktop"), Some("1.2.0"));
        session.set_client_info_once(Some("cursor"), Some("9.9.9"));

        let (name, version) = session.client_info();
        assert_eq!(name.as_deref(), Some("claude-desktop"));
        assert_eq!(version.as_deref(), Some("1.2.0"));
    }

    #[test]
    fn blank_client_info_does_not_claim_the_slot() {
        let session = Session::new();
        session.set_client_info_once(None, Some("  "));
        session.set_client_info_once(Some("cursor"), Some("1.0"));

        let (name, version) = session.client_info();
        assert_eq!(name.as_deref(), Some("cursor"));
        assert_eq!(version.as_deref(), Some("1.0"));
    }

    #[test]
    fn properties_first_write_wins_per_key() {
        let session = Session::new();

        let mut first = Map::new();
        first.insert("transport".into(), json!("stdio"));
        session.set_properties(first);

        let mut second = Map::new();
        second.insert("transport".into(), json!("http"));
        second.insert("region".into(), json!("eu"));
        session.set_properties(second);

        let properties = session.properties();
        assert_eq!(properties["transport"], json!("stdio"));
        assert_eq!(properties["region"], json!("eu"));
    }
}
