use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::api::EndpointKey;
use crate::error::FetchError;

#[derive(Clone, Debug)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Local>,
    /// Request that failed, as `/resource?params`; absent for failures outside the cache.
    pub key: Option<String>,
    pub kind: Option<&'static str>,
    pub message: String,
}

impl ErrorLogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorLogEntry {
            timestamp: Local::now(),
            key: None,
            kind: None,
            message: message.into(),
        }
    }

    pub fn query_failure(key: &EndpointKey, err: &FetchError) -> Self {
        ErrorLogEntry {
            timestamp: Local::now(),
            key: Some(key.to_string()),
            kind: Some(err.kind_label()),
            message: err.to_string(),
        }
    }

    fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Append-only JSON-lines file of failures. Never written to stdout, which the
/// terminal UI owns.
#[derive(Clone, Debug)]
pub struct ErrorLogStore {
    path: PathBuf,
}

impl ErrorLogStore {
    pub fn new(path: PathBuf) -> Self {
        ErrorLogStore { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_message(&self, message: impl Into<String>) -> Result<()> {
        self.append(&ErrorLogEntry::new(message))
    }

    pub fn append_failure(&self, key: &EndpointKey, err: &FetchError) -> Result<()> {
        self.append(&ErrorLogEntry::query_failure(key, err))
    }

    fn append(&self, entry: &ErrorLogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        serde_json::to_writer(&mut file, &StoredErrorLogEntry::from(entry))?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct StoredErrorLogEntry {
    timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    message: String,
}

impl From<&ErrorLogEntry> for StoredErrorLogEntry {
    fn from(entry: &ErrorLogEntry) -> Self {
        StoredErrorLogEntry {
            timestamp_ms: entry.timestamp_ms(),
            key: entry.key.clone(),
            kind: entry.kind.map(str::to_string),
            message: entry.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Resource;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("btc-etf-dash-{}-{name}", std::process::id()))
            .join("errors.jsonl")
    }

    fn read_entries(path: &Path) -> Vec<StoredErrorLogEntry> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn appends_one_line_per_failure() {
        let path = scratch_path("append");
        let _ = fs::remove_file(&path);
        let store = ErrorLogStore::new(path.clone());
        let key = EndpointKey::new(Resource::EtfData);
        store
            .append_failure(&key, &FetchError::http_status(503))
            .unwrap();
        store.append_message("health check failed").unwrap();

        let entries = read_entries(&path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key.as_deref(), Some("/etf/data"));
        assert_eq!(entries[0].kind.as_deref(), Some("http_status"));
        assert_eq!(entries[0].message, "HTTP 503");
        assert!(entries[0].timestamp_ms > 0);
        assert_eq!(entries[1].key, None);
        assert_eq!(entries[1].message, "health check failed");
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn plain_messages_omit_key_fields() {
        let entry = ErrorLogEntry::new("boom");
        let line = serde_json::to_string(&StoredErrorLogEntry::from(&entry)).unwrap();
        assert!(!line.contains("\"key\""));
        assert!(line.contains("\"message\":\"boom\""));
    }
}
