//! Local Key-Value Store
//!
//! Persists the operator's display name and the list of community reports in a
//! single JSON object file. Reads fail open: a missing or malformed file, or a
//! malformed value under a key, is treated as absent.

use crate::models::{NewReport, UserReport};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

pub const USER_NAME_KEY: &str = "dg_user_name";
pub const REPORTS_KEY: &str = "dg_reports";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write store file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to serialize store contents: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A write-through JSON file store.
pub struct LocalStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl LocalStore {
    /// Opens the store at `path`, loading whatever valid state is there.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_entries(&path);
        info!(path = %path.display(), keys = entries.len(), "Local store opened");
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The registered operator name, if any.
    pub fn user_name(&self) -> Option<String> {
        match self.lock().get(USER_NAME_KEY) {
            Some(Value::String(name)) if !name.is_empty() => Some(name.clone()),
            Some(Value::String(_)) | None => None,
            Some(other) => {
                warn!(value = %other, "Ignoring malformed stored user name");
                None
            }
        }
    }

    pub fn set_user_name(&self, name: &str) -> Result<(), StoreError> {
        let mut entries = self.lock();
        entries.insert(USER_NAME_KEY.to_string(), Value::String(name.to_string()));
        self.persist(&entries)
    }

    pub fn clear_user_name(&self) -> Result<(), StoreError> {
        let mut entries = self.lock();
        if entries.remove(USER_NAME_KEY).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    /// All stored community reports, oldest first.
    pub fn reports(&self) -> Vec<UserReport> {
        match self.lock().get(REPORTS_KEY) {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring malformed stored reports");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    /// Stamps a new report with an id and timestamp and appends it.
    pub fn add_report(&self, report: NewReport) -> Result<UserReport, StoreError> {
        let report = UserReport {
            id: uuid::Uuid::new_v4().to_string(),
            kind: report.kind,
            description: report.description,
            severity: report.severity,
            timestamp: chrono::Utc::now().to_rfc3339(),
            location: report.location,
        };

        let mut reports = self.reports();
        reports.push(report.clone());

        let mut entries = self.lock();
        entries.insert(REPORTS_KEY.to_string(), serde_json::to_value(&reports)?);
        self.persist(&entries)?;
        Ok(report)
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, entries: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Io(self.path.clone(), e))?;
            }
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents).map_err(|e| StoreError::Io(self.path.clone(), e))
    }
}

fn load_entries(path: &Path) -> Map<String, Value> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read store, starting empty");
            return Map::new();
        }
    };
    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!(path = %path.display(), "Store file is not a JSON object, starting empty");
            Map::new()
        }
    }
}
