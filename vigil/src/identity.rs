//! First-start identity cache
//!
//! Remembers when each service name was first seen on this host, across
//! restarts. The on-disk form is a JSON map from service name to an
//! RFC 3339 timestamp. Loads are tolerant: a missing or unreadable file
//! yields an empty cache and the file is rewritten on the next
//! registration. New registrations are persisted before the timestamp is
//! handed back, so a crash can never observe an identity and then forget
//! it.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::{CacheError, CacheResult};

pub struct IdentityCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl IdentityCache {
    /// Load the cache at `path`. Never fails: missing and corrupt files
    /// both start the cache empty, and individual entries with unreadable
    /// timestamps are skipped rather than rejecting the whole file.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();

        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, String>>(&bytes) {
                Ok(raw) => {
                    let mut parsed = HashMap::with_capacity(raw.len());
                    let mut skipped = 0;
                    for (name, stamp) in raw {
                        match DateTime::parse_from_rfc3339(&stamp) {
                            Ok(at) => {
                                parsed.insert(name, at.with_timezone(&Utc));
                            }
                            Err(_) => skipped += 1,
                        }
                    }
                    if skipped > 0 {
                        tracing::warn!(
                            "Skipped {} unreadable entries in identity cache {}",
                            skipped,
                            path.display()
                        );
                    }
                    parsed
                }
                Err(e) => {
                    tracing::warn!(
                        "Discarding unreadable identity cache {}: {}",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!("Could not read identity cache {}: {}", path.display(), e);
                HashMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// First-start time for `service_name`, registering the current instant
    /// if the name is new. A new registration is written to disk before the
    /// timestamp is returned; on a write failure the in-memory entry is
    /// kept, so repeated calls within this process stay stable.
    pub fn get_or_create(&self, service_name: &str) -> CacheResult<DateTime<Utc>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(at) = entries.get(service_name) {
            return Ok(*at);
        }

        let now = Utc::now();
        entries.insert(service_name.to_string(), now);
        self.persist(&entries)?;
        Ok(now)
    }

    /// First-start time for `service_name` if it is already known, without
    /// registering anything
    pub fn first_start_of(&self, service_name: &str) -> Option<DateTime<Utc>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(service_name).copied()
    }

    fn persist(&self, entries: &HashMap<String, DateTime<Utc>>) -> CacheResult<()> {
        let persist_failed = |reason: String| CacheError::PersistFailed {
            path: self.path.clone(),
            reason,
        };

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| persist_failed(e.to_string()))?;

        let rendered: HashMap<&String, String> = entries
            .iter()
            .map(|(name, at)| (name, at.to_rfc3339()))
            .collect();
        let payload =
            serde_json::to_vec_pretty(&rendered).map_err(|e| persist_failed(e.to_string()))?;

        // Write beside the destination and rename into place, so a crash
        // mid-write leaves the previous cache intact.
        let mut temp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| persist_failed(e.to_string()))?;
        temp.write_all(&payload)
            .map_err(|e| persist_failed(e.to_string()))?;
        temp.persist(&self.path)
            .map_err(|e| persist_failed(e.to_string()))?;

        Ok(())
    }
}
