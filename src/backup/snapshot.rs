//! # Backup Snapshot Format
//!
//! A snapshot is one pretty-printed JSON document:
//!
//! ```json
//! {
//!   "timestamp": "2025-01-05T10:22:01.123456Z",
//!   "schema_version": "1.0",
//!   "service_id": 42,
//!   "settings": [ { "guild_id": 42, "guild_name": "..." } ],
//!   "members": [ ... ]
//! }
//! ```
//!
//! Each record group is a top-level array keyed by group name. File names
//! carry the service id and a fixed-width timestamp so listings sort without
//! opening files: `{prefix}_{service_id}_{YYYYmmdd_HHMMSS_ffffff}.json`.

use chrono::{DateTime, Utc};
use serde::de::{Deserializer, Error as _};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::store::{Record, RESERVED_GROUP_NAMES};
use crate::constants::backup;

/// Records of one logical group, in export order
#[derive(Debug, Clone, PartialEq)]
pub struct RecordGroup {
    pub name: String,
    pub records: Vec<Record>,
}

/// Point-in-time export of one service's durable state
#[derive(Debug, Clone, PartialEq)]
pub struct BackupSnapshot {
    pub timestamp: DateTime<Utc>,
    pub schema_version: String,
    pub service_id: i64,
    pub groups: Vec<RecordGroup>,
}

impl BackupSnapshot {
    pub fn new(service_id: i64, schema_version: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            schema_version: schema_version.into(),
            service_id,
            groups: Vec::new(),
        }
    }

    pub fn push_group(&mut self, name: impl Into<String>, records: Vec<Record>) {
        self.groups.push(RecordGroup {
            name: name.into(),
            records,
        });
    }

    pub fn group(&self, name: &str) -> Option<&RecordGroup> {
        self.groups.iter().find(|group| group.name == name)
    }

    pub fn record_count(&self) -> usize {
        self.groups.iter().map(|group| group.records.len()).sum()
    }

    /// File name for this snapshot
    pub fn file_name(&self, prefix: &str) -> String {
        self.file_name_with_sequence(prefix, 0)
    }

    /// File name with a collision sequence appended to the timestamp; `0`
    /// gives the plain name. Sequenced names still parse and sort after it.
    pub fn file_name_with_sequence(&self, prefix: &str, sequence: u32) -> String {
        let timestamp = self.timestamp.format(backup::TIMESTAMP_FORMAT);
        if sequence == 0 {
            format!("{prefix}_{}_{timestamp}.{}", self.service_id, backup::FILE_EXTENSION)
        } else {
            format!(
                "{prefix}_{}_{timestamp}_{sequence}.{}",
                self.service_id,
                backup::FILE_EXTENSION
            )
        }
    }
}

impl Serialize for BackupSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3 + self.groups.len()))?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.serialize_entry("schema_version", &self.schema_version)?;
        map.serialize_entry("service_id", &self.service_id)?;
        for group in &self.groups {
            map.serialize_entry(&group.name, &group.records)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct RawSnapshot {
    timestamp: DateTime<Utc>,
    schema_version: String,
    service_id: i64,
    #[serde(flatten)]
    groups: BTreeMap<String, serde_json::Value>,
}

impl<'de> Deserialize<'de> for BackupSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawSnapshot::deserialize(deserializer)?;

        let mut groups = Vec::with_capacity(raw.groups.len());
        for (name, value) in raw.groups {
            if RESERVED_GROUP_NAMES.contains(&name.as_str()) {
                continue;
            }
            let records: Vec<Record> = serde_json::from_value(value).map_err(|e| {
                D::Error::custom(format!("record group '{name}' is not an array of objects: {e}"))
            })?;
            groups.push(RecordGroup { name, records });
        }

        Ok(Self {
            timestamp: raw.timestamp,
            schema_version: raw.schema_version,
            service_id: raw.service_id,
            groups,
        })
    }
}

/// Service id and timestamp encoded in a snapshot file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFileName {
    pub service_id: i64,
    /// Fixed-width, lexicographically sortable timestamp text
    pub timestamp: String,
}

impl SnapshotFileName {
    /// Parse `{prefix}_{service_id}_{timestamp}.json`; `None` for foreign files
    pub fn parse(file_name: &str, prefix: &str) -> Option<Self> {
        let stem = file_name
            .strip_suffix(backup::FILE_EXTENSION)?
            .strip_suffix('.')?
            .strip_prefix(prefix)?
            .strip_prefix('_')?;

        let (service_id, timestamp) = stem.split_once('_')?;
        let service_id = service_id.parse::<i64>().ok()?;

        let well_formed = !timestamp.is_empty()
            && timestamp.chars().all(|c| c.is_ascii_digit() || c == '_');
        if !well_formed {
            return None;
        }

        Some(Self {
            service_id,
            timestamp: timestamp.to_string(),
        })
    }
}
