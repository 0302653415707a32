//! # Snapshot Store
//!
//! The seam between the backup manager and the durable store. A store reads
//! all record groups of a service from one consistent view and applies a
//! restore as a single all-or-nothing unit of work.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::StoreError;

/// A flat, field-keyed record as exported to and restored from snapshots
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Top-level snapshot keys that record groups may not shadow
pub(crate) const RESERVED_GROUP_NAMES: [&str; 3] = ["timestamp", "schema_version", "service_id"];

const DEFAULT_SCOPE_COLUMN: &str = "guild_id";

fn default_scope_column() -> String {
    DEFAULT_SCOPE_COLUMN.to_string()
}

/// One logical record group: where it lives and how its rows are identified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordGroupSpec {
    /// Group name in the snapshot document
    pub name: String,

    /// Backing table
    pub table: String,

    /// Column holding the owning service id
    #[serde(default = "default_scope_column")]
    pub scope_column: String,

    /// Natural key used for idempotent upserts; includes the scope column
    pub key_columns: Vec<String>,
}

impl RecordGroupSpec {
    pub fn new(name: &str, table: &str, key_columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            scope_column: default_scope_column(),
            key_columns: key_columns.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// The guild data set exported by the chat bot, in restore order
    pub fn guild_defaults() -> Vec<Self> {
        vec![
            Self::new("settings", "guild_settings", &["guild_id"]),
            Self::new("members", "guild_members", &["guild_id", "member_id"]),
            Self::new("roles", "guild_roles", &["guild_id", "role_name"]),
            Self::new("channels", "guild_channels", &["guild_id", "channel_name"]),
            Self::new("events", "events_data", &["guild_id", "event_id"]),
        ]
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("record group name must not be empty".to_string());
        }
        if RESERVED_GROUP_NAMES.contains(&self.name.as_str()) {
            return Err(format!("record group name '{}' is reserved", self.name));
        }
        if !is_identifier(&self.table) {
            return Err(format!("table '{}' is not a valid identifier", self.table));
        }
        if !is_identifier(&self.scope_column) {
            return Err(format!(
                "scope column '{}' is not a valid identifier",
                self.scope_column
            ));
        }
        if self.key_columns.is_empty() {
            return Err(format!("group '{}' needs at least one key column", self.name));
        }
        if let Some(bad) = self.key_columns.iter().find(|k| !is_identifier(k)) {
            return Err(format!("key column '{bad}' is not a valid identifier"));
        }
        if !self.key_columns.contains(&self.scope_column) {
            return Err(format!(
                "key columns of '{}' must include the scope column '{}'",
                self.name, self.scope_column
            ));
        }
        Ok(())
    }

    /// Key columns that are absent or null in `record`
    pub fn missing_keys<'a>(&'a self, record: &Record) -> Vec<&'a str> {
        self.key_columns
            .iter()
            .filter(|key| record.get(key.as_str()).map_or(true, |v| v.is_null()))
            .map(String::as_str)
            .collect()
    }
}

/// ASCII letters, digits and underscores, not starting with a digit
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Records of one group to be upserted by natural key
#[derive(Debug, Clone)]
pub struct UpsertBatch {
    pub group: RecordGroupSpec,
    pub records: Vec<Record>,
}

/// Durable store holding the live records of every service
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// All records of `group` belonging to `service_id`
    async fn fetch_group(
        &self,
        service_id: i64,
        group: &RecordGroupSpec,
    ) -> Result<Vec<Record>, StoreError>;

    /// Records of every group in `groups`, in the same order, read from one
    /// consistent view of the store.
    ///
    /// The default reads group by group; stores that can do better override it.
    async fn fetch_snapshot(
        &self,
        service_id: i64,
        groups: &[RecordGroupSpec],
    ) -> Result<Vec<Vec<Record>>, StoreError> {
        let mut records = Vec::with_capacity(groups.len());
        for group in groups {
            records.push(self.fetch_group(service_id, group).await?);
        }
        Ok(records)
    }

    /// Upsert every batch in one transaction. On error nothing is applied.
    async fn apply_restore(&self, service_id: i64, batches: Vec<UpsertBatch>)
        -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_guild_defaults_are_valid() {
        let groups = RecordGroupSpec::guild_defaults();
        assert_eq!(groups.len(), 5);
        assert_eq!(groups[0].name, "settings");
        for group in &groups {
            assert!(group.validate().is_ok(), "{group:?}");
        }
    }

    #[test]
    fn test_validation_rejects_unsafe_specs() {
        let mut group = RecordGroupSpec::new("members", "guild_members; DROP", &["guild_id"]);
        assert!(group.validate().is_err());

        group = RecordGroupSpec::new("timestamp", "guild_members", &["guild_id"]);
        assert!(group.validate().is_err());

        group = RecordGroupSpec::new("members", "guild_members", &["member_id"]);
        assert!(group.validate().unwrap_err().contains("scope column"));
    }

    #[test]
    fn test_missing_keys_treats_null_as_missing() {
        let group = RecordGroupSpec::new("members", "guild_members", &["guild_id", "member_id"]);
        let record = json!({ "guild_id": 1, "member_id": null, "username": "ana" });
        let record = record.as_object().unwrap();
        assert_eq!(group.missing_keys(record), vec!["member_id"]);
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("guild_members"));
        assert!(is_identifier("_private"));
        assert!(is_identifier("GS"));
        assert!(!is_identifier("1table"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("bad-name"));
    }
}
