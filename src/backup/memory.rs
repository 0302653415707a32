//! In-memory snapshot store for tests and embedded use.
//!
//! Restores are applied to a copy of the tables and swapped in only when
//! every upsert succeeded, which gives the same all-or-nothing behavior as a
//! database transaction. Failures can be injected per table.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};

use super::error::StoreError;
use super::store::{Record, RecordGroupSpec, SnapshotStore, UpsertBatch};

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    tables: RwLock<HashMap<String, Vec<Record>>>,
    failing_fetches: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row identified by `group`'s key columns
    pub fn upsert(&self, group: &RecordGroupSpec, record: Record) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        upsert_into(&mut tables, group, record)
    }

    /// Delete every row of `table` whose `column` equals `value`
    pub fn delete_where(&self, table: &str, column: &str, value: &serde_json::Value) -> usize {
        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(table) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|row| row.get(column) != Some(value));
        before - rows.len()
    }

    /// Rows of `table` owned by `service_id`, sorted by `group`'s key columns
    pub fn rows_for(&self, group: &RecordGroupSpec, service_id: i64) -> Vec<Record> {
        scoped_rows(&self.tables.read(), group, service_id)
    }

    pub fn fail_fetches_from(&self, table: &str) {
        self.failing_fetches.lock().insert(table.to_string());
    }

    pub fn fail_writes_to(&self, table: &str) {
        self.failing_writes.lock().insert(table.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_fetches.lock().clear();
        self.failing_writes.lock().clear();
    }
}

fn scoped_rows(
    tables: &HashMap<String, Vec<Record>>,
    group: &RecordGroupSpec,
    service_id: i64,
) -> Vec<Record> {
    let mut rows: Vec<Record> = tables
        .get(&group.table)
        .map(|rows| {
            rows.iter()
                .filter(|row| scope_matches(row, &group.scope_column, service_id))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    rows.sort_by_key(|row| key_of(group, row));
    rows
}

fn scope_matches(row: &Record, scope_column: &str, service_id: i64) -> bool {
    row.get(scope_column).and_then(|v| v.as_i64()) == Some(service_id)
}

fn key_of(group: &RecordGroupSpec, record: &Record) -> Vec<String> {
    group
        .key_columns
        .iter()
        .map(|key| record.get(key).map(|v| v.to_string()).unwrap_or_default())
        .collect()
}

fn upsert_into(
    tables: &mut HashMap<String, Vec<Record>>,
    group: &RecordGroupSpec,
    record: Record,
) -> Result<(), StoreError> {
    let missing = group.missing_keys(&record);
    if !missing.is_empty() {
        return Err(StoreError::invalid_record(
            &group.table,
            format!("missing key columns: {}", missing.join(", ")),
        ));
    }

    let key = key_of(group, &record);
    let rows = tables.entry(group.table.clone()).or_default();
    match rows.iter_mut().find(|row| key_of(group, row) == key) {
        Some(existing) => {
            for (column, value) in record {
                existing.insert(column, value);
            }
        }
        None => rows.push(record),
    }
    Ok(())
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn fetch_group(
        &self,
        service_id: i64,
        group: &RecordGroupSpec,
    ) -> Result<Vec<Record>, StoreError> {
        if self.failing_fetches.lock().contains(&group.table) {
            return Err(StoreError::query(&group.table, "injected fetch failure"));
        }
        Ok(self.rows_for(group, service_id))
    }

    async fn fetch_snapshot(
        &self,
        service_id: i64,
        groups: &[RecordGroupSpec],
    ) -> Result<Vec<Vec<Record>>, StoreError> {
        {
            let failing = self.failing_fetches.lock();
            if let Some(group) = groups.iter().find(|g| failing.contains(&g.table)) {
                return Err(StoreError::query(&group.table, "injected fetch failure"));
            }
        }

        // one read guard across every group
        let tables = self.tables.read();
        Ok(groups
            .iter()
            .map(|group| scoped_rows(&tables, group, service_id))
            .collect())
    }

    async fn apply_restore(
        &self,
        _service_id: i64,
        batches: Vec<UpsertBatch>,
    ) -> Result<(), StoreError> {
        let failing_writes = self.failing_writes.lock().clone();
        let mut tables = self.tables.write();
        let mut staged = tables.clone();

        for batch in batches {
            if failing_writes.contains(&batch.group.table) && !batch.records.is_empty() {
                return Err(StoreError::Transaction(format!(
                    "injected write failure on '{}'",
                    batch.group.table
                )));
            }
            for record in batch.records {
                upsert_into(&mut staged, &batch.group, record)?;
            }
        }

        *tables = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn members() -> RecordGroupSpec {
        RecordGroupSpec::new("members", "guild_members", &["guild_id", "member_id"])
    }

    fn member(guild_id: i64, member_id: i64, username: &str) -> Record {
        json!({ "guild_id": guild_id, "member_id": member_id, "username": username })
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_is_scoped_to_service() {
        let store = InMemorySnapshotStore::new();
        store.upsert(&members(), member(1, 10, "ana")).unwrap();
        store.upsert(&members(), member(2, 11, "bo")).unwrap();

        let rows = store.fetch_group(1, &members()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], "ana");
    }

    #[tokio::test]
    async fn test_upsert_by_natural_key_is_idempotent() {
        let store = InMemorySnapshotStore::new();
        store.upsert(&members(), member(1, 10, "ana")).unwrap();
        store.upsert(&members(), member(1, 10, "ana-renamed")).unwrap();

        let rows = store.rows_for(&members(), 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], "ana-renamed");
    }

    #[tokio::test]
    async fn test_failed_restore_leaves_tables_untouched() {
        let store = InMemorySnapshotStore::new();
        store.upsert(&members(), member(1, 10, "ana")).unwrap();

        let bad = member(1, 11, "bo");
        let mut missing_key = member(1, 12, "cy");
        missing_key.remove("member_id");

        let result = store
            .apply_restore(
                1,
                vec![UpsertBatch {
                    group: members(),
                    records: vec![member(1, 10, "changed"), bad, missing_key],
                }],
            )
            .await;

        assert!(matches!(result, Err(StoreError::InvalidRecord { .. })));
        let rows = store.rows_for(&members(), 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], "ana");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = InMemorySnapshotStore::new();
        store.fail_fetches_from("guild_members");
        assert!(store.fetch_group(1, &members()).await.is_err());

        store.clear_failures();
        store.fail_writes_to("guild_members");
        let result = store
            .apply_restore(
                1,
                vec![UpsertBatch {
                    group: members(),
                    records: vec![member(1, 10, "ana")],
                }],
            )
            .await;
        assert!(matches!(result, Err(StoreError::Transaction(_))));
        assert!(store.rows_for(&members(), 1).is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_read_keeps_group_order() {
        let store = InMemorySnapshotStore::new();
        let settings = RecordGroupSpec::new("settings", "guild_settings", &["guild_id"]);
        store.upsert(&members(), member(1, 10, "ana")).unwrap();
        store.upsert(&members(), member(1, 11, "bo")).unwrap();

        let groups = vec![members(), settings.clone()];
        let fetched = store.fetch_snapshot(1, &groups).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].len(), 2);
        assert!(fetched[1].is_empty());

        store.fail_fetches_from(&settings.table);
        assert!(matches!(
            store.fetch_snapshot(1, &groups).await,
            Err(StoreError::Query { .. })
        ));
    }

    #[test]
    fn test_delete_where() {
        let store = InMemorySnapshotStore::new();
        store.upsert(&members(), member(1, 10, "ana")).unwrap();
        store.upsert(&members(), member(1, 11, "bo")).unwrap();
        assert_eq!(store.delete_where("guild_members", "member_id", &json!(10)), 1);
        assert_eq!(store.rows_for(&members(), 1).len(), 1);
    }
}
