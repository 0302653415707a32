//! # PostgreSQL Snapshot Store
//!
//! Reads record groups as JSON rows with `row_to_json` and restores them with
//! `jsonb_populate_record` upserts keyed on each group's natural key. A backup
//! reads every group inside one read-only `REPEATABLE READ` transaction, so
//! the snapshot sees a single point in time. The whole restore runs in one
//! transaction; dropping it without commit rolls back.
//!
//! Table and column names come from validated configuration and from keys of
//! snapshot records. All of them are quoted as identifiers; values are always
//! bound parameters.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, instrument};

use super::error::StoreError;
use super::store::{is_identifier, Record, RecordGroupSpec, SnapshotStore, UpsertBatch};

#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) const SNAPSHOT_ISOLATION_SQL: &str =
    "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY";

/// Quote a SQL identifier, doubling embedded quotes
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn select_group_sql(group: &RecordGroupSpec) -> String {
    format!(
        "SELECT row_to_json(t)::jsonb FROM {} t WHERE t.{} = $1",
        quote_ident(&group.table),
        quote_ident(&group.scope_column)
    )
}

/// Upsert statement for one record: columns present in the record but not in
/// the key are overwritten on conflict, absent columns keep their live value.
pub(crate) fn upsert_sql(group: &RecordGroupSpec, record: &Record) -> Result<String, StoreError> {
    if let Some(bad) = record.keys().find(|column| !is_identifier(column)) {
        return Err(StoreError::invalid_record(
            &group.table,
            format!("column '{bad}' is not a valid identifier"),
        ));
    }

    let missing = group.missing_keys(record);
    if !missing.is_empty() {
        return Err(StoreError::invalid_record(
            &group.table,
            format!("missing key columns: {}", missing.join(", ")),
        ));
    }

    let table = quote_ident(&group.table);
    let columns: Vec<String> = record.keys().map(|c| quote_ident(c)).collect();
    let keys: Vec<String> = group.key_columns.iter().map(|c| quote_ident(c)).collect();
    let updates: Vec<String> = record
        .keys()
        .filter(|column| !group.key_columns.contains(column))
        .map(|column| {
            let quoted = quote_ident(column);
            format!("{quoted} = EXCLUDED.{quoted}")
        })
        .collect();

    let conflict_action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    Ok(format!(
        "INSERT INTO {table} ({cols}) SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $1) \
         ON CONFLICT ({keys}) {conflict_action}",
        cols = columns.join(", "),
        keys = keys.join(", "),
    ))
}

async fn fetch_rows(
    conn: &mut PgConnection,
    service_id: i64,
    group: &RecordGroupSpec,
) -> Result<Vec<Record>, StoreError> {
    let rows: Vec<serde_json::Value> = sqlx::query_scalar(&select_group_sql(group))
        .bind(service_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| StoreError::query(&group.table, e))?;

    rows.into_iter()
        .map(|row| match row {
            serde_json::Value::Object(record) => Ok(record),
            other => Err(StoreError::query(
                &group.table,
                format!("expected a JSON object row, got {other}"),
            )),
        })
        .collect()
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    #[instrument(skip(self, group), fields(table = %group.table))]
    async fn fetch_group(
        &self,
        service_id: i64,
        group: &RecordGroupSpec,
    ) -> Result<Vec<Record>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to acquire connection: {e}")))?;
        fetch_rows(&mut conn, service_id, group).await
    }

    #[instrument(skip(self, groups), fields(groups = groups.len()))]
    async fn fetch_snapshot(
        &self,
        service_id: i64,
        groups: &[RecordGroupSpec],
    ) -> Result<Vec<Vec<Record>>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to begin transaction: {e}")))?;

        sqlx::query(SNAPSHOT_ISOLATION_SQL)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Transaction(format!("Failed to set snapshot isolation: {e}")))?;

        let mut records = Vec::with_capacity(groups.len());
        for group in groups {
            records.push(fetch_rows(&mut tx, service_id, group).await?);
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Transaction(format!("Failed to end read transaction: {e}")))?;

        debug!(service_id = service_id, groups = groups.len(), "Read consistent snapshot");
        Ok(records)
    }

    #[instrument(skip(self, batches))]
    async fn apply_restore(
        &self,
        service_id: i64,
        batches: Vec<UpsertBatch>,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to begin transaction: {e}")))?;

        let mut applied = 0usize;
        for batch in &batches {
            for record in &batch.records {
                let sql = upsert_sql(&batch.group, record)?;
                sqlx::query(&sql)
                    .bind(Json(record))
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        StoreError::Transaction(format!("upsert into {} failed: {e}", batch.group.table))
                    })?;
                applied += 1;
            }
            debug!(
                service_id = service_id,
                table = %batch.group.table,
                records = batch.records.len(),
                "Restored record group"
            );
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Transaction(format!("Failed to commit transaction: {e}")))?;

        info!(service_id = service_id, records = applied, "Restore transaction committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn member_record() -> Record {
        json!({ "guild_id": 7, "member_id": 1, "username": "ana", "class": "tank" })
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_select_sql_is_scoped_and_quoted() {
        let group = RecordGroupSpec::new("members", "guild_members", &["guild_id", "member_id"]);
        assert_eq!(
            select_group_sql(&group),
            "SELECT row_to_json(t)::jsonb FROM \"guild_members\" t WHERE t.\"guild_id\" = $1"
        );
    }

    #[test]
    fn test_snapshot_reads_use_one_read_only_view() {
        assert!(SNAPSHOT_ISOLATION_SQL.contains("REPEATABLE READ"));
        assert!(SNAPSHOT_ISOLATION_SQL.ends_with("READ ONLY"));
    }

    #[test]
    fn test_upsert_updates_only_non_key_columns() {
        let group = RecordGroupSpec::new("members", "guild_members", &["guild_id", "member_id"]);
        let sql = upsert_sql(&group, &member_record()).unwrap();

        assert!(sql.starts_with("INSERT INTO \"guild_members\""));
        assert!(sql.contains("jsonb_populate_record(NULL::\"guild_members\", $1)"));
        assert!(sql.contains("ON CONFLICT (\"guild_id\", \"member_id\") DO UPDATE SET"));
        assert!(sql.contains("\"class\" = EXCLUDED.\"class\""));
        assert!(!sql.contains("\"member_id\" = EXCLUDED"));
    }

    #[test]
    fn test_key_only_record_does_nothing_on_conflict() {
        let group = RecordGroupSpec::new("settings", "guild_settings", &["guild_id"]);
        let record = json!({ "guild_id": 7 }).as_object().cloned().unwrap();
        assert!(upsert_sql(&group, &record).unwrap().ends_with("DO NOTHING"));
    }

    #[test]
    fn test_unsafe_column_rejected() {
        let group = RecordGroupSpec::new("members", "guild_members", &["guild_id", "member_id"]);
        let mut record = member_record();
        record.insert("x\"; DROP TABLE t; --".to_string(), json!(1));
        assert!(matches!(
            upsert_sql(&group, &record),
            Err(StoreError::InvalidRecord { .. })
        ));
    }
}
