//! # Backup Manager
//!
//! Writes point-in-time snapshots of a service's record groups to JSON files
//! and restores them transactionally through a [`SnapshotStore`].
//!
//! Snapshots are assembled completely in memory before anything touches the
//! disk, then written to a hidden temporary file and linked into place under
//! a name no other snapshot holds, so a failed backup never leaves a partial
//! snapshot behind and a written snapshot is never replaced. File I/O goes through
//! `tokio::fs`, which runs on the blocking pool and keeps the caller's task free.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, instrument, warn};

use super::error::BackupError;
use super::snapshot::{BackupSnapshot, SnapshotFileName};
use super::store::{RecordGroupSpec, SnapshotStore, UpsertBatch};
use crate::config::BackupConfig;
use crate::logging::{log_backup_operation, log_error};

/// Extra names tried for one timestamp; single digits keep names sortable
const MAX_NAME_COLLISIONS: u32 = 9;

/// Listing entry for one snapshot file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub filename: String,
    pub path: PathBuf,
    pub service_id: i64,
    /// Timestamp text embedded in the file name
    pub timestamp: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a successful restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub service_id: i64,
    pub groups: usize,
    pub records: usize,
}

pub struct BackupManager {
    store: Arc<dyn SnapshotStore>,
    directory: PathBuf,
    file_prefix: String,
    schema_version: String,
    record_groups: Vec<RecordGroupSpec>,
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("directory", &self.directory)
            .field("file_prefix", &self.file_prefix)
            .field("schema_version", &self.schema_version)
            .field("record_groups", &self.record_groups.len())
            .finish()
    }
}

impl BackupManager {
    pub fn new(store: Arc<dyn SnapshotStore>, config: &BackupConfig) -> Self {
        Self {
            store,
            directory: PathBuf::from(&config.directory),
            file_prefix: config.file_prefix.clone(),
            schema_version: config.schema_version.clone(),
            record_groups: config.record_groups.clone(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.directory
    }

    pub fn record_groups(&self) -> &[RecordGroupSpec] {
        &self.record_groups
    }

    pub async fn ensure_backup_dir(&self) -> Result<(), BackupError> {
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| BackupError::io(&self.directory, e))
    }

    /// Export every record group of `service_id` into a new snapshot file
    #[instrument(skip(self))]
    pub async fn backup(&self, service_id: i64) -> Result<PathBuf, BackupError> {
        let snapshot = match self.collect_snapshot(service_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log_error(
                    "backup_manager",
                    "backup",
                    &e.to_string(),
                    Some("backup aborted, nothing written"),
                );
                return Err(e);
            }
        };

        let path = self.write_snapshot(&snapshot).await?;

        log_backup_operation(
            "backup",
            service_id,
            "completed",
            Some(snapshot.record_count()),
            Some(&path.display().to_string()),
        );
        Ok(path)
    }

    async fn collect_snapshot(&self, service_id: i64) -> Result<BackupSnapshot, BackupError> {
        let mut snapshot = BackupSnapshot::new(service_id, &self.schema_version);
        let fetched = self
            .store
            .fetch_snapshot(service_id, &self.record_groups)
            .await?;

        for (group, records) in self.record_groups.iter().zip(fetched) {
            debug!(
                service_id = service_id,
                group = %group.name,
                records = records.len(),
                "Collected record group"
            );
            snapshot.push_group(group.name.clone(), records);
        }

        Ok(snapshot)
    }

    /// Write `snapshot` to a temporary file, then link it under the first
    /// free snapshot name. An existing snapshot file is never replaced.
    async fn write_snapshot(&self, snapshot: &BackupSnapshot) -> Result<PathBuf, BackupError> {
        let body = serde_json::to_vec_pretty(snapshot)?;

        self.ensure_backup_dir().await?;

        let file_name = snapshot.file_name(&self.file_prefix);
        let temp_path = self
            .directory
            .join(format!(".{file_name}.{:016x}.tmp", fastrand::u64(..)));

        let write_result: std::io::Result<()> = async {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)
                .await?;
            file.write_all(&body).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = write_result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(BackupError::io(&temp_path, e));
        }

        let linked = self.link_unused_name(snapshot, &temp_path).await;
        if let Err(e) = fs::remove_file(&temp_path).await {
            warn!(path = %temp_path.display(), error = %e, "Failed to remove temporary snapshot file");
        }
        linked
    }

    async fn link_unused_name(
        &self,
        snapshot: &BackupSnapshot,
        temp_path: &Path,
    ) -> Result<PathBuf, BackupError> {
        let mut sequence = 0;
        loop {
            let candidate = self
                .directory
                .join(snapshot.file_name_with_sequence(&self.file_prefix, sequence));

            // hard_link fails rather than replace an existing target
            match fs::hard_link(temp_path, &candidate).await {
                Ok(()) => return Ok(candidate),
                Err(e)
                    if e.kind() == std::io::ErrorKind::AlreadyExists
                        && sequence < MAX_NAME_COLLISIONS =>
                {
                    debug!(path = %candidate.display(), "Snapshot name taken, trying next sequence");
                    sequence += 1;
                }
                Err(e) => return Err(BackupError::io(&candidate, e)),
            }
        }
    }

    /// Read and parse a snapshot file without touching the store
    pub async fn load_snapshot(&self, path: &Path) -> Result<BackupSnapshot, BackupError> {
        let body = fs::read(path).await.map_err(|e| BackupError::io(path, e))?;
        serde_json::from_slice(&body)
            .map_err(|e| BackupError::invalid_snapshot(path, e.to_string()))
    }

    /// Restore `service_id` from a snapshot file. Returns `false` after
    /// logging the cause if anything fails; the store is then unchanged.
    pub async fn restore(&self, service_id: i64, path: &Path) -> bool {
        match self.try_restore(service_id, path).await {
            Ok(summary) => {
                log_backup_operation(
                    "restore",
                    service_id,
                    "completed",
                    Some(summary.records),
                    Some(&path.display().to_string()),
                );
                true
            }
            Err(e) => {
                error!(
                    service_id = service_id,
                    path = %path.display(),
                    error = %e,
                    "Restore failed, no changes applied"
                );
                false
            }
        }
    }

    /// Restore, reporting the failure cause instead of a flag
    pub async fn try_restore(
        &self,
        service_id: i64,
        path: &Path,
    ) -> Result<RestoreSummary, BackupError> {
        let snapshot = self.load_snapshot(path).await?;

        if snapshot.schema_version != self.schema_version {
            return Err(BackupError::SchemaMismatch {
                expected: self.schema_version.clone(),
                found: snapshot.schema_version,
            });
        }
        if snapshot.service_id != service_id {
            return Err(BackupError::ServiceMismatch {
                expected: service_id,
                found: snapshot.service_id,
            });
        }

        let batches = self.build_batches(path, service_id, &snapshot)?;
        let summary = RestoreSummary {
            service_id,
            groups: batches.len(),
            records: batches.iter().map(|b| b.records.len()).sum(),
        };

        self.store.apply_restore(service_id, batches).await?;
        Ok(summary)
    }

    /// One upsert batch per configured group present in the snapshot, in configured order
    fn build_batches(
        &self,
        path: &Path,
        service_id: i64,
        snapshot: &BackupSnapshot,
    ) -> Result<Vec<UpsertBatch>, BackupError> {
        for group in &snapshot.groups {
            if !self.record_groups.iter().any(|spec| spec.name == group.name) {
                warn!(group = %group.name, "Snapshot group not configured, skipping");
            }
        }

        let mut batches = Vec::new();
        for spec in &self.record_groups {
            let Some(group) = snapshot.group(&spec.name) else {
                continue;
            };

            for record in &group.records {
                let missing = spec.missing_keys(record);
                if !missing.is_empty() {
                    return Err(BackupError::invalid_snapshot(
                        path,
                        format!(
                            "record in '{}' is missing key columns: {}",
                            spec.name,
                            missing.join(", ")
                        ),
                    ));
                }

                let owner = record.get(&spec.scope_column).and_then(|v| v.as_i64());
                if owner != Some(service_id) {
                    return Err(BackupError::invalid_snapshot(
                        path,
                        format!(
                            "record in '{}' belongs to {:?}, not service {service_id}",
                            spec.name, owner
                        ),
                    ));
                }
            }

            batches.push(UpsertBatch {
                group: spec.clone(),
                records: group.records.clone(),
            });
        }

        Ok(batches)
    }

    /// Resolve a bare snapshot file name inside the backup directory.
    /// Anything that is not one of our snapshot names is rejected.
    pub fn resolve_backup_path(&self, file_name: &str) -> Result<PathBuf, BackupError> {
        let is_plain_name = Path::new(file_name)
            .file_name()
            .map(|name| name == file_name)
            .unwrap_or(false);

        if !is_plain_name || SnapshotFileName::parse(file_name, &self.file_prefix).is_none() {
            return Err(BackupError::invalid_snapshot(
                file_name,
                "not a snapshot file name",
            ));
        }
        Ok(self.directory.join(file_name))
    }

    /// Snapshot files, newest first, optionally for one service only
    pub async fn list_backups(&self, service_id: Option<i64>) -> Result<Vec<BackupInfo>, BackupError> {
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::io(&self.directory, e)),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackupError::io(&self.directory, e))?
        {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some(parsed) = SnapshotFileName::parse(&filename, &self.file_prefix) else {
                continue;
            };
            if service_id.is_some_and(|id| id != parsed.service_id) {
                continue;
            }

            let metadata = entry
                .metadata()
                .await
                .map_err(|e| BackupError::io(entry.path(), e))?;
            if !metadata.is_file() {
                continue;
            }
            let created_at = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            backups.push(BackupInfo {
                path: entry.path(),
                filename,
                service_id: parsed.service_id,
                timestamp: parsed.timestamp,
                size: metadata.len(),
                created_at,
            });
        }

        backups.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(backups)
    }

    /// Number of snapshot files across all services (0 if the directory is unreadable)
    pub async fn backup_count(&self) -> usize {
        match self.list_backups(None).await {
            Ok(backups) => backups.len(),
            Err(e) => {
                warn!(error = %e, "Unable to count backups");
                0
            }
        }
    }
}
