//! # Automatic Backups
//!
//! Background loop that snapshots every eligible service on a fixed interval,
//! pausing between services so the store is not hit in a burst. The first
//! cycle runs as soon as the scheduler starts.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::manager::BackupManager;
use crate::config::AutoBackupConfig;
use crate::error::CoreError;

/// Source of the service ids to back up each cycle
#[async_trait]
pub trait BackupTargets: Send + Sync {
    async fn backup_targets(&self) -> Vec<i64>;
}

/// A fixed list of service ids
#[async_trait]
impl BackupTargets for Vec<i64> {
    async fn backup_targets(&self) -> Vec<i64> {
        self.clone()
    }
}

/// Result of one backup cycle
#[derive(Debug, Default, Clone)]
pub struct BackupCycleReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(i64, String)>,
    /// Targets skipped because the scheduler was stopping
    pub skipped: usize,
}

pub struct AutoBackupScheduler {
    manager: Arc<BackupManager>,
    targets: Arc<dyn BackupTargets>,
    interval: Duration,
    spacing: Duration,
    shutdown_notify: Arc<Notify>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AutoBackupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoBackupScheduler")
            .field("interval", &self.interval)
            .field("spacing", &self.spacing)
            .field("running", &self.is_running())
            .finish()
    }
}

impl AutoBackupScheduler {
    pub fn new(
        manager: Arc<BackupManager>,
        targets: Arc<dyn BackupTargets>,
        config: &AutoBackupConfig,
    ) -> Self {
        Self {
            manager,
            targets,
            interval: config.interval(),
            spacing: config.spacing(),
            shutdown_notify: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the backup loop on the current tokio runtime
    pub fn start(&self) -> Result<(), CoreError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CoreError::coordinator(
                "Auto backup scheduler is already running",
            ));
        }

        let manager = Arc::clone(&self.manager);
        let targets = Arc::clone(&self.targets);
        let shutdown_notify = Arc::clone(&self.shutdown_notify);
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        let spacing = self.spacing;

        info!(
            interval_seconds = interval.as_secs(),
            spacing_seconds = spacing.as_secs(),
            "Starting auto backup loop"
        );

        let handle = tokio::spawn(async move {
            loop {
                let report = Self::cycle(&manager, targets.as_ref(), spacing, &running).await;
                info!(
                    written = report.written.len(),
                    failed = report.failed.len(),
                    skipped = report.skipped,
                    "Auto backup cycle complete"
                );

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_notify.notified() => {
                        info!("Auto backup loop shutting down");
                        break;
                    }
                }
            }
        });

        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Signal the loop to stop and wait for it. The cycle in progress
    /// finishes its current service and skips the rest.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // notify_one stores a permit if the loop is mid-cycle
        self.shutdown_notify.notify_one();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Auto backup loop ended abnormally");
            }
        }
    }

    /// Run one cycle immediately, outside the loop
    pub async fn run_cycle(&self) -> BackupCycleReport {
        let always = AtomicBool::new(true);
        Self::cycle(&self.manager, self.targets.as_ref(), self.spacing, &always).await
    }

    async fn cycle(
        manager: &BackupManager,
        targets: &dyn BackupTargets,
        spacing: Duration,
        running: &AtomicBool,
    ) -> BackupCycleReport {
        let service_ids = targets.backup_targets().await;
        let mut report = BackupCycleReport::default();

        for (index, service_id) in service_ids.iter().copied().enumerate() {
            if !running.load(Ordering::SeqCst) {
                report.skipped = service_ids.len() - index;
                break;
            }

            if index > 0 && !spacing.is_zero() {
                tokio::time::sleep(spacing).await;
            }

            match manager.backup(service_id).await {
                Ok(path) => report.written.push(path),
                Err(e) => {
                    warn!(service_id = service_id, error = %e, "Auto backup failed");
                    report.failed.push((service_id, e.to_string()));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{InMemorySnapshotStore, RecordGroupSpec};
    use crate::config::BackupConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn manager_in(dir: &TempDir, store: Arc<InMemorySnapshotStore>) -> Arc<BackupManager> {
        let config = BackupConfig {
            directory: dir.path().to_string_lossy().into_owned(),
            ..Default::default()
        };
        Arc::new(BackupManager::new(store, &config))
    }

    fn no_spacing() -> AutoBackupConfig {
        AutoBackupConfig {
            enabled: true,
            interval_seconds: 3600,
            spacing_seconds: 0,
        }
    }

    #[tokio::test]
    async fn test_cycle_backs_up_each_target() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, Arc::new(InMemorySnapshotStore::new()));
        let scheduler = AutoBackupScheduler::new(manager, Arc::new(vec![1_i64, 2]), &no_spacing());

        let report = scheduler.run_cycle().await;
        assert_eq!(report.written.len(), 2);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_failed_target_does_not_stop_cycle() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemorySnapshotStore::new());
        let settings = &RecordGroupSpec::guild_defaults()[0];
        store
            .upsert(settings, json!({ "guild_id": 1 }).as_object().cloned().unwrap())
            .unwrap();
        store.fail_fetches_from("guild_members");

        let manager = manager_in(&dir, Arc::clone(&store));
        let scheduler = AutoBackupScheduler::new(manager, Arc::new(vec![1_i64, 2]), &no_spacing());

        let report = scheduler.run_cycle().await;
        assert!(report.written.is_empty());
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].0, 1);
    }

    #[tokio::test]
    async fn test_start_runs_first_cycle_and_stops() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir, Arc::new(InMemorySnapshotStore::new()));
        let scheduler =
            AutoBackupScheduler::new(Arc::clone(&manager), Arc::new(vec![7_i64]), &no_spacing());

        scheduler.start().unwrap();
        assert!(scheduler.start().is_err());

        let mut written = 0;
        for _ in 0..100 {
            written = manager.backup_count().await;
            if written > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(written, 1);

        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }
}
