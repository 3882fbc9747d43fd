use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::broker::admin::AdminService;
use crate::broker::config::MaintenanceConfig;
use crate::broker::queue_service::QueueService;
use crate::error::{MaintenanceError, StorageResult};

/// Owns the background maintenance threads: the lease reaper, the
/// dead-letter mover and, when soft delete is on, the tombstone purger.
/// Dropping the shutdown sender disconnects every thread's receiver, which
/// ends its loop.
pub struct Maintenance {
    shutdown_tx: Option<Sender<()>>,
    threads: Vec<(&'static str, thread::JoinHandle<()>)>,
}

impl Maintenance {
    #[tracing::instrument(skip_all)]
    pub fn start(
        queue: Arc<QueueService>,
        admin: Arc<AdminService>,
        config: &MaintenanceConfig,
    ) -> Result<Self, MaintenanceError> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let mut maintenance = Self {
            shutdown_tx: Some(shutdown_tx),
            threads: Vec::new(),
        };

        let reaper_batch = config.reaper_batch_size;
        let reaper_admin = Arc::clone(&admin);
        maintenance.spawn(
            "sluice-lease-reaper",
            config.reaper_interval_ms,
            &shutdown_rx,
            move || reaper_admin.reclaim_expired(reaper_batch),
        )?;

        let mover_batch = config.mover_batch_size;
        maintenance.spawn(
            "sluice-dlq-mover",
            config.mover_interval_ms,
            &shutdown_rx,
            move || queue.move_exceeded_attempts_to_dead_letter(mover_batch),
        )?;

        if admin.dead_letter_settings().soft_delete {
            let retention_days = admin.dead_letter_settings().retention_days;
            let purge_admin = Arc::clone(&admin);
            maintenance.spawn(
                "sluice-dlq-purger",
                config.purge_interval_ms,
                &shutdown_rx,
                move || purge_admin.purge_soft_deleted(retention_days),
            )?;
        }

        info!(tasks = maintenance.threads.len(), "maintenance started");
        Ok(maintenance)
    }

    fn spawn<F>(
        &mut self,
        name: &'static str,
        interval_ms: u64,
        shutdown_rx: &Receiver<()>,
        tick: F,
    ) -> Result<(), MaintenanceError>
    where
        F: Fn() -> StorageResult<usize> + Send + 'static,
    {
        if interval_ms == 0 {
            info!(task = name, "maintenance task disabled");
            return Ok(());
        }
        let interval = Duration::from_millis(interval_ms);
        let rx = shutdown_rx.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_periodic(name, interval, &rx, tick))
            .map_err(|e| MaintenanceError::Spawn(e.to_string()))?;
        self.threads.push((name, handle));
        Ok(())
    }

    /// Names of the running tasks.
    pub fn tasks(&self) -> Vec<&'static str> {
        self.threads.iter().map(|(name, _)| *name).collect()
    }

    /// Signal every task to stop and wait for the threads to finish.
    #[tracing::instrument(skip_all)]
    pub fn shutdown(mut self) -> Result<(), MaintenanceError> {
        info!("stopping maintenance");
        self.stop()
    }

    fn stop(&mut self) -> Result<(), MaintenanceError> {
        self.shutdown_tx.take();
        let mut result = Ok(());
        for (name, handle) in self.threads.drain(..) {
            if handle.join().is_err() {
                result = Err(MaintenanceError::Panicked(name));
            }
        }
        result
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            let _ = self.stop();
        }
    }
}

/// Run `tick` every `interval` until the shutdown channel disconnects. A
/// failed tick is logged and retried on the next interval.
fn run_periodic<F>(name: &'static str, interval: Duration, shutdown_rx: &Receiver<()>, tick: F)
where
    F: Fn() -> StorageResult<usize>,
{
    debug!(task = name, ?interval, "maintenance task running");
    loop {
        match shutdown_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => match tick() {
                Ok(0) => {}
                Ok(count) => debug!(task = name, count, "maintenance tick"),
                Err(e) => warn!(task = name, error = %e, "maintenance tick failed"),
            },
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(task = name, "maintenance task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::config::{DeadLetterSettings, QueueSettings};
    use crate::error::StorageError;
    use crate::storage::{MessageStore, RocksDbStorage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn services(soft_delete: bool) -> (Arc<QueueService>, Arc<AdminService>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn MessageStore> = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
        let queue = Arc::new(QueueService::new(store.clone(), QueueSettings::default()));
        let admin = Arc::new(AdminService::new(
            store,
            QueueSettings::default(),
            DeadLetterSettings {
                soft_delete,
                retention_days: 7,
            },
        ));
        (queue, admin, dir)
    }

    #[test]
    fn starts_reaper_and_mover_without_soft_delete() {
        let (queue, admin, _dir) = services(false);
        let maintenance = Maintenance::start(queue, admin, &MaintenanceConfig::default()).unwrap();
        assert_eq!(maintenance.tasks(), vec!["sluice-lease-reaper", "sluice-dlq-mover"]);
        maintenance.shutdown().unwrap();
    }

    #[test]
    fn soft_delete_adds_purger() {
        let (queue, admin, _dir) = services(true);
        let maintenance = Maintenance::start(queue, admin, &MaintenanceConfig::default()).unwrap();
        assert!(maintenance.tasks().contains(&"sluice-dlq-purger"));
        maintenance.shutdown().unwrap();
    }

    #[test]
    fn zero_interval_disables_task() {
        let (queue, admin, _dir) = services(false);
        let config = MaintenanceConfig {
            reaper_interval_ms: 0,
            ..Default::default()
        };
        let maintenance = Maintenance::start(queue, admin, &config).unwrap();
        assert_eq!(maintenance.tasks(), vec!["sluice-dlq-mover"]);
    }

    #[test]
    fn drop_stops_threads() {
        let (queue, admin, _dir) = services(true);
        let maintenance = Maintenance::start(queue, admin, &MaintenanceConfig::default()).unwrap();
        drop(maintenance);
        // If we get here without hanging, the Drop impl worked
    }

    #[test]
    fn periodic_task_keeps_running_after_errors() {
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = thread::spawn(move || {
            run_periodic("test", Duration::from_millis(5), &rx, move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n % 2 == 0 {
                    Err(StorageError::RocksDb("transient".into()))
                } else {
                    Ok(1)
                }
            })
        });

        while calls.load(Ordering::SeqCst) < 4 {
            thread::sleep(Duration::from_millis(5));
        }
        drop(tx);
        handle.join().unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 4);
    }
}
