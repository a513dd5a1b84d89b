//! Reaper — the reclamation loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use arena_core::ReaperConfig;
use arena_engine::Engine;
use arena_ledger::{InstanceRecord, SlotState};
use arena_runtime::{ContainerRuntime, ContainerStatus};

/// Tuning knobs for the reclamation loop.
#[derive(Debug, Clone)]
pub struct ReaperSettings {
    /// Time between cycles.
    pub interval: Duration,
    /// Idle time before a Running instance expires.
    pub ttl: Duration,
    /// Age before a Starting marker counts as orphaned.
    pub grace: Duration,
    /// Destroy failures before a record is force-removed.
    pub max_destroy_attempts: u32,
}

impl From<&ReaperConfig> for ReaperSettings {
    fn from(config: &ReaperConfig) -> Self {
        Self {
            interval: config.interval(),
            ttl: config.ttl(),
            grace: config.grace(),
            max_destroy_attempts: config.max_destroy_attempts,
        }
    }
}

/// Handle to a spawned reaper task.
pub struct ReaperHandle {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ReaperHandle {
    /// Signal shutdown and stop the task.
    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
        info!("reaper stopped");
    }
}

/// Background reclaimer of expired and stuck instances.
pub struct Reaper<R: ContainerRuntime> {
    engine: Arc<Engine<R>>,
    settings: ReaperSettings,
}

impl<R: ContainerRuntime> Reaper<R> {
    pub fn new(engine: Arc<Engine<R>>, settings: ReaperSettings) -> Self {
        Self { engine, settings }
    }

    /// Spawn the reclamation loop on the tokio runtime.
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.settings.interval;

        let handle = tokio::spawn(async move {
            info!(?interval, "reaper started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        self.run_cycle().await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("reaper shutting down");
                        break;
                    }
                }
            }
        });

        ReaperHandle {
            handle,
            shutdown_tx,
        }
    }

    /// One reclamation pass. Public so tests can drive cycles directly.
    pub async fn run_cycle(&self) {
        let now = epoch_secs();
        let ledger = self.engine.ledger();
        let mut handled: HashSet<String> = HashSet::new();

        // Expired Running records: transition to Stopping, then destroy,
        // so failures fall under the same retry ceiling as everything else.
        match ledger.scan_expired(now, self.settings.ttl.as_secs()) {
            Ok(expired) => {
                for record in expired {
                    info!(
                        owner_id = record.owner_id,
                        challenge_id = record.challenge_id,
                        container = %record.container_id,
                        "instance expired"
                    );
                    handled.insert(record.table_key());
                    match ledger.begin_stop(record.owner_id, record.challenge_id) {
                        Ok(Some(stopping)) => self.destroy_and_remove(&stopping).await,
                        Ok(None) => {}
                        Err(e) => error!(error = %e, "failed to mark expired instance"),
                    }
                }
            }
            Err(e) => error!(error = %e, "expiry scan failed"),
        }

        // Stuck records: failed stops and orphaned provision markers.
        match ledger.scan_stuck(now, self.settings.grace.as_secs()) {
            Ok(stuck) => {
                for record in stuck {
                    if handled.contains(&record.table_key()) {
                        continue;
                    }
                    match record.state {
                        // A stop that claimed a mid-provision slot has no
                        // container id to destroy; reconcile like an orphan.
                        SlotState::Stopping if record.container_id.is_empty() => {
                            self.reconcile_orphan(&record).await
                        }
                        SlotState::Stopping => self.destroy_and_remove(&record).await,
                        SlotState::Starting => self.reconcile_orphan(&record).await,
                        SlotState::Running => {}
                    }
                }
            }
            Err(e) => error!(error = %e, "stuck scan failed"),
        }
    }

    /// Destroy a record's container and remove the record, honoring the
    /// retry ceiling.
    async fn destroy_and_remove(&self, record: &InstanceRecord) {
        let ledger = self.engine.ledger();
        match self
            .engine
            .destroy_on_host(&record.host_id, &record.container_id)
            .await
        {
            Ok(()) => {
                match ledger.remove(record.owner_id, record.challenge_id) {
                    Ok(_) => info!(
                        owner_id = record.owner_id,
                        challenge_id = record.challenge_id,
                        container = %record.container_id,
                        "instance reclaimed"
                    ),
                    Err(e) => error!(error = %e, "failed to remove reclaimed record"),
                }
            }
            Err(e) => match ledger.record_destroy_failure(record.owner_id, record.challenge_id) {
                Ok(attempts) if attempts >= self.settings.max_destroy_attempts => {
                    error!(
                        container = %record.container_id,
                        host_id = %record.host_id,
                        attempts,
                        "destroy retries exhausted, removing record; container leaked, clean up manually"
                    );
                    if let Err(e) = ledger.remove(record.owner_id, record.challenge_id) {
                        error!(error = %e, "failed to remove leaked record");
                    }
                }
                Ok(attempts) => {
                    warn!(
                        container = %record.container_id,
                        attempts,
                        error = %e,
                        "destroy failed, will retry next cycle"
                    );
                }
                Err(le) => error!(error = %le, "failed to record destroy failure"),
            },
        }
    }

    /// Resolve a Starting marker left behind by a crashed or timed-out
    /// provision.
    async fn reconcile_orphan(&self, record: &InstanceRecord) {
        let ledger = self.engine.ledger();

        if record.container_id.is_empty() {
            // No container id was ever recorded. If a container was in
            // fact created, the provisioner's rejected commit tears it
            // down; removing the record here is safe either way.
            warn!(
                owner_id = record.owner_id,
                challenge_id = record.challenge_id,
                host_id = %record.host_id,
                "removing slot record with no container id"
            );
            if let Err(e) = ledger.remove(record.owner_id, record.challenge_id) {
                error!(error = %e, "failed to remove orphaned marker");
            }
            return;
        }

        match self
            .engine
            .inspect_on_host(&record.host_id, &record.container_id)
            .await
        {
            ContainerStatus::Unreachable => {
                debug!(
                    host_id = %record.host_id,
                    container = %record.container_id,
                    "host unreachable, orphan kept for next cycle"
                );
            }
            // Destroy is idempotent, so Absent takes the same path — it
            // also clears a container that exists but already exited.
            ContainerStatus::Running | ContainerStatus::Absent => {
                self.destroy_and_remove(record).await;
            }
        }
    }
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
