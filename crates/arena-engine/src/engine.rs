//! Engine — start/stop lifecycle for challenge instances.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, info, warn};

use arena_core::{HostRegistry, HostSpec};
use arena_ledger::{InstanceRecord, Ledger, SlotState, StartAttempt};
use arena_runtime::{ContainerRuntime, ContainerStatus, DockerClient, RuntimeError, RuntimeResult};

use crate::error::{EngineError, EngineResult};

/// Host ports are published from this range, skipping ports already claimed
/// by ledger records on the same host.
const PORT_RANGE: std::ops::Range<u16> = 40000..50000;

/// Connection details returned to a participant.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Derived handle for the instance (the container id). Empty while a
    /// concurrent start is still provisioning the slot.
    pub instance_id: String,
    pub address: String,
    pub port: u16,
}

impl From<&InstanceRecord> for ConnectionInfo {
    fn from(record: &InstanceRecord) -> Self {
        Self {
            instance_id: record.container_id.clone(),
            address: record.address.clone(),
            port: record.port,
        }
    }
}

/// Outcome of a stop request. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Container destroyed and record removed.
    Stopped,
    /// Destroy did not complete; the record stays Stopping/Starting and the
    /// reaper finishes the teardown.
    Deferred,
    /// Nothing to stop.
    NoInstance,
}

/// The orchestration engine: one runtime client per configured host, all
/// state in the ledger.
pub struct Engine<R: ContainerRuntime> {
    registry: HostRegistry,
    ledger: Ledger,
    clients: HashMap<String, R>,
}

impl Engine<DockerClient> {
    /// Build an engine with a Docker client per registered host.
    pub fn with_docker(registry: HostRegistry, ledger: Ledger) -> Self {
        let clients = registry
            .list()
            .iter()
            .map(|h| (h.id.clone(), DockerClient::new(&h.endpoint)))
            .collect();
        Self::new(registry, ledger, clients)
    }
}

impl<R: ContainerRuntime> Engine<R> {
    pub fn new(registry: HostRegistry, ledger: Ledger, clients: HashMap<String, R>) -> Self {
        Self {
            registry,
            ledger,
            clients,
        }
    }

    /// Start (or reuse) the instance for `(owner, challenge)`.
    ///
    /// Repeated starts are idempotent: if any record already holds the slot,
    /// its connection info is returned and the runtime is not touched.
    pub async fn start(
        &self,
        owner_id: u32,
        challenge_id: u32,
        host_id: &str,
        image: &str,
    ) -> EngineResult<ConnectionInfo> {
        let host = self
            .registry
            .resolve(host_id)
            .ok_or_else(|| EngineError::UnknownHost(host_id.to_string()))?;
        if !host.offers(image) {
            return Err(EngineError::UnknownImage {
                host: host_id.to_string(),
                image: image.to_string(),
            });
        }

        let now = epoch_secs();
        let marker = match self
            .ledger
            .try_begin_start(owner_id, challenge_id, host_id, image, now)?
        {
            StartAttempt::AlreadyActive(record) => {
                debug!(owner_id, challenge_id, state = ?record.state, "start reused existing instance");
                return Ok(ConnectionInfo::from(&record));
            }
            StartAttempt::Acquired(marker) => marker,
        };

        match self.provision(&marker, host_id, image).await {
            Ok(info) => Ok(info),
            Err(EngineError::Runtime(RuntimeError::Unreachable(e))) => {
                // Outcome on the host is unknown; keep the Starting marker
                // so the reaper can reconcile it.
                warn!(owner_id, challenge_id, host_id, error = %e, "provision unreachable, marker left for reaper");
                Err(EngineError::Runtime(RuntimeError::Unreachable(e)))
            }
            // Provision already resolved the slot; nothing to roll back.
            Err(e @ EngineError::StoppedWhileStarting { .. }) => Err(e),
            Err(e) => {
                if let Err(abort_err) = self.ledger.abort(owner_id, challenge_id) {
                    warn!(owner_id, challenge_id, error = %abort_err, "abort after failed provision also failed");
                }
                warn!(owner_id, challenge_id, host_id, error = %e, "provision failed, slot rolled back");
                Err(e)
            }
        }
    }

    /// The network half of start: allocate a port, create the container,
    /// commit the record. The caller owns rollback.
    async fn provision(
        &self,
        marker: &InstanceRecord,
        host_id: &str,
        image: &str,
    ) -> EngineResult<ConnectionInfo> {
        let client = self
            .clients
            .get(host_id)
            .ok_or_else(|| EngineError::UnknownHost(host_id.to_string()))?;

        let port = self
            .ledger
            .reserve_free_port(marker.owner_id, marker.challenge_id, host_id, PORT_RANGE)?
            .ok_or_else(|| EngineError::NoFreePort(host_id.to_string()))?;

        let provisioned = client.create(image, port).await?;

        let mut record = marker.clone();
        record.container_id = provisioned.container_id;
        record.address = provisioned.address;
        record.port = provisioned.port;
        record.state = SlotState::Running;
        record.last_seen_at = epoch_secs();

        if !self.ledger.commit(&record)? {
            // A stop claimed the slot while the container was being
            // created; the stop wins. Tear the fresh container down.
            info!(
                owner_id = record.owner_id,
                challenge_id = record.challenge_id,
                container = %record.container_id,
                "slot claimed by stop during provision, destroying container"
            );
            match client.destroy(&record.container_id).await {
                Ok(()) => {
                    self.ledger.remove(record.owner_id, record.challenge_id)?;
                }
                Err(e) => {
                    // Hand the container id to the reaper so the destroy
                    // is retried.
                    warn!(
                        container = %record.container_id,
                        error = %e,
                        "destroy of superseded container failed"
                    );
                    if !self.ledger.attach_container(
                        record.owner_id,
                        record.challenge_id,
                        &record.container_id,
                    )? {
                        warn!(
                            container = %record.container_id,
                            host_id,
                            "slot record gone, container may be leaked; clean up manually"
                        );
                    }
                }
            }
            return Err(EngineError::StoppedWhileStarting {
                owner_id: record.owner_id,
                challenge_id: record.challenge_id,
            });
        }

        info!(
            owner_id = record.owner_id,
            challenge_id = record.challenge_id,
            host_id,
            container = %record.container_id,
            port = record.port,
            "instance started"
        );
        Ok(ConnectionInfo::from(&record))
    }

    /// Stop the instance for `(owner, challenge)`.
    ///
    /// Stopping an absent instance is a successful no-op. A failed destroy
    /// leaves the record in Stopping for the reaper and reports `Deferred`.
    pub async fn stop(&self, owner_id: u32, challenge_id: u32) -> EngineResult<StopOutcome> {
        let Some(record) = self.ledger.begin_stop(owner_id, challenge_id)? else {
            debug!(owner_id, challenge_id, "stop with no active instance");
            return Ok(StopOutcome::NoInstance);
        };

        if record.container_id.is_empty() {
            // Provision still in flight: the Stopping claim rejects its
            // commit, so the provisioner (or the reaper) finishes the
            // teardown.
            debug!(owner_id, challenge_id, "stop during provision, slot claimed");
            return Ok(StopOutcome::Deferred);
        }

        match self
            .destroy_on_host(&record.host_id, &record.container_id)
            .await
        {
            Ok(()) => {
                self.ledger.remove(owner_id, challenge_id)?;
                info!(owner_id, challenge_id, container = %record.container_id, "instance stopped");
                Ok(StopOutcome::Stopped)
            }
            Err(e) => {
                warn!(
                    owner_id,
                    challenge_id,
                    container = %record.container_id,
                    error = %e,
                    "destroy failed, record left for reaper"
                );
                Ok(StopOutcome::Deferred)
            }
        }
    }

    /// Stop by the externally visible instance handle, resolving it back to
    /// its (owner, challenge) slot first. An unknown handle is a no-op.
    pub async fn stop_by_instance(&self, instance_id: &str) -> EngineResult<StopOutcome> {
        match self.ledger.find_by_container(instance_id)? {
            Some(record) => self.stop(record.owner_id, record.challenge_id).await,
            None => Ok(StopOutcome::NoInstance),
        }
    }

    /// Connection info for a Running instance, or `None`.
    ///
    /// Polling counts as activity: the record's `last_seen_at` is refreshed,
    /// so an instance someone is watching does not idle out.
    pub fn status(&self, owner_id: u32, challenge_id: u32) -> EngineResult<Option<ConnectionInfo>> {
        match self.ledger.get(owner_id, challenge_id)? {
            Some(record) if record.state == SlotState::Running => {
                self.ledger.touch(owner_id, challenge_id, epoch_secs())?;
                Ok(Some(ConnectionInfo::from(&record)))
            }
            _ => Ok(None),
        }
    }

    /// All hosts with their image catalogs, in configuration order.
    pub fn list_hosts(&self) -> &[HostSpec] {
        self.registry.list()
    }

    /// All ledger records (admin view).
    pub fn list_instances(&self) -> EngineResult<Vec<InstanceRecord>> {
        Ok(self.ledger.list()?)
    }

    // ── Reaper entry points ────────────────────────────────────────

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Destroy a container on the given host. An unconfigured host is
    /// reported as unreachable (the record outlived a config change).
    pub async fn destroy_on_host(&self, host_id: &str, container_id: &str) -> RuntimeResult<()> {
        match self.clients.get(host_id) {
            Some(client) => client.destroy(container_id).await,
            None => Err(RuntimeError::Unreachable(format!(
                "host not configured: {host_id}"
            ))),
        }
    }

    /// Inspect a container on the given host.
    pub async fn inspect_on_host(&self, host_id: &str, container_id: &str) -> ContainerStatus {
        match self.clients.get(host_id) {
            Some(client) => client.inspect(container_id).await,
            None => ContainerStatus::Unreachable,
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
