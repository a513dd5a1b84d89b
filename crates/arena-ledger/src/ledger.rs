//! Ledger — redb-backed slot store for challenge instances.
//!
//! Every mutating operation runs in its own write transaction. redb
//! serializes writers, so the existence check and marker insert in
//! `try_begin_start` are atomic: two concurrent starts for the same
//! (owner, challenge) slot can never both acquire it.

use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::tables::INSTANCES;
use crate::types::{slot_key, InstanceRecord, SlotState, StartAttempt};

/// Convert any `Display` error into a `LedgerError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| LedgerError::$variant(e.to_string())
    };
}

/// Thread-safe instance ledger backed by redb.
#[derive(Clone)]
pub struct Ledger {
    db: Arc<Database>,
}

impl Ledger {
    /// Open (or create) a persistent ledger at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!(?path, "ledger opened");
        Ok(ledger)
    }

    /// Create an ephemeral in-memory ledger (for testing).
    pub fn open_in_memory() -> LedgerResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!("in-memory ledger opened");
        Ok(ledger)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> LedgerResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Slot acquisition ───────────────────────────────────────────

    /// Atomically acquire the (owner, challenge) slot.
    ///
    /// If the slot is free, a `Starting` marker record is inserted and
    /// returned as `Acquired`. If any record occupies the slot — in any
    /// state — it is returned as `AlreadyActive` and nothing is written.
    pub fn try_begin_start(
        &self,
        owner_id: u32,
        challenge_id: u32,
        host_id: &str,
        image: &str,
        now: u64,
    ) -> LedgerResult<StartAttempt> {
        let key = slot_key(owner_id, challenge_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let attempt = {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let existing = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<InstanceRecord>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            match existing {
                Some(record) => StartAttempt::AlreadyActive(record),
                None => {
                    let marker = InstanceRecord {
                        owner_id,
                        challenge_id,
                        host_id: host_id.to_string(),
                        container_id: String::new(),
                        image: image.to_string(),
                        address: String::new(),
                        port: 0,
                        state: SlotState::Starting,
                        created_at: now,
                        last_seen_at: now,
                        destroy_attempts: 0,
                    };
                    let value = serde_json::to_vec(&marker).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    StartAttempt::Acquired(marker)
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if matches!(attempt, StartAttempt::Acquired(_)) {
            debug!(%key, "start slot acquired");
        }
        Ok(attempt)
    }

    /// Finalize a Starting slot with the provisioned container's details.
    ///
    /// Compare-and-set: writes only while the stored record is still
    /// `Starting`. Returns false when a concurrent stop claimed the slot
    /// (or removed it entirely) — the caller then owns the freshly created
    /// container and must tear it down.
    pub fn commit(&self, record: &InstanceRecord) -> LedgerResult<bool> {
        let key = record.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let committed = {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let existing = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<InstanceRecord>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            match existing {
                Some(stored) if stored.state == SlotState::Starting => {
                    let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    true
                }
                _ => false,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if committed {
            debug!(%key, container = %record.container_id, "slot committed");
        } else {
            debug!(%key, "commit rejected, slot no longer starting");
        }
        Ok(committed)
    }

    /// Roll back a Starting slot. Returns true if a record was removed.
    pub fn abort(&self, owner_id: u32, challenge_id: u32) -> LedgerResult<bool> {
        let removed = self.remove(owner_id, challenge_id)?;
        debug!(key = %slot_key(owner_id, challenge_id), removed, "slot aborted");
        Ok(removed)
    }

    // ── Teardown ───────────────────────────────────────────────────

    /// Mark the slot Stopping and return the updated record.
    ///
    /// A `Starting` marker is claimed too: its provisioner detects the
    /// state change at `commit` and tears its fresh container down, so a
    /// stop issued mid-provision is never lost.
    pub fn begin_stop(
        &self,
        owner_id: u32,
        challenge_id: u32,
    ) -> LedgerResult<Option<InstanceRecord>> {
        let key = slot_key(owner_id, challenge_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let existing = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<InstanceRecord>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            match existing {
                None => None,
                Some(mut record) => {
                    record.state = SlotState::Stopping;
                    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    Some(record)
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    /// Atomically allocate the lowest free host port for a slot.
    ///
    /// The scan of ports claimed on `host_id` and the write onto the slot's
    /// record happen in one write transaction, so two concurrent provisions
    /// on the same host can never reserve the same port. Returns `None`
    /// when the range is exhausted or the slot record has vanished (the
    /// caller aborts either way).
    pub fn reserve_free_port(
        &self,
        owner_id: u32,
        challenge_id: u32,
        host_id: &str,
        mut range: Range<u16>,
    ) -> LedgerResult<Option<u16>> {
        let key = slot_key(owner_id, challenge_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let port = {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let mut used = HashSet::new();
            let mut target = None;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (k, v) = entry.map_err(map_err!(Read))?;
                let record: InstanceRecord =
                    serde_json::from_slice(v.value()).map_err(map_err!(Deserialize))?;
                if record.host_id == host_id && record.port != 0 {
                    used.insert(record.port);
                }
                if k.value() == key.as_str() {
                    target = Some(record);
                }
            }
            match target {
                None => None,
                Some(mut record) => match range.find(|p| !used.contains(p)) {
                    None => None,
                    Some(port) => {
                        record.port = port;
                        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                        table
                            .insert(key.as_str(), value.as_slice())
                            .map_err(map_err!(Write))?;
                        Some(port)
                    }
                },
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(port)
    }

    /// Record a container id on an existing slot record.
    ///
    /// Used when a provision loses its slot to a concurrent stop but the
    /// teardown of the fresh container fails: the reaper needs the id to
    /// retry the destroy. Returns true if the record exists.
    pub fn attach_container(
        &self,
        owner_id: u32,
        challenge_id: u32,
        container_id: &str,
    ) -> LedgerResult<bool> {
        let key = slot_key(owner_id, challenge_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let attached = {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let existing = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<InstanceRecord>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            match existing {
                None => false,
                Some(mut record) => {
                    record.container_id = container_id.to_string();
                    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    true
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(attached)
    }

    /// Delete the slot record. Returns true if it existed.
    pub fn remove(&self, owner_id: u32, challenge_id: u32) -> LedgerResult<bool> {
        let key = slot_key(owner_id, challenge_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Bump the failed-destroy counter and return the new value.
    ///
    /// Returns 0 if the record is already gone.
    pub fn record_destroy_failure(&self, owner_id: u32, challenge_id: u32) -> LedgerResult<u32> {
        let key = slot_key(owner_id, challenge_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let attempts = {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let existing = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<InstanceRecord>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            match existing {
                None => 0,
                Some(mut record) => {
                    record.destroy_attempts += 1;
                    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    record.destroy_attempts
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(attempts)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Get the record for a slot, if any.
    pub fn get(&self, owner_id: u32, challenge_id: u32) -> LedgerResult<Option<InstanceRecord>> {
        let key = slot_key(owner_id, challenge_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: InstanceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Refresh `last_seen_at` for a slot. Returns true if the record exists.
    pub fn touch(&self, owner_id: u32, challenge_id: u32, now: u64) -> LedgerResult<bool> {
        let key = slot_key(owner_id, challenge_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let touched = {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let existing = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice::<InstanceRecord>(guard.value())
                        .map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            match existing {
                None => false,
                Some(mut record) => {
                    record.last_seen_at = now;
                    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                    true
                }
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(touched)
    }

    /// List all records.
    pub fn list(&self) -> LedgerResult<Vec<InstanceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: InstanceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Resolve a container id back to its slot record.
    pub fn find_by_container(&self, container_id: &str) -> LedgerResult<Option<InstanceRecord>> {
        if container_id.is_empty() {
            return Ok(None);
        }
        Ok(self
            .list()?
            .into_iter()
            .find(|r| r.container_id == container_id))
    }

    // ── Reaper scans ───────────────────────────────────────────────

    /// Running records idle past the TTL.
    pub fn scan_expired(&self, now: u64, ttl_secs: u64) -> LedgerResult<Vec<InstanceRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.state == SlotState::Running && r.last_seen_at + ttl_secs < now)
            .collect())
    }

    /// Records the reaper must reconcile: every Stopping record, plus
    /// Starting markers older than the grace window (orphans of a crashed
    /// or timed-out provision).
    pub fn scan_stuck(&self, now: u64, grace_secs: u64) -> LedgerResult<Vec<InstanceRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| match r.state {
                SlotState::Stopping => true,
                SlotState::Starting => r.created_at + grace_secs < now,
                SlotState::Running => false,
            })
            .collect())
    }

}
