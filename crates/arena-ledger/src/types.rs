//! Persisted types for the instance ledger.

use serde::{Deserialize, Serialize};

/// Lifecycle state of an instance slot. Absence of a record is the implicit
/// fourth state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Provisioning in flight; container fields not yet filled in.
    Starting,
    Running,
    /// Teardown requested; destroy not yet confirmed.
    Stopping,
}

/// The authoritative record for one participant's instance of one challenge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub owner_id: u32,
    pub challenge_id: u32,
    /// References a host in the registry; never dangling (hosts are static).
    pub host_id: String,
    /// Opaque container id from the host's runtime. Empty while Starting.
    /// Doubles as the externally visible instance handle.
    pub container_id: String,
    pub image: String,
    pub address: String,
    pub port: u16,
    pub state: SlotState,
    /// Unix timestamp (seconds) when the slot was acquired.
    pub created_at: u64,
    /// Unix timestamp of the last start/status touch; drives TTL expiry.
    pub last_seen_at: u64,
    /// Failed destroy attempts, counted toward the reaper's force-remove
    /// ceiling.
    pub destroy_attempts: u32,
}

impl InstanceRecord {
    /// Build the composite key for the instances table.
    pub fn table_key(&self) -> String {
        slot_key(self.owner_id, self.challenge_id)
    }
}

/// Render the `{owner_id}:{challenge_id}` table key.
pub fn slot_key(owner_id: u32, challenge_id: u32) -> String {
    format!("{owner_id}:{challenge_id}")
}

/// Outcome of an atomic start acquisition.
#[derive(Debug, Clone, PartialEq)]
pub enum StartAttempt {
    /// The slot was free; a Starting marker now holds it.
    Acquired(InstanceRecord),
    /// A record already occupies the slot (any state). Duplicate starts
    /// reuse it instead of provisioning again.
    AlreadyActive(InstanceRecord),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_key_format() {
        let record = InstanceRecord {
            owner_id: 7,
            challenge_id: 42,
            host_id: "h1".to_string(),
            container_id: String::new(),
            image: "web".to_string(),
            address: String::new(),
            port: 0,
            state: SlotState::Starting,
            created_at: 1000,
            last_seen_at: 1000,
            destroy_attempts: 0,
        };
        assert_eq!(record.table_key(), "7:42");
        assert_eq!(slot_key(7, 42), "7:42");
    }
}
