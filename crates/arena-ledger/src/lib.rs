//! arena-ledger — the authoritative record of live challenge instances.
//!
//! Backed by [redb](https://docs.rs/redb): one table mapping the
//! `{owner_id}:{challenge_id}` slot key to a JSON-serialized
//! [`InstanceRecord`]. At most one record exists per slot; the
//! check-and-create in [`Ledger::try_begin_start`] runs inside a single
//! write transaction, which is what makes concurrent duplicate starts safe.
//!
//! # State machine
//!
//! ```text
//! (absent)  --try_begin_start--> Starting --commit--> Running
//! Starting  --abort--> (absent)
//! Starting  --begin_stop--> Stopping   (stop claims a mid-provision slot;
//!                                       the pending commit is rejected)
//! Running   --begin_stop--> Stopping --remove--> (absent)
//! Stopping  --destroy failed--> Stopping   (reaper retries)
//! ```
//!
//! The store survives process restarts; leftover Starting/Stopping records
//! are reconciled by the reaper on its next cycle.

pub mod error;
pub mod ledger;
pub mod tables;
pub mod types;

pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
pub use types::{InstanceRecord, SlotState, StartAttempt};
