//! arena-reaper — background reclamation of instances.
//!
//! One tokio task, one fixed interval. Each cycle scans the ledger for:
//!
//! - Running records idle past the TTL — moved to Stopping and destroyed;
//! - Stopping records (failed foreground stops, stops that claimed a
//!   mid-provision slot, earlier reaper failures) — destroy retried up to a
//!   ceiling, after which the record is force-removed and the container
//!   logged as leaked;
//! - Starting markers older than the grace window — orphans of a crashed or
//!   timed-out provision, reconciled by inspecting the target host.
//!
//! The reaper never blocks foreground requests: it shares nothing with them
//! except the ledger's own transactions.

pub mod reaper;

pub use reaper::{Reaper, ReaperHandle, ReaperSettings};
