//! arena-engine — the instance orchestration engine.
//!
//! Accepts start/stop/status requests, validates them against the host
//! registry, drives the per-host runtime client, and records every
//! transition in the ledger. The ledger's marker records are the only
//! synchronization: a `Starting`/`Stopping` marker stands in for work in
//! progress, so no lock is ever held across a network call and duplicate
//! requests reconcile against the marker instead of provisioning twice.
//!
//! # Architecture
//!
//! ```text
//! Engine<R: ContainerRuntime>
//!   ├── HostRegistry (validate host/image, presentation feed)
//!   ├── Ledger (atomic slot acquisition, durable records)
//!   └── clients: host_id → R (one runtime client per host)
//! ```

pub mod engine;
pub mod error;

pub use engine::{Engine, ConnectionInfo, StopOutcome};
pub use error::{EngineError, EngineResult};
