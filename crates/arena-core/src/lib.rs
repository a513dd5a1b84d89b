//! arena-core — shared types, configuration, and the host registry.
//!
//! The registry is the load-once catalog of execution hosts: each host has a
//! Docker control endpoint and an ordered list of images it offers. Hosts are
//! configuration, not runtime state — the registry is built at startup from
//! `arena.toml` and read-only thereafter.

pub mod config;
pub mod registry;
pub mod types;

pub use config::{ArenaConfig, ReaperConfig};
pub use registry::{HostRegistry, RegistryError};
pub use types::{HostSpec, ImageSpec};
