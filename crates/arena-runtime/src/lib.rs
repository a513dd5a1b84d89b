//! arena-runtime — the container runtime capability, one client per host.
//!
//! The [`ContainerRuntime`] trait is the whole contract the orchestration
//! engine needs from a host: create a container from an image, destroy one,
//! inspect one. [`DockerClient`] implements it against the Docker Engine
//! REST API on the host's control endpoint.
//!
//! Every call is a network operation under `tokio::time::timeout`; a timeout
//! surfaces as `Unreachable` (or a `Provision` error), never as silent
//! success or failure of the underlying container.

pub mod docker;
pub mod error;
pub mod types;

pub use docker::DockerClient;
pub use error::{RuntimeError, RuntimeResult};
pub use types::{ContainerRuntime, ContainerStatus, Provisioned};
