//! Runtime capability contract.

use std::future::Future;

use crate::error::RuntimeResult;

/// Connection details of a freshly provisioned container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    /// Opaque container id, meaningful only to the issuing host.
    pub container_id: String,
    /// Address participants connect to.
    pub address: String,
    /// Published host port.
    pub port: u16,
}

/// What a host reports about a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    /// Not present (or present but exited — destroy is idempotent either way).
    Absent,
    /// The control endpoint did not answer; the container's fate is unknown.
    Unreachable,
}

/// Abstract container control capability for a single host.
///
/// One value per configured host. All methods are bounded-timeout network
/// operations.
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Provision a container from `image`, publishing its service port on
    /// `host_port`.
    fn create(
        &self,
        image: &str,
        host_port: u16,
    ) -> impl Future<Output = RuntimeResult<Provisioned>> + Send;

    /// Destroy a container. Destroying an already-absent container succeeds.
    fn destroy(&self, container_id: &str) -> impl Future<Output = RuntimeResult<()>> + Send;

    /// Report the container's status as seen by the host.
    fn inspect(&self, container_id: &str) -> impl Future<Output = ContainerStatus> + Send;
}
