//! Domain types shared across the arena workspace.

use serde::{Deserialize, Serialize};

/// Unique identifier for an execution host.
pub type HostId = String;

/// A container image offered by a host, with the label shown in challenge
/// selectors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSpec {
    /// Image reference as known to the host's Docker daemon (e.g. "web:latest").
    pub name: String,
    /// Human-readable label for admin/challenge dropdowns.
    pub label: String,
}

/// A configured execution host.
///
/// Immutable once loaded; removing a host requires draining its instances
/// first, which this version does not do at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostSpec {
    pub id: HostId,
    /// Docker Engine control endpoint, `address:port`.
    pub endpoint: String,
    /// Ordered catalog of images this host can run.
    #[serde(default)]
    pub images: Vec<ImageSpec>,
}

impl HostSpec {
    /// The address part of the control endpoint — also the address
    /// participants connect to, since published ports bind on the host.
    pub fn address(&self) -> &str {
        self.endpoint
            .rsplit_once(':')
            .map(|(addr, _)| addr)
            .unwrap_or(&self.endpoint)
    }

    /// Whether this host offers the given image.
    pub fn offers(&self, image: &str) -> bool {
        self.images.iter().any(|i| i.name == image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_strips_port() {
        let host = HostSpec {
            id: "h1".to_string(),
            endpoint: "10.0.0.5:2375".to_string(),
            images: vec![],
        };
        assert_eq!(host.address(), "10.0.0.5");
    }

    #[test]
    fn address_without_port_is_passed_through() {
        let host = HostSpec {
            id: "h1".to_string(),
            endpoint: "docker-host".to_string(),
            images: vec![],
        };
        assert_eq!(host.address(), "docker-host");
    }

    #[test]
    fn offers_matches_by_name() {
        let host = HostSpec {
            id: "h1".to_string(),
            endpoint: "10.0.0.5:2375".to_string(),
            images: vec![ImageSpec {
                name: "web:latest".to_string(),
                label: "Web".to_string(),
            }],
        };
        assert!(host.offers("web:latest"));
        assert!(!host.offers("pwn:latest"));
    }
}
