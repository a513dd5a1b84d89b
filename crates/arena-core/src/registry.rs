//! Host registry — validated, load-once catalog of execution hosts.

use std::collections::HashMap;

use thiserror::Error;
use tracing::info;

use crate::types::HostSpec;

/// Errors rejected at registry construction time.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate host id: {0}")]
    DuplicateHost(String),

    #[error("host {0} has an empty image catalog")]
    NoImages(String),

    #[error("host {0} has a malformed endpoint: {1}")]
    BadEndpoint(String, String),
}

/// Read-only host catalog, built once at startup.
///
/// Iteration order (`list`) follows the configuration file; lookups go
/// through an id index.
#[derive(Debug, Clone)]
pub struct HostRegistry {
    hosts: Vec<HostSpec>,
    index: HashMap<String, usize>,
}

impl HostRegistry {
    /// Validate and build the registry from configured hosts.
    pub fn new(hosts: Vec<HostSpec>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(hosts.len());
        for (i, host) in hosts.iter().enumerate() {
            if index.insert(host.id.clone(), i).is_some() {
                return Err(RegistryError::DuplicateHost(host.id.clone()));
            }
            if host.images.is_empty() {
                return Err(RegistryError::NoImages(host.id.clone()));
            }
            if host.endpoint.is_empty() || host.address().is_empty() {
                return Err(RegistryError::BadEndpoint(
                    host.id.clone(),
                    host.endpoint.clone(),
                ));
            }
        }
        info!(hosts = hosts.len(), "host registry loaded");
        Ok(Self { hosts, index })
    }

    /// Look up a host by id.
    pub fn resolve(&self, host_id: &str) -> Option<&HostSpec> {
        self.index.get(host_id).map(|&i| &self.hosts[i])
    }

    /// Ordered image names offered by a host, or `None` for an unknown host.
    pub fn images_for(&self, host_id: &str) -> Option<Vec<&str>> {
        self.resolve(host_id)
            .map(|h| h.images.iter().map(|i| i.name.as_str()).collect())
    }

    /// Whether `host_id` exists and offers `image`.
    pub fn offers(&self, host_id: &str, image: &str) -> bool {
        self.resolve(host_id).is_some_and(|h| h.offers(image))
    }

    /// All hosts, in configuration order.
    pub fn list(&self) -> &[HostSpec] {
        &self.hosts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageSpec;

    fn host(id: &str, endpoint: &str, images: &[&str]) -> HostSpec {
        HostSpec {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
            images: images
                .iter()
                .map(|n| ImageSpec {
                    name: n.to_string(),
                    label: n.to_uppercase(),
                })
                .collect(),
        }
    }

    #[test]
    fn resolve_and_list() {
        let registry = HostRegistry::new(vec![
            host("h1", "10.0.0.5:2375", &["web"]),
            host("h2", "10.0.0.6:2375", &["pwn"]),
        ])
        .unwrap();

        assert_eq!(registry.resolve("h1").unwrap().endpoint, "10.0.0.5:2375");
        assert!(registry.resolve("nope").is_none());
        assert_eq!(registry.list().len(), 2);
        assert_eq!(registry.list()[0].id, "h1");
    }

    #[test]
    fn images_for_preserves_order() {
        let registry =
            HostRegistry::new(vec![host("h1", "10.0.0.5:2375", &["web", "pwn", "crypto"])])
                .unwrap();
        assert_eq!(
            registry.images_for("h1").unwrap(),
            vec!["web", "pwn", "crypto"]
        );
        assert!(registry.images_for("ghost").is_none());
    }

    #[test]
    fn offers_checks_host_and_image() {
        let registry = HostRegistry::new(vec![host("h1", "10.0.0.5:2375", &["web"])]).unwrap();
        assert!(registry.offers("h1", "web"));
        assert!(!registry.offers("h1", "ghost"));
        assert!(!registry.offers("h2", "web"));
    }

    #[test]
    fn duplicate_host_rejected() {
        let result = HostRegistry::new(vec![
            host("h1", "10.0.0.5:2375", &["web"]),
            host("h1", "10.0.0.6:2375", &["pwn"]),
        ]);
        assert!(matches!(result, Err(RegistryError::DuplicateHost(_))));
    }

    #[test]
    fn empty_catalog_rejected() {
        let result = HostRegistry::new(vec![host("h1", "10.0.0.5:2375", &[])]);
        assert!(matches!(result, Err(RegistryError::NoImages(_))));
    }

    #[test]
    fn empty_endpoint_rejected() {
        let result = HostRegistry::new(vec![host("h1", "", &["web"])]);
        assert!(matches!(result, Err(RegistryError::BadEndpoint(_, _))));
    }

    #[test]
    fn empty_registry_is_valid() {
        let registry = HostRegistry::new(vec![]).unwrap();
        assert!(registry.list().is_empty());
    }
}
