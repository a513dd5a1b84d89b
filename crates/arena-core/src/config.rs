//! arena.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::HostSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Path to the ledger database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Listen address for the REST API.
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub reaper: ReaperConfig,
    /// Static host catalog. Validated by `HostRegistry::new`.
    #[serde(default)]
    pub hosts: Vec<HostSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Scan interval (e.g. "30s").
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Idle time before an instance is reclaimed (e.g. "2h").
    #[serde(default = "default_ttl")]
    pub ttl: String,
    /// Age before a Starting marker counts as orphaned (e.g. "2m").
    #[serde(default = "default_grace")]
    pub grace: String,
    /// Destroy retries before a record is force-removed and the container
    /// logged as leaked.
    #[serde(default = "default_max_destroy_attempts")]
    pub max_destroy_attempts: u32,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            ttl: default_ttl(),
            grace: default_grace(),
            max_destroy_attempts: default_max_destroy_attempts(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("arena.redb")
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_interval() -> String {
    "30s".to_string()
}

fn default_ttl() -> String {
    // Matches the two-hour stop timeout the platform historically used.
    "2h".to_string()
}

fn default_grace() -> String {
    "2m".to_string()
}

fn default_max_destroy_attempts() -> u32 {
    5
}

impl ArenaConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ArenaConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(30))
    }

    pub fn ttl(&self) -> Duration {
        parse_duration(&self.ttl).unwrap_or(Duration::from_secs(2 * 60 * 60))
    }

    pub fn grace(&self) -> Duration {
        parse_duration(&self.grace).unwrap_or(Duration::from_secs(120))
    }
}

/// Parse a duration string like "5s", "500ms", "2m", "2h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml_str = r#"
[[hosts]]
id = "h1"
endpoint = "10.0.0.5:2375"

[[hosts.images]]
name = "web:latest"
label = "Web Challenge"
"#;
        let config: ArenaConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.db_path, PathBuf::from("arena.redb"));
        assert_eq!(config.listen, "127.0.0.1:8080");
        assert_eq!(config.hosts.len(), 1);
        assert_eq!(config.hosts[0].images[0].label, "Web Challenge");
        assert_eq!(config.reaper.max_destroy_attempts, 5);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
db_path = "/var/lib/arena/ledger.redb"
listen = "0.0.0.0:9000"

[reaper]
interval = "10s"
ttl = "1h"
grace = "30s"
max_destroy_attempts = 3

[[hosts]]
id = "h1"
endpoint = "10.0.0.5:2375"

[[hosts]]
id = "h2"
endpoint = "10.0.0.6:2375"
"#;
        let config: ArenaConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.reaper.interval(), Duration::from_secs(10));
        assert_eq!(config.reaper.ttl(), Duration::from_secs(3600));
        assert_eq!(config.reaper.grace(), Duration::from_secs(30));
        assert_eq!(config.reaper.max_destroy_attempts, 3);
        assert_eq!(config.hosts.len(), 2);
    }

    #[test]
    fn image_order_is_preserved() {
        let toml_str = r#"
[[hosts]]
id = "h1"
endpoint = "10.0.0.5:2375"

[[hosts.images]]
name = "web:latest"
label = "Web"

[[hosts.images]]
name = "pwn:latest"
label = "Pwn"
"#;
        let config: ArenaConfig = toml::from_str(toml_str).unwrap();
        let names: Vec<_> = config.hosts[0]
            .images
            .iter()
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(names, vec!["web:latest", "pwn:latest"]);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("junk"), None);
    }

    #[test]
    fn reaper_defaults() {
        let config = ReaperConfig::default();
        assert_eq!(config.interval(), Duration::from_secs(30));
        assert_eq!(config.ttl(), Duration::from_secs(7200));
    }
}
