//! Node, map and client configuration.
//!
//! Values arrive already parsed (from CLI flags in `main.rs` or from whatever
//! embeds the library). Every struct defaults to sane values so partial JSON
//! documents deserialize cleanly.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Default number of partitions a cluster splits keys into.
pub const DEFAULT_PARTITION_COUNT: u32 = 271;

/// Per-map configuration on the owning node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MapConfig {
    /// Number of synchronous backups kept for each partition.
    pub backup_count: usize,
    /// Time-to-live for every entry. `0` disables TTL.
    pub ttl_seconds: u64,
    /// Maximum time an entry may go unread. `0` disables max-idle expiry.
    pub max_idle_seconds: u64,
    /// Whether members keep a near cache for this map.
    pub near_cache_enabled: bool,
    /// Persistence settings. `None` means the map is purely in-memory.
    pub map_store: Option<MapStoreConfig>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            backup_count: 1,
            ttl_seconds: 0,
            max_idle_seconds: 0,
            near_cache_enabled: false,
            map_store: None,
        }
    }
}

impl MapConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_seconds > 0).then(|| Duration::from_secs(self.ttl_seconds))
    }

    pub fn max_idle(&self) -> Option<Duration> {
        (self.max_idle_seconds > 0).then(|| Duration::from_secs(self.max_idle_seconds))
    }

    pub fn with_map_store(mut self, map_store: MapStoreConfig) -> Self {
        self.map_store = Some(map_store);
        self
    }
}

/// Write-behind settings for a map backed by a durable store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MapStoreConfig {
    /// Delay between a mutation and its persistence. `0` means write-through.
    pub write_delay_seconds: u64,
    /// Maximum number of entries handed to one `store_all`/`delete_all` call.
    pub write_batch_size: usize,
}

impl Default for MapStoreConfig {
    fn default() -> Self {
        Self {
            write_delay_seconds: 0,
            write_batch_size: 1,
        }
    }
}

impl MapStoreConfig {
    pub fn write_behind(write_delay_seconds: u64) -> Self {
        Self {
            write_delay_seconds,
            ..Self::default()
        }
    }

    pub fn write_delay(&self) -> Duration {
        Duration::from_secs(self.write_delay_seconds)
    }
}

/// Client-side settings consumed by the proxy registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Total time budget for one remote invocation, retries included.
    pub invocation_timeout_seconds: u64,
    /// Fixed pause between two retries of a transient failure.
    pub retry_wait_seconds: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            invocation_timeout_seconds: 120,
            retry_wait_seconds: 1,
        }
    }
}

impl ClientConfig {
    /// `ceil(invocation_timeout / retry_wait)`, never less than one attempt.
    pub fn retry_count_limit(&self) -> u64 {
        let wait = self.retry_wait_seconds.max(1);
        self.invocation_timeout_seconds.div_ceil(wait).max(1)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait_seconds)
    }
}

/// Conflict resolution strategy for replicated maps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicyKind {
    #[default]
    LatestUpdate,
    PassThrough,
    PutIfAbsent,
    HigherHits,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ReplicatedMapConfig {
    pub merge_policy: MergePolicyKind,
}

/// Settings for a single node process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// UDP address for invalidation datagrams. HTTP listens on `port + 1000`.
    pub bind: SocketAddr,
    /// Other members known at start-up.
    pub members: Vec<SocketAddr>,
    /// Lite members hold no partitions.
    pub lite_member: bool,
    pub partition_count: u32,
}

impl NodeConfig {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            members: Vec::new(),
            lite_member: false,
            partition_count: DEFAULT_PARTITION_COUNT,
        }
    }

    /// Parses `--bind`, `--member` (repeatable), `--lite` and `--partitions`.
    pub fn from_args(args: &[String]) -> anyhow::Result<Self> {
        let mut bind: Option<SocketAddr> = None;
        let mut members = Vec::new();
        let mut lite_member = false;
        let mut partition_count = DEFAULT_PARTITION_COUNT;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--bind" => {
                    bind = Some(value_at(args, i)?.parse()?);
                    i += 2;
                }
                "--member" => {
                    members.push(value_at(args, i)?.parse()?);
                    i += 2;
                }
                "--partitions" => {
                    partition_count = value_at(args, i)?.parse()?;
                    i += 2;
                }
                "--lite" => {
                    lite_member = true;
                    i += 1;
                }
                _ => {
                    i += 1;
                }
            }
        }

        let bind = bind.ok_or_else(|| anyhow::anyhow!("--bind is required"))?;
        for addr in std::iter::once(&bind).chain(members.iter()) {
            if addr.port() > u16::MAX - HTTP_PORT_OFFSET {
                anyhow::bail!(
                    "Port {} leaves no room for the HTTP port (port + {})",
                    addr.port(),
                    HTTP_PORT_OFFSET
                );
            }
        }
        if partition_count == 0 {
            anyhow::bail!("--partitions must be at least 1");
        }

        Ok(Self {
            bind,
            members,
            lite_member,
            partition_count,
        })
    }

    pub fn http_addr(&self) -> SocketAddr {
        http_addr_for(self.bind)
    }
}

/// Distance between a node's UDP port and its HTTP port.
pub const HTTP_PORT_OFFSET: u16 = 1000;

/// HTTP endpoint paired with a node's UDP address. Ports too high to offset
/// are rejected by `NodeConfig::from_args`; here they saturate.
pub fn http_addr_for(bind: SocketAddr) -> SocketAddr {
    SocketAddr::new(bind.ip(), bind.port().saturating_add(HTTP_PORT_OFFSET))
}

fn value_at(args: &[String], i: usize) -> anyhow::Result<&str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("{} expects a value", args[i]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_count_limit_rounds_up() {
        let config = ClientConfig {
            invocation_timeout_seconds: 7,
            retry_wait_seconds: 2,
        };
        assert_eq!(config.retry_count_limit(), 4);

        let config = ClientConfig {
            invocation_timeout_seconds: 0,
            retry_wait_seconds: 1,
        };
        assert_eq!(config.retry_count_limit(), 1);
    }

    #[test]
    fn test_partial_map_config_uses_defaults() {
        let config: MapConfig =
            serde_json::from_str(r#"{"map_store": {"write_delay_seconds": 5}}"#).unwrap();

        assert_eq!(config.backup_count, 1);
        assert_eq!(config.map_store.unwrap().write_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_node_config_from_args() {
        let args: Vec<String> = [
            "map-node",
            "--bind",
            "127.0.0.1:5000",
            "--member",
            "127.0.0.1:5001",
            "--lite",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let config = NodeConfig::from_args(&args).unwrap();
        assert_eq!(config.bind.port(), 5000);
        assert_eq!(config.members.len(), 1);
        assert!(config.lite_member);
        assert_eq!(config.http_addr().port(), 6000);
    }

    #[test]
    fn test_node_config_rejects_unusable_values() {
        let parse = |extra: &[&str]| {
            let args: Vec<String> = ["map-node"]
                .iter()
                .chain(extra.iter())
                .map(|s| s.to_string())
                .collect();
            NodeConfig::from_args(&args)
        };

        assert!(parse(&["--bind", "127.0.0.1:64535"]).is_ok());
        assert!(parse(&["--bind", "127.0.0.1:64536"]).is_err());
        assert!(parse(&["--bind", "127.0.0.1:5000", "--member", "127.0.0.1:65000"]).is_err());
        assert!(parse(&["--bind", "127.0.0.1:5000", "--partitions", "0"]).is_err());
        assert_eq!(
            parse(&["--bind", "127.0.0.1:5000", "--partitions", "7"]).unwrap().partition_count,
            7
        );
        assert_eq!(http_addr_for("127.0.0.1:65000".parse().unwrap()).port(), u16::MAX);
    }

    #[test]
    fn test_node_config_requires_bind() {
        let args = vec!["map-node".to_string()];
        assert!(NodeConfig::from_args(&args).is_err());
    }
}
