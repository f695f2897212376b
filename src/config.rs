//! Agent configuration
//!
//! Loaded from TOML. Durations are integer milliseconds.

use std::collections::{BTreeMap, HashMap};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::addressing::AddressPlan;
use crate::error::ConfigError;
use crate::peer::{tunnel_name, Peer, PeerId, Topology, MAX_INTERFACE_NAME};
use crate::policy::Thresholds;

/// Main configuration for the failover agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FabricConfig {
    /// ID of the node this agent runs on
    pub local_id: u8,

    /// IPv4 internal prefix, completed by appending the node ID
    pub prefix4: String,

    /// IPv6 internal prefix, completed by appending the node ID
    pub prefix6: String,

    /// Probe loop period
    #[serde(with = "duration_serde", default = "FabricConfig::default_ping_interval")]
    pub ping_interval: Duration,

    /// Highest acceptable average RTT for a candidate (inclusive)
    #[serde(with = "duration_serde", default = "FabricConfig::default_latency_threshold")]
    pub latency_threshold: Duration,

    /// Loss fraction a candidate must stay strictly below
    #[serde(default = "FabricConfig::default_loss_threshold")]
    pub loss_threshold: f64,

    /// Control surface listen address
    #[serde(default = "FabricConfig::default_listen")]
    pub listen: SocketAddr,

    /// Externally-owned prefixes moved to a peer while rerouting
    #[serde(default)]
    pub prefixes: Vec<IpNet>,

    #[serde(default)]
    pub probe: ProbeSettings,

    #[serde(default)]
    pub local_handling: LocalHandlingCommands,

    /// Node name to identity
    pub nodes: BTreeMap<String, NodeConfig>,
}

impl FabricConfig {
    fn default_ping_interval() -> Duration {
        Duration::from_secs(1)
    }

    fn default_latency_threshold() -> Duration {
        Duration::from_millis(100)
    }

    fn default_loss_threshold() -> f64 {
        0.1
    }

    fn default_listen() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9090))
    }

    /// Read, parse and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.topology()?;
        Ok(config)
    }

    /// Read and parse without validating the node table. Enough for
    /// teardown, which only needs the local-handling commands.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            latency: self.latency_threshold,
            loss: self.loss_threshold,
        }
    }

    pub fn address_plan(&self) -> AddressPlan {
        AddressPlan::new(self.prefix4.clone(), self.prefix6.clone())
    }

    /// Validate the node table and resolve it into a [`Topology`]
    pub fn topology(&self) -> Result<Topology, ConfigError> {
        if self.ping_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "ping-interval",
                reason: "must be greater than zero".into(),
            });
        }
        if !(self.loss_threshold > 0.0 && self.loss_threshold <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "loss-threshold",
                reason: format!("{} is not in (0, 1]", self.loss_threshold),
            });
        }
        if self.probe.count == 0 {
            return Err(ConfigError::Invalid {
                field: "probe.count",
                reason: "must send at least one probe".into(),
            });
        }

        let plan = self.address_plan();
        let mut seen: HashMap<u8, &str> = HashMap::new();
        let mut local = None;
        let mut peers = Vec::with_capacity(self.nodes.len());

        for (name, node) in &self.nodes {
            if node.id == 0 || node.id == u8::MAX {
                return Err(ConfigError::IdOutOfRange {
                    name: name.clone(),
                    id: node.id,
                });
            }
            if let Some(first) = seen.insert(node.id, name) {
                return Err(ConfigError::DuplicateId {
                    id: node.id,
                    first: first.to_string(),
                    second: name.clone(),
                });
            }
            let tunnel = tunnel_name(name);
            if tunnel.len() > MAX_INTERFACE_NAME {
                return Err(ConfigError::NameTooLong {
                    name: name.clone(),
                    tunnel,
                });
            }

            let peer = Peer {
                id: PeerId(node.id),
                name: name.clone(),
                external: node.ip,
                internal: plan.internal(node.id)?,
            };
            if node.id == self.local_id {
                local = Some(peer);
            } else {
                peers.push(peer);
            }
        }

        let local = local.ok_or(ConfigError::MissingLocalNode(self.local_id))?;
        peers.sort_by_key(|p| p.id);

        Ok(Topology { local, peers, plan })
    }
}

/// Identity of one node in the node table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    pub id: u8,
    /// Externally routable tunnel endpoint
    pub ip: Ipv4Addr,
}

/// Reachability probe parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeSettings {
    /// Echo requests per peer per tick
    pub count: u32,
    /// Per-reply wait
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            count: 3,
            timeout: Duration::from_millis(500),
        }
    }
}

/// External commands toggling local handling of the rerouted prefixes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalHandlingCommands {
    /// argv run to resume local handling
    pub enable: Vec<String>,
    /// argv run to stop local handling
    pub disable: Vec<String>,
}

impl Default for LocalHandlingCommands {
    fn default() -> Self {
        Self {
            enable: vec!["/opt/packetframe/net.sh".into()],
            disable: vec!["ip".into(), "link".into(), "del".into(), "local".into()],
        }
    }
}

// Serde helper for Duration (milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
