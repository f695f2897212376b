//! Error taxonomy for the failover agent
//!
//! Each category is handled differently by the caller:
//! - [`SetupError`]: kernel-boundary failure, logged, batch continues
//! - [`ProbeError`]: measuring a peer failed, prior sample retained
//! - [`ConfigError`]: fatal at startup
//! - [`RerouteError`]: reroute request failed, possibly leaving a mixed state

use std::net::IpAddr;

use ipnet::IpNet;
use thiserror::Error;

use crate::reroute::RerouteState;

/// A tunnel, address, route or local-handling operation failed
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("command `{command}` could not be spawned: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("tunnel {name}: {reason}")]
    Tunnel { name: String, reason: String },

    #[error("route {prefix} via {nexthop}: {reason}")]
    Route {
        prefix: IpNet,
        nexthop: IpAddr,
        reason: String,
    },

    #[error("removing route {prefix}: {reason}")]
    RouteDelete { prefix: IpNet, reason: String },

    #[error("local handling: {0}")]
    LocalHandling(String),

    #[error("transition interrupted: {0}")]
    Interrupted(String),

    #[error("no IPv{family} next hop available for {prefix}")]
    NoNexthop { prefix: IpNet, family: u8 },
}

/// Probing itself failed; distinct from "peer did not answer"
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot start probe to {dst}: {source}")]
    Transport {
        dst: IpAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("probe to {dst} failed: {reason}")]
    Failed { dst: IpAddr, reason: String },

    #[error("probe to {dst} exceeded its deadline")]
    Deadline { dst: IpAddr },

    #[error("unparseable probe output for {dst}: {output}")]
    Parse { dst: IpAddr, output: String },
}

/// Invalid or incomplete configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("local node {0} not found in node table")]
    MissingLocalNode(u8),

    #[error("node id {id} is used by both {first} and {second}")]
    DuplicateId {
        id: u8,
        first: String,
        second: String,
    },

    #[error("node {name}: id {id} outside 1..=254")]
    IdOutOfRange { name: String, id: u8 },

    #[error("node {name}: tunnel name {tunnel} exceeds 15 bytes")]
    NameTooLong { name: String, tunnel: String },

    #[error("invalid internal address {0}")]
    InternalAddress(String),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A reroute request could not be satisfied
#[derive(Debug, Error)]
pub enum RerouteError {
    #[error("no candidate available")]
    NoCandidate,

    #[error("unknown peer {0}")]
    UnknownPeer(String),

    #[error("{0} is the local node")]
    SelfTarget(String),

    /// Failed part-way; kernel state may be a mix of both modes
    #[error("transition to {target} failed at {step}: {source}; state is indeterminate")]
    Indeterminate {
        target: RerouteState,
        step: String,
        #[source]
        source: SetupError,
    },
}

impl RerouteError {
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Indeterminate { .. })
    }
}

/// Top-level errors surfaced by the daemon
#[derive(Debug, Error)]
pub enum FabricError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Reroute(#[from] RerouteError),

    #[error("control surface on {addr} failed: {reason}")]
    Serve { addr: String, reason: String },

    #[error("background task {task} stopped: {reason}")]
    TaskExited { task: &'static str, reason: String },
}

pub type Result<T, E = FabricError> = std::result::Result<T, E>;
