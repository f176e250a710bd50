use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type ResourceId = String;

/// What a declared resource is
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Parameter,
    ExternalService,
    LogicalDatabase,
    Project,
}

impl ResourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Parameter => "parameter",
            ResourceKind::ExternalService => "external service",
            ResourceKind::LogicalDatabase => "database",
            ResourceKind::Project => "project",
        }
    }
}

/// Persistent resources survive orchestration restarts and keep their data volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    #[default]
    Ephemeral,
    Persistent,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HealthState {
    #[default]
    Unknown,
    Starting,
    Healthy,
    Unhealthy,
    Stopped,
}

impl HealthState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthState::Healthy)
    }

    pub fn icon(&self) -> &'static str {
        match self {
            HealthState::Unknown => "?",
            HealthState::Starting => "◐",
            HealthState::Healthy => "●",
            HealthState::Unhealthy => "✗",
            HealthState::Stopped => "○",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Unknown => "unknown",
            HealthState::Starting => "starting",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// `from` reads connection info or environment from `to`. No ordering.
    Wiring,
    /// `from` may not start until `to` is healthy.
    ReadinessWait,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub from: ResourceId,
    pub to: ResourceId,
    pub kind: EdgeKind,
}

/// A value that is redacted whenever it is formatted.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvValue {
    value: String,
    secret: bool,
}

pub const REDACTED: &str = "********";

impl EnvValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: true,
        }
    }

    pub fn is_secret(&self) -> bool {
        self.secret
    }

    /// The raw value. Only hand this to the process or container being started.
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secret {
            write!(f, "{:?}", REDACTED)
        } else {
            write!(f, "{:?}", self.value)
        }
    }
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secret {
            f.write_str(REDACTED)
        } else {
            f.write_str(&self.value)
        }
    }
}

/// Fully resolved environment handed to a start action.
pub type Environment = BTreeMap<String, EnvValue>;

/// Where an environment entry gets its value at start time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvSource {
    Literal(String),
    Parameter(ResourceId),
    ConnectionString(ResourceId),
}

/// Where a resource's own connection string comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionSource {
    Literal(String),
    Parameter(ResourceId),
    /// A logical database hosted by `parent`.
    Database { parent: ResourceId, database: String },
}

/// Named data volume mounted into a container resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

/// How a start action brings the resource up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LaunchSpec {
    /// Run a shell command as a local process
    Process {
        command: String,
        cwd: Option<PathBuf>,
    },
    /// Run a container image
    Container {
        image: String,
        args: Vec<String>,
        volume: Option<Volume>,
    },
}

/// Which backend brings a resource up. Resources without a launch spec are
/// hosted elsewhere and only their probes decide their health.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LaunchKind {
    Process,
    Container,
    Hosted,
}

impl LaunchKind {
    pub fn of(launch: Option<&LaunchSpec>) -> Self {
        match launch {
            Some(LaunchSpec::Process { .. }) => LaunchKind::Process,
            Some(LaunchSpec::Container { .. }) => LaunchKind::Container,
            None => LaunchKind::Hosted,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LaunchKind::Process => "process",
            LaunchKind::Container => "container",
            LaunchKind::Hosted => "hosted",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
    /// Exposed outside the host (printed by `up`)
    pub external: bool,
}

impl Endpoint {
    pub fn local(port: u16) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: Some(port),
            external: false,
        }
    }

    pub fn url(&self, path: &str) -> Option<String> {
        let port = self.port?;
        Some(format!("http://{}:{}{}", self.host, port, path))
    }
}
