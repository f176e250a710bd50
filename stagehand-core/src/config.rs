use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clear_cache::CLEAR_CACHE_NAME;
use crate::graph::{Graph, GraphError, Projection, ResourceGraph, ResourceHandle};
use crate::health::{HealthProbe, ProbeCheck};
use crate::model::{
    ConnectionSource, Endpoint, EnvSource, LaunchSpec, Lifetime, ResourceKind, Volume,
};
use crate::parameter::{ParameterDecl, ParameterError, ParameterStore, StaticProvider};
use crate::sequencer::DEFAULT_STARTUP_DEADLINE;

/// Commands a config file may attach to a resource by name
pub const BUILTIN_COMMANDS: &[&str] = &[CLEAR_CACHE_NAME];

/// Health probe configuration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthCheckConfig {
    /// HTTP GET against the resource endpoint
    Http {
        path: String,
        #[serde(default = "default_expected_status")]
        expected_status: u16,
        #[serde(default = "default_health_interval")]
        interval_ms: u64,
        #[serde(default = "default_health_timeout")]
        timeout_ms: u64,
    },
    /// Protocol-level ping (TCP connect for plain endpoints)
    Ping {
        #[serde(default = "default_health_interval")]
        interval_ms: u64,
        #[serde(default = "default_health_timeout")]
        timeout_ms: u64,
    },
}

fn default_expected_status() -> u16 {
    200
}
fn default_health_interval() -> u64 {
    5000
}
fn default_health_timeout() -> u64 {
    2000
}

impl HealthCheckConfig {
    fn to_probe(&self) -> HealthProbe {
        let (check, interval_ms, timeout_ms) = match self {
            HealthCheckConfig::Http {
                path,
                expected_status,
                interval_ms,
                timeout_ms,
            } => (
                ProbeCheck::Http {
                    path: path.clone(),
                    expected_status: *expected_status,
                },
                *interval_ms,
                *timeout_ms,
            ),
            HealthCheckConfig::Ping {
                interval_ms,
                timeout_ms,
            } => (ProbeCheck::Ping, *interval_ms, *timeout_ms),
        };
        HealthProbe {
            check,
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

/// Environment entry: a literal, a parameter value or another resource's
/// connection string
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EnvValueConfig {
    Literal(String),
    Parameter { parameter: String },
    ConnectionString { connection_string: String },
}

/// A resource's own connection string: literal or taken from a parameter
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConnectionConfig {
    Literal(String),
    Parameter { parameter: String },
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ParameterConfig {
    #[serde(default)]
    pub secret: bool,

    #[serde(default)]
    pub description: Option<String>,

    /// Fallback value used when nothing else provides one (non-secret only)
    #[serde(default)]
    pub default: Option<String>,
}

/// Resource definition in the config file
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ResourceConfig {
    /// Inferred when omitted: `logical_database` with a parent,
    /// `external_service` with an image, `project` otherwise
    #[serde(default)]
    pub kind: Option<ResourceKind>,

    #[serde(default)]
    pub lifetime: Lifetime,

    /// Container image
    #[serde(default)]
    pub image: Option<String>,

    /// Extra container arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Shell command for a local process
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub port: Option<u16>,

    /// Expose the endpoint outside the host
    #[serde(default)]
    pub external: bool,

    #[serde(default)]
    pub volume: Option<Volume>,

    #[serde(default)]
    pub connection_string: Option<ConnectionConfig>,

    /// Server hosting a logical database
    #[serde(default)]
    pub parent: Option<String>,

    /// Database name inside the parent (defaults to the resource name)
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, EnvValueConfig>,

    /// Resources whose connection string is injected as `ConnectionStrings__<name>`
    #[serde(default)]
    pub references: Vec<String>,

    /// Resources that must be healthy before this one starts
    #[serde(default)]
    pub wait_for: Vec<String>,

    #[serde(default)]
    pub health: Vec<HealthCheckConfig>,

    /// Built-in commands to attach
    #[serde(default)]
    pub commands: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,
}

impl ResourceConfig {
    pub fn resolved_kind(&self) -> ResourceKind {
        match (self.kind, &self.parent, &self.image) {
            (Some(kind), _, _) => kind,
            (None, Some(_), _) => ResourceKind::LogicalDatabase,
            (None, None, Some(_)) => ResourceKind::ExternalService,
            (None, None, None) => ResourceKind::Project,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrchestrationConfig {
    #[serde(default = "default_startup_deadline")]
    pub startup_deadline_ms: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            startup_deadline_ms: default_startup_deadline(),
        }
    }
}

fn default_startup_deadline() -> u64 {
    DEFAULT_STARTUP_DEADLINE.as_millis() as u64
}

/// Root configuration file structure
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AppHostConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterConfig>,

    pub resources: BTreeMap<String, ResourceConfig>,

    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("no config file found, searched: {searched:?}")]
    NotFound { searched: Vec<PathBuf> },
    #[error("'{name}' is declared both as a parameter and as a resource")]
    NameClash { name: String },
    #[error("resource '{resource}' refers to unknown {what} '{target}'")]
    UnknownReference {
        resource: String,
        what: &'static str,
        target: String,
    },
    #[error("resource '{resource}' is missing '{field}'")]
    MissingField {
        resource: String,
        field: &'static str,
    },
    #[error("resource '{resource}': {message}")]
    Invalid { resource: String, message: String },
    #[error("secret parameter '{name}' cannot have a default value")]
    SecretDefault { name: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

impl AppHostConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppHostConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// `STAGEHAND_CONFIG` first, then the standard names in `start_dir` and its parents
    pub fn discover(start_dir: &Path) -> Result<(PathBuf, Self), ConfigError> {
        let names = [
            "stagehand.yaml",
            "stagehand.yml",
            ".stagehand.yaml",
            ".stagehand.yml",
        ];
        let mut searched = Vec::new();

        if let Ok(env_path) = std::env::var("STAGEHAND_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok((path.clone(), Self::load(&path)?));
            }
            searched.push(path);
        }

        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            for name in &names {
                let path = current.join(name);
                if path.exists() {
                    return Ok((path.clone(), Self::load(&path)?));
                }
                searched.push(path);
            }
            dir = current.parent();
        }

        Err(ConfigError::NotFound { searched })
    }

    pub fn startup_deadline(&self) -> Duration {
        Duration::from_millis(self.orchestration.startup_deadline_ms)
    }

    /// Default values from the file, meant to sit after the environment in
    /// the provider chain.
    pub fn defaults(&self) -> StaticProvider {
        let values = self
            .parameters
            .iter()
            .filter_map(|(name, p)| p.default.clone().map(|v| (name.clone(), v)))
            .collect();
        StaticProvider::new(values)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, param) in &self.parameters {
            if self.resources.contains_key(name) {
                return Err(ConfigError::NameClash { name: name.clone() });
            }
            if param.secret && param.default.is_some() {
                return Err(ConfigError::SecretDefault { name: name.clone() });
            }
        }

        let known = |name: &str| self.resources.contains_key(name) || self.parameters.contains_key(name);
        let unknown = |resource: &str, what: &'static str, target: &str| ConfigError::UnknownReference {
            resource: resource.to_string(),
            what,
            target: target.to_string(),
        };

        for (id, res) in &self.resources {
            let kind = res.resolved_kind();
            if kind == ResourceKind::Parameter {
                return Err(ConfigError::Invalid {
                    resource: id.clone(),
                    message: "parameters belong in the 'parameters' section".into(),
                });
            }
            if kind == ResourceKind::LogicalDatabase {
                let parent = res.parent.as_deref().ok_or_else(|| ConfigError::MissingField {
                    resource: id.clone(),
                    field: "parent",
                })?;
                if !self.resources.contains_key(parent) {
                    return Err(unknown(id, "parent", parent));
                }
            }
            if res.image.is_some() && res.command.is_some() {
                return Err(ConfigError::Invalid {
                    resource: id.clone(),
                    message: "'image' and 'command' are mutually exclusive".into(),
                });
            }
            if let Some(ConnectionConfig::Parameter { parameter }) = &res.connection_string {
                if !self.parameters.contains_key(parameter) {
                    return Err(unknown(id, "parameter", parameter));
                }
            }
            for value in res.env.values() {
                match value {
                    EnvValueConfig::Literal(_) => {}
                    EnvValueConfig::Parameter { parameter } => {
                        if !self.parameters.contains_key(parameter) {
                            return Err(unknown(id, "parameter", parameter));
                        }
                    }
                    EnvValueConfig::ConnectionString { connection_string } => {
                        if !self.resources.contains_key(connection_string) {
                            return Err(unknown(id, "resource", connection_string));
                        }
                    }
                }
            }
            for target in &res.references {
                if !known(target) {
                    return Err(unknown(id, "resource", target));
                }
            }
            for target in &res.wait_for {
                if !known(target) {
                    return Err(unknown(id, "resource", target));
                }
            }
            for command in &res.commands {
                if !BUILTIN_COMMANDS.contains(&command.as_str()) {
                    return Err(unknown(id, "command", command));
                }
            }
        }

        // Structural problems (cycles, unreachable connections) surface
        // from the graph itself.
        self.build(&mut ParameterStore::new())?;
        Ok(())
    }

    /// Declare the parameters on `store` and build the frozen resource graph.
    pub fn build(&self, store: &mut ParameterStore) -> Result<Graph, ConfigError> {
        let mut graph = ResourceGraph::new();
        let mut handles: BTreeMap<&str, ResourceHandle> = BTreeMap::new();

        for (name, param) in &self.parameters {
            let mut decl = ParameterDecl::new(name.as_str(), param.secret);
            if let Some(description) = &param.description {
                decl = decl.with_description(description.as_str());
            }
            let param_ref = store.declare_with(decl)?;
            handles.insert(name.as_str(), graph.add_parameter(&param_ref)?);
        }

        for (id, res) in &self.resources {
            let handle = graph.add_resource(id, res.resolved_kind(), res.lifetime)?;
            let resource = graph.resource_mut(&handle)?;

            resource.description = res.description.clone();
            resource.probes = res.health.iter().map(HealthCheckConfig::to_probe).collect();
            resource.endpoint = res.port.map(|port| Endpoint {
                external: res.external,
                ..Endpoint::local(port)
            });
            resource.launch = match (&res.image, &res.command) {
                (Some(image), _) => Some(LaunchSpec::Container {
                    image: image.clone(),
                    args: res.args.clone(),
                    volume: res.volume.clone(),
                }),
                (None, Some(command)) => Some(LaunchSpec::Process {
                    command: command.clone(),
                    cwd: res.cwd.clone(),
                }),
                (None, None) => None,
            };
            resource.connection = match (&res.parent, &res.connection_string) {
                (Some(parent), _) => Some(ConnectionSource::Database {
                    parent: parent.clone(),
                    database: res.database.clone().unwrap_or_else(|| id.clone()),
                }),
                (None, Some(ConnectionConfig::Literal(value))) => {
                    Some(ConnectionSource::Literal(value.clone()))
                }
                (None, Some(ConnectionConfig::Parameter { parameter })) => {
                    Some(ConnectionSource::Parameter(parameter.clone()))
                }
                (None, None) => None,
            };
            for (key, value) in &res.env {
                if let EnvValueConfig::Literal(value) = value {
                    resource
                        .environment
                        .insert(key.clone(), EnvSource::Literal(value.clone()));
                }
            }

            handles.insert(id.as_str(), handle);
        }

        let handle = |name: &str| {
            handles
                .get(name)
                .cloned()
                .ok_or_else(|| GraphError::UnknownResource { name: name.into() })
        };

        for (id, res) in &self.resources {
            let from = handle(id)?;
            for (key, value) in &res.env {
                let target = match value {
                    EnvValueConfig::Literal(_) => continue,
                    EnvValueConfig::Parameter { parameter } => parameter,
                    EnvValueConfig::ConnectionString { connection_string } => connection_string,
                };
                graph.add_wiring(&from, &handle(target)?, Projection::Environment(key.clone()))?;
            }
            for target in &res.references {
                graph.add_wiring(&from, &handle(target)?, Projection::ConnectionString)?;
            }
            if let Some(parent) = &res.parent {
                graph.add_readiness_wait(&from, &handle(parent)?)?;
            }
            for target in &res.wait_for {
                graph.add_readiness_wait(&from, &handle(target)?)?;
            }
        }

        Ok(graph.finalize()?)
    }
}
