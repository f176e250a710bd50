//! Start actions
//!
//! The serving/container layer implements [`StartAction`] to actually bring a
//! resource up. The core only decides *when* to call it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::graph::Resource;
use crate::model::{Environment, LaunchKind, ResourceId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("failed to launch {id}: {message}")]
    LaunchFailed { id: ResourceId, message: String },
    #[error("failed to stop {id}: {message}")]
    StopFailed { id: ResourceId, message: String },
    #[error("{id} has nothing to launch")]
    NothingToLaunch { id: ResourceId },
    #[error("no start action handles {} launches ({id})", .launch.label())]
    NotSupported { id: ResourceId, launch: LaunchKind },
    #[error("{id} waits for {dependency}, which is not healthy")]
    DependencyNotReady { id: ResourceId, dependency: ResourceId },
    #[error("{id} is already starting")]
    AlreadyStarting { id: ResourceId },
}

#[async_trait]
pub trait StartAction: Send + Sync {
    /// Human-readable name of this backend
    fn name(&self) -> &'static str;

    /// Bring the resource up. Must be idempotent if it is already running.
    async fn start(&self, resource: &Resource, env: &Environment) -> Result<(), StartError>;

    /// Tear the resource down
    async fn stop(&self, resource: &Resource) -> Result<(), StartError> {
        let _ = resource;
        Ok(())
    }
}

/// Start action that does nothing, for resources hosted by something else:
/// logical databases inside their server, or services already running.
pub struct Hosted;

#[async_trait]
impl StartAction for Hosted {
    fn name(&self) -> &'static str {
        "hosted"
    }

    async fn start(&self, _resource: &Resource, _env: &Environment) -> Result<(), StartError> {
        Ok(())
    }
}

/// Routes each resource to the start action registered for its launch spec
#[derive(Default)]
pub struct StartRegistry {
    by_launch: BTreeMap<LaunchKind, Arc<dyn StartAction>>,
}

impl StartRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, launch: LaunchKind, action: Arc<dyn StartAction>) -> Self {
        self.by_launch.insert(launch, action);
        self
    }

    pub fn get(&self, launch: LaunchKind) -> Option<&Arc<dyn StartAction>> {
        self.by_launch.get(&launch)
    }

    fn route(&self, resource: &Resource) -> Result<&Arc<dyn StartAction>, StartError> {
        let launch = LaunchKind::of(resource.launch.as_ref());
        self.get(launch).ok_or_else(|| StartError::NotSupported {
            id: resource.id.clone(),
            launch,
        })
    }
}

#[async_trait]
impl StartAction for StartRegistry {
    fn name(&self) -> &'static str {
        "registry"
    }

    async fn start(&self, resource: &Resource, env: &Environment) -> Result<(), StartError> {
        let action = self.route(resource)?;
        tracing::debug!(resource = %resource.id, backend = action.name(), "starting");
        action.start(resource, env).await
    }

    async fn stop(&self, resource: &Resource) -> Result<(), StartError> {
        match self.route(resource) {
            Ok(action) => action.stop(resource).await,
            Err(_) => Ok(()),
        }
    }
}
