//! Resource commands
//!
//! Named operator actions bound to one resource (for example "clear cache").
//! Each command carries a descriptor for display, an async body, and a state
//! function deriving `Enabled`/`Disabled`/`Hidden` from the resource's health.
//! Command state is pushed to watchers whenever the health changes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::graph::{Graph, Resource, ResolveError};
use crate::model::{EnvValue, HealthState, ResourceId};
use crate::parameter::ResolvedParameters;
use crate::reducer::RuntimeEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Enabled,
    Disabled,
    Hidden,
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandState::Enabled => "enabled",
            CommandState::Disabled => "disabled",
            CommandState::Hidden => "hidden",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IconVariant {
    #[default]
    Regular,
    Filled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconHint {
    pub name: String,
    pub variant: IconVariant,
}

/// Everything a UI needs to render a command
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub icon: Option<IconHint>,
    /// When set, the command only runs after the operator confirmed this prompt
    pub confirmation: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandResult {
    Success { message: Option<String> },
    Failure { reason: String },
}

impl CommandResult {
    pub fn success() -> Self {
        CommandResult::Success { message: None }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        CommandResult::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandResult::Success { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("resource '{resource}' is not declared")]
    UnknownResource { resource: ResourceId },
    #[error("command '{name}' is already registered on '{resource}'")]
    Duplicate { resource: ResourceId, name: String },
    #[error("'{resource}' has no command '{name}'")]
    UnknownCommand { resource: ResourceId, name: String },
    #[error("'{name}' on '{resource}' needs confirmation: {prompt}")]
    ConfirmationRequired {
        resource: ResourceId,
        name: String,
        prompt: String,
    },
}

/// Why a command body failed. Reported to the caller as a `Failure` result.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{0}")]
    Failed(String),
}

/// What a command body can see while it runs
pub struct CommandContext<'a> {
    pub resource: &'a Resource,
    pub cancel: CancellationToken,
    graph: &'a Graph,
    params: &'a ResolvedParameters,
}

impl CommandContext<'_> {
    pub fn resource_name(&self) -> &str {
        &self.resource.id
    }

    pub fn health(&self) -> HealthState {
        self.graph.health(&self.resource.id).unwrap_or_default()
    }

    /// Fully resolved connection string of the bound resource
    pub fn connection_string(&self) -> Result<EnvValue, ResolveError> {
        self.graph.connection_string(&self.resource.id, self.params)
    }
}

#[async_trait]
pub trait CommandBody: Send + Sync {
    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<Option<String>, ExecutionError>;
}

pub type StateFn = Arc<dyn Fn(HealthState) -> CommandState + Send + Sync>;

/// Default state function: usable only while the resource is healthy
pub fn enabled_when_healthy(health: HealthState) -> CommandState {
    if health.is_healthy() {
        CommandState::Enabled
    } else {
        CommandState::Disabled
    }
}

#[derive(Clone)]
pub struct ResourceCommand {
    descriptor: CommandDescriptor,
    body: Arc<dyn CommandBody>,
    state_fn: StateFn,
}

impl ResourceCommand {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        body: impl CommandBody + 'static,
    ) -> Self {
        Self {
            descriptor: CommandDescriptor {
                name: name.into(),
                display_name: display_name.into(),
                description: None,
                icon: None,
                confirmation: None,
            },
            body: Arc::new(body),
            state_fn: Arc::new(enabled_when_healthy),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = Some(description.into());
        self
    }

    pub fn with_icon(mut self, name: impl Into<String>, variant: IconVariant) -> Self {
        self.descriptor.icon = Some(IconHint {
            name: name.into(),
            variant,
        });
        self
    }

    pub fn with_confirmation(mut self, prompt: impl Into<String>) -> Self {
        self.descriptor.confirmation = Some(prompt.into());
        self
    }

    pub fn with_state(
        mut self,
        state_fn: impl Fn(HealthState) -> CommandState + Send + Sync + 'static,
    ) -> Self {
        self.state_fn = Arc::new(state_fn);
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    pub fn state_for(&self, health: HealthState) -> CommandState {
        (self.state_fn)(health)
    }
}

/// Options for one invocation
#[derive(Clone, Debug, Default)]
pub struct InvocationContext {
    pub confirmed: bool,
    pub cancel: CancellationToken,
}

impl InvocationContext {
    pub fn confirmed() -> Self {
        Self {
            confirmed: true,
            cancel: CancellationToken::new(),
        }
    }
}

/// Transport-agnostic request from an operator UI
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub resource: ResourceId,
    pub command: String,
    #[serde(default)]
    pub confirmed: bool,
}

/// Result plus the state to re-render the command with
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub resource: ResourceId,
    pub command: String,
    pub result: Option<CommandResult>,
    pub error: Option<String>,
    /// Prompt to show when the command was rejected for lack of confirmation
    pub confirmation: Option<String>,
    pub state: Option<CommandState>,
}

struct Registered {
    command: ResourceCommand,
    state: watch::Sender<CommandState>,
}

type CommandKey = (ResourceId, String);

pub struct CommandRegistry {
    graph: Graph,
    params: ResolvedParameters,
    commands: RwLock<BTreeMap<CommandKey, Arc<Registered>>>,
    shutdown: CancellationToken,
}

impl CommandRegistry {
    pub fn new(graph: Graph, params: ResolvedParameters) -> Self {
        Self {
            graph,
            params,
            commands: RwLock::new(BTreeMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Bind a command to a resource and start tracking its state.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(&self, resource: &str, command: ResourceCommand) -> Result<(), CommandError> {
        let mut health = self
            .graph
            .subscribe(resource)
            .ok_or_else(|| CommandError::UnknownResource {
                resource: resource.to_string(),
            })?;

        let key = (resource.to_string(), command.name().to_string());
        let entry = {
            let mut commands = self.commands.write().unwrap_or_else(|e| e.into_inner());
            if commands.contains_key(&key) {
                return Err(CommandError::Duplicate {
                    resource: key.0,
                    name: key.1,
                });
            }
            let initial = command.state_for(*health.borrow_and_update());
            let (state, _) = watch::channel(initial);
            let entry = Arc::new(Registered { command, state });
            commands.insert(key.clone(), entry.clone());
            entry
        };
        tracing::debug!(resource = %key.0, command = %key.1, "registered command");

        let events = self.graph.events().clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let (resource, name) = key;
            loop {
                tokio::select! {
                    changed = health.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = shutdown.cancelled() => return,
                }
                let current = *health.borrow_and_update();
                let next = entry.command.state_for(current);
                tracing::info!(
                    resource = %resource,
                    command = %name,
                    health = %current,
                    state = %next,
                    "updating command state"
                );
                let changed = entry.state.send_if_modified(|state| {
                    if *state == next {
                        false
                    } else {
                        *state = next;
                        true
                    }
                });
                if changed {
                    events.emit(RuntimeEvent::CommandStateChanged {
                        resource: resource.clone(),
                        command: name.clone(),
                        state: next,
                    });
                }
            }
        });
        Ok(())
    }

    pub fn descriptors(&self, resource: &str) -> Vec<CommandDescriptor> {
        self.commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|((r, _), _)| r == resource)
            .map(|(_, entry)| entry.command.descriptor().clone())
            .collect()
    }

    /// Every registered (resource, command) pair
    pub fn keys(&self) -> Vec<(ResourceId, String)> {
        self.commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Pure function of the resource's current health
    pub fn derive_state(&self, resource: &str, name: &str) -> Result<CommandState, CommandError> {
        let entry = self.lookup(resource, name)?;
        let health = self.graph.health(resource).unwrap_or_default();
        Ok(entry.command.state_for(health))
    }

    /// Receiver notified on every state change of the command
    pub fn watch_state(
        &self,
        resource: &str,
        name: &str,
    ) -> Result<watch::Receiver<CommandState>, CommandError> {
        Ok(self.lookup(resource, name)?.state.subscribe())
    }

    pub async fn invoke(
        &self,
        resource: &str,
        name: &str,
        ctx: InvocationContext,
    ) -> Result<CommandResult, CommandError> {
        let entry = self.lookup(resource, name)?;
        let descriptor = entry.command.descriptor();

        if let Some(prompt) = &descriptor.confirmation {
            if !ctx.confirmed {
                tracing::debug!(resource = %resource, command = %name, "confirmation required");
                return Err(CommandError::ConfirmationRequired {
                    resource: resource.to_string(),
                    name: name.to_string(),
                    prompt: prompt.clone(),
                });
            }
        }

        let bound = self
            .graph
            .resource(resource)
            .ok_or_else(|| CommandError::UnknownResource {
                resource: resource.to_string(),
            })?;
        let context = CommandContext {
            resource: bound,
            cancel: ctx.cancel.clone(),
            graph: &self.graph,
            params: &self.params,
        };

        tracing::info!(resource = %resource, command = %name, "executing command");
        let result = tokio::select! {
            outcome = entry.command.body.execute(&context) => match outcome {
                Ok(message) => CommandResult::Success { message },
                Err(e) => CommandResult::failure(e.to_string()),
            },
            _ = ctx.cancel.cancelled() => CommandResult::failure("cancelled"),
        };

        match &result {
            CommandResult::Success { .. } => {
                tracing::info!(resource = %resource, command = %name, "command succeeded")
            }
            CommandResult::Failure { reason } => {
                tracing::warn!(resource = %resource, command = %name, reason = %reason, "command failed")
            }
        }
        self.graph.events().emit(RuntimeEvent::CommandFinished {
            resource: resource.to_string(),
            command: name.to_string(),
            result: result.clone(),
        });
        Ok(result)
    }

    /// Entry point for operator UIs: never fails, always reports fresh state.
    pub async fn handle(&self, request: InvocationRequest) -> InvocationResponse {
        let ctx = InvocationContext {
            confirmed: request.confirmed,
            cancel: self.shutdown.child_token(),
        };
        let outcome = self.invoke(&request.resource, &request.command, ctx).await;
        let state = self.derive_state(&request.resource, &request.command).ok();

        let (result, error, confirmation) = match outcome {
            Ok(result) => (Some(result), None, None),
            Err(CommandError::ConfirmationRequired { prompt, .. }) => {
                (None, Some("confirmation required".to_string()), Some(prompt))
            }
            Err(e) => (None, Some(e.to_string()), None),
        };

        InvocationResponse {
            resource: request.resource,
            command: request.command,
            result,
            error,
            confirmation,
            state,
        }
    }

    /// Stop state tracking and cancel in-flight invocations started via `handle`.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn lookup(&self, resource: &str, name: &str) -> Result<Arc<Registered>, CommandError> {
        let commands = self.commands.read().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = commands.get(&(resource.to_string(), name.to_string())) {
            return Ok(entry.clone());
        }
        if self.graph.resource(resource).is_none() {
            return Err(CommandError::UnknownResource {
                resource: resource.to_string(),
            });
        }
        Err(CommandError::UnknownCommand {
            resource: resource.to_string(),
            name: name.to_string(),
        })
    }
}

impl Drop for CommandRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
