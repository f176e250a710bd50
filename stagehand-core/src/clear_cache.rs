//! "Clear Cache" command for key/value cache resources
//!
//! Opens a fresh connection per invocation using the resource's resolved
//! connection string and issues a server-wide flush. The connection is
//! dropped on every exit path.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::command::{CommandBody, CommandContext, ExecutionError, IconVariant, ResourceCommand};

pub const CLEAR_CACHE_NAME: &str = "clear-cache";
pub const CLEAR_CACHE_DISPLAY_NAME: &str = "Clear Cache";
pub const CLEAR_CACHE_ICON: &str = "AnimalRabbitOff";
pub const CLEAR_CACHE_CONFIRMATION: &str = "Are you sure you want to clear the cache?";
pub const CLEAR_CACHE_DESCRIPTION: &str =
    "This command will clear all cached data in the Redis cache.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("could not connect to cache: {0}")]
    Connect(String),
    #[error("cache command failed: {0}")]
    Command(String),
}

impl From<CacheError> for ExecutionError {
    fn from(e: CacheError) -> Self {
        ExecutionError::Failed(e.to_string())
    }
}

/// Opens connections to a cache server
#[async_trait]
pub trait CacheConnector: Send + Sync {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn CacheConnection>, CacheError>;
}

#[async_trait]
pub trait CacheConnection: Send {
    /// Remove every key from every database of the server
    async fn flush_all(&mut self) -> Result<(), CacheError>;
}

pub struct ClearCache {
    connector: Arc<dyn CacheConnector>,
}

impl ClearCache {
    pub fn new(connector: Arc<dyn CacheConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl CommandBody for ClearCache {
    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<Option<String>, ExecutionError> {
        let connection_string = ctx.connection_string()?;
        let mut connection = self.connector.connect(connection_string.expose()).await?;
        connection.flush_all().await?;
        tracing::info!(resource = %ctx.resource_name(), "cache cleared");
        Ok(None)
    }
}

/// The command as shown to operators: confirmation required, enabled only
/// while the cache is healthy.
pub fn clear_cache_command(connector: Arc<dyn CacheConnector>) -> ResourceCommand {
    ResourceCommand::new(
        CLEAR_CACHE_NAME,
        CLEAR_CACHE_DISPLAY_NAME,
        ClearCache::new(connector),
    )
    .with_icon(CLEAR_CACHE_ICON, IconVariant::Filled)
    .with_confirmation(CLEAR_CACHE_CONFIRMATION)
    .with_description(CLEAR_CACHE_DESCRIPTION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use crate::adapter::Hosted;
    use crate::command::{CommandError, CommandRegistry, CommandResult, CommandState, InvocationContext};
    use crate::graph::{Resource, ResourceGraph};
    use crate::health::{HealthProbe, ProbeExecutor};
    use crate::model::{ConnectionSource, HealthState, Lifetime, ResourceKind};
    use crate::parameter::ResolvedParameters;
    use crate::sequencer::Sequencer;

    /// In-memory cache server shared by every connection
    #[derive(Default)]
    struct FakeServer {
        keys: Mutex<BTreeMap<String, String>>,
        offline: AtomicBool,
        seen: Mutex<Vec<String>>,
    }

    struct FakeConnector(Arc<FakeServer>);

    struct FakeConnection(Arc<FakeServer>);

    #[async_trait]
    impl CacheConnector for FakeConnector {
        async fn connect(
            &self,
            connection_string: &str,
        ) -> Result<Box<dyn CacheConnection>, CacheError> {
            self.0.seen.lock().unwrap().push(connection_string.to_string());
            if self.0.offline.load(Ordering::SeqCst) {
                return Err(CacheError::Connect("connection refused".into()));
            }
            Ok(Box::new(FakeConnection(self.0.clone())))
        }
    }

    #[async_trait]
    impl CacheConnection for FakeConnection {
        async fn flush_all(&mut self) -> Result<(), CacheError> {
            self.0.keys.lock().unwrap().clear();
            Ok(())
        }
    }

    /// Healthy while the fake server is online
    struct ServerProbe(Arc<FakeServer>);

    #[async_trait]
    impl ProbeExecutor for ServerProbe {
        async fn check(&self, _resource: &Resource, _probe: &HealthProbe) -> HealthState {
            if self.0.offline.load(Ordering::SeqCst) {
                HealthState::Unhealthy
            } else {
                HealthState::Healthy
            }
        }
    }

    fn cache_graph(connection: Option<ConnectionSource>) -> crate::graph::Graph {
        let mut g = ResourceGraph::new();
        let cache = g
            .add_resource("cache", ResourceKind::ExternalService, Lifetime::Persistent)
            .unwrap();
        let res = g.resource_mut(&cache).unwrap();
        res.connection = connection;
        res.probes = vec![HealthProbe::ping().with_interval(Duration::from_millis(100))];
        g.finalize().unwrap()
    }

    #[test]
    fn test_descriptor() {
        let server = Arc::new(FakeServer::default());
        let command = clear_cache_command(Arc::new(FakeConnector(server)));
        let d = command.descriptor();

        assert_eq!(d.name, "clear-cache");
        assert_eq!(d.display_name, "Clear Cache");
        assert_eq!(d.icon.as_ref().unwrap().name, "AnimalRabbitOff");
        assert_eq!(d.icon.as_ref().unwrap().variant, IconVariant::Filled);
        assert_eq!(
            d.confirmation.as_deref(),
            Some("Are you sure you want to clear the cache?")
        );
        assert_eq!(
            d.description.as_deref(),
            Some("This command will clear all cached data in the Redis cache.")
        );
        assert_eq!(command.state_for(HealthState::Healthy), CommandState::Enabled);
        assert_eq!(command.state_for(HealthState::Starting), CommandState::Disabled);
        assert_eq!(command.state_for(HealthState::Unhealthy), CommandState::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cache_follows_health() {
        let server = Arc::new(FakeServer::default());
        server
            .keys
            .lock()
            .unwrap()
            .insert("article:1".into(), "cached".into());

        let graph = cache_graph(Some(ConnectionSource::Literal("localhost:6379".into())));
        let sequencer = Sequencer::new(
            graph.clone(),
            Arc::new(Hosted),
            Arc::new(ServerProbe(server.clone())),
            ResolvedParameters::default(),
        );
        let registry = CommandRegistry::new(graph.clone(), ResolvedParameters::default());
        registry
            .register(
                "cache",
                clear_cache_command(Arc::new(FakeConnector(server.clone()))),
            )
            .unwrap();
        let mut state = registry.watch_state("cache", CLEAR_CACHE_NAME).unwrap();

        let report = sequencer.run_with_deadline(Duration::from_secs(5)).await;
        assert!(report.is_success(), "{report:?}");
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == CommandState::Enabled),
        )
        .await
        .unwrap()
        .unwrap();

        // Without confirmation nothing reaches the server.
        let err = registry
            .invoke("cache", CLEAR_CACHE_NAME, InvocationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::ConfirmationRequired { .. }));
        assert!(server.seen.lock().unwrap().is_empty());
        assert_eq!(server.keys.lock().unwrap().len(), 1);

        let result = registry
            .invoke("cache", CLEAR_CACHE_NAME, InvocationContext::confirmed())
            .await
            .unwrap();
        assert_eq!(result, CommandResult::success());
        assert!(server.keys.lock().unwrap().is_empty());
        assert_eq!(server.seen.lock().unwrap().as_slice(), ["localhost:6379"]);

        server.offline.store(true, Ordering::SeqCst);
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == CommandState::Disabled),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(graph.health("cache"), Some(HealthState::Unhealthy));

        let result = registry
            .invoke("cache", CLEAR_CACHE_NAME, InvocationContext::confirmed())
            .await
            .unwrap();
        assert_eq!(
            result,
            CommandResult::failure("could not connect to cache: connection refused")
        );

        sequencer.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_connection_string_fails() {
        let server = Arc::new(FakeServer::default());
        let registry = CommandRegistry::new(cache_graph(None), ResolvedParameters::default());
        registry
            .register("cache", clear_cache_command(Arc::new(FakeConnector(server.clone()))))
            .unwrap();

        let result = registry
            .invoke("cache", CLEAR_CACHE_NAME, InvocationContext::confirmed())
            .await
            .unwrap();
        assert_eq!(
            result,
            CommandResult::failure("Unable to get the 'cache' connection string.")
        );
        assert!(server.seen.lock().unwrap().is_empty());
    }
}
