//! Resource graph
//!
//! Resources are declared on a mutable [`ResourceGraph`] together with two
//! kinds of edges: wiring (environment flows from one resource into another)
//! and readiness-wait (one resource may not start before another is healthy).
//! [`ResourceGraph::finalize`] validates the whole structure and freezes it
//! into a cheaply cloneable [`Graph`] that the sequencer and the command
//! subsystem share.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::health::{HealthBoard, HealthProbe};
use crate::model::{
    ConnectionSource, Edge, EdgeKind, Endpoint, EnvSource, EnvValue, Environment, HealthState,
    LaunchSpec, Lifetime, ResourceId, ResourceKind,
};
use crate::parameter::{ParameterRef, ResolvedParameters};
use crate::reducer::EventBus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("resource '{name}' is already declared")]
    DuplicateResource { name: String },
    #[error("resource '{name}' is not declared")]
    UnknownResource { name: String },
    #[error("readiness cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<ResourceId> },
    #[error("resource '{from}' is wired to '{to}', which exposes no connection string")]
    MissingConnection { from: ResourceId, to: ResourceId },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("resource '{resource}' is not declared")]
    UnknownResource { resource: ResourceId },
    #[error("resource '{resource}' needs parameter '{parameter}', which has no value")]
    MissingParameter {
        resource: ResourceId,
        parameter: String,
    },
    #[error("Unable to get the '{resource}' connection string.")]
    MissingConnection { resource: ResourceId },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("resource '{resource}' is not declared")]
    UnknownResource { resource: ResourceId },
    #[error("resource '{resource}' did not become healthy within {timeout:?} (last state: {last})")]
    Timeout {
        resource: ResourceId,
        timeout: Duration,
        last: HealthState,
    },
}

/// How a wiring edge projects `to` into `from`'s environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    /// `ConnectionStrings__<to>`
    ConnectionString,
    /// The value (parameter) or connection string (anything else) under `key`
    Environment(String),
}

#[derive(Clone, Debug)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub lifetime: Lifetime,
    pub environment: BTreeMap<String, EnvSource>,
    pub connection: Option<ConnectionSource>,
    pub probes: Vec<HealthProbe>,
    pub launch: Option<LaunchSpec>,
    pub endpoint: Option<Endpoint>,
    pub description: Option<String>,
}

impl Resource {
    fn new(id: ResourceId, kind: ResourceKind, lifetime: Lifetime) -> Self {
        Self {
            id,
            kind,
            lifetime,
            environment: BTreeMap::new(),
            connection: None,
            probes: Vec::new(),
            launch: None,
            endpoint: None,
            description: None,
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.lifetime, Lifetime::Persistent)
    }
}

/// Handle returned by [`ResourceGraph::add_resource`]
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceHandle {
    id: ResourceId,
}

impl ResourceHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Graph under construction
#[derive(Debug, Default)]
pub struct ResourceGraph {
    resources: BTreeMap<ResourceId, Resource>,
    edges: BTreeSet<Edge>,
    /// from -> the resources it waits on
    waits: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    /// First cycle seen by `add_readiness_wait`. Poisons `finalize`.
    cycle: Option<Vec<ResourceId>>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(
        &mut self,
        name: &str,
        kind: ResourceKind,
        lifetime: Lifetime,
    ) -> Result<ResourceHandle, GraphError> {
        if self.resources.contains_key(name) {
            return Err(GraphError::DuplicateResource { name: name.into() });
        }
        self.resources
            .insert(name.to_string(), Resource::new(name.into(), kind, lifetime));
        Ok(ResourceHandle { id: name.into() })
    }

    /// Declare a parameter as a graph resource so others can be wired to it.
    pub fn add_parameter(&mut self, param: &ParameterRef) -> Result<ResourceHandle, GraphError> {
        self.add_resource(param.name(), ResourceKind::Parameter, Lifetime::Ephemeral)
    }

    pub fn handle(&self, name: &str) -> Option<ResourceHandle> {
        self.resources
            .contains_key(name)
            .then(|| ResourceHandle { id: name.into() })
    }

    /// Fails for handles minted by another builder.
    pub fn resource_mut(&mut self, handle: &ResourceHandle) -> Result<&mut Resource, GraphError> {
        self.resources
            .get_mut(&handle.id)
            .ok_or_else(|| GraphError::UnknownResource {
                name: handle.id.clone(),
            })
    }

    pub fn add_wiring(
        &mut self,
        from: &ResourceHandle,
        to: &ResourceHandle,
        projection: Projection,
    ) -> Result<(), GraphError> {
        self.require(&from.id)?;
        let to_kind = self.require(&to.id)?.kind;

        let key = match projection {
            Projection::ConnectionString => format!("ConnectionStrings__{}", to.id),
            Projection::Environment(key) => key,
        };
        let source = match to_kind {
            ResourceKind::Parameter => EnvSource::Parameter(to.id.clone()),
            _ => EnvSource::ConnectionString(to.id.clone()),
        };

        self.resource_mut(from)?.environment.insert(key, source);
        self.edges.insert(Edge {
            from: from.id.clone(),
            to: to.id.clone(),
            kind: EdgeKind::Wiring,
        });
        Ok(())
    }

    /// `from` will not start until `to` is healthy.
    ///
    /// A wait that closes a cycle is reported immediately and also makes
    /// [`finalize`](Self::finalize) fail, so a caller that ignores the error
    /// still cannot sequence the graph.
    pub fn add_readiness_wait(
        &mut self,
        from: &ResourceHandle,
        to: &ResourceHandle,
    ) -> Result<(), GraphError> {
        self.require(&from.id)?;
        self.require(&to.id)?;

        let cycle = self.wait_path(&to.id, &from.id).map(|mut path| {
            path.insert(0, from.id.clone());
            path.push(from.id.clone());
            path
        });

        self.waits
            .entry(from.id.clone())
            .or_default()
            .insert(to.id.clone());
        self.edges.insert(Edge {
            from: from.id.clone(),
            to: to.id.clone(),
            kind: EdgeKind::ReadinessWait,
        });

        if let Some(cycle) = cycle {
            if self.cycle.is_none() {
                self.cycle = Some(cycle.clone());
            }
            return Err(GraphError::CycleDetected { cycle });
        }
        Ok(())
    }

    /// Validate and freeze. The result is immutable.
    pub fn finalize(self) -> Result<Graph, GraphError> {
        if let Some(cycle) = self.cycle {
            return Err(GraphError::CycleDetected { cycle });
        }

        for resource in self.resources.values() {
            for source in resource.environment.values() {
                if let EnvSource::ConnectionString(to) | EnvSource::Parameter(to) = source {
                    let target = self
                        .resources
                        .get(to)
                        .ok_or_else(|| GraphError::UnknownResource { name: to.clone() })?;
                    if target.kind != ResourceKind::Parameter && target.connection.is_none() {
                        return Err(GraphError::MissingConnection {
                            from: resource.id.clone(),
                            to: to.clone(),
                        });
                    }
                }
            }
            if let Some(ConnectionSource::Database { parent, .. }) = &resource.connection {
                if !self.resources.contains_key(parent) {
                    return Err(GraphError::UnknownResource {
                        name: parent.clone(),
                    });
                }
            }
        }

        let waves = self.partition()?;
        let events = EventBus::default();
        let health = HealthBoard::new(self.resources.keys(), events.clone());

        tracing::debug!(
            resources = self.resources.len(),
            edges = self.edges.len(),
            waves = waves.len(),
            "resource graph finalized"
        );

        Ok(Graph {
            inner: Arc::new(GraphInner {
                resources: self.resources,
                edges: self.edges,
                waits: self.waits,
                waves,
                health,
                events,
            }),
        })
    }

    fn require(&self, name: &str) -> Result<&Resource, GraphError> {
        self.resources
            .get(name)
            .ok_or_else(|| GraphError::UnknownResource { name: name.into() })
    }

    /// Path of readiness waits from `start` to `goal`, including `start` but
    /// not `goal`. Empty when they are the same resource.
    fn wait_path(&self, start: &str, goal: &str) -> Option<Vec<ResourceId>> {
        if start == goal {
            return Some(Vec::new());
        }
        let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue = VecDeque::from([start]);
        let mut seen = BTreeSet::from([start]);

        while let Some(node) = queue.pop_front() {
            for next in self.waits.get(node).into_iter().flatten() {
                if !seen.insert(next.as_str()) {
                    continue;
                }
                parent.insert(next.as_str(), node);
                if next == goal {
                    let mut path = Vec::new();
                    let mut cur = parent.get(goal).copied();
                    while let Some(n) = cur {
                        if n == start {
                            break;
                        }
                        path.push(n.to_string());
                        cur = parent.get(n).copied();
                    }
                    path.reverse();
                    let mut full = vec![start.to_string()];
                    full.extend(path);
                    return Some(full);
                }
                queue.push_back(next.as_str());
            }
        }
        None
    }

    /// Kahn's algorithm over readiness waits. Wave 0 waits on nothing.
    fn partition(&self) -> Result<Vec<Vec<ResourceId>>, GraphError> {
        let mut pending: BTreeMap<&str, usize> = self
            .resources
            .keys()
            .map(|id| (id.as_str(), self.waits.get(id).map_or(0, |w| w.len())))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (from, targets) in &self.waits {
            for to in targets {
                dependents.entry(to.as_str()).or_default().push(from.as_str());
            }
        }

        let mut waves = Vec::new();
        let mut ready: Vec<&str> = pending
            .iter()
            .filter(|&(_, n)| *n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut placed = 0;

        while !ready.is_empty() {
            placed += ready.len();
            let mut next = Vec::new();
            for id in &ready {
                pending.remove(id);
                for dependent in dependents.get(id).into_iter().flatten() {
                    if let Some(n) = pending.get_mut(dependent) {
                        *n -= 1;
                        if *n == 0 {
                            next.push(*dependent);
                        }
                    }
                }
            }
            waves.push(ready.iter().map(|s| s.to_string()).collect());
            next.sort_unstable();
            ready = next;
        }

        if placed < self.resources.len() {
            let stuck: Vec<ResourceId> = pending.keys().map(|s| s.to_string()).collect();
            return Err(GraphError::CycleDetected { cycle: stuck });
        }
        Ok(waves)
    }
}

#[derive(Debug)]
struct GraphInner {
    resources: BTreeMap<ResourceId, Resource>,
    edges: BTreeSet<Edge>,
    waits: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    waves: Vec<Vec<ResourceId>>,
    health: HealthBoard,
    events: EventBus,
}

/// Frozen resource graph plus the live health of every resource
#[derive(Clone, Debug)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Graph {
    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.inner.resources.get(id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.inner.resources.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.inner.edges.iter()
    }

    /// Resources `id` must see healthy before it starts
    pub fn waits_on(&self, id: &str) -> impl Iterator<Item = &ResourceId> {
        self.inner.waits.get(id).into_iter().flatten()
    }

    /// Resources that wait on `id`
    pub fn dependents<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a ResourceId> + 'a {
        self.inner
            .waits
            .iter()
            .filter(move |(_, targets)| targets.contains(id))
            .map(|(from, _)| from)
    }

    /// Every resource that transitively waits on `id`
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<ResourceId> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(node) = queue.pop_front() {
            for dependent in self.dependents(&node) {
                if found.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }
        found
    }

    /// Topological partition by readiness waits
    pub fn start_waves(&self) -> &[Vec<ResourceId>] {
        &self.inner.waves
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn health(&self, id: &str) -> Option<HealthState> {
        self.inner.health.get(id)
    }

    pub fn health_snapshot(&self) -> BTreeMap<ResourceId, HealthState> {
        self.inner.health.snapshot()
    }

    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<HealthState>> {
        self.inner.health.subscribe(id)
    }

    pub(crate) fn publish(&self, id: &str, state: HealthState) -> bool {
        self.inner.health.publish(id, state)
    }

    pub async fn wait_for_healthy(&self, id: &str, timeout: Duration) -> Result<(), WaitError> {
        let mut rx = self.subscribe(id).ok_or_else(|| WaitError::UnknownResource {
            resource: id.to_string(),
        })?;
        match tokio::time::timeout(timeout, rx.wait_for(|s| s.is_healthy())).await {
            Ok(Ok(_)) => Ok(()),
            _ => Err(WaitError::Timeout {
                resource: id.to_string(),
                timeout,
                last: self.health(id).unwrap_or_default(),
            }),
        }
    }

    /// Connection string a resource exposes to the resources wired to it.
    pub fn connection_string(
        &self,
        id: &str,
        params: &ResolvedParameters,
    ) -> Result<EnvValue, ResolveError> {
        self.connection_string_at(id, params, self.inner.resources.len())
    }

    fn connection_string_at(
        &self,
        id: &str,
        params: &ResolvedParameters,
        depth: usize,
    ) -> Result<EnvValue, ResolveError> {
        let resource = self.resource(id).ok_or_else(|| ResolveError::UnknownResource {
            resource: id.to_string(),
        })?;
        let missing = || ResolveError::MissingConnection {
            resource: id.to_string(),
        };

        if resource.kind == ResourceKind::Parameter {
            return parameter_value(id, id, params);
        }

        match resource.connection.as_ref().ok_or_else(missing)? {
            ConnectionSource::Literal(value) => Ok(EnvValue::plain(value.clone())),
            ConnectionSource::Parameter(name) => parameter_value(id, name, params),
            ConnectionSource::Database { parent, database } => {
                if depth == 0 {
                    return Err(missing());
                }
                let server = self.connection_string_at(parent, params, depth - 1)?;
                let joined = database_connection_string(server.expose(), database);
                Ok(if server.is_secret() {
                    EnvValue::secret(joined)
                } else {
                    EnvValue::plain(joined)
                })
            }
        }
    }

    /// The environment `id` receives, with every wiring resolved.
    pub fn resolve_environment(
        &self,
        id: &str,
        params: &ResolvedParameters,
    ) -> Result<Environment, ResolveError> {
        let resource = self.resource(id).ok_or_else(|| ResolveError::UnknownResource {
            resource: id.to_string(),
        })?;

        let mut env = Environment::new();
        for (key, source) in &resource.environment {
            let value = match source {
                EnvSource::Literal(value) => EnvValue::plain(value.clone()),
                EnvSource::Parameter(name) => parameter_value(id, name, params)?,
                EnvSource::ConnectionString(to) => self.connection_string(to, params)?,
            };
            env.insert(key.clone(), value);
        }
        Ok(env)
    }
}

fn parameter_value(
    resource: &str,
    name: &str,
    params: &ResolvedParameters,
) -> Result<EnvValue, ResolveError> {
    params
        .get(name)
        .cloned()
        .ok_or_else(|| ResolveError::MissingParameter {
            resource: resource.to_string(),
            parameter: name.to_string(),
        })
}

/// `mongodb://host:27017` + `articles` -> `mongodb://host:27017/articles`.
/// Key/value style strings get a `Database=` entry instead.
fn database_connection_string(server: &str, database: &str) -> String {
    if server.contains("://") {
        let (base, query) = match server.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (server, None),
        };
        let scheme_end = base.find("://").map_or(0, |i| i + 3);
        let authority = base[scheme_end..]
            .split_once('/')
            .map_or(&base[scheme_end..], |(authority, _)| authority);
        let mut out = format!("{}{}/{}", &base[..scheme_end], authority, database);
        if let Some(query) = query {
            out.push('?');
            out.push_str(query);
        }
        out
    } else {
        format!("{};Database={}", server.trim_end_matches(';'), database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::{ParameterStore, StaticProvider};

    fn three_chain() -> (ResourceGraph, ResourceHandle, ResourceHandle, ResourceHandle) {
        let mut g = ResourceGraph::new();
        let a = g
            .add_resource("a", ResourceKind::Project, Lifetime::Ephemeral)
            .unwrap();
        let b = g
            .add_resource("b", ResourceKind::ExternalService, Lifetime::Ephemeral)
            .unwrap();
        let c = g
            .add_resource("c", ResourceKind::ExternalService, Lifetime::Ephemeral)
            .unwrap();
        (g, a, b, c)
    }

    #[test]
    fn test_duplicate_resource() {
        let mut g = ResourceGraph::new();
        g.add_resource("cache", ResourceKind::ExternalService, Lifetime::Persistent)
            .unwrap();
        let err = g
            .add_resource("cache", ResourceKind::Project, Lifetime::Ephemeral)
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateResource {
                name: "cache".into()
            }
        );
    }

    #[test]
    fn test_handle_from_other_builder_is_rejected() {
        let mut other = ResourceGraph::new();
        let foreign = other
            .add_resource("website", ResourceKind::Project, Lifetime::Ephemeral)
            .unwrap();

        let mut g = ResourceGraph::new();
        let cache = g
            .add_resource("cache", ResourceKind::ExternalService, Lifetime::Persistent)
            .unwrap();
        assert_eq!(
            g.resource_mut(&foreign).unwrap_err(),
            GraphError::UnknownResource {
                name: "website".into()
            }
        );
        assert!(g.add_readiness_wait(&foreign, &cache).is_err());

        let graph = g.finalize().unwrap();
        assert!(graph.resource("website").is_none());
        assert_eq!(graph.resources().count(), 1);
    }

    #[test]
    fn test_start_waves_follow_waits() {
        let (mut g, a, b, c) = three_chain();
        g.add_readiness_wait(&a, &b).unwrap();
        g.add_readiness_wait(&b, &c).unwrap();
        let graph = g.finalize().unwrap();

        assert_eq!(
            graph.start_waves(),
            &[vec!["c".to_string()], vec!["b".to_string()], vec!["a".to_string()]]
        );
        assert_eq!(
            graph.transitive_dependents("c"),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_independent_resources_share_a_wave() {
        let (mut g, a, b, c) = three_chain();
        g.add_readiness_wait(&a, &b).unwrap();
        g.add_readiness_wait(&a, &c).unwrap();
        let graph = g.finalize().unwrap();

        assert_eq!(graph.start_waves()[0], vec!["b".to_string(), "c".to_string()]);
        assert_eq!(graph.start_waves()[1], vec!["a".to_string()]);
    }

    #[test]
    fn test_cycle_rejected_at_finalize() {
        let (mut g, a, b, _) = three_chain();
        g.add_readiness_wait(&a, &b).unwrap();
        let err = g.add_readiness_wait(&b, &a).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));

        let err = g.finalize().unwrap_err();
        let GraphError::CycleDetected { cycle } = err else {
            panic!("expected a cycle");
        };
        assert_eq!(cycle, vec!["b", "a", "b"]);
    }

    #[test]
    fn test_self_wait_is_a_cycle() {
        let (mut g, a, _, _) = three_chain();
        assert!(matches!(
            g.add_readiness_wait(&a, &a),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_wiring_does_not_order() {
        let (mut g, a, b, _) = three_chain();
        g.resource_mut(&b).unwrap().connection = Some(ConnectionSource::Literal("localhost:6379".into()));
        g.add_wiring(&a, &b, Projection::ConnectionString).unwrap();
        let graph = g.finalize().unwrap();

        assert_eq!(graph.start_waves().len(), 1);
        assert!(graph.edges().any(|e| e.kind == EdgeKind::Wiring && e.from == "a"));
    }

    #[test]
    fn test_wiring_to_resource_without_connection() {
        let (mut g, a, b, _) = three_chain();
        g.add_wiring(&a, &b, Projection::ConnectionString).unwrap();
        assert!(matches!(
            g.finalize(),
            Err(GraphError::MissingConnection { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_environment() {
        let mut store = ParameterStore::new().with_provider(
            StaticProvider::default()
                .with("auth0-domain", "example.auth0.com")
                .with("mongo-password", "s3cret"),
        );
        let domain = store.declare("auth0-domain", true).unwrap();
        let password = store.declare("mongo-password", true).unwrap();

        let mut g = ResourceGraph::new();
        let domain = g.add_parameter(&domain).unwrap();
        g.add_parameter(&password).unwrap();
        let server = g
            .add_resource("mongodb-server", ResourceKind::ExternalService, Lifetime::Persistent)
            .unwrap();
        g.resource_mut(&server).unwrap().connection =
            Some(ConnectionSource::Literal("mongodb://localhost:27017".into()));
        let db = g
            .add_resource("articlesdb", ResourceKind::LogicalDatabase, Lifetime::Persistent)
            .unwrap();
        g.resource_mut(&db).unwrap().connection = Some(ConnectionSource::Database {
            parent: "mongodb-server".into(),
            database: "articlesdb".into(),
        });
        let web = g
            .add_resource("website", ResourceKind::Project, Lifetime::Ephemeral)
            .unwrap();
        g.resource_mut(&web).unwrap()
            .environment
            .insert("ASPNETCORE_ENVIRONMENT".into(), EnvSource::Literal("Development".into()));
        g.add_wiring(&web, &db, Projection::ConnectionString).unwrap();
        g.add_wiring(&web, &domain, Projection::Environment("auth0-domain".into()))
            .unwrap();
        let graph = g.finalize().unwrap();

        let params = store.resolve_all().await.unwrap();
        let env = graph.resolve_environment("website", &params).unwrap();

        assert_eq!(
            env["ConnectionStrings__articlesdb"].expose(),
            "mongodb://localhost:27017/articlesdb"
        );
        assert_eq!(env["auth0-domain"].expose(), "example.auth0.com");
        assert_eq!(env["auth0-domain"].to_string(), "********");
        assert_eq!(env["ASPNETCORE_ENVIRONMENT"].expose(), "Development");
    }

    #[test]
    fn test_missing_parameter_value() {
        let mut store = ParameterStore::new();
        let token = store.declare("token", true).unwrap();
        let mut g = ResourceGraph::new();
        let token = g.add_parameter(&token).unwrap();
        let web = g
            .add_resource("web", ResourceKind::Project, Lifetime::Ephemeral)
            .unwrap();
        g.add_wiring(&web, &token, Projection::Environment("TOKEN".into()))
            .unwrap();
        let graph = g.finalize().unwrap();

        let err = graph
            .resolve_environment("web", &ResolvedParameters::default())
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::MissingParameter {
                resource: "web".into(),
                parameter: "token".into()
            }
        );
    }

    #[test]
    fn test_database_connection_strings() {
        assert_eq!(
            database_connection_string("mongodb://u:p@host:27017/?authSource=admin", "blog"),
            "mongodb://u:p@host:27017/blog?authSource=admin"
        );
        assert_eq!(
            database_connection_string("Host=localhost;Port=5432;", "blog"),
            "Host=localhost;Port=5432;Database=blog"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_healthy_times_out() {
        let (g, _, _, _) = three_chain();
        let graph = g.finalize().unwrap();
        graph.publish("b", HealthState::Starting);

        let err = graph
            .wait_for_healthy("b", Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WaitError::Timeout {
                last: HealthState::Starting,
                ..
            }
        ));

        graph.publish("b", HealthState::Healthy);
        graph
            .wait_for_healthy("b", Duration::from_secs(1))
            .await
            .unwrap();
    }
}
