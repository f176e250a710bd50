//! Health-gated startup sequencer
//!
//! One task per resource. Each task waits until every readiness-wait target
//! is healthy, invokes the start action, then keeps polling the resource's
//! probes for as long as the orchestrator runs. That task is the only writer
//! of its resource's health once the resource has been launched.
//!
//! `run` returns once every resource is healthy, once everything still
//! pending sits behind a failed start, or when the startup deadline expires.
//! On expiry in-flight probes are abandoned, resources still starting are
//! marked unhealthy and healthy resources are left running.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::{StartAction, StartError};
use crate::graph::{Graph, Resource};
use crate::health::{ProbeExecutor, poll_interval, probe_all};
use crate::model::{HealthState, Lifetime, ResourceId, ResourceKind};
use crate::parameter::ResolvedParameters;
use crate::reducer::RuntimeEvent;

pub const DEFAULT_STARTUP_DEADLINE: Duration = Duration::from_secs(120);

#[derive(Clone, Debug)]
pub struct SequencerOptions {
    /// Overall bound on one sequencing pass
    pub deadline: Duration,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_STARTUP_DEADLINE,
        }
    }
}

/// How a single resource came out of a sequencing pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartupOutcome {
    Healthy,
    /// Already healthy from an earlier pass; not started again
    AlreadyHealthy,
    StartFailed { reason: String },
    /// Launched but not healthy before the deadline
    TimedOut,
    /// Never started because a readiness-wait target never became healthy
    Blocked,
}

/// A failed branch: the resource at its root plus everything stuck behind it
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StartupError {
    #[error("{resource} did not become healthy before the startup deadline (blocked: [{}])", .blocked.join(", "))]
    Timeout {
        resource: ResourceId,
        blocked: Vec<ResourceId>,
    },
    #[error("{resource} failed to start: {reason} (blocked: [{}])", .blocked.join(", "))]
    StartFailed {
        resource: ResourceId,
        reason: String,
        blocked: Vec<ResourceId>,
    },
}

impl StartupError {
    pub fn resource(&self) -> &str {
        match self {
            StartupError::Timeout { resource, .. } | StartupError::StartFailed { resource, .. } => {
                resource
            }
        }
    }

    pub fn blocked(&self) -> &[ResourceId] {
        match self {
            StartupError::Timeout { blocked, .. } | StartupError::StartFailed { blocked, .. } => {
                blocked
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct SequenceReport {
    pub outcomes: BTreeMap<ResourceId, StartupOutcome>,
    pub failures: Vec<StartupError>,
    pub elapsed: Duration,
}

impl SequenceReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
            && self.outcomes.values().all(|o| {
                matches!(o, StartupOutcome::Healthy | StartupOutcome::AlreadyHealthy)
            })
    }

    pub fn outcome(&self, id: &str) -> Option<&StartupOutcome> {
        self.outcomes.get(id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Launch {
    /// Start action in flight
    Starting,
    /// A probe loop owns the resource's health
    Monitoring,
    Failed(String),
}

type Report = mpsc::UnboundedSender<(ResourceId, StartupOutcome)>;

struct Shared {
    graph: Graph,
    starter: Arc<dyn StartAction>,
    prober: Arc<dyn ProbeExecutor>,
    params: ResolvedParameters,
    shutdown: CancellationToken,
    launched: Mutex<BTreeMap<ResourceId, Launch>>,
}

impl Shared {
    fn launch_state(&self, id: &str) -> Option<Launch> {
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    fn set_launch_state(&self, id: &str, state: Launch) {
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), state);
    }
}

pub struct Sequencer {
    shared: Arc<Shared>,
    options: SequencerOptions,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Sequencer {
    pub fn new(
        graph: Graph,
        starter: Arc<dyn StartAction>,
        prober: Arc<dyn ProbeExecutor>,
        params: ResolvedParameters,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                graph,
                starter,
                prober,
                params,
                shutdown: CancellationToken::new(),
                launched: Mutex::new(BTreeMap::new()),
            }),
            options: SequencerOptions::default(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_options(mut self, options: SequencerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.shared.graph
    }

    pub fn params(&self) -> &ResolvedParameters {
        &self.shared.params
    }

    /// Token cancelled by [`shutdown`](Self::shutdown)
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    pub async fn run(&self) -> SequenceReport {
        self.run_with_deadline(self.options.deadline).await
    }

    pub async fn run_with_deadline(&self, deadline: Duration) -> SequenceReport {
        let started_at = tokio::time::Instant::now();
        let graph = &self.shared.graph;
        let startup = self.shared.shutdown.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let ids: Vec<ResourceId> = graph.start_waves().iter().flatten().cloned().collect();
        tracing::info!(
            resources = ids.len(),
            waves = graph.start_waves().len(),
            deadline_ms = deadline.as_millis() as u64,
            "sequencing startup"
        );

        for id in &ids {
            let shared = self.shared.clone();
            let startup = startup.clone();
            let report = tx.clone();
            let id = id.clone();
            self.track(tokio::spawn(async move {
                drive(shared, id, startup, report).await;
            }));
        }
        drop(tx);

        let mut outcomes: BTreeMap<ResourceId, StartupOutcome> = BTreeMap::new();
        let expiry = tokio::time::sleep(deadline);
        tokio::pin!(expiry);

        while outcomes.len() < ids.len() {
            if !startup.is_cancelled() && only_blocked_remain(graph, &ids, &outcomes) {
                tracing::debug!("remaining resources are behind failed starts");
                startup.cancel();
            }

            tokio::select! {
                Some((id, outcome)) = rx.recv() => {
                    outcomes.insert(id, outcome);
                }
                _ = &mut expiry, if !startup.is_cancelled() => {
                    tracing::warn!(deadline_ms = deadline.as_millis() as u64, "startup deadline expired");
                    startup.cancel();
                }
                else => break,
            }
        }
        startup.cancel();

        let failures = collect_failures(graph, &outcomes);
        for failure in &failures {
            tracing::warn!(resource = %failure.resource(), error = %failure, "startup branch failed");
            graph.events().emit(RuntimeEvent::StartupFailed {
                error: failure.clone(),
            });
        }

        let report = SequenceReport {
            outcomes,
            failures,
            elapsed: started_at.elapsed(),
        };
        tracing::info!(
            success = report.is_success(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sequencing finished"
        );
        report
    }

    /// The only way from `Unhealthy` back to `Starting`. Refused while a
    /// readiness-wait target is not healthy or a start is already in flight.
    pub async fn restart(&self, id: &str) -> Result<(), StartError> {
        let shared = &self.shared;
        let resource = shared
            .graph
            .resource(id)
            .cloned()
            .ok_or_else(|| StartError::LaunchFailed {
                id: id.to_string(),
                message: "resource is not declared".into(),
            })?;

        if let Some(dependency) = shared
            .graph
            .waits_on(id)
            .find(|d| shared.graph.health(d) != Some(HealthState::Healthy))
        {
            return Err(StartError::DependencyNotReady {
                id: id.to_string(),
                dependency: dependency.clone(),
            });
        }

        let previous = {
            let mut launched = shared.launched.lock().unwrap_or_else(|e| e.into_inner());
            let previous = launched.get(id).cloned();
            if previous == Some(Launch::Starting) {
                return Err(StartError::AlreadyStarting { id: id.to_string() });
            }
            launched.insert(id.to_string(), Launch::Starting);
            previous
        };

        tracing::info!(resource = %id, "restarting");
        shared.graph.publish(id, HealthState::Starting);

        let result = match shared.graph.resolve_environment(id, &shared.params) {
            Ok(env) => shared.starter.start(&resource, &env).await,
            Err(e) => Err(StartError::LaunchFailed {
                id: id.to_string(),
                message: e.to_string(),
            }),
        };
        if let Err(e) = result {
            fail_launch(shared, id, e.to_string());
            return Err(e);
        }

        shared.set_launch_state(id, Launch::Monitoring);
        // A probe loop from an earlier launch is still running unless the
        // resource has no probes, in which case it returned at once.
        if previous != Some(Launch::Monitoring) || resource.probes.is_empty() {
            let shared = shared.clone();
            self.track(tokio::spawn(async move {
                monitor(&shared, &resource, None).await;
            }));
        }
        Ok(())
    }

    /// Stop monitoring, stop ephemeral resources and mark everything launched as stopped.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            let _ = task.await;
        }

        let launched: Vec<ResourceId> = self
            .shared
            .launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();

        for id in launched {
            let Some(resource) = self.shared.graph.resource(&id) else {
                continue;
            };
            if resource.lifetime == Lifetime::Ephemeral {
                if let Err(e) = self.shared.starter.stop(resource).await {
                    tracing::warn!(resource = %id, error = %e, "stop failed");
                }
            } else {
                tracing::info!(resource = %id, "leaving persistent resource running");
            }
            self.shared.graph.publish(&id, HealthState::Stopped);
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }
}

async fn drive(shared: Arc<Shared>, id: ResourceId, startup: CancellationToken, report: Report) {
    let send = |outcome: StartupOutcome| {
        let _ = report.send((id.clone(), outcome));
    };
    let graph = &shared.graph;
    let Some(resource) = graph.resource(&id).cloned() else {
        send(StartupOutcome::Blocked);
        return;
    };

    tokio::select! {
        _ = wait_for_dependencies(graph, &id) => {}
        _ = startup.cancelled() => {
            tracing::debug!(resource = %id, "still waiting on dependencies");
            send(StartupOutcome::Blocked);
            return;
        }
    }

    if graph.health(&id) == Some(HealthState::Healthy) {
        send(StartupOutcome::AlreadyHealthy);
        return;
    }

    if resource.kind == ResourceKind::Parameter {
        graph.publish(&id, HealthState::Healthy);
        send(StartupOutcome::Healthy);
        return;
    }

    match shared.launch_state(&id) {
        Some(Launch::Failed(reason)) => {
            send(StartupOutcome::StartFailed { reason });
            return;
        }
        Some(Launch::Starting | Launch::Monitoring) => {
            // Launched elsewhere; whoever launched it owns the health state.
            let mut rx = match graph.subscribe(&id) {
                Some(rx) => rx,
                None => return,
            };
            tokio::select! {
                _ = rx.wait_for(|s| s.is_healthy()) => send(StartupOutcome::Healthy),
                _ = startup.cancelled() => send(StartupOutcome::TimedOut),
            }
            return;
        }
        None => shared.set_launch_state(&id, Launch::Starting),
    }

    graph.publish(&id, HealthState::Starting);

    let env = match graph.resolve_environment(&id, &shared.params) {
        Ok(env) => env,
        Err(e) => {
            fail_launch(&shared, &id, e.to_string());
            send(StartupOutcome::StartFailed {
                reason: e.to_string(),
            });
            return;
        }
    };
    tracing::info!(resource = %id, kind = resource.kind.label(), "starting resource");
    tracing::debug!(resource = %id, env = ?env, "resolved environment");

    let started = tokio::select! {
        result = shared.starter.start(&resource, &env) => result,
        _ = startup.cancelled() => {
            tracing::warn!(resource = %id, "start action still running at the deadline");
            graph.publish(&id, HealthState::Unhealthy);
            shared.set_launch_state(&id, Launch::Failed("start cancelled by deadline".into()));
            send(StartupOutcome::TimedOut);
            return;
        }
    };
    if let Err(e) = started {
        fail_launch(&shared, &id, e.to_string());
        send(StartupOutcome::StartFailed {
            reason: e.to_string(),
        });
        return;
    }

    shared.set_launch_state(&id, Launch::Monitoring);
    monitor(&shared, &resource, Some((startup, report))).await;
}

fn fail_launch(shared: &Shared, id: &str, reason: String) {
    tracing::warn!(resource = %id, reason = %reason, "resource failed to start");
    shared.graph.publish(id, HealthState::Unhealthy);
    shared.set_launch_state(id, Launch::Failed(reason));
}

/// Poll a launched resource's probes until shutdown. While `startup` is
/// given, the first healthy result (or the deadline) is reported through it.
async fn monitor(shared: &Shared, resource: &Resource, startup: Option<(CancellationToken, Report)>) {
    let graph = &shared.graph;
    let id = resource.id.as_str();
    let (startup, report) = match startup {
        Some((token, report)) => (token, Some(report)),
        None => (CancellationToken::new(), None),
    };
    let mut reported = report.is_none();
    let send = |outcome: StartupOutcome| {
        if let Some(report) = &report {
            let _ = report.send((id.to_string(), outcome));
        }
    };

    if resource.probes.is_empty() {
        graph.publish(id, HealthState::Healthy);
        send(StartupOutcome::Healthy);
        return;
    }

    let interval = poll_interval(resource);
    loop {
        let state = tokio::select! {
            state = probe_all(shared.prober.as_ref(), resource) => state,
            _ = startup.cancelled(), if !reported => {
                graph.publish(id, HealthState::Unhealthy);
                send(StartupOutcome::TimedOut);
                reported = true;
                continue;
            }
            _ = shared.shutdown.cancelled() => return,
        };

        graph.publish(id, state);
        if !reported && state.is_healthy() {
            send(StartupOutcome::Healthy);
            reported = true;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = startup.cancelled(), if !reported => {
                graph.publish(id, HealthState::Unhealthy);
                send(StartupOutcome::TimedOut);
                reported = true;
            }
            _ = shared.shutdown.cancelled() => return,
        }
    }
}

/// Resolves once every readiness-wait target of `id` is healthy at the same time.
async fn wait_for_dependencies(graph: &Graph, id: &str) {
    let deps: Vec<ResourceId> = graph.waits_on(id).cloned().collect();
    if deps.is_empty() {
        return;
    }
    loop {
        for dep in &deps {
            let Some(mut rx) = graph.subscribe(dep) else {
                continue;
            };
            if rx.wait_for(|s| s.is_healthy()).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        if deps
            .iter()
            .all(|d| graph.health(d) == Some(HealthState::Healthy))
        {
            return;
        }
    }
}

fn only_blocked_remain(
    graph: &Graph,
    ids: &[ResourceId],
    outcomes: &BTreeMap<ResourceId, StartupOutcome>,
) -> bool {
    let mut doomed = BTreeSet::new();
    for (id, outcome) in outcomes {
        if matches!(outcome, StartupOutcome::StartFailed { .. }) {
            doomed.extend(graph.transitive_dependents(id));
        }
    }
    if doomed.is_empty() {
        return false;
    }
    ids.iter()
        .filter(|id| !outcomes.contains_key(*id))
        .all(|id| doomed.contains(id))
}

fn collect_failures(
    graph: &Graph,
    outcomes: &BTreeMap<ResourceId, StartupOutcome>,
) -> Vec<StartupError> {
    let blocked_by = |id: &str| -> Vec<ResourceId> {
        graph
            .transitive_dependents(id)
            .into_iter()
            .filter(|d| outcomes.get(d) == Some(&StartupOutcome::Blocked))
            .collect()
    };

    outcomes
        .iter()
        .filter_map(|(id, outcome)| match outcome {
            StartupOutcome::TimedOut => Some(StartupError::Timeout {
                resource: id.clone(),
                blocked: blocked_by(id),
            }),
            StartupOutcome::StartFailed { reason } => Some(StartupError::StartFailed {
                resource: id.clone(),
                reason: reason.clone(),
                blocked: blocked_by(id),
            }),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use tokio::time::Instant;

    use crate::graph::{ResourceGraph, ResourceHandle};
    use crate::health::HealthProbe;
    use crate::model::{Environment, Lifetime};

    /// Shared clock of "things that happened", strictly increasing
    #[derive(Default)]
    struct Ledger {
        seq: AtomicU64,
        started: Mutex<BTreeMap<String, (u64, Instant)>>,
        healthy: Mutex<BTreeMap<String, u64>>,
        start_calls: Mutex<Vec<String>>,
    }

    impl Ledger {
        fn tick(&self) -> u64 {
            self.seq.fetch_add(1, Ordering::SeqCst)
        }

        fn started_at(&self, id: &str) -> Option<(u64, Instant)> {
            self.started.lock().unwrap().get(id).copied()
        }

        fn healthy_at(&self, id: &str) -> Option<u64> {
            self.healthy.lock().unwrap().get(id).copied()
        }

        fn start_count(&self, id: &str) -> usize {
            self.start_calls
                .lock()
                .unwrap()
                .iter()
                .filter(|s| *s == id)
                .count()
        }
    }

    struct FakeStarter {
        ledger: Arc<Ledger>,
        failing: BTreeSet<String>,
        /// First start of these resources hangs for the given time
        slow: Mutex<BTreeMap<String, Duration>>,
    }

    #[async_trait]
    impl StartAction for FakeStarter {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn start(&self, resource: &Resource, _env: &Environment) -> Result<(), StartError> {
            self.ledger
                .start_calls
                .lock()
                .unwrap()
                .push(resource.id.clone());
            let delay = self.slow.lock().unwrap().remove(&resource.id);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.contains(&resource.id) {
                return Err(StartError::LaunchFailed {
                    id: resource.id.clone(),
                    message: "image not found".into(),
                });
            }
            let seq = self.ledger.tick();
            self.ledger
                .started
                .lock()
                .unwrap()
                .entry(resource.id.clone())
                .or_insert((seq, Instant::now()));
            Ok(())
        }
    }

    /// Healthy once the resource has been up for its boot time.
    /// Resources listed in `never` never become healthy.
    struct BootProber {
        ledger: Arc<Ledger>,
        boot: BTreeMap<String, Duration>,
        never: Mutex<BTreeSet<String>>,
    }

    #[async_trait]
    impl ProbeExecutor for BootProber {
        async fn check(&self, resource: &Resource, _probe: &crate::health::HealthProbe) -> HealthState {
            if self.never.lock().unwrap().contains(&resource.id) {
                return HealthState::Unhealthy;
            }
            let Some((_, at)) = self.ledger.started_at(&resource.id) else {
                return HealthState::Unhealthy;
            };
            let boot = self.boot.get(&resource.id).copied().unwrap_or_default();
            if at.elapsed() >= boot {
                let seq = self.ledger.tick();
                self.ledger
                    .healthy
                    .lock()
                    .unwrap()
                    .entry(resource.id.clone())
                    .or_insert(seq);
                HealthState::Healthy
            } else {
                HealthState::Unhealthy
            }
        }
    }

    struct Fixture {
        graph: ResourceGraph,
        handles: BTreeMap<String, ResourceHandle>,
        boot: BTreeMap<String, Duration>,
        never: BTreeSet<String>,
        failing: BTreeSet<String>,
        slow: BTreeMap<String, Duration>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                graph: ResourceGraph::new(),
                handles: BTreeMap::new(),
                boot: BTreeMap::new(),
                never: BTreeSet::new(),
                failing: BTreeSet::new(),
                slow: BTreeMap::new(),
            }
        }

        fn resource(mut self, id: &str, boot_ms: u64) -> Self {
            let h = self
                .graph
                .add_resource(id, ResourceKind::ExternalService, Lifetime::Ephemeral)
                .unwrap();
            self.graph.resource_mut(&h).unwrap().probes =
                vec![HealthProbe::ping().with_interval(Duration::from_millis(100))];
            self.boot.insert(id.into(), Duration::from_millis(boot_ms));
            self.handles.insert(id.into(), h);
            self
        }

        fn waits(mut self, from: &str, to: &str) -> Self {
            let (f, t) = (self.handles[from].clone(), self.handles[to].clone());
            self.graph.add_readiness_wait(&f, &t).unwrap();
            self
        }

        fn never_healthy(mut self, id: &str) -> Self {
            self.never.insert(id.into());
            self
        }

        fn failing(mut self, id: &str) -> Self {
            self.failing.insert(id.into());
            self
        }

        fn slow_start(mut self, id: &str, delay: Duration) -> Self {
            self.slow.insert(id.into(), delay);
            self
        }

        fn build(self) -> (Sequencer, Arc<Ledger>, Arc<BootProber>) {
            let ledger = Arc::new(Ledger::default());
            let prober = Arc::new(BootProber {
                ledger: ledger.clone(),
                boot: self.boot,
                never: Mutex::new(self.never),
            });
            let starter = Arc::new(FakeStarter {
                ledger: ledger.clone(),
                failing: self.failing,
                slow: Mutex::new(self.slow),
            });
            let sequencer = Sequencer::new(
                self.graph.finalize().unwrap(),
                starter,
                prober.clone(),
                ResolvedParameters::default(),
            )
            .with_options(SequencerOptions {
                deadline: Duration::from_secs(10),
            });
            (sequencer, ledger, prober)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_starts_in_dependency_order() {
        // a waits on b, b waits on c
        let (seq, ledger, _) = Fixture::new()
            .resource("a", 200)
            .resource("b", 200)
            .resource("c", 200)
            .waits("a", "b")
            .waits("b", "c")
            .build();

        let report = seq.run().await;
        assert!(report.is_success(), "{:?}", report);

        let (a_start, _) = ledger.started_at("a").unwrap();
        let (b_start, _) = ledger.started_at("b").unwrap();
        assert!(a_start > ledger.healthy_at("c").unwrap());
        assert!(a_start > ledger.healthy_at("b").unwrap());
        assert!(b_start > ledger.healthy_at("c").unwrap());
        seq.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_branches_start_concurrently() {
        let (seq, _, _) = Fixture::new()
            .resource("api", 1000)
            .resource("db", 1000)
            .resource("worker", 1000)
            .resource("cache", 1000)
            .waits("api", "db")
            .waits("worker", "cache")
            .build();

        let report = seq.run().await;
        assert!(report.is_success());
        // One branch takes about two boots; both in sequence would take four.
        assert!(report.elapsed >= Duration::from_millis(2000));
        assert!(report.elapsed < Duration::from_millis(3000), "{:?}", report.elapsed);
        seq.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_blocks_only_the_affected_branch() {
        let (seq, ledger, _) = Fixture::new()
            .resource("cache", 100)
            .resource("website", 100)
            .resource("db", 100)
            .resource("reporting", 100)
            .waits("website", "cache")
            .waits("reporting", "db")
            .never_healthy("cache")
            .build();

        let report = seq.run().await;

        assert_eq!(report.outcome("cache"), Some(&StartupOutcome::TimedOut));
        assert_eq!(report.outcome("website"), Some(&StartupOutcome::Blocked));
        assert_eq!(report.outcome("db"), Some(&StartupOutcome::Healthy));
        assert_eq!(report.outcome("reporting"), Some(&StartupOutcome::Healthy));
        assert_eq!(
            report.failures,
            vec![StartupError::Timeout {
                resource: "cache".into(),
                blocked: vec!["website".into()],
            }]
        );
        assert!(ledger.started_at("website").is_none());

        let graph = seq.graph();
        for id in ["cache", "website", "db", "reporting"] {
            assert_ne!(graph.health(id), Some(HealthState::Starting), "{id}");
        }
        assert_eq!(graph.health("cache"), Some(HealthState::Unhealthy));
        assert_eq!(graph.health("reporting"), Some(HealthState::Healthy));
        seq.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_settles_without_waiting_for_deadline() {
        let (seq, ledger, _) = Fixture::new()
            .resource("mongo", 100)
            .resource("articlesdb", 100)
            .resource("website", 100)
            .waits("articlesdb", "mongo")
            .waits("website", "articlesdb")
            .failing("mongo")
            .build();

        let report = seq.run().await;

        assert!(report.elapsed < Duration::from_secs(1));
        assert_eq!(
            report.failures,
            vec![StartupError::StartFailed {
                resource: "mongo".into(),
                reason: "failed to launch mongo: image not found".into(),
                blocked: vec!["articlesdb".into(), "website".into()],
            }]
        );
        assert_eq!(ledger.start_count("articlesdb"), 0);
        assert_eq!(seq.graph().health("mongo"), Some(HealthState::Unhealthy));
        seq.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_pass_does_not_restart_healthy_resources() {
        let (seq, ledger, prober) = Fixture::new()
            .resource("cache", 100)
            .resource("website", 100)
            .waits("website", "cache")
            .never_healthy("website")
            .build();

        let first = seq.run_with_deadline(Duration::from_secs(2)).await;
        assert_eq!(first.outcome("cache"), Some(&StartupOutcome::Healthy));
        assert_eq!(first.outcome("website"), Some(&StartupOutcome::TimedOut));

        // The website recovers on its own; the probe loop picks that up.
        prober.never.lock().unwrap().clear();
        let second = seq.run_with_deadline(Duration::from_secs(2)).await;

        assert_eq!(second.outcome("cache"), Some(&StartupOutcome::AlreadyHealthy));
        assert!(matches!(
            second.outcome("website"),
            Some(StartupOutcome::Healthy | StartupOutcome::AlreadyHealthy)
        ));
        assert_eq!(ledger.start_count("cache"), 1);
        assert_eq!(ledger.start_count("website"), 1);
        seq.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_restart_recovers_failed_start() {
        let (seq, ledger, _) = Fixture::new().resource("cache", 100).failing("cache").build();

        let report = seq.run().await;
        assert!(!report.is_success());
        assert_eq!(ledger.start_count("cache"), 1);

        // A second pass reports the failure again without retrying.
        let again = seq.run().await;
        assert!(matches!(
            again.outcome("cache"),
            Some(StartupOutcome::StartFailed { .. })
        ));
        assert_eq!(ledger.start_count("cache"), 1);

        assert!(seq.restart("cache").await.is_err());
        assert_eq!(ledger.start_count("cache"), 2);
        assert_eq!(seq.graph().health("cache"), Some(HealthState::Unhealthy));
        seq.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_start_cut_off_by_deadline() {
        let (seq, ledger, _) = Fixture::new()
            .resource("mongo", 100)
            .slow_start("mongo", Duration::from_secs(60))
            .build();

        let first = seq.run_with_deadline(Duration::from_secs(2)).await;
        assert_eq!(first.outcome("mongo"), Some(&StartupOutcome::TimedOut));
        assert_eq!(seq.graph().health("mongo"), Some(HealthState::Unhealthy));

        // A later pass reports the abandoned start instead of waiting on it.
        let again = seq.run_with_deadline(Duration::from_secs(2)).await;
        assert_eq!(
            again.outcome("mongo"),
            Some(&StartupOutcome::StartFailed {
                reason: "start cancelled by deadline".into()
            })
        );
        assert!(again.elapsed < Duration::from_secs(1));
        assert_eq!(ledger.start_count("mongo"), 1);

        seq.restart("mongo").await.unwrap();
        assert_eq!(ledger.start_count("mongo"), 2);
        seq.graph()
            .wait_for_healthy("mongo", Duration::from_secs(5))
            .await
            .unwrap();

        let third = seq.run_with_deadline(Duration::from_secs(2)).await;
        assert_eq!(third.outcome("mongo"), Some(&StartupOutcome::AlreadyHealthy));
        seq.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_waits_for_readiness_targets() {
        let (seq, ledger, prober) = Fixture::new()
            .resource("cache", 100)
            .resource("website", 100)
            .waits("website", "cache")
            .never_healthy("cache")
            .build();

        let report = seq.run_with_deadline(Duration::from_secs(2)).await;
        assert_eq!(report.outcome("website"), Some(&StartupOutcome::Blocked));

        let err = seq.restart("website").await.unwrap_err();
        assert_eq!(
            err,
            StartError::DependencyNotReady {
                id: "website".into(),
                dependency: "cache".into(),
            }
        );
        assert_eq!(ledger.start_count("website"), 0);
        assert_ne!(seq.graph().health("website"), Some(HealthState::Starting));

        // Once the cache recovers the restart goes through.
        prober.never.lock().unwrap().clear();
        seq.graph()
            .wait_for_healthy("cache", Duration::from_secs(5))
            .await
            .unwrap();
        seq.restart("website").await.unwrap();
        seq.graph()
            .wait_for_healthy("website", Duration::from_secs(5))
            .await
            .unwrap();

        let (website_start, _) = ledger.started_at("website").unwrap();
        assert!(website_start > ledger.healthy_at("cache").unwrap());
        seq.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_marks_resources_stopped() {
        let (seq, _, _) = Fixture::new().resource("cache", 0).build();
        let report = seq.run().await;
        assert!(report.is_success());

        seq.shutdown().await;
        assert_eq!(seq.graph().health("cache"), Some(HealthState::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parameters_are_healthy_without_starting() {
        let mut store = crate::parameter::ParameterStore::new();
        let token = store.declare("token", true).unwrap();
        let mut g = ResourceGraph::new();
        g.add_parameter(&token).unwrap();
        let ledger = Arc::new(Ledger::default());
        let seq = Sequencer::new(
            g.finalize().unwrap(),
            Arc::new(FakeStarter {
                ledger: ledger.clone(),
                failing: BTreeSet::new(),
                slow: Mutex::new(BTreeMap::new()),
            }),
            Arc::new(BootProber {
                ledger: ledger.clone(),
                boot: BTreeMap::new(),
                never: Mutex::new(BTreeSet::new()),
            }),
            ResolvedParameters::default(),
        );

        let report = seq.run().await;
        assert_eq!(report.outcome("token"), Some(&StartupOutcome::Healthy));
        assert_eq!(ledger.start_count("token"), 0);
        seq.shutdown().await;
    }
}
