//! Health probes and the per-resource health board
//!
//! Each resource's [`HealthState`] lives in its own `watch` cell. Writers
//! publish whole values, so readers always see a complete state and can await
//! transitions instead of polling.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::graph::Resource;
use crate::model::{HealthState, ResourceId};
use crate::reducer::{EventBus, RuntimeEvent};

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// What a probe checks
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeCheck {
    /// GET `path` on the resource endpoint and compare the status code
    Http {
        path: String,
        #[serde(default = "default_expected_status")]
        expected_status: u16,
    },
    /// Protocol-level liveness ping against the resource endpoint
    Ping,
}

fn default_expected_status() -> u16 {
    200
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthProbe {
    pub check: ProbeCheck,
    pub interval: Duration,
    pub timeout: Duration,
}

impl HealthProbe {
    pub fn http(path: impl Into<String>) -> Self {
        Self {
            check: ProbeCheck::Http {
                path: path.into(),
                expected_status: default_expected_status(),
            },
            interval: DEFAULT_PROBE_INTERVAL,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn ping() -> Self {
        Self {
            check: ProbeCheck::Ping,
            interval: DEFAULT_PROBE_INTERVAL,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Runs a single probe check. Provided by the networking layer.
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    async fn check(&self, resource: &Resource, probe: &HealthProbe) -> HealthState;
}

/// Run every probe of a resource. Healthy only if all of them are.
///
/// Each check is bounded by its probe's timeout, whatever the executor does.
pub async fn probe_all(executor: &dyn ProbeExecutor, resource: &Resource) -> HealthState {
    for probe in &resource.probes {
        let state = match tokio::time::timeout(probe.timeout, executor.check(resource, probe)).await
        {
            Ok(state) => state,
            Err(_) => {
                tracing::debug!(resource = %resource.id, check = ?probe.check, "probe timed out");
                HealthState::Unhealthy
            }
        };
        if !state.is_healthy() {
            return HealthState::Unhealthy;
        }
    }
    HealthState::Healthy
}

/// Shortest interval among a resource's probes
pub fn poll_interval(resource: &Resource) -> Duration {
    resource
        .probes
        .iter()
        .map(|p| p.interval)
        .min()
        .unwrap_or(DEFAULT_PROBE_INTERVAL)
}

#[derive(Debug)]
pub struct HealthBoard {
    cells: BTreeMap<ResourceId, watch::Sender<HealthState>>,
    events: EventBus,
}

impl HealthBoard {
    pub fn new<'a>(ids: impl IntoIterator<Item = &'a ResourceId>, events: EventBus) -> Self {
        let cells = ids
            .into_iter()
            .map(|id| {
                let (tx, _) = watch::channel(HealthState::Unknown);
                (id.clone(), tx)
            })
            .collect();
        Self { cells, events }
    }

    pub fn get(&self, id: &str) -> Option<HealthState> {
        self.cells.get(id).map(|tx| *tx.borrow())
    }

    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<HealthState>> {
        self.cells.get(id).map(|tx| tx.subscribe())
    }

    /// Publish a new state. Returns whether it differed from the previous one.
    pub fn publish(&self, id: &str, state: HealthState) -> bool {
        let Some(tx) = self.cells.get(id) else {
            return false;
        };
        let changed = tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::info!(resource = %id, state = %state, "health changed");
            self.events.emit(RuntimeEvent::HealthChanged {
                id: id.to_string(),
                state,
            });
        }
        changed
    }

    pub fn snapshot(&self) -> BTreeMap<ResourceId, HealthState> {
        self.cells
            .iter()
            .map(|(id, tx)| (id.clone(), *tx.borrow()))
            .collect()
    }
}
