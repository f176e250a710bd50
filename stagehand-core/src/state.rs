use std::collections::{BTreeMap, VecDeque};
use std::time::SystemTime;

use crate::command::{CommandResult, CommandState};
use crate::model::{HealthState, ResourceId};
use crate::sequencer::StartupError;

/// Maximum number of command runs to keep in history
const MAX_RUNS: usize = 200;

#[derive(Clone, Debug)]
pub struct CommandRunRecord {
    pub event_id: u64,
    pub at: SystemTime,
    pub resource: ResourceId,
    pub command: String,
    pub result: CommandResult,
}

/// Snapshot of the orchestrator as seen through its event stream
#[derive(Debug, Default)]
pub struct RuntimeState {
    pub health: BTreeMap<ResourceId, HealthState>,
    pub commands: BTreeMap<(ResourceId, String), CommandState>,
    pub failures: Vec<StartupError>,
    pub last_event_id: u64,
    /// Most recent first
    runs: VecDeque<CommandRunRecord>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command run to history (maintains MAX_RUNS limit)
    pub fn add_run(&mut self, run: CommandRunRecord) {
        self.runs.push_front(run);
        while self.runs.len() > MAX_RUNS {
            self.runs.pop_back();
        }
    }

    /// Get runs in order (most recent first)
    pub fn runs_ordered(&self) -> Vec<&CommandRunRecord> {
        self.runs.iter().collect()
    }

    pub fn health_of(&self, id: &str) -> HealthState {
        self.health.get(id).copied().unwrap_or_default()
    }
}
