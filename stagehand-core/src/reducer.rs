use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tokio::sync::broadcast;

use crate::command::{CommandResult, CommandState};
use crate::model::{HealthState, ResourceId};
use crate::sequencer::StartupError;
use crate::state::{CommandRunRecord, RuntimeState};

#[derive(Clone, Debug)]
pub enum RuntimeEvent {
    HealthChanged {
        id: ResourceId,
        state: HealthState,
    },
    CommandStateChanged {
        resource: ResourceId,
        command: String,
        state: CommandState,
    },
    CommandFinished {
        resource: ResourceId,
        command: String,
        result: CommandResult,
    },
    StartupFailed {
        error: StartupError,
    },
}

#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub id: u64,
    pub at: SystemTime,
    pub event: RuntimeEvent,
}

/// Numbered broadcast of runtime events. Cloning shares the channel and counter.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn emit(&self, event: RuntimeEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.tx.send(EventEnvelope {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            at: SystemTime::now(),
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

pub fn reduce(state: &mut RuntimeState, env: &EventEnvelope) {
    state.last_event_id = env.id;

    match &env.event {
        RuntimeEvent::HealthChanged { id, state: health } => {
            state.health.insert(id.clone(), *health);
        }
        RuntimeEvent::CommandStateChanged {
            resource,
            command,
            state: command_state,
        } => {
            state
                .commands
                .insert((resource.clone(), command.clone()), *command_state);
        }
        RuntimeEvent::CommandFinished {
            resource,
            command,
            result,
        } => {
            state.add_run(CommandRunRecord {
                event_id: env.id,
                at: env.at,
                resource: resource.clone(),
                command: command.clone(),
                result: result.clone(),
            });
        }
        RuntimeEvent::StartupFailed { error } => state.failures.push(error.clone()),
    }
}
