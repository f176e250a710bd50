//! Line-based operator console for `stagehand up`

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use stagehand_core::command::{CommandRegistry, CommandResult, InvocationRequest};
use stagehand_core::sequencer::Sequencer;
use stagehand_core::state::RuntimeState;

use crate::prompt::{InputLines, ask};

const HELP: &str = "\
commands:
  invoke <resource> <command> [--yes]   run a resource command
  commands                              list registered commands and their state
  state                                 health of every resource and recent runs
  restart <resource>                    start a resource again
  quit                                  stop everything and exit";

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Invoke {
        resource: String,
        command: String,
        confirmed: bool,
    },
    Commands,
    State,
    Restart {
        resource: String,
    },
    Help,
    Quit,
}

/// `Ok(None)` for blank lines
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((head, rest)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (*head, rest) {
        ("invoke", [resource, command]) => ConsoleCommand::Invoke {
            resource: resource.to_string(),
            command: command.to_string(),
            confirmed: false,
        },
        ("invoke", [resource, command, "--yes" | "-y"]) => ConsoleCommand::Invoke {
            resource: resource.to_string(),
            command: command.to_string(),
            confirmed: true,
        },
        ("invoke", _) => return Err("usage: invoke <resource> <command> [--yes]".into()),
        ("commands", []) => ConsoleCommand::Commands,
        ("state", []) => ConsoleCommand::State,
        ("restart", [resource]) => ConsoleCommand::Restart {
            resource: resource.to_string(),
        },
        ("restart", _) => return Err("usage: restart <resource>".into()),
        ("help" | "?", _) => ConsoleCommand::Help,
        ("quit" | "exit", _) => ConsoleCommand::Quit,
        (other, _) => return Err(format!("unknown command '{}', try 'help'", other)),
    };
    Ok(Some(command))
}

pub struct Console {
    pub sequencer: Arc<Sequencer>,
    pub registry: Arc<CommandRegistry>,
    pub state: Arc<Mutex<RuntimeState>>,
    pub input: InputLines,
}

impl Console {
    /// Read commands until `quit`, EOF or `shutdown`.
    pub async fn run(&self, shutdown: CancellationToken) {
        println!("{}", HELP);
        loop {
            let line = tokio::select! {
                line = ask(&self.input, "stagehand> ") => line,
                _ = shutdown.cancelled() => return,
            };
            let Some(line) = line else {
                return;
            };
            match parse(&line) {
                Ok(Some(ConsoleCommand::Quit)) => return,
                Ok(Some(command)) => self.execute(command).await,
                Ok(None) => {}
                Err(message) => eprintln!("{}", message),
            }
        }
    }

    async fn execute(&self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Invoke {
                resource,
                command,
                confirmed,
            } => self.invoke(resource, command, confirmed).await,
            ConsoleCommand::Commands => {
                for (resource, name) in self.registry.keys() {
                    let state = self
                        .registry
                        .derive_state(&resource, &name)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|e| e.to_string());
                    let display = self
                        .registry
                        .descriptors(&resource)
                        .into_iter()
                        .find(|d| d.name == name)
                        .map(|d| d.display_name)
                        .unwrap_or_default();
                    println!("  {:<16} {:<16} {:<20} {}", resource, name, display, state);
                }
            }
            ConsoleCommand::State => self.print_state(),
            ConsoleCommand::Restart { resource } => {
                match self.sequencer.restart(&resource).await {
                    Ok(()) => println!("restarted {}", resource),
                    Err(e) => eprintln!("{}", e),
                }
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => {}
        }
    }

    async fn invoke(&self, resource: String, command: String, confirmed: bool) {
        let mut request = InvocationRequest {
            resource,
            command,
            confirmed,
        };
        let mut response = self.registry.handle(request.clone()).await;

        if let Some(prompt) = &response.confirmation {
            let answer = ask(&self.input, &format!("{} [y/N] ", prompt)).await;
            if !matches!(answer.as_deref(), Some("y" | "Y" | "yes")) {
                println!("cancelled");
                return;
            }
            request.confirmed = true;
            response = self.registry.handle(request).await;
        }

        match (&response.result, &response.error) {
            (Some(CommandResult::Success { message }), _) => println!(
                "✓ {} on {}{}",
                response.command,
                response.resource,
                message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default()
            ),
            (Some(CommandResult::Failure { reason }), _) => {
                eprintln!("✗ {} on {}: {}", response.command, response.resource, reason)
            }
            (None, Some(error)) => eprintln!("{}", error),
            (None, None) => {}
        }
        if let Some(state) = response.state {
            println!("  command is now {}", state);
        }
    }

    fn print_state(&self) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let graph = self.sequencer.graph();
        for resource in graph.resources() {
            let health = state.health_of(&resource.id);
            println!("  {} {:<20} {:<16} {}", health.icon(), resource.id, resource.kind.label(), health);
        }
        for failure in &state.failures {
            println!("  ! {}", failure);
        }
        for run in state.runs_ordered().into_iter().take(5) {
            let outcome = match &run.result {
                CommandResult::Success { .. } => "ok".to_string(),
                CommandResult::Failure { reason } => format!("failed: {}", reason),
            };
            println!("  #{} {} {} {}", run.event_id, run.resource, run.command, outcome);
        }
    }
}
