pub mod config;
pub mod model;
pub mod reducer;
pub mod state;

// Declaration and wiring
pub mod graph;
pub mod parameter;

// Startup
pub mod adapter;
pub mod health;
pub mod sequencer;

// Operator commands
pub mod clear_cache;
pub mod command;
