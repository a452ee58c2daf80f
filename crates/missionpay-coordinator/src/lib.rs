//! missionpay Coordinator - Mission orchestration
//!
//! Drives a mission's agents through the payment-gated handshake and moves
//! the mission's escrow along as it goes.
//!
//! - [`Coordinator`]: `execute_mission` plus the client/timer escrow actions
//! - [`ExecutionStrategy`]: sequential (fail-fast, context chaining) or
//!   parallel (fan-out/fan-in)
//! - [`MissionStore`] / [`ExecutionSink`]: where mission and execution status
//!   lives, and how the coordinator reports it
//! - [`callback_router`]: status callbacks from task performers
//!
//! # Invariants
//!
//! 1. Each agent assignment gets exactly one execution record
//! 2. Total paid never exceeds the budget: each agent's payment ceiling is its
//!    contracted amount, and the contracted amounts fit the budget
//! 3. In sequential mode no agent after a failed one is ever called

pub mod callback;
pub mod config;
pub mod coordinator;
pub mod sink;
pub mod store;
pub mod strategy;

pub use callback::{callback_router, CallbackError, CallbackState};
pub use config::MissionConfig;
pub use coordinator::Coordinator;
pub use sink::{ChannelSink, ExecutionSink, SinkMessage, StoreSink};
pub use store::{InMemoryMissionStore, MissionSnapshot, MissionStore};
pub use strategy::{
    run_agent, strategy_for, ExecutionStrategy, MissionContext, ParallelStrategy,
    SequentialStrategy,
};
