//! missionpay Types - Canonical domain types for escrow-funded agent missions
//!
//! This crate contains all foundational types for missionpay with zero
//! dependencies on other missionpay crates. It defines:
//!
//! - Identity types (MissionId, AgentId, AccountId, TxHash, ...)
//! - Token amounts and basis-point splits
//! - Missions, agent assignments and execution records
//! - Payment requests and payment proofs for the payment-gated handshake
//! - Escrow states and their legal transitions
//! - The shared error taxonomy
//!
//! # Invariants
//!
//! 1. Total paid across execution records never exceeds the mission budget
//! 2. Each agent assignment has exactly one execution record
//! 3. Escrow status only moves along legal transitions
//! 4. A payment proof is accepted only if it exactly matches its request

pub mod identity;
pub mod amount;
pub mod clock;
pub mod mission;
pub mod payment;
pub mod escrow;
pub mod task;
pub mod error;

pub use identity::*;
pub use amount::*;
pub use clock::*;
pub use mission::*;
pub use payment::*;
pub use escrow::*;
pub use task::*;
pub use error::*;

/// Version of the missionpay types schema
pub const TYPES_VERSION: &str = "0.1.0";
