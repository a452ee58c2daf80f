//! missionpay Protocol - The payment-gated task handshake
//!
//! Payer side:
//!
//! - [`PaymentSigner`] / [`SignerHandle`]: the single sequenced queue through
//!   which every payment from the shared credential flows
//! - [`TaskClient`]: request, 402, pay, retry exactly once
//! - [`AgentTransport`]: HTTP via `reqwest`, or in-process `axum` routers
//!
//! Payee side:
//!
//! - [`ProofVerifier`]: re-fetches the transaction and checks every field
//! - [`SessionStore`]: bounded replay protection
//! - [`paywall`] / [`agent_router`]: `axum` middleware and task service

pub mod agent;
pub mod client;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod paywall;
pub mod session;
pub mod signer;
pub mod transport;
pub mod verify;

pub use agent::{agent_router, FnHandler, TaskHandler};
pub use client::{AgentCaller, TaskClient, TaskOutcome, DEFAULT_TASK_TIMEOUT};
pub use codec::{decode_header, encode_header};
pub use crypto::{hash_object, hash_sha256, verify_signature, Keypair};
pub use error::{ProofError, ProtocolError, Result, SessionError, TransportError};
pub use paywall::{paywall, require_payment, PaymentGate};
pub use session::{BoundedSessionStore, SessionStore, DEFAULT_SESSION_CAPACITY};
pub use signer::{PaymentSigner, SignerHandle};
pub use transport::{AgentReply, AgentTransport, HttpTransport, RouterTransport};
pub use verify::{ProofVerifier, DEFAULT_FRESHNESS_SECS};
