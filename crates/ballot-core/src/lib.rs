//! ballot-core: transaction sessions for an on-chain election contract
//!
//! This crate builds, signs and broadcasts calls to the election contract,
//! remembers the last session of every flow, and follows each session's
//! status until it is confirmed, failed or cancelled.
//!
//! # Architecture
//!
//! ```text
//! ElectionClient ─ submit ─▶ TransactionSubmitter ─▶ Signer ─▶ Gateway
//!       │                          │
//!       │ set(type, id)            └─▶ SessionRegistry ◀─┐
//!       ▼                                                 │
//!  SessionStore            StatusTracker ─ poll ─▶ ChainStatusSource
//! ```
//!
//! # Modules
//!
//! - `session`: Session types, ids and the flow → session store
//! - `registry`: Local record of submitted sessions and their hashes
//! - `submitter`: Build, sign and broadcast one contract call
//! - `tracker`: Status state machine, live feeds and the terminal ledger
//! - `codec`: Typed arguments and view-result decoding
//! - `contract`: Election endpoints, views and result types
//! - `transaction`: Transaction wire types
//! - `gateway`: Network provider trait and HTTP implementation
//! - `signer`: Wallet/signer trait
//! - `client`: Per-flow election client
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//! - `wait`: Wait-for utilities (no fixed sleeps)
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod client;
pub mod codec;
pub mod config;
pub mod contract;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod registry;
pub mod session;
pub mod signer;
pub mod submitter;
pub mod tracker;
pub mod transaction;
pub mod wait;

pub use client::{BallotContext, ElectionClient};
pub use error::{Error, Result};
pub use session::{SessionId, SessionStore, SessionType};
pub use tracker::{StatusFeed, StatusTracker, TransactionStatus};

/// Version of the ballot-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
