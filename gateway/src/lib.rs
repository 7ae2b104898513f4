// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Wallet Gateway — Core Library
//!
//! A custodial account gateway that sits in front of a ledger node. Users
//! hold a username and a password; the gateway holds their ledger address,
//! gates a rate-limited token faucet, and builds, signs, validates and
//! publishes transfers on their behalf.
//!
//! ## Architecture
//!
//! - **credentials** — Argon2id password hashing and session-token issuance.
//! - **accounts** — The persistent account store (sled), keyed by a hash
//!   of the username, with a secondary address index.
//! - **faucet** — Claim ruleset, eligibility state machine, claim engine
//!   and the faucet's own keystore.
//! - **transfer** — Turns an authenticated request into a published
//!   ledger transaction.
//! - **ledger** — The boundary to the external ledger, plus a local
//!   sled-backed implementation.
//! - **clock** — Injected time source for eligibility and token expiry.
//! - **config** — Constants and the TOML-loadable [`config::GatewayConfig`].
//! - **telemetry** — Injected tracing span and Prometheus counters.
//!
//! Every public operation returns [`GatewayResult`]. Nothing in here retries
//! on its own; retry policy belongs to whoever calls us.

pub mod accounts;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod faucet;
pub mod gateway;
pub mod ledger;
pub mod telemetry;
pub mod transfer;

pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use gateway::Gateway;
