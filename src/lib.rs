//! Payment facilitator for the [x402 protocol](https://www.x402.org).
//!
//! This crate verifies and settles signed, non-custodial transfer authorizations
//! across two blockchain families: EVM chains (ERC-3009 `transferWithAuthorization`
//! with EIP-712 signatures) and SVM chains (partially signed SPL token transfers
//! submitted with the facilitator as fee payer). Clients sign payment payloads
//! off-line; merchants relay them here; the facilitator decides whether a payload
//! meets the declared requirements and, on settlement, submits it on-chain and
//! reports the outcome.
//!
//! # Modules
//!
//! - [`chain`] — EVM and SVM providers over their respective RPC stacks.
//! - [`config`] — Environment-driven runtime configuration.
//! - [`discovery`] — Catalog of merchant resources observed through settlements.
//! - [`facilitator`] — The [`Facilitator`](facilitator::Facilitator) trait.
//! - [`facilitator_local`] — The scheme+network router over configured providers.
//! - [`handlers`] — HTTP endpoint handlers (verify, settle, supported, discovery).
//! - [`network`] — Supported networks, capabilities, and known token deployments.
//! - [`nonce`] — Per-wallet transaction nonce registry with chain re-sync.
//! - [`provider_cache`] — Provider construction per configured network.
//! - [`scheduler`] — Background gas-balance and wallet-health loops.
//! - [`scheme`] — The `exact` payment scheme for both chain families.
//! - [`timestamp`] — Unix timestamp type for authorization windows.
//! - [`types`] — Protocol wire types and the error-reason taxonomy.
//! - [`wallet_pool`] — Pool of EVM signing identities with health tracking.

pub mod chain;
pub mod config;
pub mod discovery;
pub mod facilitator;
pub mod facilitator_local;
pub mod handlers;
pub mod network;
pub mod nonce;
pub mod provider_cache;
pub mod scheduler;
pub mod scheme;
pub mod sig_down;
pub mod telemetry;
pub mod timestamp;
pub mod types;
pub mod util;
pub mod wallet_pool;
