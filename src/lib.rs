//! Tripguard - request guardrails for agent and tool-calling routes
//!
//! Every agent route passes through the same cross-cutting checks before and
//! during a model call:
//!
//! - [`provider`]: pick the upstream model provider and credential path
//! - [`ratelimit`]: per-route, per-caller admission on a shared counter store
//! - [`cache`]: canonical cache keys and tag-versioned invalidation for tool results
//! - [`retry`]: jittered exponential backoff for outbound HTTP calls
//!
//! Every guardrail backed by the key-value store degrades to a safe default
//! when the store is missing or failing.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod middleware;
pub mod provider;
pub mod ratelimit;
pub mod retry;
pub mod store;
pub mod telemetry;
