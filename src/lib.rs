//! Turnstile - In-process admission control
//!
//! This crate decides, per request, whether a client may proceed. Each
//! client is held to a token-bucket burst guard and to minute, hour and day
//! sliding windows, with per-rule allow and deny lists taking precedence.
//! All state lives in a local key-value store behind the [`store::KeyValueStore`]
//! trait.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
