//! Quizdeck Server
//!
//! Storage and resilience core of the realtime quiz backend: circuit
//! breaking, cache fallback, write-behind answer batching, pending-write
//! recovery, and session rehydration.

pub mod alerts;
pub mod api;
pub mod batcher;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod observability;
pub mod recovery;
pub mod sanitize;
pub mod store;
