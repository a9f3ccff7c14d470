//! Recovery Services
//!
//! Background drain of deferred durable-store writes and participant
//! session rehydration after a disconnect.

pub mod session;
pub mod worker;

pub use session::{RecoveryError, SessionRecoveryService};
pub use worker::{RecoveryWorker, WorkerConfig, WorkerConfigPatch, WorkerStats, WorkerStatus};
