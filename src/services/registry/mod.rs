//! Registry engine
//!
//! This module contains the in-process registry split into logical components:
//! - `service`: the registry driver and CRUD/fetch operations
//! - `guard`: self-preservation renew counters
//! - `evict`: periodic eviction cycle and background driver
//! - `poll`: long-poll waiting connections and broadcast
//! - `scheduler`: scheduler metadata attached to fetch results

pub mod error;
pub mod evict;
pub mod guard;
pub mod poll;
pub mod scheduler;
pub mod service;
pub mod types;

pub use error::RegistryError;
pub use guard::Guard;
pub use scheduler::{Scheduler, StaticScheduler};
pub use service::Registry;
pub use types::{GuardStats, PollPayload, PollReceiver, PollResult, RegistryConfig};
