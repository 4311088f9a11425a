//! # wfsm-timer
//!
//! Timed transitions for wfsm.
//!
//! This crate provides:
//! - [`TimedEventScheduler`]: periodic scan of the store for due entities
//! - [`TimedEventDispatcher`]: feeds the resulting timer events back into
//!   each entity's processing path
//! - [`TimerService`]: runs both for one workflow
//! - YAML and environment configuration for the daemon

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod scheduler;
pub mod service;

pub use config::{Config, ConfigError, SchedulerConfig, StorageConfig};
pub use dispatcher::{DispatcherStats, TimedEventDispatcher};
pub use error::TimerError;
pub use scheduler::{SchedulerStats, TimedEventScheduler, TimerDispatch};
pub use service::TimerService;
