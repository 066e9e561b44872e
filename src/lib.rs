//! Logging and remote alerting core.
//!
//! Records are emitted into named [`logging::Channel`]s. Each channel fans out
//! to a fixed set of sinks: the console, size-rotated category files, one
//! file per entity and day, and (once started) a rate limited remote alert
//! channel fed by a background worker.

pub mod alert;
pub mod config;
pub mod http;
pub mod logging;
pub mod utils;

pub use config::{AlertConfig, Config};
pub use logging::{Channel, LogContext, LogRecord, LoggingSystem};
