//! # Utility Modules
//!
//! Common helpers used throughout the rfcore-rs crate.

pub mod logging;

pub use logging::{log_op_hex, LogThrottle};
