//! # RF Core Error Handling
//!
//! This module defines the `RfError` enum, which represents the different error
//! types that can occur in the rfcore-rs crate.
//!
//! Errors detected synchronously by the client API (bad handle, pool exhaustion,
//! schedule rejection) are returned directly. Errors detected while the radio
//! is powering up (synthesizer programming, unsupported mode) are delivered
//! through the client's error callback and never stop the scheduler.

use thiserror::Error;

/// Represents the different error types that can occur in the RF core driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RfError {
    /// The command pool has no free slot. The caller may retry once commands retire.
    #[error("Command pool exhausted")]
    AllocationExhausted,

    /// No timing slot was found and no preemption was possible.
    #[error("Command rejected by the scheduler")]
    ScheduleRejected,

    /// A direct or immediate command was attempted while the radio is powered down.
    #[error("Radio is not active")]
    RadioInactive,

    /// The radio reported busy on an immediate command.
    #[error("Radio hardware busy")]
    HardwareBusy,

    /// The chained frequency synthesizer command failed to program.
    #[error("Frequency synthesizer programming error")]
    SynthProgrammingError,

    /// The silicon does not support the requested RF mode.
    #[error("Unsupported RF mode: {0}")]
    InvalidMode(u8),

    /// An argument failed validation.
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// The command handle is not (or no longer) allocated.
    #[error("Invalid command handle: 0x{0:03X}")]
    InvalidHandle(u16),

    /// Every client slot is already in use.
    #[error("Too many clients")]
    TooManyClients,

    /// The radio is reserved by another client.
    #[error("Radio busy")]
    Busy,

    /// A direct command completed with an error status.
    #[error("Command failed with status 0x{0:02X}")]
    CommandError(u8),

    /// A blocking call did not observe its event in time.
    #[error("Timed out waiting for command events")]
    Timeout,

    /// The driver stopped before the operation finished.
    #[error("Driver shut down")]
    Shutdown,
}
