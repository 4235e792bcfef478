//! Unit tests for the `RfError` enum and its associated `Display` trait implementation.

use rfcore_rs::error::RfError;

/// Tests that the `AllocationExhausted` variant is correctly formatted.
#[test]
fn test_allocation_exhausted() {
    let err = RfError::AllocationExhausted;
    assert_eq!(err.to_string(), "Command pool exhausted");
}

/// Tests that the `ScheduleRejected` variant is correctly formatted.
#[test]
fn test_schedule_rejected() {
    let err = RfError::ScheduleRejected;
    assert_eq!(err.to_string(), "Command rejected by the scheduler");
}

/// Tests that the `InvalidMode` variant carries the mode number.
#[test]
fn test_invalid_mode_error() {
    let err = RfError::InvalidMode(4);
    assert_eq!(err.to_string(), "Unsupported RF mode: 4");
}

/// Tests that the `InvalidHandle` variant is printed as a three digit hex handle.
#[test]
fn test_invalid_handle_error() {
    let err = RfError::InvalidHandle(0x2A);
    assert_eq!(err.to_string(), "Invalid command handle: 0x02A");
}

/// Tests that the `CommandError` variant shows the status byte.
#[test]
fn test_command_error() {
    let err = RfError::CommandError(0x85);
    assert_eq!(err.to_string(), "Command failed with status 0x85");
}

/// Tests that the `InvalidParams` variant includes the message.
#[test]
fn test_invalid_params_error() {
    let err = RfError::InvalidParams("RAT channel 7 not allocated".to_string());
    assert_eq!(
        err.to_string(),
        "Invalid parameters: RAT channel 7 not allocated"
    );
}

/// Tests that errors compare by value so callers can match on them.
#[test]
fn test_errors_compare_by_value() {
    assert_eq!(RfError::RadioInactive, RfError::RadioInactive.clone());
    assert_ne!(RfError::Timeout, RfError::Shutdown);
    assert_eq!(RfError::SynthProgrammingError.to_string(), "Frequency synthesizer programming error");
}
