//! # Logging Utilities
//!
//! Rate limiting and payload dumps for the RF core driver.
//!
//! ## Features
//!
//! - Rate-limited logging for warnings that can repeat at interrupt rate
//! - Hex dumps of radio operation payloads at debug level
//! - Optional tracing spans around command dispatch
//!
//! ## Usage
//!
//! ```rust
//! use rfcore_rs::util::logging::LogThrottle;
//!
//! // Allow 5 messages per second
//! let mut throttle = LogThrottle::new(1000, 5);
//! if throttle.allow() {
//!     log::warn!("Command rejected by the scheduler");
//! }
//! ```

use std::time::Instant;

/// Throttling structure for rate-limiting log messages
///
/// Scheduler rejections and unexpected interrupts can repeat for every
/// command a client posts, so their warnings go through one of these.
#[derive(Debug)]
pub struct LogThrottle {
    /// Time window for throttling (in milliseconds)
    window_ms: u64,
    /// Maximum messages allowed per window
    cap: u32,
    /// Current message count in window
    count: u32,
    /// Messages suppressed since the last reset
    suppressed: u64,
    /// Start time of current window
    t0: Instant,
}

impl LogThrottle {
    /// Create new throttle with time window and message cap
    ///
    /// # Arguments
    /// * `window_ms` - Time window in milliseconds
    /// * `cap` - Maximum messages allowed per window
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            count: 0,
            suppressed: 0,
            t0: Instant::now(),
        }
    }

    /// Check if logging is allowed (resets counter after window expires)
    ///
    /// Returns `true` if the message should be logged, `false` if it
    /// should be throttled.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.t0).as_millis() as u64;

        if elapsed_ms > self.window_ms {
            self.t0 = now;
            self.count = 0;
        }

        self.count += 1;
        let allowed = self.count <= self.cap;
        if !allowed {
            self.suppressed += 1;
        }
        allowed
    }

    /// Number of messages swallowed since creation or the last reset
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Reset the throttle (start new window immediately)
    pub fn reset(&mut self) {
        self.t0 = Instant::now();
        self.count = 0;
        self.suppressed = 0;
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(1000, 5)
    }
}

/// Log a radio operation payload in hex at debug level
pub fn log_op_hex(prefix: &str, command_no: u16, payload: &[u8]) {
    const MAX_LOG_BYTES: usize = 32;

    if !log::log_enabled!(log::Level::Debug) {
        return;
    }

    let shown = &payload[..payload.len().min(MAX_LOG_BYTES)];
    let suffix = if payload.len() > MAX_LOG_BYTES {
        format!(" ... ({} bytes total)", payload.len())
    } else {
        String::new()
    };

    log::debug!("{prefix} cmd=0x{command_no:04X} payload={}{suffix}", hex::encode(shown));
}

/// Create a tracing span for a command dispatch
#[cfg(feature = "tracing")]
pub fn span_dispatch(handle: u16, command_no: u16) -> tracing::Span {
    tracing::debug_span!("rf_dispatch", handle = handle, command_no = command_no)
}

/// Fallback span creation when tracing is not available
#[cfg(not(feature = "tracing"))]
pub fn span_dispatch(_handle: u16, _command_no: u16) {}

/// Log a warning with throttling
#[macro_export]
macro_rules! log_warn_throttled {
    ($throttle:expr, $($arg:tt)*) => {
        if $throttle.allow() {
            log::warn!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_throttle_basic() {
        let mut throttle = LogThrottle::new(1000, 3);

        assert!(throttle.allow());
        assert!(throttle.allow());
        assert!(throttle.allow());

        assert!(!throttle.allow());
        assert!(!throttle.allow());
        assert_eq!(throttle.suppressed(), 2);
    }

    #[test]
    fn test_log_throttle_reset() {
        let mut throttle = LogThrottle::new(1000, 2);

        assert!(throttle.allow());
        assert!(throttle.allow());
        assert!(!throttle.allow());

        throttle.reset();
        assert_eq!(throttle.suppressed(), 0);
        assert!(throttle.allow());
        assert!(throttle.allow());
        assert!(!throttle.allow());
    }

    #[test]
    fn test_log_op_hex_handles_long_payload() {
        let payload = vec![0xA5u8; 100];
        log_op_hex("test", 0x3801, &payload);
        log_op_hex("test", 0x3801, &[]);
    }
}
