//! # Radio Timebase Arithmetic
//!
//! The radio timer (RAT) is a free running 32-bit counter at 4 MHz, so every
//! comparison between two timestamps has to tolerate wraparound. Timestamps are
//! compared in microseconds (`ticks >> 2`), which keeps the difference of two
//! values inside a signed 32-bit range.
//!
//! ## Gap Classification
//!
//! A gap between the end of one command and the start of the next one is:
//!
//! - **accepted** when strictly positive and below [`DISPATCH_MAX_TIME_US`]
//!   (three quarters of the timer span);
//! - **accepted** when more negative than [`WRAPAROUND_THRESHOLD_US`], since
//!   such a value can only come from the counter wrapping between the two
//!   timestamps;
//! - **rejected** otherwise. Zero, small negative values (an overlap) and
//!   values at or beyond the ceiling (ambiguous) all fall here.

use crate::constants::{
    DISPATCH_MAX_TIME_US, RAT_TICKS_TO_US_SHIFT, RTC_CONV_TO_US_SHIFT, RTC_TICK_INC,
    SCALE_RTC_TO_4MHZ, WRAPAROUND_THRESHOLD_US,
};

/// Convert RAT ticks to microseconds
pub fn ticks_to_us(ticks: u32) -> u32 {
    ticks >> RAT_TICKS_TO_US_SHIFT
}

/// Signed gap in microseconds between `earlier_end` and `later_start`,
/// after reserving `overhead_us` for the radio to switch between them
pub fn gap_us(earlier_end: u32, later_start: u32, overhead_us: u32) -> i32 {
    let end = ticks_to_us(earlier_end) as i32;
    let start = ticks_to_us(later_start) as i32;
    start - end.wrapping_add(overhead_us as i32)
}

/// True when a gap computed by [`gap_us`] leaves room for the new command
pub fn gap_admits(delta_us: i32) -> bool {
    if delta_us >= DISPATCH_MAX_TIME_US as i32 {
        return false;
    }
    delta_us < WRAPAROUND_THRESHOLD_US || delta_us > 0
}

/// Microseconds from `now` until `start`, treating the difference as unsigned
pub fn us_until(now: u32, start: u32) -> u32 {
    start.wrapping_sub(now) >> RAT_TICKS_TO_US_SHIFT
}

/// Microseconds between two RTC samples in the 32.32 seconds format
pub fn rtc_delta_us(from: u64, to: u64) -> u32 {
    (to.wrapping_sub(from) >> RTC_CONV_TO_US_SHIFT) as u32
}

/// Convert an RTC sample to RAT ticks using the offset captured at the last
/// RAT synchronization. The RTC value is advanced by one tick so the result
/// never lags the RAT it stands in for.
pub fn rtc_to_rat(rtc: u64, rat0: u32) -> u32 {
    let ticks = (rtc.wrapping_add(RTC_TICK_INC) as u128 * SCALE_RTC_TO_4MHZ as u128)
        .wrapping_add((rat0 as u128) << 32);
    (ticks >> 32) as u32
}
