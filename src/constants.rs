//! RF Core Driver Constants
//!
//! Timing, capacity and timebase constants used by the command scheduler and
//! the power state machine. Times are in microseconds unless the name says
//! otherwise; radio timer (RAT) values run at 4 MHz.

/// Maximum number of concurrently open clients in the multi-client variant
pub const N_MAX_CLIENTS: usize = 2;

/// Capacity of the command pool
pub const N_CMD_POOL: usize = 8;

/// Command handles are sequence numbers modulo this mask + 1
pub const CMD_HANDLE_MODMASK: u16 = 0x0FFF;

/// Longest op chain walked when looking for implicit synthesizer commands
pub const MAX_CHAIN_LEN: usize = 32;

/// RAT ticks per microsecond
pub const RAT_TICKS_PER_US: u32 = 4;

/// Shift converting RAT ticks to microseconds
pub const RAT_TICKS_TO_US_SHIFT: u32 = 2;

/// RAT frequency used when converting RTC time to RAT ticks
pub const SCALE_RTC_TO_4MHZ: u64 = 4_000_000;

/// One 32 kHz RTC tick expressed in the 32.32 RTC format
pub const RTC_TICK_INC: u64 = 0x1_0000_0000 / 32_768;

/// Shift converting the 32.32 RTC format to (approximate) microseconds
pub const RTC_CONV_TO_US_SHIFT: u32 = 12;

/// Largest representable span of the RAT in microseconds (2^30 - 1)
pub const MAX_TIME_US: u32 = u32::MAX / RAT_TICKS_PER_US;

/// Gaps at or beyond three quarters of the RAT span are ambiguous and rejected
pub const DISPATCH_MAX_TIME_US: u32 = MAX_TIME_US * 3 / 4;

/// Gaps more negative than this are taken as a timer wrap, not an overlap
pub const WRAPAROUND_THRESHOLD_US: i32 = DISPATCH_MAX_TIME_US as i32 - MAX_TIME_US as i32;

/// Default powerup duration estimate
pub const DEFAULT_POWER_UP_TIME_US: u32 = 2500;

/// Lowest measured powerup duration accepted as plausible
pub const MIN_POWER_UP_TIME_US: u32 = 500;

/// Margin added to every measured powerup duration
pub const DEFAULT_POWER_UP_MARGIN_US: u32 = 314;

/// Time budgeted for a full power-down sequence
pub const POWER_DOWN_TIME_US: u32 = 1000;

/// Extra powerup time when the analog configuration is rewritten
pub const ANALOG_CFG_TIME_US: u32 = 96;

/// Default cost of switching the radio between two clients
pub const DEFAULT_PHY_SWITCHING_TIME_US: u32 = 500;

/// Default tolerated RAT/RTC drift before a resync is forced
pub const DEFAULT_RAT_RTC_ERR_TOL_US: u32 = 5;

/// Combined crystal drift expressed as a shift on the error tolerance
pub const COMB_XTAL_DRIFT_BITS_SHIFT: u32 = 11;

/// Poll period while waiting for the high frequency crystal
pub const XOSC_HF_SWITCH_CHECK_PERIOD_US: u32 = 50;

/// Poll period while waiting for a background command to start
pub const BG_CMD_START_CHECK_PERIOD_US: u32 = 50;

/// Window in which a standby wakeup is taken as the radio's own wakeup
pub const WAKEUP_DETECTION_WINDOW_US: u32 = 100;

/// Longest access window a client may request, in microseconds
pub const REQ_ACCESS_MAX_DUR_US: u32 = 1_000_000;

/// Available RAT channel map before the firmware has been queried
pub const DEFAULT_AVAIL_RAT_CH: u16 = 0xFFFF;

/// First RAT channel handed to applications
pub const RAT_CH_OFFSET: u8 = 5;

/// Number of RAT channels handed to applications
pub const RAT_CH_MAX: u8 = 3;

/// Bit position of RAT channel 0 in the hardware interrupt flags
pub const RAT_CH0_HW_BIT: u32 = 12;

/// Default timeout of the blocking client calls
pub const DEFAULT_PEND_TIMEOUT_MS: u64 = 10_000;

/// Default depth of the FSM transition history
pub const DEFAULT_FSM_TRACE_DEPTH: usize = 32;
