//! # RF Core Client Types
//!
//! Value types exchanged between clients and the RF core driver: command
//! handles, priorities, event masks, radio operations and per-client
//! parameters.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use rfcore_rs::rfcore::mailbox::CMD_FS;
//! use rfcore_rs::rfcore::types::{EventMask, Priority, RadioOp, StartTrigger};
//!
//! // A synthesizer command that starts at an absolute radio timer value
//! let op = Arc::new(RadioOp::new(CMD_FS).with_trigger(StartTrigger::at(40_000)));
//! assert_eq!(op.start_time(), Some(40_000));
//!
//! let interest = EventMask::TX_DONE | EventMask::LAST_CMD_DONE;
//! assert!(interest.contains(EventMask::TX_DONE));
//! assert!(Priority::Highest > Priority::High);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::constants::{
    CMD_HANDLE_MODMASK, DEFAULT_POWER_UP_MARGIN_US, DEFAULT_POWER_UP_TIME_US, MAX_CHAIN_LEN,
};
use crate::error::RfError;
use crate::rfcore::mailbox::op_status;

/// Public handle of a posted command, a sequence number modulo 4096
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CmdHandle(pub(crate) u16);

impl CmdHandle {
    /// Build a handle from a raw sequence number
    pub fn new(seq: u16) -> Self {
        CmdHandle(seq & CMD_HANDLE_MODMASK)
    }

    /// Raw handle value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for CmdHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:03X}", self.0)
    }
}

/// Identifier of an open client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub(crate) u8);

impl ClientId {
    /// Identifier of the client in slot `index`
    pub fn new(index: u8) -> Self {
        ClientId(index)
    }

    /// Slot index of the client
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client{}", self.0)
    }
}

/// Command priority used by the scheduler when clients compete for the radio
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    /// Never preempts
    #[default]
    Normal = 0,
    /// Preempts lower priority commands with a graceful stop
    High = 1,
    /// Preempts lower priority commands with an abort
    Highest = 2,
}

bitflags! {
    /// Command and client events
    ///
    /// The low 32 bits mirror the command processor interrupt flags, bits
    /// 32..48 mirror the radio hardware interrupt flags, and the top byte holds
    /// events synthesized by the driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u64 {
        /// A radio operation finished
        const CMD_DONE = 1 << 0;
        /// The command (chain) finished
        const LAST_CMD_DONE = 1 << 1;
        /// A foreground operation finished
        const FG_CMD_DONE = 1 << 2;
        /// The last foreground operation finished
        const LAST_FG_CMD_DONE = 1 << 3;
        /// Packet transmitted
        const TX_DONE = 1 << 4;
        /// Packet received with CRC ok
        const RX_OK = 1 << 16;
        /// Packet received with CRC error
        const RX_NOK = 1 << 17;
        /// An RX queue entry was completed
        const RX_ENTRY_DONE = 1 << 23;
        /// Internal radio firmware error
        const INTERNAL_ERROR = 1 << 31;
        /// Modem software event
        const MDM_SOFT = 1 << 37;
        /// The radio became free for the client
        const RADIO_FREE = 1 << 55;
        /// The command was preempted by another client
        const CMD_PREEMPTED = 1 << 56;
        /// Asynchronous error
        const ERROR = 1 << 57;
        /// The radio finished powering up
        const POWER_UP = 1 << 58;
        /// A RAT channel fired
        const RAT_CH = 1 << 59;
        /// The command was removed before it started
        const CMD_CANCELLED = 1 << 60;
        /// The command was aborted while running
        const CMD_ABORTED = 1 << 61;
        /// The command was stopped gracefully while running
        const CMD_STOPPED = 1 << 62;

        const _ = !0;
    }
}

impl Default for EventMask {
    fn default() -> Self {
        EventMask::empty()
    }
}

impl EventMask {
    /// Bits a client cannot subscribe to; they are delivered unconditionally
    /// or produced by the driver itself.
    pub const INTERNAL: EventMask = EventMask::from_bits_retain(0xFFFF_FFDF_6000_1002);

    /// Events ending a blocking `run_cmd`
    pub const TERMINAL: EventMask = EventMask::LAST_CMD_DONE
        .union(EventMask::CMD_ABORTED)
        .union(EventMask::CMD_STOPPED)
        .union(EventMask::CMD_CANCELLED);

    /// Command processor interrupt bits of the mask
    pub fn cpe_bits(&self) -> u32 {
        (self.bits() & 0xFFFF_FFFF) as u32
    }

    /// Hardware interrupt bits of the mask
    pub fn hw_bits(&self) -> u32 {
        ((self.bits() >> 32) & 0xFFFF) as u32
    }

    /// Lift hardware interrupt bits into the event mask
    pub fn from_hw_bits(bits: u32) -> EventMask {
        EventMask::from_bits_retain((bits as u64 & 0xFFFF) << 32)
    }
}

/// When a radio operation starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartTrigger {
    /// As soon as the radio reaches it
    #[default]
    Now,
    /// At an absolute RAT time (4 MHz ticks)
    AbsTime {
        /// Start time
        time: u32,
        /// Start immediately if the time has already passed
        past_trig: bool,
    },
}

impl StartTrigger {
    /// Absolute start without past-trigger tolerance
    pub fn at(time: u32) -> Self {
        StartTrigger::AbsTime {
            time,
            past_trig: false,
        }
    }
}

/// A radio operation as handed to the doorbell
///
/// The payload is opaque to the driver. Status and result words are written
/// back by the radio, so operations are shared through `Arc`.
pub struct RadioOp {
    command_no: u16,
    trigger: StartTrigger,
    payload: Bytes,
    status: AtomicU16,
    result: AtomicU32,
    next: Option<Arc<RadioOp>>,
}

impl RadioOp {
    /// New operation with an empty payload and an immediate start
    pub fn new(command_no: u16) -> Self {
        Self {
            command_no,
            trigger: StartTrigger::Now,
            payload: Bytes::new(),
            status: AtomicU16::new(op_status::IDLE),
            result: AtomicU32::new(0),
            next: None,
        }
    }

    /// Set the opaque payload
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Set the start trigger
    pub fn with_trigger(mut self, trigger: StartTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Chain another operation after this one
    pub fn then(mut self, next: Arc<RadioOp>) -> Self {
        self.next = Some(next);
        self
    }

    pub fn command_no(&self) -> u16 {
        self.command_no
    }

    pub fn trigger(&self) -> StartTrigger {
        self.trigger
    }

    /// Absolute start time, if any
    pub fn start_time(&self) -> Option<u32> {
        match self.trigger {
            StartTrigger::AbsTime { time, .. } => Some(time),
            StartTrigger::Now => None,
        }
    }

    /// True when an absolute start may be in the past
    pub fn past_trig(&self) -> bool {
        matches!(self.trigger, StartTrigger::AbsTime { past_trig: true, .. })
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn next(&self) -> Option<&Arc<RadioOp>> {
        self.next.as_ref()
    }

    /// Status word last written by the radio
    pub fn status(&self) -> u16 {
        self.status.load(Ordering::Acquire)
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::Release);
    }

    /// Output word last written by the radio
    pub fn result(&self) -> u32 {
        self.result.load(Ordering::Acquire)
    }

    pub fn set_result(&self, value: u32) {
        self.result.store(value, Ordering::Release);
    }

    /// The operation followed by its chained operations, bounded in length
    pub fn chain(self: &Arc<Self>) -> Vec<Arc<RadioOp>> {
        let mut ops = vec![Arc::clone(self)];
        let mut cursor = self.next.clone();
        while let Some(op) = cursor {
            if ops.len() >= MAX_CHAIN_LEN {
                break;
            }
            cursor = op.next.clone();
            ops.push(op);
        }
        ops
    }

    /// Copy of this operation alone, with fresh status
    pub fn duplicate(&self) -> RadioOp {
        RadioOp {
            command_no: self.command_no,
            trigger: self.trigger,
            payload: self.payload.clone(),
            status: AtomicU16::new(op_status::IDLE),
            result: AtomicU32::new(0),
            next: None,
        }
    }
}

impl fmt::Debug for RadioOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadioOp")
            .field("command_no", &format_args!("0x{:04X}", self.command_no))
            .field("trigger", &self.trigger)
            .field("status", &format_args!("0x{:04X}", self.status()))
            .field("payload_len", &self.payload.len())
            .field("chained", &self.next.is_some())
            .finish()
    }
}

/// Scheduling parameters of `schedule_cmd`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleParams {
    /// Priority against the other client
    pub priority: Priority,
    /// Absolute end time (RAT ticks); `None` when open ended
    pub end_time: Option<u32>,
    /// Run as an IEEE 802.15.4 background command
    pub background: bool,
}

/// RF modes of the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RfModeKind {
    Ble = 0,
    Ieee154 = 1,
    Proprietary2G4 = 2,
    ProprietarySub1G = 3,
    Multiple = 5,
}

impl RfModeKind {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Radio mode descriptor of a client, including its firmware patches
#[derive(Debug, Clone)]
pub struct RfMode {
    /// Mode latched into the radio before power-up
    pub kind: RfModeKind,
    /// Command processor patch image
    pub cpe_patch: Option<Bytes>,
    /// Modem patch image
    pub mce_patch: Option<Bytes>,
    /// RF engine patch image
    pub rfe_patch: Option<Bytes>,
}

impl RfMode {
    /// Mode without patches
    pub fn new(kind: RfModeKind) -> Self {
        Self {
            kind,
            cpe_patch: None,
            mce_patch: None,
            rfe_patch: None,
        }
    }

    /// True when the modem or RF engine must be patched
    pub fn has_ram_patches(&self) -> bool {
        self.mce_patch.is_some() || self.rfe_patch.is_some()
    }
}

/// Setup command of a client, chained in front of every power-up
#[derive(Debug, Clone)]
pub struct RadioSetup {
    pub op: Arc<RadioOp>,
}

impl RadioSetup {
    pub fn new(op: RadioOp) -> Self {
        Self { op: Arc::new(op) }
    }
}

/// How the analog part of the setup command is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogCfg {
    /// Rewrite the analog configuration
    Update,
    /// Keep the analog configuration from the previous power-up
    NoUpdate,
}

bitflags! {
    /// Client events a client can subscribe to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ClientEventMask: u32 {
        /// The radio switched to this client
        const SWITCH_CLIENT_ENTERED = 1 << 0;
        /// The radio became available after a reject or preemption
        const RADIO_FREE = 1 << 1;
    }
}

impl Default for ClientEventMask {
    fn default() -> Self {
        ClientEventMask::empty()
    }
}

/// Client events delivered through the client event callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    SwitchClientEntered,
    RadioFree,
}

impl ClientEvent {
    pub fn mask(&self) -> ClientEventMask {
        match self {
            ClientEvent::SwitchClientEntered => ClientEventMask::SWITCH_CLIENT_ENTERED,
            ClientEvent::RadioFree => ClientEventMask::RADIO_FREE,
        }
    }
}

/// Command completion and intermediate events
pub type CmdCallback = Arc<dyn Fn(ClientId, CmdHandle, EventMask) + Send + Sync>;
/// Asynchronous errors of a client
pub type ErrorCallback = Arc<dyn Fn(ClientId, Option<CmdHandle>, &RfError) + Send + Sync>;
/// Power up and radio free notifications
pub type PowerCallback = Arc<dyn Fn(ClientId, EventMask) + Send + Sync>;
/// Client events (switches, radio free)
pub type ClientEventCallback = Arc<dyn Fn(ClientId, ClientEvent) + Send + Sync>;
/// RAT channel events
pub type RatCallback = Arc<dyn Fn(ClientId, u8, EventMask) + Send + Sync>;

/// Per-client parameters given to `open`
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RfParams {
    /// Time the radio stays on after the last command; `None` keeps it on
    pub inactivity_timeout_us: Option<u32>,
    /// Initial powerup duration estimate
    pub power_up_duration_us: u32,
    /// Margin added to measured powerup durations
    pub power_up_duration_margin_us: u32,
    /// Keep the high frequency crystal on between power cycles
    pub power_up_xosc: bool,
    /// Client events to deliver
    pub client_event_mask: ClientEventMask,
    #[serde(skip)]
    pub error_callback: Option<ErrorCallback>,
    #[serde(skip)]
    pub power_callback: Option<PowerCallback>,
    #[serde(skip)]
    pub client_event_callback: Option<ClientEventCallback>,
}

impl Default for RfParams {
    fn default() -> Self {
        Self {
            inactivity_timeout_us: None,
            power_up_duration_us: DEFAULT_POWER_UP_TIME_US,
            power_up_duration_margin_us: DEFAULT_POWER_UP_MARGIN_US,
            power_up_xosc: true,
            client_event_mask: ClientEventMask::empty(),
            error_callback: None,
            power_callback: None,
            client_event_callback: None,
        }
    }
}

impl fmt::Debug for RfParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RfParams")
            .field("inactivity_timeout_us", &self.inactivity_timeout_us)
            .field("power_up_duration_us", &self.power_up_duration_us)
            .field("power_up_duration_margin_us", &self.power_up_duration_margin_us)
            .field("power_up_xosc", &self.power_up_xosc)
            .field("client_event_mask", &self.client_event_mask)
            .field("error_callback", &self.error_callback.is_some())
            .field("power_callback", &self.power_callback.is_some())
            .field("client_event_callback", &self.client_event_callback.is_some())
            .finish()
    }
}

/// How a running command is cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMode {
    /// `CMD_STOP`: finish the current packet
    Graceful,
    /// `CMD_ABORT`: stop immediately
    Abrupt,
}

/// Parameters of `request_access`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessParams {
    /// Length of the window in RAT ticks
    pub duration: u32,
    /// Must be `Highest`
    pub priority: Priority,
}

/// Source of a RAT capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatCaptureConfig {
    /// Capture source and edge selection (channel bits are filled in by the driver)
    pub source: u16,
    /// Keep capturing after the first event
    pub repeat: bool,
}

/// Hardware output routing of a RAT channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatHwOutputConfig {
    /// Output mode (pulse, toggle, set, clear)
    pub mode: u8,
    /// Output line
    pub select: u8,
}

/// Run-time controls of `control`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Change the client's inactivity timeout
    SetInactivityTimeout(Option<u32>),
    /// Force the next power-up to rewrite the analog configuration
    UpdateSetupCmd,
    /// Change the margin added to measured powerup durations
    SetPowerUpDurationMargin(u32),
    /// Change the tolerated RAT/RTC drift
    SetRatRtcErrTol(u32),
    /// Enable or disable power management
    SetPowerManagement(bool),
}

/// Information queries of `get_info`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    CurrentCmd,
    AvailRatChannels,
    RadioActive,
    ScheduleMap,
}

/// One entry of the schedule map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleMapEntry {
    pub client: ClientId,
    pub handle: CmdHandle,
    pub priority: Priority,
    pub start_time: Option<u32>,
    pub end_time: Option<u32>,
    pub current: bool,
}

/// Answers of `get_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoValue {
    CurrentCmd(Option<CmdHandle>),
    AvailRatChannels(u16),
    RadioActive(bool),
    ScheduleMap(Vec<ScheduleMapEntry>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_mask_hides_driver_bits() {
        let requested = EventMask::TX_DONE | EventMask::LAST_CMD_DONE | EventMask::CMD_ABORTED;
        let effective = requested & !EventMask::INTERNAL;
        assert_eq!(effective, EventMask::TX_DONE);
        assert!(!EventMask::INTERNAL.contains(EventMask::MDM_SOFT));
    }

    #[test]
    fn test_event_mask_hw_bits_roundtrip() {
        let mask = EventMask::MDM_SOFT | EventMask::RX_OK;
        assert_eq!(mask.hw_bits(), 1 << 5);
        assert_eq!(mask.cpe_bits(), 1 << 16);
        assert_eq!(EventMask::from_hw_bits(1 << 5), EventMask::MDM_SOFT);
    }

    #[test]
    fn test_chain_is_bounded() {
        let mut op = Arc::new(RadioOp::new(0x0801));
        for _ in 0..40 {
            op = Arc::new(RadioOp::new(0x0801).then(op));
        }
        assert_eq!(op.chain().len(), MAX_CHAIN_LEN);
    }

    #[test]
    fn test_duplicate_resets_status() {
        let op = RadioOp::new(0x0803).with_payload(vec![1u8, 2, 3]);
        op.set_status(op_status::DONE_OK);
        let copy = op.duplicate();
        assert_eq!(copy.status(), op_status::IDLE);
        assert_eq!(copy.payload().as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_params_json_defaults() {
        let params: RfParams = serde_json::from_str(r#"{"inactivity_timeout_us": 0}"#).unwrap();
        assert_eq!(params.inactivity_timeout_us, Some(0));
        assert_eq!(params.power_up_duration_us, DEFAULT_POWER_UP_TIME_US);
        assert!(params.power_up_xosc);
    }
}
