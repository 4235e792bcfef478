//! # Hardware Abstraction Layer for the RF Core
//!
//! The driver talks to three external collaborators, each behind a trait:
//!
//! - [`RadioHal`]: the doorbell mailbox, interrupt enables, clocks and timers
//!   of the radio coprocessor
//! - [`PowerManager`]: reference counted power dependencies and boolean sleep
//!   constraints of the system power manager
//! - [`TimerService`]: one-shot timers for wakeup, inactivity and access windows
//!
//! Every asynchronous signal the collaborators produce (command processor and
//! hardware interrupts, timer expiry, wakeup notifications) travels as an
//! [`Interrupt`] through an [`IrqLine`] to the driver's service loop. None of
//! the trait methods may block or call back into the driver.

use log::warn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::rfcore::mailbox::{CmdStatus, CpeInterrupt, HwInterrupt};
use crate::rfcore::types::{AnalogCfg, ClientId, RadioOp};
use std::sync::Arc;

pub mod sim;
pub mod timer;

pub use sim::{SimPower, SimRadio};
pub use timer::{ManualTimers, TokioTimers};

/// Source of the high frequency system clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// Internal RC oscillator
    RcoscHf,
    /// External crystal oscillator
    XoscHf,
}

/// Patchable modules of the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchTarget {
    /// Command processor
    Cpe,
    /// Modem
    Mce,
    /// RF engine
    Rfe,
}

/// Radio coprocessor interface
pub trait RadioHal: Send {
    /// Hand an operation chain to the doorbell and wait for the acknowledge
    fn submit(&mut self, chain: &[Arc<RadioOp>]) -> CmdStatus;

    /// Send an encoded direct command and return its CMDSTA
    fn send_direct(&mut self, command: u32) -> CmdStatus;

    /// Run an immediate command structure and return its CMDSTA
    fn send_immediate(&mut self, op: &RadioOp) -> CmdStatus;

    /// Enable command processor interrupt sources
    fn enable_cpe_interrupts(&mut self, mask: CpeInterrupt);

    /// Disable command processor interrupt sources
    fn disable_cpe_interrupts(&mut self, mask: CpeInterrupt);

    /// Enable hardware interrupt sources
    fn enable_hw_interrupts(&mut self, mask: HwInterrupt);

    /// Disable hardware interrupt sources
    fn disable_hw_interrupts(&mut self, mask: HwInterrupt);

    /// Hardware interrupt sources currently enabled
    fn hw_interrupts_enabled(&self) -> HwInterrupt;

    /// Clear latched hardware interrupt flags
    fn clear_hw_interrupts(&mut self, mask: HwInterrupt);

    /// Latch the RF mode; returns false when the silicon does not support it
    fn select_mode(&mut self, mode: u8) -> bool;

    /// Bitmap of RF modes the silicon supports
    fn supported_modes(&self) -> u32;

    /// Enable the radio clocks; the radio answers with `BOOT_DONE`
    fn clock_enable(&mut self);

    /// Gate the radio clocks off
    fn clock_disable(&mut self);

    /// Load a patch image into one of the radio modules
    fn load_patch(&mut self, target: PatchTarget, image: &[u8]);

    /// Reset the command processor patch state before a PHY switch
    fn reset_cpe_patch(&mut self);

    /// Write the analog configuration mode (and trims) into the setup command
    fn prepare_setup(&mut self, setup: &RadioOp, analog: AnalogCfg);

    /// Turn the synthesizer off outside of a radio operation
    fn synth_power_down(&mut self);

    /// Switch the VCO LDO between radio and idle voltage
    fn set_vco_ldo(&mut self, enable: bool);

    /// Current radio timer value
    fn rat_count(&self) -> u32;

    /// Current RTC value in the 32.32 seconds format
    fn rtc_now(&self) -> u64;

    /// Current high frequency clock source
    fn hf_clock_source(&self) -> ClockSource;

    /// True once the crystal is stable enough to switch to
    fn xosc_hf_ready(&self) -> bool;

    /// Switch the high frequency clock to the crystal
    fn switch_to_xosc_hf(&mut self);

    /// Free RAT channels reported by the radio firmware
    fn firmware_rat_channels(&mut self) -> u16;
}

/// Power domains and clocks the driver depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerResource {
    /// The radio core power domain
    RfCore,
    /// The high frequency crystal
    XoscHf,
}

/// Sleep restrictions the driver can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SleepConstraint {
    /// No standby while the radio is on
    StandbyDisallow,
    /// Keep the flash powered in idle during power-up
    NeedFlashInIdle,
    /// The driver performs the crystal switch itself
    DisallowXoscHfSwitching,
}

/// System power manager interface
pub trait PowerManager: Send {
    fn set_dependency(&mut self, resource: PowerResource);
    fn release_dependency(&mut self, resource: PowerResource);
    fn set_constraint(&mut self, constraint: SleepConstraint);
    fn release_constraint(&mut self, constraint: SleepConstraint);
}

/// One-shot timers owned by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Scheduled wakeup and crystal polling
    PowerUp,
    /// Idle time before power-down, per client
    Inactivity(ClientId),
    /// Access window, per client
    RequestAccess(ClientId),
    /// Polling for a background command to start
    BackgroundStart,
}

/// Timer service interface
///
/// Expiry is reported as [`Interrupt::Timer`] on the line the service was
/// created with.
pub trait TimerService: Send {
    /// (Re)start a timer
    fn start(&mut self, id: TimerId, timeout_us: u32);
    fn stop(&mut self, id: TimerId);
    fn is_active(&self, id: TimerId) -> bool;
    /// Microseconds left on an active timer
    fn remaining_us(&self, id: TimerId) -> Option<u32>;
}

/// Power manager notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// The system left standby
    AwakeStandby,
}

/// Asynchronous signals delivered to the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Command processor interrupt with its flags
    Cpe0(CpeInterrupt),
    /// Radio hardware interrupt with its flags
    Hw(HwInterrupt),
    /// Timer expiry
    Timer(TimerId),
    /// Power manager notification
    Power(PowerEvent),
}

/// Sending side of the interrupt channel
#[derive(Debug, Clone)]
pub struct IrqLine {
    tx: UnboundedSender<Interrupt>,
}

impl IrqLine {
    /// Raise an interrupt; never blocks
    pub fn raise(&self, irq: Interrupt) {
        if self.tx.send(irq).is_err() {
            warn!("Interrupt {irq:?} dropped, driver is gone");
        }
    }
}

/// Receiving side of the interrupt channel, owned by the driver
#[derive(Debug)]
pub struct IrqReceiver {
    rx: UnboundedReceiver<Interrupt>,
}

impl IrqReceiver {
    /// Next interrupt, waiting for one
    pub async fn recv(&mut self) -> Option<Interrupt> {
        self.rx.recv().await
    }

    /// Next interrupt if one is queued
    pub fn try_recv(&mut self) -> Option<Interrupt> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected interrupt line and receiver
pub fn irq_channel() -> (IrqLine, IrqReceiver) {
    let (tx, rx) = unbounded_channel();
    (IrqLine { tx }, IrqReceiver { rx })
}
