//! # Radio Doorbell Definitions
//!
//! Command numbers, operation status codes and interrupt flag layouts of the
//! RF core mailbox. The values follow the radio firmware's command interface;
//! payloads beyond the command number are opaque to the driver.
//!
//! ## Command Classes
//!
//! - **Radio operations** (`0x08xx`, protocol specific ranges) are submitted
//!   through the doorbell and complete with an interrupt.
//! - **Direct commands** (`0x04xx`) and **immediate commands** (`0x00xx`,
//!   `0x06xx`) complete synchronously with a CMDSTA result.

use bitflags::bitflags;

/// Firmware information query
pub const CMD_GET_FW_INFO: u16 = 0x0002;
/// Arm a RAT compare channel
pub const CMD_SET_RAT_CMP: u16 = 0x000A;
/// Abort the running operation
pub const CMD_ABORT: u16 = 0x0401;
/// Gracefully stop the running operation
pub const CMD_STOP: u16 = 0x0402;
/// Read the current RSSI
pub const CMD_GET_RSSI: u16 = 0x0403;
/// Disable a RAT channel
pub const CMD_DISABLE_RAT_CH: u16 = 0x0408;
/// Keep the system bus available to the radio
pub const CMD_BUS_REQUEST: u16 = 0x040E;
/// Arm a RAT capture channel
pub const CMD_SET_RAT_CPT: u16 = 0x0603;
/// Route a RAT channel to a hardware output
pub const CMD_SET_RAT_OUTPUT: u16 = 0x0604;
/// Generic radio setup
pub const CMD_RADIO_SETUP: u16 = 0x0802;
/// Program the frequency synthesizer
pub const CMD_FS: u16 = 0x0803;
/// Turn the frequency synthesizer off
pub const CMD_FS_OFF: u16 = 0x0804;
/// Stop the RAT and report its offset to the RTC
pub const CMD_SYNC_STOP_RAT: u16 = 0x0809;
/// Start the RAT synchronized to the RTC
pub const CMD_SYNC_START_RAT: u16 = 0x080A;
/// BLE5 radio setup
pub const CMD_BLE5_RADIO_SETUP: u16 = 0x1820;
/// Proprietary radio setup (2.4 GHz)
pub const CMD_PROP_RADIO_SETUP: u16 = 0x3806;
/// Proprietary radio setup (sub-1 GHz)
pub const CMD_PROP_RADIO_DIV_SETUP: u16 = 0x3807;

/// Clock control of the radio's internal RAMs
pub const CMD_RAM_CLK_CTRL: u16 = 0x0607;
/// Clock enable bits of the modem and RF engine patch RAMs
pub const PATCH_RAM_CLOCKS: u16 = 0x0014;

/// Encode a direct command without parameters
pub fn direct(cmd: u16) -> u32 {
    ((cmd as u32) << 16) | 1
}

/// Encode a direct command with a one byte parameter
pub fn direct_1byte(cmd: u16, par: u8) -> u32 {
    ((cmd as u32) << 16) | ((par as u32) << 8) | 1
}

/// Encode a direct command with a two byte parameter
pub fn direct_2byte(cmd: u16, par: u16) -> u32 {
    ((cmd as u32) << 16) | (par as u32 & 0xFFFC) | 1
}

/// Command number of an encoded direct command
pub fn direct_command_no(word: u32) -> u16 {
    (word >> 16) as u16
}

/// Returns true for commands that configure the radio for a PHY
pub fn is_setup_command(command_no: u16) -> bool {
    matches!(
        command_no,
        CMD_RADIO_SETUP | CMD_BLE5_RADIO_SETUP | CMD_PROP_RADIO_SETUP | CMD_PROP_RADIO_DIV_SETUP
    )
}

/// Returns true for commands that change the frequency synthesizer state
pub fn is_fs_command(command_no: u16) -> bool {
    matches!(command_no, CMD_FS | CMD_FS_OFF)
}

/// Radio operation status, written back by the radio into the operation
pub mod op_status {
    /// Not yet submitted
    pub const IDLE: u16 = 0x0000;
    /// Submitted, waiting for its start trigger
    pub const PENDING: u16 = 0x0001;
    /// Running
    pub const ACTIVE: u16 = 0x0002;
    /// Skipped because of its condition
    pub const SKIPPED: u16 = 0x0003;
    /// Finished normally
    pub const DONE_OK: u16 = 0x0400;
    /// Stopped by `CMD_STOP`
    pub const DONE_STOPPED: u16 = 0x0404;
    /// Aborted by `CMD_ABORT`
    pub const DONE_ABORT: u16 = 0x0405;
    /// Synthesizer failed to program
    pub const ERROR_SYNTH_PROG: u16 = 0x0809;

    /// Returns true while the radio has not started the operation
    pub fn is_waiting(status: u16) -> bool {
        status == IDLE || status == PENDING
    }
}

/// Result byte of a doorbell command (CMDSTA)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdStatus(pub u32);

impl CmdStatus {
    /// Command accepted and finished
    pub const DONE: u8 = 0x01;
    /// The radio could not accept the command right now
    pub const QUEUE_BUSY: u8 = 0x89;
    /// Command not allowed in the current radio context
    pub const CONTEXT_ERROR: u8 = 0x85;

    /// A successful status
    pub fn done() -> Self {
        CmdStatus(Self::DONE as u32)
    }

    /// Status byte (low byte of the word)
    pub fn code(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Result bytes returned alongside the status
    pub fn result(&self) -> u32 {
        self.0 >> 8
    }

    /// True when the command completed
    pub fn is_done(&self) -> bool {
        self.code() == Self::DONE
    }

    /// True when the radio reported itself busy
    pub fn is_busy(&self) -> bool {
        matches!(self.code(), Self::QUEUE_BUSY | Self::CONTEXT_ERROR)
    }
}

bitflags! {
    /// Command processor (CPE) interrupt flags
    ///
    /// The low 32 bits of a client's event mask map one to one onto these.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CpeInterrupt: u32 {
        /// A radio operation finished
        const COMMAND_DONE = 1 << 0;
        /// The last operation of a chain finished
        const LAST_COMMAND_DONE = 1 << 1;
        /// A foreground operation finished
        const FG_COMMAND_DONE = 1 << 2;
        /// The last foreground operation of a chain finished
        const LAST_FG_COMMAND_DONE = 1 << 3;
        /// Packet transmitted
        const TX_DONE = 1 << 4;
        /// Packet received with CRC ok
        const RX_OK = 1 << 16;
        /// Packet received with CRC error
        const RX_NOK = 1 << 17;
        /// An RX queue entry was completed
        const RX_ENTRY_DONE = 1 << 23;
        /// Patch modules unlocked
        const MODULES_UNLOCKED = 1 << 29;
        /// The radio booted
        const BOOT_DONE = 1 << 30;
        /// Internal error of the radio firmware
        const INTERNAL_ERROR = 1 << 31;

        const _ = !0;
    }
}

bitflags! {
    /// Radio hardware (RFHW) interrupt flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HwInterrupt: u32 {
        /// Modem software defined event
        const MDM_SOFT = 1 << 5;
        /// RAT channel 5 event
        const RAT_CH5 = 1 << 17;
        /// RAT channel 6 event
        const RAT_CH6 = 1 << 18;
        /// RAT channel 7 event
        const RAT_CH7 = 1 << 19;

        const _ = !0;
    }
}

impl HwInterrupt {
    /// The RAT channels handed out to applications
    pub const RAT_CHANNELS: HwInterrupt = HwInterrupt::RAT_CH5
        .union(HwInterrupt::RAT_CH6)
        .union(HwInterrupt::RAT_CH7);

    /// Interrupt flag of a RAT channel
    pub fn rat_channel(channel: u8) -> HwInterrupt {
        HwInterrupt::from_bits_retain(1 << (channel as u32 + crate::constants::RAT_CH0_HW_BIT))
    }
}
