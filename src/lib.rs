//! # rfcore-rs - RF Core Command Scheduler and Power State Machine
//!
//! The rfcore-rs crate drives the radio coprocessor ("RF core") of a wireless
//! microcontroller. Clients post radio operations; the driver admits them
//! against each other's timing and priority, powers the radio up in time,
//! dispatches one operation at a time, and powers the radio down when idle.
//!
//! ## Features
//!
//! - Fixed capacity command pool with sequence handles
//! - Timing and priority aware scheduling for two clients, with preemption
//! - Power state machine with powerup duration learning and PHY switching
//! - Sleep-until-due dispatch for commands with an absolute start time
//! - RAT compare/capture channels and direct radio commands
//! - Async pend/run/close on tokio; simulated radio for tests and demos
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use rfcore_rs::{DriverConfig, RfDriver, EventMask, Priority, RadioOp, RadioSetup, RfMode, RfModeKind, RfParams};
//! use rfcore_rs::rfcore::mailbox::CMD_PROP_RADIO_DIV_SETUP;
//!
//! let (driver, radio, _power, _timers) = RfDriver::simulated(DriverConfig::default());
//! let rf = driver
//!     .open(
//!         RfMode::new(RfModeKind::ProprietarySub1G),
//!         RadioSetup::new(RadioOp::new(CMD_PROP_RADIO_DIV_SETUP)),
//!         RfParams::default(),
//!     )
//!     .unwrap();
//!
//! rf.post_cmd(Arc::new(RadioOp::new(0x3801)), Priority::Normal, None, EventMask::empty())
//!     .unwrap();
//! driver.service();
//! assert_eq!(radio.dispatched().len(), 1);
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod rfcore;
pub mod util;

pub use crate::config::{ClientVariant, DriverConfig};
pub use crate::error::RfError;
pub use crate::logging::{init_logger, log_info};

pub use rfcore::driver::{RfDriver, RfHandle, ServiceHandle};
pub use rfcore::fsm::FsmState;
pub use rfcore::types::{
    AccessParams, CancelMode, ClientEvent, ClientEventMask, ClientId, CmdHandle, Control,
    EventMask, InfoKind, InfoValue, Priority, RadioOp, RadioSetup, RfMode, RfModeKind, RfParams,
    ScheduleParams, StartTrigger,
};
