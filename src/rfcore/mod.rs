//! # RF Core Command Scheduler
//!
//! Driver for the radio coprocessor of a wireless microcontroller: a fixed
//! command pool, a priority and timing aware scheduler shared by up to two
//! clients, a dispatcher that keeps at most one command on the radio, and a
//! power state machine that boots and stops the radio around the work.
//!
//! ## Modules
//!
//! - [`types`]: client facing value types
//! - [`mailbox`]: doorbell commands, status codes, interrupt flags
//! - [`timebase`]: wrap tolerant RAT arithmetic
//! - [`pool`], [`queue`]: command storage and the pending/current/done queues
//! - [`scheduler`]: admission and preemption decisions
//! - [`fsm`], [`power`]: the power state machine and its constraints
//! - [`dispatch`]: completion interrupts, dispatch and retirement
//! - [`rat`]: RAT compare/capture channels
//! - [`core`]: the state all of the above operate on
//! - [`driver`]: the thread-safe client API
//! - [`hal`]: collaborator traits and their simulated implementations

pub mod core;
pub mod dispatch;
pub mod driver;
pub mod fsm;
pub mod hal;
pub mod mailbox;
pub mod pool;
pub mod power;
pub mod queue;
pub mod rat;
pub mod scheduler;
pub mod timebase;
pub mod types;

pub use self::core::RfCore;
pub use driver::{RfDriver, RfHandle, ServiceHandle};
pub use fsm::FsmState;
