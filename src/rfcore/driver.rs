//! # RF Core Driver
//!
//! Thread-safe front end of the RF core. [`RfDriver`] owns the shared state
//! and the interrupt receiver; every open client gets an [`RfHandle`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────┐
//! │   Clients (RfHandle per open)   │
//! ├─────────────────────────────────┤
//! │  RfDriver: lock, pump, service  │
//! ├─────────────────────────────────┤
//! │   RfCore: queues, FSM, policy   │
//! ├─────────────────────────────────┤
//! │  RadioHal / PowerManager / Tmr  │
//! └─────────────────────────────────┘
//! ```
//!
//! Interrupts from the collaborators arrive on an [`IrqReceiver`]. They are
//! drained either synchronously with [`RfDriver::service`] or by a service
//! task ([`RfDriver::run`], [`RfDriver::spawn_service`]). After every API call
//! and every interrupt the driver pumps the core: posted FSM events are run
//! and the resulting callbacks are invoked with the core unlocked. Callbacks
//! may call back into the driver; the nested call only records work, which the
//! outer pump picks up.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rfcore_rs::config::DriverConfig;
//! use rfcore_rs::rfcore::driver::RfDriver;
//! use rfcore_rs::rfcore::mailbox::CMD_PROP_RADIO_DIV_SETUP;
//! use rfcore_rs::rfcore::types::*;
//!
//! # async fn demo() -> Result<(), rfcore_rs::error::RfError> {
//! let (driver, _radio, _power) = RfDriver::simulated_realtime(DriverConfig::default());
//! let service = driver.spawn_service();
//!
//! let rf = driver.open(
//!     RfMode::new(RfModeKind::ProprietarySub1G),
//!     RadioSetup::new(RadioOp::new(CMD_PROP_RADIO_DIV_SETUP)),
//!     RfParams::default(),
//! )?;
//! let events = rf
//!     .run_cmd(Arc::new(RadioOp::new(0x3801)), Priority::Normal, EventMask::empty())
//!     .await?;
//! assert!(events.contains(EventMask::LAST_CMD_DONE));
//!
//! rf.close().await?;
//! service.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::DriverConfig;
use crate::error::RfError;
use crate::rfcore::core::{Action, PendOutcome, RfCore};
use crate::rfcore::fsm::{FsmState, FsmTransition};
use crate::rfcore::hal::{
    irq_channel, IrqReceiver, ManualTimers, PowerManager, RadioHal, SimPower, SimRadio,
    TimerService, TokioTimers,
};
use crate::rfcore::mailbox::CmdStatus;
use crate::rfcore::types::{
    AccessParams, CancelMode, ClientId, CmdCallback, CmdHandle, Control, EventMask, InfoKind,
    InfoValue, Priority, RadioOp, RadioSetup, RatCallback, RatCaptureConfig, RatHwOutputConfig,
    RfMode, RfParams, ScheduleMapEntry, ScheduleParams,
};

struct Shared {
    core: Mutex<RfCore>,
    irq_rx: tokio::sync::Mutex<IrqReceiver>,
    pumping: AtomicBool,
    config: DriverConfig,
}

/// Shared driver instance
#[derive(Clone)]
pub struct RfDriver {
    shared: Arc<Shared>,
}

impl RfDriver {
    /// Driver over the given collaborators; `irq_rx` receives what they raise
    pub fn new(
        config: DriverConfig,
        radio: Box<dyn RadioHal>,
        power: Box<dyn PowerManager>,
        timers: Box<dyn TimerService>,
        irq_rx: IrqReceiver,
    ) -> Self {
        let core = RfCore::new(&config, radio, power, timers);
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                irq_rx: tokio::sync::Mutex::new(irq_rx),
                pumping: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Driver on simulated hardware with timers the caller expires
    pub fn simulated(config: DriverConfig) -> (Self, SimRadio, SimPower, ManualTimers) {
        let (line, rx) = irq_channel();
        let radio = SimRadio::new(line.clone());
        let power = SimPower::new();
        let timers = ManualTimers::new(line);
        let driver = Self::new(
            config,
            Box::new(radio.clone()),
            Box::new(power.clone()),
            Box::new(timers.clone()),
            rx,
        );
        (driver, radio, power, timers)
    }

    /// Driver on simulated hardware with tokio timers and a radio clock
    /// that follows the tokio clock
    pub fn simulated_realtime(config: DriverConfig) -> (Self, SimRadio, SimPower) {
        let (line, rx) = irq_channel();
        let radio = SimRadio::new(line.clone());
        radio.follow_runtime_clock();
        let power = SimPower::new();
        let driver = Self::new(
            config,
            Box::new(radio.clone()),
            Box::new(power.clone()),
            Box::new(TokioTimers::new(line)),
            rx,
        );
        (driver, radio, power)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    fn core(&self) -> MutexGuard<'_, RfCore> {
        self.shared
            .core
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the core, then pump
    fn with_core<T>(&self, f: impl FnOnce(&mut RfCore) -> T) -> T {
        let result = f(&mut self.core());
        self.pump();
        result
    }

    /// Run posted FSM work and deliver callbacks until the core is idle
    ///
    /// Returns at once when called from inside a callback.
    pub fn pump(&self) {
        loop {
            if self.shared.pumping.swap(true, Ordering::AcqRel) {
                return;
            }
            loop {
                let action = self.core().next_action();
                match action {
                    Some(action) => self.run_action(action),
                    None => break,
                }
            }
            self.shared.pumping.store(false, Ordering::Release);
            if !self.core().has_work() {
                return;
            }
        }
    }

    fn run_action(&self, action: Action) {
        match action {
            Action::Notify(notify) => notify(),
            Action::Retire(retirement) => {
                retirement.notify();
                self.core().complete_retire(&retirement);
            }
        }
    }

    /// Handle every queued interrupt without waiting; returns how many
    ///
    /// Only pumps when a service task owns the receiver.
    pub fn service(&self) -> usize {
        let Ok(mut rx) = self.shared.irq_rx.try_lock() else {
            self.pump();
            return 0;
        };
        let mut handled = 0;
        loop {
            self.pump();
            let Some(irq) = rx.try_recv() else {
                break;
            };
            trace!("Interrupt {irq:?}");
            self.core().on_interrupt(irq);
            handled += 1;
        }
        handled
    }

    /// Handle interrupts until `shutdown` fires or every sender is gone
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        let mut rx = self.shared.irq_rx.lock().await;
        self.pump();
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                irq = rx.recv() => match irq {
                    Some(irq) => {
                        trace!("Interrupt {irq:?}");
                        self.core().on_interrupt(irq);
                        self.pump();
                    }
                    None => break,
                },
            }
        }
        debug!("RF core service stopped");
    }

    /// Run the service loop on a tokio task
    pub fn spawn_service(&self) -> ServiceHandle {
        let (tx, rx) = oneshot::channel();
        let driver = self.clone();
        let task = tokio::spawn(async move { driver.run(rx).await });
        ServiceHandle { shutdown: tx, task }
    }

    /// Register a client
    pub fn open(&self, mode: RfMode, setup: RadioSetup, params: RfParams) -> Result<RfHandle, RfError> {
        let client = self.with_core(|core| core.open(mode, setup, params))?;
        Ok(RfHandle {
            driver: self.clone(),
            client,
        })
    }

    /// Current radio timer value
    pub fn get_current_time(&self) -> u32 {
        self.core().current_time()
    }

    pub fn fsm_state(&self) -> FsmState {
        self.core().fsm_state()
    }

    /// Recent FSM transitions, oldest first
    pub fn fsm_trace(&self) -> Vec<FsmTransition> {
        self.core().fsm_trace()
    }

    pub fn schedule_map(&self) -> Vec<ScheduleMapEntry> {
        self.core().schedule_map()
    }
}

/// Running service task
pub struct ServiceHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServiceHandle {
    /// Stop the task and wait for it
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// An open client
#[derive(Clone)]
pub struct RfHandle {
    driver: RfDriver,
    client: ClientId,
}

impl RfHandle {
    pub fn id(&self) -> ClientId {
        self.client
    }

    pub fn driver(&self) -> &RfDriver {
        &self.driver
    }

    /// Post a command to run as soon as possible after the client's others
    pub fn post_cmd(
        &self,
        op: Arc<RadioOp>,
        priority: Priority,
        callback: Option<CmdCallback>,
        events: EventMask,
    ) -> Result<CmdHandle, RfError> {
        let params = ScheduleParams {
            priority,
            ..ScheduleParams::default()
        };
        self.schedule_cmd(op, params, callback, events)
    }

    /// Post a command with timing and priority
    pub fn schedule_cmd(
        &self,
        op: Arc<RadioOp>,
        params: ScheduleParams,
        callback: Option<CmdCallback>,
        events: EventMask,
    ) -> Result<CmdHandle, RfError> {
        let client = self.client;
        self.driver
            .with_core(|core| core.schedule_cmd(client, op, params, callback, events))
    }

    /// Wait until the command raises one of `mask` or retires
    pub async fn pend_cmd(&self, handle: CmdHandle, mask: EventMask) -> Result<EventMask, RfError> {
        let client = self.client;
        let outcome = self
            .driver
            .with_core(|core| core.pend_register(client, handle, mask))?;
        match outcome {
            PendOutcome::Done(events) => Ok(events),
            PendOutcome::Wait(rx) => {
                match tokio::time::timeout(self.driver.config().pend_timeout(), rx).await {
                    Ok(Ok(events)) => Ok(events),
                    Ok(Err(_)) => Err(RfError::Shutdown),
                    Err(_) => Err(RfError::Timeout),
                }
            }
        }
    }

    /// Post a command and wait for it to retire
    pub async fn run_cmd(
        &self,
        op: Arc<RadioOp>,
        priority: Priority,
        events: EventMask,
    ) -> Result<EventMask, RfError> {
        let handle = self.post_cmd(op, priority, None, events)?;
        self.pend_cmd(handle, EventMask::empty()).await
    }

    /// Cancel one command; a running command is stopped through the radio
    pub fn cancel_cmd(&self, handle: Option<CmdHandle>, mode: CancelMode) -> Result<(), RfError> {
        let client = self.client;
        self.driver
            .with_core(|core| core.abort_cmd(client, handle, mode, false))
    }

    /// Cancel a command and every later one of this client
    pub fn flush_cmd(&self, handle: Option<CmdHandle>, mode: CancelMode) -> Result<(), RfError> {
        let client = self.client;
        self.driver
            .with_core(|core| core.abort_cmd(client, handle, mode, true))
    }

    pub fn yield_radio(&self) -> Result<(), RfError> {
        let client = self.client;
        self.driver.with_core(|core| core.yield_radio(client))
    }

    /// Reserve the radio for an access window
    pub fn request_access(&self, params: AccessParams) -> Result<(), RfError> {
        let client = self.client;
        self.driver
            .with_core(|core| core.request_access(client, params))
    }

    pub fn control(&self, control: Control) -> Result<(), RfError> {
        let client = self.client;
        self.driver.with_core(|core| core.control(client, control))
    }

    pub fn get_info(&self, kind: InfoKind) -> Result<InfoValue, RfError> {
        self.driver.core().get_info(self.client, kind)
    }

    pub fn get_cmd_op(&self, handle: CmdHandle) -> Option<Arc<RadioOp>> {
        self.driver.core().get_cmd_op(handle)
    }

    pub fn run_direct_cmd(&self, command: u32) -> Result<CmdStatus, RfError> {
        let client = self.client;
        self.driver
            .with_core(|core| core.run_direct_cmd(client, command))
    }

    pub fn run_immediate_cmd(&self, op: &RadioOp) -> Result<CmdStatus, RfError> {
        let client = self.client;
        self.driver
            .with_core(|core| core.run_immediate_cmd(client, op))
    }

    /// RSSI in dBm
    pub fn get_rssi(&self) -> Result<i8, RfError> {
        let client = self.client;
        self.driver.with_core(|core| core.get_rssi(client))
    }

    /// Arm a RAT compare; returns the channel
    pub fn rat_compare(&self, time: u32, callback: Option<RatCallback>) -> Result<u8, RfError> {
        let client = self.client;
        self.driver
            .with_core(|core| core.rat_compare(client, time, callback))
    }

    /// Arm a RAT capture; returns the channel
    pub fn rat_capture(
        &self,
        config: RatCaptureConfig,
        callback: Option<RatCallback>,
    ) -> Result<u8, RfError> {
        let client = self.client;
        self.driver
            .with_core(|core| core.rat_capture(client, config, callback))
    }

    pub fn rat_disable_channel(&self, channel: u8) -> Result<(), RfError> {
        let client = self.client;
        self.driver
            .with_core(|core| core.rat_disable_channel(client, channel))
    }

    pub fn rat_hw_output(&self, config: RatHwOutputConfig) -> Result<(), RfError> {
        let client = self.client;
        self.driver
            .with_core(|core| core.rat_hw_output(client, config))
    }

    /// Wait for the client's last command, power down if it is the last
    /// client, and release it
    pub async fn close(self) -> Result<(), RfError> {
        let client = self.client;
        let last = self.driver.core().last_command_of(client);
        if let Some(handle) = last {
            self.pend_cmd(handle, EventMask::empty()).await?;
        }

        let powered_down = self
            .driver
            .with_core(|core| core.shut_down_for_close(client))?;
        if let Some(rx) = powered_down {
            match tokio::time::timeout(self.driver.config().pend_timeout(), rx).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(RfError::Shutdown),
                Err(_) => return Err(RfError::Timeout),
            }
        }
        self.driver.with_core(|core| core.finish_close(client))
    }
}
