//! # RF Core State
//!
//! [`RfCore`] holds every piece of mutable driver state: the command pool and
//! queues, the open clients, the power FSM, the power constraints and the
//! hardware collaborators. It is guarded by a single mutex in
//! [`RfDriver`](crate::rfcore::driver::RfDriver); nothing in here blocks.
//!
//! Client callbacks are never invoked while the core is borrowed. Every
//! notification is queued as an [`Action`] and run by the driver with the lock
//! released. A retirement is two-phase: the command callback runs while the
//! pool slot is still allocated, then [`RfCore::complete_retire`] frees it.

use std::collections::VecDeque;
use std::sync::Arc;

use bitflags::bitflags;
use log::{debug, error, info, warn};
use tokio::sync::oneshot;

use crate::config::DriverConfig;
use crate::constants::{ANALOG_CFG_TIME_US, N_CMD_POOL, N_MAX_CLIENTS, REQ_ACCESS_MAX_DUR_US};
use crate::error::RfError;
use crate::log_warn_throttled;
use crate::rfcore::fsm::{Cpe0Handler, Fsm, FsmEvent, FsmState, FsmTransition};
use crate::rfcore::hal::{
    Interrupt, PowerEvent, PowerManager, PowerResource, RadioHal, TimerId, TimerService,
};
use crate::rfcore::mailbox::{
    direct, op_status, CmdStatus, CpeInterrupt, HwInterrupt, CMD_ABORT, CMD_GET_RSSI, CMD_STOP,
};
use crate::rfcore::pool::{CmdFlags, Command, CommandPool, SlotId};
use crate::rfcore::power::{ConstraintSet, PowerConstraint, Release};
use crate::rfcore::queue::CommandQueue;
use crate::rfcore::rat::RatChannelManager;
use crate::rfcore::scheduler::{self, NewCmd, Placement, Preemption, QueuedCmd, Snapshot};
use crate::rfcore::timebase::{rtc_to_rat, ticks_to_us};
use crate::rfcore::types::{
    AccessParams, CancelMode, ClientEvent, ClientEventMask, ClientId, CmdCallback, CmdHandle,
    Control, EventMask, InfoKind, InfoValue, Priority, RadioOp, RadioSetup, RfMode, RfModeKind,
    RfParams, ScheduleMapEntry, ScheduleParams,
};
use crate::util::logging::LogThrottle;

bitflags! {
    /// Reasons a client is owed a radio-free notification
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RadioFreeSource: u8 {
        /// Its commands were preempted
        const PREEMPT = 1 << 0;
        /// Its access request was denied
        const REQ_ACCESS = 1 << 1;
        /// Its command was rejected by the scheduler
        const CMD_REJECT = 1 << 2;
    }
}

/// Pending radio-free notification
#[derive(Debug, Clone, Copy)]
pub(crate) struct RadioFree {
    pub pending: RadioFreeSource,
    pub client: Option<ClientId>,
}

/// An open client
pub(crate) struct Client {
    pub id: ClientId,
    pub mode: RfMode,
    pub setup: RadioSetup,
    pub params: RfParams,
    /// Copy of the last synthesizer command the client ran
    pub fs_cache: Option<Arc<RadioOp>>,
    pub yielded: bool,
    /// Rewrite the analog configuration on the next power-up
    pub update_setup: bool,
    pub last_posted: Option<CmdHandle>,
}

impl Client {
    pub fn is_ieee(&self) -> bool {
        self.mode.kind == RfModeKind::Ieee154
    }
}

/// Radio status flags
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RadioFlags {
    /// Powered and accepting commands
    pub radio_active: bool,
    /// Power-up sequence running
    pub power_up: bool,
    /// Power-down sequence running
    pub power_down: bool,
    /// PHY switch running
    pub change_phy: bool,
    /// Wake up again once the power-down finishes
    pub restart: bool,
    /// The radio has been powered down at least once
    pub started: bool,
    pub yield_pd_called: bool,
    pub yield_pd_cancel: bool,
    pub rat_sync_on_yield: bool,
    /// The driver performs the crystal switch itself
    pub xosc_switch_held: bool,
    pub need_flash_held: bool,
    /// Standby constraint and core power domain held
    pub core_power_held: bool,
    pub xosc_dep_held: bool,
}

/// Timebase bookkeeping
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timing {
    /// RAT offset captured by the last RAT stop
    pub rat0: u32,
    pub rtc_powerup_start: u64,
    pub rtc_switch_start: u64,
    pub err_tol_us: u32,
    pub phy_switching_us: [u32; N_MAX_CLIENTS],
}

/// Deferred retirement of one command
pub struct Retirement {
    pub(crate) slot: SlotId,
    pub(crate) client: ClientId,
    pub(crate) handle: CmdHandle,
    pub(crate) events: EventMask,
    pub(crate) callback: Option<CmdCallback>,
}

impl Retirement {
    /// Run the command callback
    pub fn notify(&self) {
        if let Some(callback) = &self.callback {
            callback(self.client, self.handle, self.events);
        }
    }
}

/// Work the driver runs with the core unlocked
pub enum Action {
    Notify(Box<dyn FnOnce() + Send>),
    Retire(Retirement),
}

/// Answer of a pend registration
pub(crate) enum PendOutcome {
    Done(EventMask),
    Wait(oneshot::Receiver<EventMask>),
}

struct PendWaiter {
    handle: CmdHandle,
    mask: EventMask,
    tx: oneshot::Sender<EventMask>,
}

/// Shared state of the RF core driver
pub struct RfCore {
    pub(crate) radio: Box<dyn RadioHal>,
    pub(crate) power: Box<dyn PowerManager>,
    pub(crate) timers: Box<dyn TimerService>,
    pub(crate) pool: CommandPool,
    pub(crate) queue: CommandQueue,
    pub(crate) rat: RatChannelManager,
    pub(crate) clients: [Option<Client>; N_MAX_CLIENTS],
    max_clients: usize,
    default_phy_switching_us: u32,
    pub(crate) fsm: Fsm,
    pub(crate) cpe0_handler: Cpe0Handler,
    pub(crate) constraints: ConstraintSet,
    pub(crate) flags: RadioFlags,
    pub(crate) current_client: Option<ClientId>,
    pub(crate) timing: Timing,
    pub(crate) sync_stop_op: Option<Arc<RadioOp>>,
    /// Ops held back until the crystal is running
    pub(crate) deferred_chain: Vec<Arc<RadioOp>>,
    /// Synthesizer op chained behind the last setup
    pub(crate) fs_chained: Option<Arc<RadioOp>>,
    /// RAT channel events not yet delivered
    pub(crate) hw_int_event: HwInterrupt,
    pub(crate) radio_free: RadioFree,
    outbox: VecDeque<Action>,
    pend_waiters: Vec<PendWaiter>,
    power_down_waiters: Vec<oneshot::Sender<()>>,
    reject_log: LogThrottle,
}

impl RfCore {
    pub fn new(
        config: &DriverConfig,
        radio: Box<dyn RadioHal>,
        power: Box<dyn PowerManager>,
        timers: Box<dyn TimerService>,
    ) -> Self {
        Self {
            radio,
            power,
            timers,
            pool: CommandPool::new(N_CMD_POOL),
            queue: CommandQueue::new(),
            rat: RatChannelManager::new(),
            clients: Default::default(),
            max_clients: config.variant.max_clients(),
            default_phy_switching_us: config.default_phy_switching_time_us,
            fsm: Fsm::new(config.fsm_trace_depth),
            cpe0_handler: Cpe0Handler::PowerFsm,
            constraints: ConstraintSet::new(),
            flags: RadioFlags::default(),
            current_client: None,
            timing: Timing {
                rat0: 0,
                rtc_powerup_start: 0,
                rtc_switch_start: 0,
                err_tol_us: config.rat_rtc_err_tol_us,
                phy_switching_us: [config.default_phy_switching_time_us; N_MAX_CLIENTS],
            },
            sync_stop_op: None,
            deferred_chain: Vec::new(),
            fs_chained: None,
            hw_int_event: HwInterrupt::empty(),
            radio_free: RadioFree {
                pending: RadioFreeSource::empty(),
                client: None,
            },
            outbox: VecDeque::new(),
            pend_waiters: Vec::new(),
            power_down_waiters: Vec::new(),
            reject_log: LogThrottle::default(),
        }
    }

    // clients

    pub(crate) fn client(&self, id: ClientId) -> Result<&Client, RfError> {
        self.clients
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| RfError::InvalidParams(format!("{id} is not open")))
    }

    pub(crate) fn client_mut(&mut self, id: ClientId) -> Result<&mut Client, RfError> {
        self.clients
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| RfError::InvalidParams(format!("{id} is not open")))
    }

    pub(crate) fn is_ieee(&self, id: ClientId) -> bool {
        self.client(id).is_ok_and(Client::is_ieee)
    }

    fn other_client(&self, id: ClientId) -> Option<ClientId> {
        self.clients
            .iter()
            .flatten()
            .map(|c| c.id)
            .find(|&other| other != id)
    }

    fn open_clients(&self) -> usize {
        self.clients.iter().flatten().count()
    }

    /// Register a client
    pub fn open(
        &mut self,
        mode: RfMode,
        setup: RadioSetup,
        params: RfParams,
    ) -> Result<ClientId, RfError> {
        let kind = mode.kind.as_u8();
        if self.radio.supported_modes() & (1 << kind) == 0 {
            return Err(RfError::InvalidMode(kind));
        }

        let index = self.clients[..self.max_clients]
            .iter()
            .position(Option::is_none)
            .ok_or(RfError::TooManyClients)?;
        let id = ClientId(index as u8);

        self.clients[index] = Some(Client {
            id,
            mode,
            setup,
            params,
            fs_cache: None,
            yielded: false,
            update_setup: true,
            last_posted: None,
        });
        self.timing.phy_switching_us[index] = self.default_phy_switching_us;
        info!("Opened {id} in mode {kind}");
        Ok(id)
    }

    /// Handle of the youngest command `client` still has in the pool
    ///
    /// Covers pending, running and finished commands whose callback has not
    /// run yet, so waiting on it outlasts every retirement of the client.
    pub(crate) fn last_command_of(&self, client: ClientId) -> Option<CmdHandle> {
        self.pool
            .commands()
            .filter(|cmd| cmd.client == client)
            .map(|cmd| cmd.handle)
            .max_by_key(|&handle| self.queue.age(handle))
    }

    /// Power the radio down if `client` is the last one open
    ///
    /// Returns a receiver that resolves once the power-down has finished, or
    /// `None` when there is nothing to wait for.
    pub(crate) fn shut_down_for_close(
        &mut self,
        client: ClientId,
    ) -> Result<Option<oneshot::Receiver<()>>, RfError> {
        self.client(client)?;
        if self.open_clients() > 1 {
            return Ok(None);
        }

        self.timers.stop(TimerId::PowerUp);
        self.timers.stop(TimerId::Inactivity(client));
        if !self.constraints.is_empty() {
            self.constraints.clear();
            self.fsm.post(FsmEvent::POWER_DOWN);
        }

        if self.flags.radio_active || self.flags.power_down {
            let (tx, rx) = oneshot::channel();
            self.power_down_waiters.push(tx);
            Ok(Some(rx))
        } else {
            Ok(None)
        }
    }

    /// Forget a client
    pub(crate) fn finish_close(&mut self, client: ClientId) -> Result<(), RfError> {
        self.client(client)?;
        if self.open_clients() == 1 && self.flags.xosc_dep_held {
            self.power.release_dependency(PowerResource::XoscHf);
            self.flags.xosc_dep_held = false;
        }
        if self.current_client == Some(client) {
            self.current_client = None;
        }
        if self.radio_free.client == Some(client) {
            self.radio_free.client = None;
        }
        self.timers.stop(TimerId::Inactivity(client));
        self.timers.stop(TimerId::RequestAccess(client));
        self.clients[client.index()] = None;
        info!("Closed {client}");
        Ok(())
    }

    // scheduling

    fn queued(&self, slot: SlotId) -> Option<QueuedCmd> {
        self.pool.get(slot).map(|cmd| QueuedCmd {
            slot,
            handle: cmd.handle,
            client: cmd.client,
            priority: cmd.priority,
            start: cmd.start_time,
            end: cmd.end_time,
        })
    }

    /// Scheduling view of the running and pending commands
    pub(crate) fn queue_view(&self) -> (Option<QueuedCmd>, Vec<QueuedCmd>) {
        let current = self.queue.current.and_then(|slot| self.queued(slot));
        let pending = self
            .queue
            .pending()
            .filter_map(|slot| self.queued(slot))
            .collect();
        (current, pending)
    }

    fn any_access_active(&self) -> bool {
        self.clients
            .iter()
            .flatten()
            .any(|c| self.timers.is_active(TimerId::RequestAccess(c.id)))
    }

    /// Post a command with scheduling parameters
    pub fn schedule_cmd(
        &mut self,
        client: ClientId,
        op: Arc<RadioOp>,
        params: ScheduleParams,
        callback: Option<CmdCallback>,
        events: EventMask,
    ) -> Result<CmdHandle, RfError> {
        let background = params.background && self.client(client)?.is_ieee();
        if !self.queue.has_room(self.pool.capacity()) {
            return Err(RfError::AllocationExhausted);
        }
        if self.radio_free.client == Some(client) {
            self.radio_free.pending.remove(RadioFreeSource::PREEMPT);
        }

        let other = self.other_client(client);
        let new = NewCmd {
            client,
            priority: params.priority,
            start: op.start_time(),
            end: params.end_time,
            past_trig: op.past_trig(),
        };
        let (current, pending) = self.queue_view();
        let snapshot = Snapshot {
            now: self.current_time(),
            current,
            pending: &pending,
            phy_switching_us: &self.timing.phy_switching_us,
            other,
            other_access_active: other
                .is_some_and(|o| self.timers.is_active(TimerId::RequestAccess(o))),
        };
        let placement = match scheduler::place(&new, &snapshot) {
            Ok(placement) => placement,
            Err(e) => {
                self.radio_free.pending |= RadioFreeSource::CMD_REJECT;
                self.radio_free.client = Some(client);
                log_warn_throttled!(
                    self.reject_log,
                    "{client}: command 0x{:04X} rejected by the scheduler",
                    op.command_no()
                );
                return Err(e);
            }
        };

        let handle = self.queue.next_handle();
        let mut command = Command::new(handle, client, Arc::clone(&op));
        command.priority = params.priority;
        command.end_time = params.end_time;
        command.events = events & !EventMask::INTERNAL;
        command.callback = callback;
        if background {
            command.flags |= CmdFlags::BACKGROUND;
        }
        let slot = self.pool.allocate(command)?;
        self.queue.commit_post(handle);
        self.timers.stop(TimerId::Inactivity(client));
        if let Ok(c) = self.client_mut(client) {
            c.last_posted = Some(handle);
            c.yielded = false;
        }
        debug!("{client}: posted {handle} as {placement:?}");

        match placement {
            Placement::Top => {
                self.timers.stop(TimerId::PowerUp);
                self.queue.push_front(slot);
                if self.queue.current.is_none() {
                    self.kick(client, &op, background);
                }
            }
            Placement::InsertAt(index) => self.queue.insert(index, slot),
            Placement::Preempt(plan) => {
                for &marked in &plan.marked {
                    if let Some(cmd) = self.pool.get_mut(marked) {
                        cmd.flags |= CmdFlags::PREEMPTED;
                    }
                }
                self.radio_free.pending |= RadioFreeSource::PREEMPT;
                self.radio_free.client = Some(plan.client);
                info!("{client}: preempting {} from {}", plan.target, plan.client);
                if let Err(e) = self.abort_cmd(plan.client, Some(plan.target), plan.mode, true) {
                    debug!("Preemption flush of {} failed: {e}", plan.target);
                }
                self.append(client, slot, &op, background);
            }
            Placement::Append => self.append(client, slot, &op, background),
        }
        Ok(handle)
    }

    fn append(&mut self, client: ClientId, slot: SlotId, op: &RadioOp, background: bool) {
        let was_empty = self.queue.is_pending_empty();
        self.queue.push(slot);
        if !was_empty {
            return;
        }
        if self.flags.yield_pd_called && self.flags.radio_active {
            self.flags.yield_pd_cancel = true;
            self.flags.yield_pd_called = false;
        }
        self.kick(client, op, background);
    }

    /// Get a newly queued command moving
    fn kick(&mut self, client: ClientId, op: &RadioOp, background: bool) {
        match self.queue.current {
            None => {
                self.queue.current_bg = None;
                if self.flags.radio_active {
                    self.constraints.set(PowerConstraint::CMD_Q);
                    self.cpe0_isr(CpeInterrupt::empty());
                } else if !self.flags.power_up {
                    if self.flags.power_down {
                        self.flags.restart = true;
                    } else if let Some(delay) = self.dispatch_op_when(op) {
                        debug!("Wakeup scheduled in {delay} us");
                        self.timers.start(TimerId::PowerUp, delay);
                    } else if !self.flags.change_phy {
                        self.fsm.post(FsmEvent::WAKEUP);
                    }
                }
            }
            Some(current) => {
                let current_ieee = self
                    .pool
                    .get(current)
                    .is_some_and(|cmd| self.is_ieee(cmd.client));
                if current_ieee && self.is_ieee(client) && !background {
                    self.fsm.post(FsmEvent::IEEE_INT);
                }
            }
        }
    }

    // cancellation

    /// Cancel (`flush = false`) or flush a command
    ///
    /// Without a handle the client's running command is targeted, or its first
    /// pending one. A running command is stopped through the radio and retires
    /// when the radio reports it done; pending ones retire right away.
    pub fn abort_cmd(
        &mut self,
        client: ClientId,
        handle: Option<CmdHandle>,
        mode: CancelMode,
        flush: bool,
    ) -> Result<(), RfError> {
        self.client(client)?;
        let slot = match handle {
            Some(handle) => {
                let slot = self
                    .pool
                    .lookup(handle)
                    .ok_or(RfError::InvalidHandle(handle.value()))?;
                if self.pool.get(slot).map(|c| c.client) != Some(client) {
                    return Err(RfError::InvalidHandle(handle.value()));
                }
                slot
            }
            None => self
                .queue
                .current
                .filter(|&s| self.pool.get(s).is_some_and(|c| c.client == client))
                .or_else(|| {
                    self.queue
                        .find_first(&self.pool, client)
                        .and_then(|i| self.queue.pending_at(i))
                })
                .ok_or_else(|| RfError::InvalidParams("no command to cancel".into()))?,
        };

        if self.queue.current == Some(slot) {
            let (flag, command) = match mode {
                CancelMode::Graceful => (CmdFlags::STOPPED, CMD_STOP),
                CancelMode::Abrupt => (CmdFlags::ABORTED, CMD_ABORT),
            };
            if let Some(cmd) = self.pool.get_mut(slot) {
                cmd.flags |= flag;
            }
            let status = self.radio.send_direct(direct(command));
            debug!("{client}: stopping running command, CMDSTA 0x{:02X}", status.code());
            if flush {
                self.cancel_pending(client, 0);
            }
            return Ok(());
        }

        let Some(position) = self.queue.position(slot) else {
            return Err(RfError::InvalidParams(
                "command is already finishing".into(),
            ));
        };
        // during power-up the timer polls the crystal instead of waking the radio
        if !self.flags.power_up {
            self.timers.stop(TimerId::PowerUp);
        }
        if flush {
            self.cancel_pending(client, position);
        } else {
            self.queue.remove_if(position, |s| s == slot);
            self.mark_cancelled(slot);
        }
        if !self.flags.power_up {
            self.fsm.post(FsmEvent::LAST_COMMAND_DONE);
        }
        // the stopped wakeup belonged to the old head; an active radio
        // would otherwise sit on the rest of the queue
        if self.flags.radio_active
            && self.fsm.state() == FsmState::Active
            && self.queue.current.is_none()
            && !self.queue.is_pending_empty()
        {
            self.constraints.set(PowerConstraint::CMD_Q);
            self.cpe0_isr(CpeInterrupt::empty());
        }
        Ok(())
    }

    /// Move the pending commands of `client` from `from` onwards to done
    fn cancel_pending(&mut self, client: ClientId, from: usize) {
        let pool = &self.pool;
        let removed = self
            .queue
            .remove_if(from, |s| pool.get(s).is_some_and(|c| c.client == client));
        for slot in removed {
            self.mark_cancelled(slot);
        }
    }

    fn mark_cancelled(&mut self, slot: SlotId) {
        if let Some(cmd) = self.pool.get_mut(slot) {
            cmd.flags |= CmdFlags::CANCELLED;
        }
        self.queue.push_done_by_age(slot, &self.pool);
    }

    // waiting

    pub(crate) fn pend_register(
        &mut self,
        client: ClientId,
        handle: CmdHandle,
        mask: EventMask,
    ) -> Result<PendOutcome, RfError> {
        self.client(client)?;
        if self.pool.lookup(handle).is_none() {
            return Ok(PendOutcome::Done(EventMask::LAST_CMD_DONE));
        }
        let (tx, rx) = oneshot::channel();
        self.pend_waiters.push(PendWaiter { handle, mask, tx });
        Ok(PendOutcome::Wait(rx))
    }

    /// Wake the waiters of `handle`; intermediate events only wake waiters
    /// that asked for them
    pub(crate) fn resolve_waiters(&mut self, handle: CmdHandle, events: EventMask, retired: bool) {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pend_waiters)
            .into_iter()
            .partition(|w| w.handle == handle && (retired || w.mask.intersects(events)));
        self.pend_waiters = waiting;
        for waiter in ready {
            let _ = waiter.tx.send(events);
        }
    }

    pub(crate) fn resolve_power_down_waiters(&mut self) {
        for tx in self.power_down_waiters.drain(..) {
            let _ = tx.send(());
        }
    }

    // radio sharing

    /// Give up the radio until the next post
    pub fn yield_radio(&mut self, client: ClientId) -> Result<(), RfError> {
        self.client(client)?;
        self.flags.rat_sync_on_yield = true;
        self.timers.stop(TimerId::RequestAccess(client));

        if !self.flags.radio_active && !self.radio_free.pending.is_empty() && self.queue.all_done()
        {
            self.issue_radio_free(RadioFreeSource::all());
        }

        if self.queue.all_done() {
            self.timers.stop(TimerId::Inactivity(client));
            if self.flags.radio_active {
                self.flags.yield_pd_called = true;
            }
            let _ = self.release_constraint(PowerConstraint::CMD_Q);
        } else {
            self.client_mut(client)?.yielded = true;
        }
        Ok(())
    }

    /// Reserve the radio for a window of time
    pub fn request_access(&mut self, client: ClientId, params: AccessParams) -> Result<(), RfError> {
        self.client(client)?;
        let duration_us = ticks_to_us(params.duration);
        if duration_us > REQ_ACCESS_MAX_DUR_US || params.priority != Priority::Highest {
            return Err(RfError::InvalidParams(
                "access needs Highest priority and at most one second".into(),
            ));
        }
        if self.any_access_active() {
            self.deny_access(client);
            return Err(RfError::Busy);
        }

        let preemption = match self.other_client(client) {
            Some(other) => {
                let (current, pending) = self.queue_view();
                let snapshot = Snapshot {
                    now: self.current_time(),
                    current,
                    pending: &pending,
                    phy_switching_us: &self.timing.phy_switching_us,
                    other: Some(other),
                    other_access_active: false,
                };
                scheduler::preemption(&snapshot, other, params.priority)
            }
            None => Preemption::Unopposed,
        };

        match preemption {
            Preemption::Denied => {
                self.deny_access(client);
                Err(RfError::Busy)
            }
            Preemption::Unopposed => {
                self.timers
                    .start(TimerId::RequestAccess(client), duration_us.max(1));
                Ok(())
            }
            Preemption::Granted(plan) => {
                self.timers
                    .start(TimerId::RequestAccess(client), duration_us.max(1));
                for &marked in &plan.marked {
                    if let Some(cmd) = self.pool.get_mut(marked) {
                        cmd.flags |= CmdFlags::PREEMPTED;
                    }
                }
                if let Err(e) = self.abort_cmd(plan.client, Some(plan.target), plan.mode, true) {
                    debug!("Access flush of {} failed: {e}", plan.target);
                }
                Ok(())
            }
        }
    }

    fn deny_access(&mut self, client: ClientId) {
        self.radio_free.pending |= RadioFreeSource::REQ_ACCESS;
        self.radio_free.client = Some(client);
    }

    /// Clear notification sources; notify the client once none remain
    pub(crate) fn issue_radio_free(&mut self, sources: RadioFreeSource) {
        self.radio_free.pending.remove(sources);
        if !self.radio_free.pending.is_empty() || self.any_access_active() {
            return;
        }
        let Some(target) = self.radio_free.client.take() else {
            return;
        };
        let Ok(client) = self.client(target) else {
            return;
        };

        if client
            .params
            .client_event_mask
            .contains(ClientEventMask::RADIO_FREE)
            && client.params.client_event_callback.is_some()
        {
            self.notify_client_event(target, ClientEvent::RadioFree);
        } else if let Some(cb) = client.params.power_callback.clone() {
            self.outbox.push_back(Action::Notify(Box::new(move || {
                cb(target, EventMask::RADIO_FREE)
            })));
        }
    }

    // power constraints

    /// Release a power constraint, asking the FSM to power down once none remain
    pub(crate) fn release_constraint(&mut self, constraint: PowerConstraint) -> Result<(), RfError> {
        if self.constraints.release(constraint)? == Release::PowerDown {
            self.fsm.post(FsmEvent::POWER_DOWN);
        }
        Ok(())
    }

    // control and introspection

    pub fn control(&mut self, client: ClientId, control: Control) -> Result<(), RfError> {
        match control {
            Control::SetInactivityTimeout(timeout) => {
                self.client_mut(client)?.params.inactivity_timeout_us = timeout;
            }
            Control::UpdateSetupCmd => {
                let c = self.client_mut(client)?;
                c.update_setup = true;
                c.params.power_up_duration_us += ANALOG_CFG_TIME_US;
            }
            Control::SetPowerUpDurationMargin(margin) => {
                self.client_mut(client)?.params.power_up_duration_margin_us = margin;
            }
            Control::SetRatRtcErrTol(tolerance) => {
                self.client(client)?;
                self.timing.err_tol_us = tolerance;
            }
            Control::SetPowerManagement(enable) => {
                self.client(client)?;
                if enable {
                    let _ = self.release_constraint(PowerConstraint::DISABLE_PM);
                } else {
                    self.constraints.set(PowerConstraint::DISABLE_PM);
                }
            }
        }
        Ok(())
    }

    pub fn get_info(&self, client: ClientId, kind: InfoKind) -> Result<InfoValue, RfError> {
        self.client(client)?;
        match kind {
            InfoKind::CurrentCmd => Ok(InfoValue::CurrentCmd(
                self.queue
                    .current
                    .and_then(|slot| self.pool.get(slot))
                    .map(|cmd| cmd.handle),
            )),
            InfoKind::AvailRatChannels => {
                if !self.rat.is_known() {
                    return Err(RfError::InvalidParams(
                        "RAT channel map is not known before the first power-up".into(),
                    ));
                }
                Ok(InfoValue::AvailRatChannels(self.rat.available()))
            }
            InfoKind::RadioActive => Ok(InfoValue::RadioActive(self.flags.radio_active)),
            InfoKind::ScheduleMap => Ok(InfoValue::ScheduleMap(self.schedule_map())),
        }
    }

    /// Timing of the running and pending commands
    pub fn schedule_map(&self) -> Vec<ScheduleMapEntry> {
        let (current, pending) = self.queue_view();
        current
            .into_iter()
            .map(|cmd| (cmd, true))
            .chain(pending.into_iter().map(|cmd| (cmd, false)))
            .map(|(cmd, is_current)| ScheduleMapEntry {
                client: cmd.client,
                handle: cmd.handle,
                priority: cmd.priority,
                start_time: cmd.start,
                end_time: cmd.end,
                current: is_current,
            })
            .collect()
    }

    /// Operation of a live command
    pub fn get_cmd_op(&self, handle: CmdHandle) -> Option<Arc<RadioOp>> {
        self.pool
            .lookup(handle)
            .and_then(|slot| self.pool.get(slot))
            .map(|cmd| Arc::clone(&cmd.op))
    }

    pub fn fsm_state(&self) -> FsmState {
        self.fsm.state()
    }

    pub fn fsm_trace(&self) -> Vec<FsmTransition> {
        self.fsm.trace()
    }

    /// Current RAT time, estimated from the RTC while the radio is off
    pub fn current_time(&self) -> u32 {
        if self.flags.radio_active || self.flags.change_phy {
            self.radio.rat_count()
        } else {
            rtc_to_rat(self.radio.rtc_now(), self.timing.rat0)
        }
    }

    // direct and immediate commands

    fn check_direct_access(&self, client: ClientId) -> Result<(), RfError> {
        self.client(client)?;
        if self.current_client != Some(client) {
            return Err(RfError::InvalidParams(
                "only the client owning the radio may send direct commands".into(),
            ));
        }
        if !self.flags.radio_active {
            return Err(RfError::RadioInactive);
        }
        Ok(())
    }

    pub fn run_direct_cmd(&mut self, client: ClientId, command: u32) -> Result<CmdStatus, RfError> {
        self.check_direct_access(client)?;
        cmdsta_result(self.radio.send_direct(command))
    }

    pub fn run_immediate_cmd(&mut self, client: ClientId, op: &RadioOp) -> Result<CmdStatus, RfError> {
        self.check_direct_access(client)?;
        cmdsta_result(self.radio.send_immediate(op))
    }

    pub fn get_rssi(&mut self, client: ClientId) -> Result<i8, RfError> {
        let status = self.run_direct_cmd(client, direct(CMD_GET_RSSI))?;
        Ok((status.0 >> 16) as u8 as i8)
    }

    // notifications

    pub(crate) fn notify_error(&mut self, client: ClientId, handle: Option<CmdHandle>, err: RfError) {
        let callback = self
            .client(client)
            .ok()
            .and_then(|c| c.params.error_callback.clone());
        self.outbox.push_back(Action::Notify(Box::new(move || match callback {
            Some(cb) => cb(client, handle, &err),
            None => error!("{client}: {err}"),
        })));
    }

    pub(crate) fn notify_power(&mut self, client: ClientId, events: EventMask) {
        if let Some(cb) = self.client(client).ok().and_then(|c| c.params.power_callback.clone()) {
            self.outbox
                .push_back(Action::Notify(Box::new(move || cb(client, events))));
        }
    }

    pub(crate) fn notify_client_event(&mut self, client: ClientId, event: ClientEvent) {
        let Ok(c) = self.client(client) else {
            return;
        };
        if !c.params.client_event_mask.contains(event.mask()) {
            return;
        }
        if let Some(cb) = c.params.client_event_callback.clone() {
            self.outbox
                .push_back(Action::Notify(Box::new(move || cb(client, event))));
        }
    }

    pub(crate) fn notify_command(
        &mut self,
        client: ClientId,
        handle: CmdHandle,
        callback: Option<CmdCallback>,
        events: EventMask,
    ) {
        if let Some(cb) = callback {
            self.outbox
                .push_back(Action::Notify(Box::new(move || cb(client, handle, events))));
        }
    }

    pub(crate) fn push_action(&mut self, action: Action) {
        self.outbox.push_back(action);
    }

    // retirement

    /// Free the slot of a command whose callback has run
    pub fn complete_retire(&mut self, retirement: &Retirement) {
        let Retirement {
            slot,
            client,
            handle,
            events,
            ..
        } = *retirement;
        self.resolve_waiters(handle, events, true);
        self.pool.release(slot);
        self.queue.commit_done();
        debug!("{client}: retired {handle} with {events:?}");

        if !self.queue.all_done() {
            return;
        }
        let yielded = self.client(client).is_ok_and(|c| c.yielded);
        let mut sources = RadioFreeSource::PREEMPT | RadioFreeSource::CMD_REJECT;
        if yielded {
            sources |= RadioFreeSource::REQ_ACCESS;
        }
        self.issue_radio_free(sources);

        match self.inactivity_after(client) {
            None => {}
            Some(0) => {
                let _ = self.release_constraint(PowerConstraint::CMD_Q);
            }
            Some(timeout) => self.timers.start(TimerId::Inactivity(client), timeout),
        }
    }

    /// Inactivity time once everything retired; `None` keeps the radio on
    ///
    /// Yielded clients count as zero and lose their yield.
    fn inactivity_after(&mut self, retiring: ClientId) -> Option<u32> {
        let mut timeout = Some(0u32);
        for client in self.clients.iter_mut().flatten() {
            let own = if client.yielded {
                Some(0)
            } else {
                client.params.inactivity_timeout_us
            };
            if client.id == retiring || !client.yielded {
                timeout = match (timeout, own) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };
            }
            client.yielded = false;
        }
        timeout
    }

    // interrupts and deferred work

    /// Entry point of every hardware, timer and power notification
    pub fn on_interrupt(&mut self, irq: Interrupt) {
        match irq {
            Interrupt::Cpe0(flags) => self.cpe0_isr(flags),
            Interrupt::Hw(flags) => self.hw_isr(flags),
            Interrupt::Timer(id) => self.timer_expired(id),
            Interrupt::Power(PowerEvent::AwakeStandby) => self.wakeup_notification(),
        }
    }

    /// Next piece of work for the unlocked side, running FSM passes until
    /// one produces something
    pub fn next_action(&mut self) -> Option<Action> {
        loop {
            if let Some(action) = self.outbox.pop_front() {
                return Some(action);
            }
            if !self.fsm.pending().is_empty() {
                self.run_fsm();
                continue;
            }
            if !self.hw_int_event.is_empty() {
                self.swi_hw();
                continue;
            }
            return None;
        }
    }

    pub fn has_work(&self) -> bool {
        !self.outbox.is_empty() || !self.fsm.pending().is_empty() || !self.hw_int_event.is_empty()
    }

    /// True when the chained synthesizer op failed to program
    pub(crate) fn fs_error(&self) -> bool {
        self.fs_chained
            .as_ref()
            .is_some_and(|op| op.status() == op_status::ERROR_SYNTH_PROG)
    }

    /// Log state that should never be reached
    pub(crate) fn unexpected(&self, what: &str) {
        warn!("Unexpected {what} in state {:?}", self.fsm.state());
    }
}

/// Map a CMDSTA word to the API result
pub(crate) fn cmdsta_result(status: CmdStatus) -> Result<CmdStatus, RfError> {
    if status.is_done() {
        Ok(status)
    } else if status.is_busy() {
        Err(RfError::HardwareBusy)
    } else {
        Err(RfError::CommandError(status.code()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmdsta_mapping() {
        assert_eq!(cmdsta_result(CmdStatus::done()), Ok(CmdStatus::done()));
        assert_eq!(cmdsta_result(CmdStatus(0x89)), Err(RfError::HardwareBusy));
        assert_eq!(cmdsta_result(CmdStatus(0x85)), Err(RfError::HardwareBusy));
        assert_eq!(cmdsta_result(CmdStatus(0x81)), Err(RfError::CommandError(0x81)));
    }
}
