//! # Radio Power State Machine
//!
//! The radio moves through six states:
//!
//! ```text
//! PowerUp --Wakeup--> Setup --PowerStep--> Active <--> ChangePhy
//!    ^                  |                   |  ^
//!    |                  +--> XoscWait ------+  |
//!    +------------- PowerDown <----------------+
//! ```
//!
//! Events are bits in an [`FsmEvent`] set posted by API calls, interrupt
//! handlers and timers. One pass of the machine hands the whole set to the
//! handler of the current state. The transient states keep what they do not
//! handle and re-post it on the next transition; `Active` handles one event
//! class per pass and re-posts the rest.

use std::collections::VecDeque;
use std::sync::Arc;

use bitflags::bitflags;
use log::{debug, info, warn};
use serde::Serialize;

use crate::constants::{
    COMB_XTAL_DRIFT_BITS_SHIFT, DEFAULT_POWER_UP_TIME_US, MIN_POWER_UP_TIME_US,
    XOSC_HF_SWITCH_CHECK_PERIOD_US, BG_CMD_START_CHECK_PERIOD_US,
};
use crate::error::RfError;
use crate::rfcore::core::{RadioFreeSource, RfCore};
use crate::rfcore::hal::{ClockSource, PatchTarget, PowerResource, SleepConstraint, TimerId};
use crate::rfcore::mailbox::{
    direct_1byte, direct_2byte, is_fs_command, op_status, CpeInterrupt, CMD_BUS_REQUEST,
    CMD_RAM_CLK_CTRL, CMD_SYNC_START_RAT, CMD_SYNC_STOP_RAT, PATCH_RAM_CLOCKS,
};
use crate::rfcore::pool::CmdFlags;
use crate::rfcore::timebase::rtc_delta_us;
use crate::rfcore::types::{AnalogCfg, ClientEvent, ClientId, EventMask, RadioOp};

/// States of the power FSM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FsmState {
    /// Radio off, waiting for a wakeup
    PowerUp,
    /// Radio booting, patches and setup being applied
    Setup,
    /// Waiting for the high frequency crystal
    XoscWait,
    /// Radio on, dispatching commands
    Active,
    /// Radio reconfiguring for another client
    ChangePhy,
    /// Radio stopping its timer before power-off
    PowerDown,
}

bitflags! {
    /// Events of the power FSM
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FsmEvent: u16 {
        /// A command reached the done queue
        const LAST_COMMAND_DONE = 1 << 1;
        /// Power the radio up
        const WAKEUP = 1 << 2;
        /// Power the radio down
        const POWER_DOWN = 1 << 3;
        /// The radio finished a step of a power sequence
        const POWER_STEP = 1 << 4;
        /// Start a PHY switch
        const INIT_CHANGE_PHY = 1 << 10;
        /// Apply the new client's setup
        const CHANGE_PHY1 = 1 << 11;
        /// The new client's setup finished
        const CHANGE_PHY2 = 1 << 12;
        /// Modem software event
        const HW_INT = 1 << 13;
        /// Intermediate command event
        const CPE_INT = 1 << 14;
        /// IEEE 802.15.4 foreground command waiting
        const IEEE_INT = 1 << 15;
    }
}

/// Consumer of command processor interrupts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cpe0Handler {
    /// Power sequence steps
    PowerFsm,
    /// Command completion and dispatch
    Active,
    /// PHY switch completion
    ChangePhy,
}

/// One entry of the transition history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FsmTransition {
    pub from: FsmState,
    pub to: FsmState,
}

/// Returns true for the edges of the state diagram
pub fn is_valid_transition(from: FsmState, to: FsmState) -> bool {
    use FsmState::*;
    matches!(
        (from, to),
        (PowerUp, Setup)
            | (Setup, Active)
            | (Setup, XoscWait)
            | (XoscWait, Active)
            | (Active, ChangePhy)
            | (Active, PowerDown)
            | (ChangePhy, Active)
            | (PowerDown, PowerUp)
    )
}

/// State, posted events and bounded history of the FSM
#[derive(Debug)]
pub struct Fsm {
    state: FsmState,
    pending: FsmEvent,
    deferred: FsmEvent,
    trace: VecDeque<FsmTransition>,
    depth: usize,
}

impl Fsm {
    pub fn new(depth: usize) -> Self {
        Self {
            state: FsmState::PowerUp,
            pending: FsmEvent::empty(),
            deferred: FsmEvent::empty(),
            trace: VecDeque::with_capacity(depth),
            depth,
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    pub fn post(&mut self, events: FsmEvent) {
        self.pending |= events;
    }

    pub fn pending(&self) -> FsmEvent {
        self.pending
    }

    pub fn take_pending(&mut self) -> FsmEvent {
        std::mem::replace(&mut self.pending, FsmEvent::empty())
    }

    /// Keep events for the next state
    pub fn defer(&mut self, events: FsmEvent) {
        self.deferred |= events;
    }

    /// Enter `to`, re-posting deferred events
    pub fn transition(&mut self, to: FsmState) {
        let from = self.state;
        if !is_valid_transition(from, to) {
            warn!("FSM transition {from:?} -> {to:?} is not in the state diagram");
        }
        debug!("FSM {from:?} -> {to:?}");
        self.state = to;
        if self.depth > 0 {
            if self.trace.len() == self.depth {
                self.trace.pop_front();
            }
            self.trace.push_back(FsmTransition { from, to });
        }
        self.pending |= std::mem::replace(&mut self.deferred, FsmEvent::empty());
    }

    /// Transition history, oldest first
    pub fn trace(&self) -> Vec<FsmTransition> {
        self.trace.iter().copied().collect()
    }
}

impl RfCore {
    /// Run one pass of the state machine over the posted events
    pub(crate) fn run_fsm(&mut self) {
        let events = self.fsm.take_pending();
        match self.fsm.state() {
            FsmState::PowerUp => self.state_power_up(events),
            FsmState::Setup => self.state_setup(events),
            FsmState::XoscWait => self.state_xosc_wait(events),
            FsmState::Active => self.state_active(events),
            FsmState::ChangePhy => self.state_change_phy(events),
            FsmState::PowerDown => self.state_power_down(events),
        }
    }

    fn state_power_up(&mut self, events: FsmEvent) {
        if events.contains(FsmEvent::LAST_COMMAND_DONE) {
            self.begin_retire();
            let rest = events - FsmEvent::LAST_COMMAND_DONE;
            if self.queue.has_done() {
                self.fsm.post(rest | FsmEvent::LAST_COMMAND_DONE);
            } else if rest.contains(FsmEvent::WAKEUP) || !self.queue.is_pending_empty() {
                self.timers.stop(TimerId::PowerUp);
                self.fsm.post(FsmEvent::WAKEUP);
            }
        } else if events.contains(FsmEvent::WAKEUP) {
            self.power_up();
        }
    }

    /// Start the boot sequence for the client at the head of the queue
    fn power_up(&mut self) {
        let head_client = self
            .queue
            .peek()
            .and_then(|slot| self.pool.get(slot))
            .map(|cmd| cmd.client);
        if let Some(next) = head_client {
            if self.current_client.is_some_and(|c| c != next) {
                self.notify_client_event(next, ClientEvent::SwitchClientEntered);
            }
            self.current_client = Some(next);
        }
        let Some(id) = self.current_client else {
            debug!("Wakeup without a client, staying off");
            return;
        };
        let Ok(client) = self.client(id) else {
            return;
        };
        let kind = client.mode.kind.as_u8();
        let power_up_xosc = client.params.power_up_xosc;
        let has_ram_patches = client.mode.has_ram_patches();

        if !self.flags.need_flash_held {
            self.power.set_constraint(SleepConstraint::NeedFlashInIdle);
            self.flags.need_flash_held = true;
        }
        self.timing.rtc_powerup_start = self.radio.rtc_now();

        if !self.radio.select_mode(kind) {
            self.notify_error(id, None, RfError::InvalidMode(kind));
        }

        if !self.flags.core_power_held {
            self.power.set_constraint(SleepConstraint::StandbyDisallow);
            self.power.set_dependency(PowerResource::RfCore);
            self.flags.core_power_held = true;
        }
        self.flags.power_up = true;
        if (!power_up_xosc || !self.flags.started) && !self.flags.xosc_dep_held {
            self.power.set_dependency(PowerResource::XoscHf);
            self.flags.xosc_dep_held = true;
        }
        if has_ram_patches {
            self.radio
                .send_direct(direct_2byte(CMD_RAM_CLK_CTRL, PATCH_RAM_CLOCKS));
        }

        info!("Powering up the radio for {id}");
        self.radio.enable_cpe_interrupts(
            CpeInterrupt::LAST_COMMAND_DONE
                | CpeInterrupt::BOOT_DONE
                | CpeInterrupt::LAST_FG_COMMAND_DONE,
        );
        self.cpe0_handler = Cpe0Handler::PowerFsm;
        self.fsm.transition(FsmState::Setup);
        self.radio.clock_enable();
    }

    /// Load the client's patches into the radio
    fn apply_patches(&mut self, id: ClientId) {
        let Ok(client) = self.client(id) else {
            return;
        };
        let mode = client.mode.clone();
        if let Some(image) = &mode.cpe_patch {
            self.radio.load_patch(PatchTarget::Cpe, image);
        }
        if let Some(image) = &mode.mce_patch {
            self.radio.load_patch(PatchTarget::Mce, image);
        }
        if let Some(image) = &mode.rfe_patch {
            self.radio.load_patch(PatchTarget::Rfe, image);
        }
        if mode.has_ram_patches() {
            self.radio.send_direct(direct_2byte(CMD_RAM_CLK_CTRL, 0));
        }
    }

    /// The client's setup chain, cut before any RAT sync or synthesizer op
    fn setup_ops(&self, id: ClientId) -> Vec<Arc<RadioOp>> {
        let Ok(client) = self.client(id) else {
            return Vec::new();
        };
        client
            .setup
            .op
            .chain()
            .into_iter()
            .take_while(|op| {
                let no = op.command_no();
                !is_fs_command(no) && no != CMD_SYNC_START_RAT && no != CMD_SYNC_STOP_RAT
            })
            .collect()
    }

    /// Synthesizer op to chain behind the setup, unless the queue starts
    /// with one of its own
    fn fs_to_chain(&self, id: ClientId) -> Option<Arc<RadioOp>> {
        if self.head_is_fs() {
            return None;
        }
        self.client(id)
            .ok()
            .and_then(|c| c.fs_cache.as_ref())
            .map(|op| Arc::new(op.duplicate()))
    }

    fn head_is_fs(&self) -> bool {
        self.queue
            .peek()
            .and_then(|slot| self.pool.get(slot))
            .is_some_and(|cmd| is_fs_command(cmd.op.command_no()))
    }

    fn state_setup(&mut self, events: FsmEvent) {
        if !events.contains(FsmEvent::POWER_STEP) {
            self.fsm.defer(events);
            return;
        }
        self.fsm.defer(events - FsmEvent::POWER_STEP);
        let Some(id) = self.current_client else {
            self.unexpected("power step without a client");
            return;
        };

        self.apply_patches(id);
        self.radio.send_direct(direct_1byte(CMD_BUS_REQUEST, 1));
        self.radio.set_vco_ldo(true);

        let started = self.flags.started;
        let analog = match self.client_mut(id) {
            Ok(c) if !started || c.update_setup => {
                c.update_setup = false;
                AnalogCfg::Update
            }
            _ => AnalogCfg::NoUpdate,
        };
        if let Ok(client) = self.client(id) {
            let setup = Arc::clone(&client.setup.op);
            self.radio.prepare_setup(&setup, analog);
        }

        let mut chain = self.setup_ops(id);
        let sync_start = Arc::new(
            RadioOp::new(CMD_SYNC_START_RAT).with_payload(self.timing.rat0.to_le_bytes().to_vec()),
        );
        let mut tail = vec![sync_start];
        if self.head_is_fs() {
            self.timing.rtc_powerup_start = 0;
        }
        self.fs_chained = self.fs_to_chain(id);
        if let Some(fs) = &self.fs_chained {
            tail.push(Arc::clone(fs));
        }

        if self.flags.xosc_switch_held && self.radio.xosc_hf_ready() {
            self.radio.switch_to_xosc_hf();
        }

        if self.radio.hf_clock_source() != ClockSource::XoscHf {
            self.deferred_chain = tail;
            self.radio.submit(&chain);
            self.fsm.transition(FsmState::XoscWait);
        } else {
            chain.extend(tail);
            self.radio.submit(&chain);
            self.fsm.transition(FsmState::Active);
        }
    }

    fn state_xosc_wait(&mut self, events: FsmEvent) {
        let step = FsmEvent::POWER_STEP | FsmEvent::WAKEUP;
        if !events.intersects(step) {
            self.fsm.defer(events);
            return;
        }
        self.fsm.defer(events - step);

        if self.flags.xosc_switch_held && self.radio.xosc_hf_ready() {
            self.radio.switch_to_xosc_hf();
        }
        if self.radio.hf_clock_source() == ClockSource::XoscHf {
            self.fsm.transition(FsmState::Active);
            let chain = std::mem::take(&mut self.deferred_chain);
            self.radio.submit(&chain);
        } else {
            self.timers
                .start(TimerId::PowerUp, XOSC_HF_SWITCH_CHECK_PERIOD_US);
        }
    }

    fn state_active(&mut self, events: FsmEvent) {
        if events.contains(FsmEvent::CPE_INT) {
            self.deliver_intermediate();
            self.fsm.post(events - FsmEvent::CPE_INT);
        } else if events.contains(FsmEvent::POWER_STEP) {
            self.power_up_finished();
            self.fsm.post(events - FsmEvent::POWER_STEP);
        } else if events.contains(FsmEvent::LAST_COMMAND_DONE) {
            self.begin_retire();
            let mut rest = events - FsmEvent::LAST_COMMAND_DONE;
            if self.queue.has_done() {
                rest |= FsmEvent::LAST_COMMAND_DONE;
            }
            self.fsm.post(rest);
        } else if events.contains(FsmEvent::INIT_CHANGE_PHY) {
            self.init_change_phy();
            self.fsm.post(events - FsmEvent::INIT_CHANGE_PHY);
        } else if events.contains(FsmEvent::POWER_DOWN) {
            let rest = events - FsmEvent::POWER_DOWN;
            if self.flags.yield_pd_cancel {
                self.flags.yield_pd_cancel = false;
            } else if self.queue.current.is_some() || !self.constraints.is_empty() {
                debug!("Stale power-down ignored");
            } else {
                self.begin_power_down();
            }
            self.fsm.post(rest);
        } else if events.contains(FsmEvent::HW_INT) {
            self.deliver_modem_event();
            self.fsm.post(events - FsmEvent::HW_INT);
        } else if events.contains(FsmEvent::IEEE_INT) {
            self.foreground_handover();
            self.fsm.post(events - FsmEvent::IEEE_INT);
        }
    }

    /// Hand the accumulated intermediate events to the command callback
    fn deliver_intermediate(&mut self) {
        let Some(slot) = self.queue.current_cb.take() else {
            return;
        };
        let Some(cmd) = self.pool.get_mut(slot) else {
            return;
        };
        if cmd.rfifg.contains(EventMask::LAST_CMD_DONE) {
            return;
        }
        let events = std::mem::take(&mut cmd.rfifg);
        let (client, handle, callback) = (cmd.client, cmd.handle, cmd.callback.clone());
        if events.is_empty() {
            return;
        }
        self.notify_command(client, handle, callback, events);
        self.resolve_waiters(handle, events, false);
    }

    fn deliver_modem_event(&mut self) {
        let Some(cmd) = self.queue.current.and_then(|slot| self.pool.get(slot)) else {
            return;
        };
        let (client, handle, callback) = (cmd.client, cmd.handle, cmd.callback.clone());
        self.notify_command(client, handle, callback, EventMask::MDM_SOFT);
        self.resolve_waiters(handle, EventMask::MDM_SOFT, false);
    }

    /// Second step after the boot chain: measure and announce the power-up
    fn power_up_finished(&mut self) {
        if self.flags.need_flash_held {
            self.power.release_constraint(SleepConstraint::NeedFlashInIdle);
            self.flags.need_flash_held = false;
        }
        let Some(id) = self.current_client else {
            return;
        };
        if let Ok(client) = self.client(id) {
            let setup = Arc::clone(&client.setup.op);
            self.radio.prepare_setup(&setup, AnalogCfg::NoUpdate);
        }

        if self.timing.rtc_powerup_start != 0 {
            let measured = rtc_delta_us(self.timing.rtc_powerup_start, self.radio.rtc_now());
            if let Ok(client) = self.client_mut(id) {
                let duration = measured + client.params.power_up_duration_margin_us;
                client.params.power_up_duration_us =
                    if (MIN_POWER_UP_TIME_US..=DEFAULT_POWER_UP_TIME_US).contains(&duration) {
                        duration
                    } else {
                        DEFAULT_POWER_UP_TIME_US
                    };
                debug!("{id}: powerup took {measured} us");
            }
        }

        if self.fs_error() {
            self.notify_error(id, None, RfError::SynthProgrammingError);
            if self.queue.is_pending_empty() {
                self.fsm.post(FsmEvent::LAST_COMMAND_DONE);
            } else {
                self.cpe0_isr(CpeInterrupt::empty());
            }
        }
        self.notify_power(id, EventMask::POWER_UP);
    }

    fn init_change_phy(&mut self) {
        let next = self
            .queue
            .peek()
            .and_then(|slot| self.pool.get(slot))
            .map(|cmd| cmd.client);
        if let Some(next) = next {
            if let Some(previous) = self.current_client {
                self.timers.stop(TimerId::Inactivity(previous));
            }
            info!("Switching the radio to {next}");
            self.current_client = Some(next);
            self.timing.rtc_switch_start = self.radio.rtc_now();
            self.fsm.transition(FsmState::ChangePhy);
            self.fsm.post(FsmEvent::CHANGE_PHY1);
        }
        self.flags.yield_pd_cancel = false;
    }

    fn state_change_phy(&mut self, events: FsmEvent) {
        if events.contains(FsmEvent::CHANGE_PHY1) {
            self.change_phy_setup();
            self.fsm.defer(events - FsmEvent::CHANGE_PHY1);
        } else if events.contains(FsmEvent::CHANGE_PHY2) {
            self.fsm.defer(events - FsmEvent::CHANGE_PHY2);
            self.change_phy_finished();
        } else {
            self.fsm.defer(events);
        }
    }

    fn change_phy_setup(&mut self) {
        let Some(id) = self.current_client else {
            return;
        };
        self.flags.radio_active = false;
        self.flags.change_phy = true;
        self.notify_client_event(id, ClientEvent::SwitchClientEntered);
        self.cpe0_handler = Cpe0Handler::ChangePhy;

        let has_ram_patches = self.client(id).is_ok_and(|c| c.mode.has_ram_patches());
        if has_ram_patches {
            self.radio
                .send_direct(direct_2byte(CMD_RAM_CLK_CTRL, PATCH_RAM_CLOCKS));
        }
        self.radio.reset_cpe_patch();
        self.apply_patches(id);
        self.radio.send_direct(direct_1byte(CMD_BUS_REQUEST, 1));

        if let Ok(client) = self.client(id) {
            let setup = Arc::clone(&client.setup.op);
            self.radio.prepare_setup(&setup, AnalogCfg::Update);
        }

        let mut chain = self.setup_ops(id);
        if self.head_is_fs() {
            self.timing.rtc_switch_start = 0;
        }
        self.fs_chained = self.fs_to_chain(id);
        if let Some(fs) = &self.fs_chained {
            chain.push(Arc::clone(fs));
        }
        self.radio.submit(&chain);
    }

    fn change_phy_finished(&mut self) {
        let Some(id) = self.current_client else {
            return;
        };
        if self.fs_error() {
            self.notify_error(id, None, RfError::SynthProgrammingError);
        }
        self.cpe0_handler = Cpe0Handler::Active;
        self.flags.change_phy = false;
        self.flags.radio_active = true;

        if let Ok(client) = self.client_mut(id) {
            client.update_setup = false;
            let setup = Arc::clone(&client.setup.op);
            self.radio.prepare_setup(&setup, AnalogCfg::NoUpdate);
        }
        if self.timing.rtc_switch_start != 0 {
            let switched = rtc_delta_us(self.timing.rtc_switch_start, self.radio.rtc_now());
            self.timing.phy_switching_us[id.index()] = switched;
            debug!("{id}: PHY switch took {switched} us");
        }
        self.timing.rtc_switch_start = 0;

        self.fsm.transition(FsmState::Active);
        self.cpe0_isr(CpeInterrupt::empty());
    }

    /// Park a started background command so a foreground one can run
    fn foreground_handover(&mut self) {
        let Some(current) = self.queue.current else {
            return;
        };
        let head_foreground = self
            .queue
            .peek()
            .and_then(|slot| self.pool.get(slot))
            .is_some_and(|cmd| self.is_ieee(cmd.client) && !cmd.flags.contains(CmdFlags::BACKGROUND));
        let Some(bg) = self.pool.get(current) else {
            return;
        };
        if !head_foreground || !bg.flags.contains(CmdFlags::BACKGROUND) {
            return;
        }
        if op_status::is_waiting(bg.op.status()) {
            self.timers
                .start(TimerId::BackgroundStart, BG_CMD_START_CHECK_PERIOD_US);
            return;
        }
        debug!("Background command parked for a foreground command");
        self.queue.current_bg = Some(current);
        self.queue.current = None;
        self.cpe0_isr(CpeInterrupt::empty());
    }

    /// Start the power-down sequence, stopping the RAT when needed
    pub(crate) fn begin_power_down(&mut self) {
        info!("Powering down the radio");
        self.flags.radio_active = false;
        self.flags.power_down = true;
        self.fsm.transition(FsmState::PowerDown);
        self.radio.set_vco_ldo(false);
        self.cpe0_handler = Cpe0Handler::PowerFsm;

        let active_us = rtc_delta_us(self.timing.rtc_powerup_start, self.radio.rtc_now());
        let drift_budget = self.timing.err_tol_us << COMB_XTAL_DRIFT_BITS_SHIFT;
        if !self.flags.started || active_us > drift_budget || self.flags.rat_sync_on_yield {
            self.flags.started = true;
            self.flags.rat_sync_on_yield = false;
            let stop = Arc::new(RadioOp::new(CMD_SYNC_STOP_RAT));
            self.sync_stop_op = Some(Arc::clone(&stop));
            self.radio.submit(&[stop]);
        } else {
            self.finish_power_down();
        }
    }

    fn state_power_down(&mut self, events: FsmEvent) {
        let handled =
            FsmEvent::POWER_STEP | FsmEvent::LAST_COMMAND_DONE | FsmEvent::WAKEUP;
        self.fsm.defer(events - handled);
        if events.contains(FsmEvent::WAKEUP) {
            self.flags.restart = true;
        }
        if events.contains(FsmEvent::LAST_COMMAND_DONE) {
            self.begin_retire();
            if self.queue.has_done() {
                self.fsm.post(FsmEvent::LAST_COMMAND_DONE);
            }
        }
        if events.contains(FsmEvent::POWER_STEP) {
            self.finish_power_down();
        }
    }

    fn finish_power_down(&mut self) {
        if let Some(stop) = self.sync_stop_op.take() {
            self.timing.rat0 = stop.result();
        }
        self.timing.rtc_powerup_start = 0;
        self.radio.synth_power_down();
        self.radio.clock_disable();

        if self.flags.core_power_held {
            self.power.release_constraint(SleepConstraint::StandbyDisallow);
            self.power.release_dependency(PowerResource::RfCore);
            self.flags.core_power_held = false;
        }
        if self.flags.need_flash_held {
            self.power.release_constraint(SleepConstraint::NeedFlashInIdle);
            self.flags.need_flash_held = false;
        }
        let keep_xosc = self
            .current_client
            .and_then(|id| self.client(id).ok())
            .is_some_and(|c| c.params.power_up_xosc);
        if !keep_xosc && self.flags.xosc_dep_held {
            self.power.release_dependency(PowerResource::XoscHf);
            self.flags.xosc_dep_held = false;
        }
        if self.flags.xosc_switch_held {
            self.power
                .release_constraint(SleepConstraint::DisallowXoscHfSwitching);
            self.flags.xosc_switch_held = false;
        }

        self.flags.power_down = false;
        self.flags.yield_pd_called = false;
        self.fsm.transition(FsmState::PowerUp);
        info!("Radio powered down");

        if self.flags.restart {
            self.flags.restart = false;
            self.fsm.post(FsmEvent::WAKEUP);
        }
        let mut sources = RadioFreeSource::REQ_ACCESS;
        if self.queue.all_done() {
            sources |= RadioFreeSource::PREEMPT | RadioFreeSource::CMD_REJECT;
        }
        self.issue_radio_free(sources);
        self.resolve_power_down_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use FsmState::*;
        assert!(is_valid_transition(PowerUp, Setup));
        assert!(is_valid_transition(Setup, XoscWait));
        assert!(is_valid_transition(PowerDown, PowerUp));
        assert!(!is_valid_transition(PowerUp, Active));
        assert!(!is_valid_transition(ChangePhy, PowerDown));
        assert!(!is_valid_transition(XoscWait, Setup));
    }

    #[test]
    fn test_deferred_events_follow_transition() {
        let mut fsm = Fsm::new(4);
        fsm.defer(FsmEvent::POWER_DOWN);
        assert!(fsm.pending().is_empty());
        fsm.transition(FsmState::Setup);
        assert_eq!(fsm.take_pending(), FsmEvent::POWER_DOWN);
        assert!(fsm.pending().is_empty());
    }

    #[test]
    fn test_trace_is_bounded() {
        let mut fsm = Fsm::new(2);
        fsm.transition(FsmState::Setup);
        fsm.transition(FsmState::Active);
        fsm.transition(FsmState::PowerDown);
        let trace = fsm.trace();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[0].from, FsmState::Setup);
        assert_eq!(trace[1].to, FsmState::PowerDown);
    }
}
