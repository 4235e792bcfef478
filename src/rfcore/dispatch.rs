//! # Command Dispatcher
//!
//! Interrupt-level half of the driver: the command processor interrupt
//! handlers, the decision between dispatching the queue head now and
//! powering down until it is due, and the first phase of retirement.
//!
//! Which handler sees a command processor interrupt depends on what the radio
//! is doing. During power sequences the interrupt only advances the FSM,
//! during a PHY switch it ends the switch, and while active it completes and
//! dispatches commands.

use std::sync::Arc;

use log::{debug, trace};

use crate::constants::{
    DEFAULT_POWER_UP_TIME_US, DISPATCH_MAX_TIME_US, POWER_DOWN_TIME_US, RAT_CH0_HW_BIT,
    WAKEUP_DETECTION_WINDOW_US,
};
use crate::rfcore::core::{Action, RadioFreeSource, Retirement, RfCore};
use crate::rfcore::fsm::{Cpe0Handler, FsmEvent, FsmState};
use crate::rfcore::hal::{SleepConstraint, TimerId};
use crate::rfcore::mailbox::{is_fs_command, CpeInterrupt, HwInterrupt};
use crate::rfcore::pool::{CmdFlags, SlotId};
use crate::rfcore::power::PowerConstraint;
use crate::rfcore::timebase::us_until;
use crate::rfcore::types::{EventMask, RadioOp};
use crate::util::logging::{log_op_hex, span_dispatch};

/// Interrupt bits the driver keeps enabled for itself
const COMPLETION_IRQS: CpeInterrupt = CpeInterrupt::LAST_COMMAND_DONE
    .union(CpeInterrupt::LAST_FG_COMMAND_DONE)
    .union(CpeInterrupt::BOOT_DONE);

impl RfCore {
    /// Command processor interrupt
    pub(crate) fn cpe0_isr(&mut self, flags: CpeInterrupt) {
        trace!("CPE0 {flags:?} via {:?}", self.cpe0_handler);
        match self.cpe0_handler {
            Cpe0Handler::PowerFsm => self.cpe0_power_fsm(flags),
            Cpe0Handler::Active => self.cpe0_active(flags),
            Cpe0Handler::ChangePhy => {
                if flags.contains(CpeInterrupt::LAST_COMMAND_DONE) {
                    self.fsm.post(FsmEvent::CHANGE_PHY2);
                }
            }
        }
    }

    fn cpe0_power_fsm(&mut self, flags: CpeInterrupt) {
        if self.fsm.state() == FsmState::Active {
            self.cpe0_handler = Cpe0Handler::Active;
            self.flags.radio_active = true;
            self.constraints.set(PowerConstraint::CMD_Q);
            self.flags.power_up = false;

            if !self.rat.is_known() {
                let channels = self.radio.firmware_rat_channels();
                self.rat.set_available(channels);
                debug!("RAT channels available: 0x{channels:04X}");
            }

            match self.queue.peek() {
                Some(head) if self.queue.current.is_none() => {
                    if !self.fs_error() {
                        self.dispatch_cmd(head);
                    }
                }
                _ => self.fsm.post(FsmEvent::LAST_COMMAND_DONE),
            }
        }
        if flags.intersects(CpeInterrupt::BOOT_DONE | CpeInterrupt::LAST_COMMAND_DONE) {
            self.fsm.post(FsmEvent::POWER_STEP);
        }
    }

    fn cpe0_active(&mut self, flags: CpeInterrupt) {
        let done = CpeInterrupt::LAST_COMMAND_DONE | CpeInterrupt::LAST_FG_COMMAND_DONE;
        if flags.intersects(done) {
            if let Some(slot) = self.queue.current.take() {
                self.complete_current(slot, flags & done);
            }
        }

        if !flags.intersects(done) {
            if let Some(slot) = self.queue.current {
                if let Some(cmd) = self.pool.get_mut(slot) {
                    let raised = EventMask::from_bits_retain(flags.bits() as u64) & cmd.events;
                    if !raised.is_empty() {
                        cmd.rfifg |= raised;
                        self.queue.current_cb = Some(slot);
                        self.fsm.post(FsmEvent::CPE_INT);
                    }
                }
            }
        }

        if self.queue.current.is_none() {
            if let Some(head) = self.queue.peek() {
                self.dispatch_cmd(head);
            }
        }
    }

    /// Move the finished command to the done queue, bringing a parked
    /// background command back if there is one
    fn complete_current(&mut self, slot: SlotId, done: CpeInterrupt) {
        let Some(cmd) = self.pool.get_mut(slot) else {
            return;
        };
        let done_events = EventMask::from_bits_retain(done.bits() as u64);
        cmd.rfifg |= done_events;
        let (events, client, cmd_flags) = (cmd.events, cmd.client, cmd.flags);

        self.radio
            .disable_cpe_interrupts(CpeInterrupt::from_bits_retain(events.cpe_bits()) - COMPLETION_IRQS);
        self.radio
            .disable_hw_interrupts(HwInterrupt::from_bits_retain(events.hw_bits()));
        self.queue.push_done_by_age(slot, &self.pool);
        self.fsm.post(FsmEvent::LAST_COMMAND_DONE);

        let Some(bg) = self.queue.current_bg.take() else {
            return;
        };
        if !self.is_ieee(client) {
            self.queue.current_bg = Some(bg);
            return;
        }
        let inherited = cmd_flags & (CmdFlags::ABORTED | CmdFlags::STOPPED);
        if inherited.is_empty() {
            self.queue.current = Some(bg);
        } else {
            if let Some(bg_cmd) = self.pool.get_mut(bg) {
                bg_cmd.flags |= inherited;
            }
            self.queue.push_done_by_age(bg, &self.pool);
        }
    }

    /// Dispatch the queue head, switch PHY for it, or sleep until it is due
    pub(crate) fn dispatch_cmd(&mut self, slot: SlotId) {
        let Some(cmd) = self.pool.get(slot) else {
            return;
        };
        let (client, handle, op, events) = (cmd.client, cmd.handle, Arc::clone(&cmd.op), cmd.events);

        if self.current_client != Some(client) {
            self.fsm.post(FsmEvent::INIT_CHANGE_PHY);
            return;
        }

        let background_busy = self.is_ieee(client) && self.queue.current_bg.is_some();
        if let (Some(delay), false) = (self.dispatch_op_when(&op), background_busy) {
            if self.release_constraint(PowerConstraint::CMD_Q).is_ok() {
                self.timers.stop(TimerId::Inactivity(client));
                debug!("{client}: {handle} is {delay} us away, sleeping until then");
                self.timers.start(TimerId::PowerUp, delay);
            }
            return;
        }

        let _span = span_dispatch(handle.value(), op.command_no());
        self.radio
            .enable_cpe_interrupts(CpeInterrupt::from_bits_retain(events.cpe_bits()));
        self.radio
            .enable_hw_interrupts(HwInterrupt::from_bits_retain(events.hw_bits()));
        log_op_hex("dispatch", op.command_no(), op.payload());
        let status = self.radio.submit(&op.chain());
        if !status.is_done() {
            debug!("{client}: doorbell answered 0x{:02X} for {handle}", status.code());
        }
        self.queue.pop();
        self.queue.current = Some(slot);
        debug!("{client}: dispatched {handle}");

        if self.is_ieee(client) {
            self.fsm.post(FsmEvent::IEEE_INT);
        }
    }

    /// Microseconds to sleep before `op` is due, or `None` to dispatch now
    pub(crate) fn dispatch_op_when(&self, op: &RadioOp) -> Option<u32> {
        let start = op.start_time()?;
        let delta = us_until(self.current_time(), start);
        let power_up = self
            .current_client
            .and_then(|id| self.client(id).ok())
            .map_or(DEFAULT_POWER_UP_TIME_US, |c| c.params.power_up_duration_us);

        if delta > power_up + POWER_DOWN_TIME_US && delta <= DISPATCH_MAX_TIME_US {
            Some((delta - power_up).max(1))
        } else {
            None
        }
    }

    /// First phase of retiring the oldest done command
    pub(crate) fn begin_retire(&mut self) {
        let Some(slot) = self.queue.pop_done() else {
            return;
        };
        let Some(cmd) = self.pool.get(slot) else {
            return;
        };
        let (client, handle, callback) = (cmd.client, cmd.handle, cmd.callback.clone());
        let fs = cmd
            .op
            .chain()
            .into_iter()
            .find(|op| is_fs_command(op.command_no()));
        let events = cmd.retirement_events(!self.is_ieee(client));

        if let Some(fs) = fs {
            if let Ok(c) = self.client_mut(client) {
                c.fs_cache = Some(Arc::new(fs.duplicate()));
            }
        }
        self.push_action(Action::Retire(Retirement {
            slot,
            client,
            handle,
            events,
            callback,
        }));
    }

    /// Radio hardware interrupt
    pub(crate) fn hw_isr(&mut self, flags: HwInterrupt) {
        let enabled = self.radio.hw_interrupts_enabled();
        self.radio.clear_hw_interrupts(flags);
        if flags.contains(HwInterrupt::MDM_SOFT) && enabled.contains(HwInterrupt::MDM_SOFT) {
            self.fsm.post(FsmEvent::HW_INT);
        }
        self.hw_int_event |= flags & enabled & HwInterrupt::RAT_CHANNELS;
    }

    /// Deliver one pending RAT channel event
    pub(crate) fn swi_hw(&mut self) {
        let bits = self.hw_int_event.bits();
        if bits == 0 {
            return;
        }
        let lowest = bits.trailing_zeros();
        self.hw_int_event.remove(HwInterrupt::from_bits_retain(1 << lowest));
        let Some(channel) = lowest.checked_sub(RAT_CH0_HW_BIT).map(|ch| ch as u8) else {
            return;
        };

        let owner = self.rat.owner(channel).cloned();
        self.rat_free(channel, false);
        if let Some(owner) = owner {
            if let Some(cb) = owner.callback {
                let client = owner.client;
                self.push_action(Action::Notify(Box::new(move || {
                    cb(client, channel, EventMask::RAT_CH)
                })));
            }
        }
    }

    /// Timer expiry
    pub(crate) fn timer_expired(&mut self, id: TimerId) {
        trace!("Timer {id:?} expired");
        match id {
            TimerId::PowerUp => {
                if self.fsm.state() == FsmState::Active {
                    self.constraints.set(PowerConstraint::CMD_Q);
                    self.cpe0_isr(CpeInterrupt::empty());
                } else {
                    self.fsm.post(FsmEvent::WAKEUP);
                }
            }
            TimerId::Inactivity(_) => {
                if self.queue.all_done() {
                    let _ = self.release_constraint(PowerConstraint::CMD_Q);
                }
            }
            TimerId::RequestAccess(_) => self.issue_radio_free(RadioFreeSource::all()),
            TimerId::BackgroundStart => self.fsm.post(FsmEvent::IEEE_INT),
        }
    }

    /// The system left standby; take over the crystal switch if the
    /// scheduled wakeup is imminent
    pub(crate) fn wakeup_notification(&mut self) {
        let imminent = self.timers.is_active(TimerId::PowerUp)
            && self
                .timers
                .remaining_us(TimerId::PowerUp)
                .is_some_and(|us| us < WAKEUP_DETECTION_WINDOW_US);
        if !imminent {
            return;
        }
        self.timers.stop(TimerId::PowerUp);
        if !self.flags.xosc_switch_held {
            self.power
                .set_constraint(SleepConstraint::DisallowXoscHfSwitching);
            self.flags.xosc_switch_held = true;
        }
        self.fsm.post(FsmEvent::WAKEUP);
    }
}
