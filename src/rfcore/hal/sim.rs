//! Simulated radio and power manager
//!
//! [`SimRadio`] stands in for the radio coprocessor so the driver can run
//! without hardware. Power sequence commands (setup, RAT sync) complete as
//! soon as they are submitted. User commands either complete the same way
//! (auto mode) or stay on the simulated radio until the test completes them.
//! Completion is reported by raising interrupts on the driver's
//! [`IrqLine`], exactly as the hardware interrupt handlers would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use log::{debug, warn};
use tokio::time::Instant;

use super::{
    ClockSource, Interrupt, IrqLine, PatchTarget, PowerManager, PowerResource, RadioHal,
    SleepConstraint,
};
use crate::rfcore::mailbox::{
    direct_command_no, is_fs_command, is_setup_command, op_status, CmdStatus, CpeInterrupt,
    HwInterrupt, CMD_ABORT, CMD_GET_RSSI, CMD_STOP, CMD_SYNC_START_RAT, CMD_SYNC_STOP_RAT,
};
use crate::rfcore::types::{AnalogCfg, RadioOp};

/// RAT channels the simulated firmware leaves to applications
pub const SIM_RAT_CHANNELS: u16 = 0x00E0;

/// BLE, IEEE 802.15.4, proprietary 2.4 GHz/sub-1 GHz and multi-protocol
pub const SIM_SUPPORTED_MODES: u32 = 0b10_1111;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SimState {
    irq: IrqLine,
    cpe_enabled: CpeInterrupt,
    hw_enabled: HwInterrupt,
    supported_modes: u32,
    mode: Option<u8>,
    clock_on: bool,
    /// Simulated wall clock, on top of the runtime clock when following it
    time_us: u64,
    clock_base: Option<Instant>,
    /// RAT value at time zero
    rat_offset: u32,
    hf_source: ClockSource,
    /// Crystal polls left before it is stable
    xosc_settle_polls: u32,
    /// The power manager switches to the crystal by itself
    xosc_auto_switch: bool,
    auto_complete: bool,
    /// User chains on the radio, most recent last
    running: Vec<Arc<RadioOp>>,
    max_in_flight: usize,
    submitted_while_off: usize,
    dispatched: Vec<Arc<RadioOp>>,
    submitted: Vec<u16>,
    direct_log: Vec<u32>,
    immediate_log: Vec<u16>,
    patches: Vec<PatchTarget>,
    analog_cfgs: Vec<AnalogCfg>,
    fs_error: bool,
    rssi: i8,
    next_cmdsta: Option<CmdStatus>,
    firmware_rat_channels: u16,
    synth_power_downs: usize,
}

impl SimState {
    fn raise_cpe(&self, flags: CpeInterrupt) {
        if !flags.is_empty() {
            self.irq.raise(Interrupt::Cpe0(flags));
        }
    }

    fn now_us(&self) -> u64 {
        let elapsed = self
            .clock_base
            .map_or(0, |base| base.elapsed().as_micros() as u64);
        self.time_us + elapsed
    }

    fn rat(&self) -> u32 {
        ((self.now_us() * 4) as u32).wrapping_add(self.rat_offset)
    }

    fn take_cmdsta(&mut self) -> CmdStatus {
        self.next_cmdsta.take().unwrap_or_else(CmdStatus::done)
    }

    /// Finish the most recent user chain
    fn finish_running(&mut self, status: u16, flags: CpeInterrupt) -> bool {
        let Some(op) = self.running.pop() else {
            return false;
        };
        for link in op.chain() {
            link.set_status(status);
        }
        self.raise_cpe(flags & self.cpe_enabled);
        true
    }
}

/// Simulated radio coprocessor
#[derive(Clone)]
pub struct SimRadio {
    state: Arc<Mutex<SimState>>,
}

impl SimRadio {
    /// Radio on the crystal clock, completing user commands immediately
    pub fn new(irq: IrqLine) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                irq,
                cpe_enabled: CpeInterrupt::empty(),
                hw_enabled: HwInterrupt::empty(),
                supported_modes: SIM_SUPPORTED_MODES,
                mode: None,
                clock_on: false,
                time_us: 0,
                clock_base: None,
                rat_offset: 0,
                hf_source: ClockSource::XoscHf,
                xosc_settle_polls: 0,
                xosc_auto_switch: true,
                auto_complete: true,
                running: Vec::new(),
                max_in_flight: 0,
                submitted_while_off: 0,
                dispatched: Vec::new(),
                submitted: Vec::new(),
                direct_log: Vec::new(),
                immediate_log: Vec::new(),
                patches: Vec::new(),
                analog_cfgs: Vec::new(),
                fs_error: false,
                rssi: -70,
                next_cmdsta: None,
                firmware_rat_channels: SIM_RAT_CHANNELS,
                synth_power_downs: 0,
            })),
        }
    }

    /// Complete user commands on submit (true) or hold them for the test
    pub fn set_auto_complete(&self, auto: bool) {
        lock(&self.state).auto_complete = auto;
    }

    /// Advance the simulated clock
    pub fn advance_us(&self, us: u64) {
        lock(&self.state).time_us += us;
    }

    pub fn now_us(&self) -> u64 {
        lock(&self.state).now_us()
    }

    /// Let the clock follow the tokio clock as well as [`advance_us`](Self::advance_us)
    pub fn follow_runtime_clock(&self) {
        lock(&self.state).clock_base = Some(Instant::now());
    }

    pub fn set_rat_offset(&self, offset: u32) {
        lock(&self.state).rat_offset = offset;
    }

    /// Start on the RC oscillator; the crystal settles after `polls` checks
    pub fn set_xosc_settle(&self, polls: u32, auto_switch: bool) {
        let mut state = lock(&self.state);
        state.hf_source = ClockSource::RcoscHf;
        state.xosc_settle_polls = polls;
        state.xosc_auto_switch = auto_switch;
    }

    pub fn set_supported_modes(&self, modes: u32) {
        lock(&self.state).supported_modes = modes;
    }

    /// Make every synthesizer op fail to program
    pub fn set_fs_error(&self, fail: bool) {
        lock(&self.state).fs_error = fail;
    }

    pub fn set_rssi(&self, rssi: i8) {
        lock(&self.state).rssi = rssi;
    }

    /// CMDSTA returned by the next direct or immediate command
    pub fn fail_next_command(&self, status: CmdStatus) {
        lock(&self.state).next_cmdsta = Some(status);
    }

    /// Finish the running user command with `DONE_OK`
    pub fn complete_current(&self, extra: CpeInterrupt) -> bool {
        lock(&self.state).finish_running(
            op_status::DONE_OK,
            CpeInterrupt::COMMAND_DONE | CpeInterrupt::LAST_COMMAND_DONE | extra,
        )
    }

    /// Move a command waiting for its trigger to running
    pub fn start_current(&self) {
        if let Some(op) = lock(&self.state).running.last() {
            op.set_status(op_status::ACTIVE);
        }
    }

    /// Raise command processor flags, filtered by the enable mask
    pub fn raise_event(&self, flags: CpeInterrupt) {
        let state = lock(&self.state);
        state.raise_cpe(flags & state.cpe_enabled);
    }

    /// Raise a radio hardware interrupt
    pub fn raise_hw(&self, flags: HwInterrupt) {
        lock(&self.state).irq.raise(Interrupt::Hw(flags));
    }

    /// Fire a RAT channel
    pub fn fire_rat_channel(&self, channel: u8) {
        self.raise_hw(HwInterrupt::rat_channel(channel));
    }

    /// Operation of the user command on the radio
    pub fn running(&self) -> Option<Arc<RadioOp>> {
        lock(&self.state).running.last().cloned()
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.state).running.len()
    }

    /// Most user commands that were on the radio at the same time
    pub fn max_in_flight(&self) -> usize {
        lock(&self.state).max_in_flight
    }

    /// Chains submitted while the radio clock was off
    pub fn submitted_while_off(&self) -> usize {
        lock(&self.state).submitted_while_off
    }

    /// User commands in dispatch order
    pub fn dispatched(&self) -> Vec<Arc<RadioOp>> {
        lock(&self.state).dispatched.clone()
    }

    /// Payloads of the user commands in dispatch order
    pub fn dispatched_payloads(&self) -> Vec<Bytes> {
        lock(&self.state)
            .dispatched
            .iter()
            .map(|op| op.payload().clone())
            .collect()
    }

    /// First command number of every chain submitted
    pub fn submitted(&self) -> Vec<u16> {
        lock(&self.state).submitted.clone()
    }

    /// Command numbers of the direct commands sent
    pub fn direct_commands(&self) -> Vec<u16> {
        lock(&self.state)
            .direct_log
            .iter()
            .map(|&word| direct_command_no(word))
            .collect()
    }

    /// Raw words of the direct commands sent
    pub fn direct_words(&self) -> Vec<u32> {
        lock(&self.state).direct_log.clone()
    }

    pub fn immediate_commands(&self) -> Vec<u16> {
        lock(&self.state).immediate_log.clone()
    }

    pub fn patches(&self) -> Vec<PatchTarget> {
        lock(&self.state).patches.clone()
    }

    pub fn analog_cfgs(&self) -> Vec<AnalogCfg> {
        lock(&self.state).analog_cfgs.clone()
    }

    pub fn mode(&self) -> Option<u8> {
        lock(&self.state).mode
    }

    pub fn clock_on(&self) -> bool {
        lock(&self.state).clock_on
    }

    pub fn cpe_enabled(&self) -> CpeInterrupt {
        lock(&self.state).cpe_enabled
    }

    pub fn synth_power_downs(&self) -> usize {
        lock(&self.state).synth_power_downs
    }

    fn submit_internal(state: &mut SimState, chain: &[Arc<RadioOp>]) {
        for op in chain {
            let status = if is_fs_command(op.command_no()) && state.fs_error {
                op_status::ERROR_SYNTH_PROG
            } else {
                op_status::DONE_OK
            };
            if op.command_no() == CMD_SYNC_STOP_RAT {
                op.set_result(state.rat_offset);
            }
            op.set_status(status);
        }
        state.raise_cpe(CpeInterrupt::COMMAND_DONE | CpeInterrupt::LAST_COMMAND_DONE);
    }

    fn submit_user(state: &mut SimState, chain: &[Arc<RadioOp>]) {
        let Some(head) = chain.first() else {
            return;
        };
        state.dispatched.push(Arc::clone(head));
        if state.auto_complete {
            state.max_in_flight = state.max_in_flight.max(state.running.len() + 1);
            for op in chain {
                op.set_status(op_status::DONE_OK);
            }
            let flags = CpeInterrupt::COMMAND_DONE | CpeInterrupt::LAST_COMMAND_DONE;
            state.raise_cpe(flags & state.cpe_enabled);
            return;
        }

        let status = if head.start_time().is_some() {
            op_status::PENDING
        } else {
            op_status::ACTIVE
        };
        head.set_status(status);
        state.running.push(Arc::clone(head));
        state.max_in_flight = state.max_in_flight.max(state.running.len());
    }
}

impl RadioHal for SimRadio {
    fn submit(&mut self, chain: &[Arc<RadioOp>]) -> CmdStatus {
        let mut state = lock(&self.state);
        let Some(first) = chain.first() else {
            return CmdStatus::done();
        };
        state.submitted.push(first.command_no());
        if !state.clock_on {
            warn!("Chain 0x{:04X} submitted with the radio clock off", first.command_no());
            state.submitted_while_off += 1;
        }
        debug!("sim: chain 0x{:04X} ({} ops)", first.command_no(), chain.len());

        let internal = matches!(first.command_no(), CMD_SYNC_START_RAT | CMD_SYNC_STOP_RAT)
            || is_setup_command(first.command_no());
        if internal {
            Self::submit_internal(&mut state, chain);
        } else {
            Self::submit_user(&mut state, chain);
        }
        CmdStatus::done()
    }

    fn send_direct(&mut self, command: u32) -> CmdStatus {
        let mut state = lock(&self.state);
        state.direct_log.push(command);
        debug!("sim: direct 0x{command:08X}");
        match direct_command_no(command) {
            CMD_ABORT => {
                let flags = CpeInterrupt::COMMAND_DONE | CpeInterrupt::LAST_COMMAND_DONE;
                state.finish_running(op_status::DONE_ABORT, flags);
                CmdStatus::done()
            }
            CMD_STOP => {
                let flags = CpeInterrupt::COMMAND_DONE | CpeInterrupt::LAST_COMMAND_DONE;
                state.finish_running(op_status::DONE_STOPPED, flags);
                CmdStatus::done()
            }
            CMD_GET_RSSI => {
                let status = state.take_cmdsta();
                if status.is_done() {
                    CmdStatus(((state.rssi as u8 as u32) << 16) | CmdStatus::DONE as u32)
                } else {
                    status
                }
            }
            _ => state.take_cmdsta(),
        }
    }

    fn send_immediate(&mut self, op: &RadioOp) -> CmdStatus {
        let mut state = lock(&self.state);
        state.immediate_log.push(op.command_no());
        state.take_cmdsta()
    }

    fn enable_cpe_interrupts(&mut self, mask: CpeInterrupt) {
        lock(&self.state).cpe_enabled |= mask;
    }

    fn disable_cpe_interrupts(&mut self, mask: CpeInterrupt) {
        lock(&self.state).cpe_enabled.remove(mask);
    }

    fn enable_hw_interrupts(&mut self, mask: HwInterrupt) {
        lock(&self.state).hw_enabled |= mask;
    }

    fn disable_hw_interrupts(&mut self, mask: HwInterrupt) {
        lock(&self.state).hw_enabled.remove(mask);
    }

    fn hw_interrupts_enabled(&self) -> HwInterrupt {
        lock(&self.state).hw_enabled
    }

    fn clear_hw_interrupts(&mut self, _mask: HwInterrupt) {}

    fn select_mode(&mut self, mode: u8) -> bool {
        let mut state = lock(&self.state);
        if state.supported_modes & (1 << mode) == 0 {
            return false;
        }
        state.mode = Some(mode);
        true
    }

    fn supported_modes(&self) -> u32 {
        lock(&self.state).supported_modes
    }

    fn clock_enable(&mut self) {
        let mut state = lock(&self.state);
        state.clock_on = true;
        let boot = CpeInterrupt::BOOT_DONE & state.cpe_enabled;
        state.raise_cpe(boot);
    }

    fn clock_disable(&mut self) {
        let mut state = lock(&self.state);
        state.clock_on = false;
        state.cpe_enabled = CpeInterrupt::empty();
        state.hw_enabled = HwInterrupt::empty();
    }

    fn load_patch(&mut self, target: PatchTarget, image: &[u8]) {
        debug!("sim: {target:?} patch, {} bytes", image.len());
        lock(&self.state).patches.push(target);
    }

    fn reset_cpe_patch(&mut self) {}

    fn prepare_setup(&mut self, _setup: &RadioOp, analog: AnalogCfg) {
        lock(&self.state).analog_cfgs.push(analog);
    }

    fn synth_power_down(&mut self) {
        lock(&self.state).synth_power_downs += 1;
    }

    fn set_vco_ldo(&mut self, _enable: bool) {}

    fn rat_count(&self) -> u32 {
        lock(&self.state).rat()
    }

    fn rtc_now(&self) -> u64 {
        let us = lock(&self.state).now_us() as u128;
        ((us << 32) / 1_000_000) as u64
    }

    fn hf_clock_source(&self) -> ClockSource {
        let mut state = lock(&self.state);
        if state.hf_source == ClockSource::RcoscHf && state.xosc_auto_switch {
            if state.xosc_settle_polls == 0 {
                state.hf_source = ClockSource::XoscHf;
            } else {
                state.xosc_settle_polls -= 1;
            }
        }
        state.hf_source
    }

    fn xosc_hf_ready(&self) -> bool {
        let mut state = lock(&self.state);
        if state.xosc_settle_polls > 0 {
            state.xosc_settle_polls -= 1;
            return false;
        }
        true
    }

    fn switch_to_xosc_hf(&mut self) {
        lock(&self.state).hf_source = ClockSource::XoscHf;
    }

    fn firmware_rat_channels(&mut self) -> u16 {
        lock(&self.state).firmware_rat_channels
    }
}

/// Simulated power manager counting dependencies and constraints
#[derive(Clone, Default)]
pub struct SimPower {
    state: Arc<Mutex<SimPowerState>>,
}

#[derive(Default)]
struct SimPowerState {
    dependencies: HashMap<PowerResource, i32>,
    constraints: HashMap<SleepConstraint, i32>,
}

impl SimPower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding references on a resource; negative after over-release
    pub fn dependency_count(&self, resource: PowerResource) -> i32 {
        lock(&self.state)
            .dependencies
            .get(&resource)
            .copied()
            .unwrap_or(0)
    }

    pub fn constraint_count(&self, constraint: SleepConstraint) -> i32 {
        lock(&self.state)
            .constraints
            .get(&constraint)
            .copied()
            .unwrap_or(0)
    }
}

impl PowerManager for SimPower {
    fn set_dependency(&mut self, resource: PowerResource) {
        *lock(&self.state).dependencies.entry(resource).or_default() += 1;
    }

    fn release_dependency(&mut self, resource: PowerResource) {
        *lock(&self.state).dependencies.entry(resource).or_default() -= 1;
    }

    fn set_constraint(&mut self, constraint: SleepConstraint) {
        *lock(&self.state).constraints.entry(constraint).or_default() += 1;
    }

    fn release_constraint(&mut self, constraint: SleepConstraint) {
        *lock(&self.state).constraints.entry(constraint).or_default() -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rfcore::hal::irq_channel;
    use crate::rfcore::mailbox::{CMD_FS, CMD_PROP_RADIO_DIV_SETUP};

    #[test]
    fn test_setup_chain_completes_immediately() {
        let (line, mut rx) = irq_channel();
        let mut radio = SimRadio::new(line);
        let setup = Arc::new(RadioOp::new(CMD_PROP_RADIO_DIV_SETUP));
        let fs = Arc::new(RadioOp::new(CMD_FS));
        radio.set_fs_error(true);
        radio.submit(&[Arc::clone(&setup), Arc::clone(&fs)]);

        assert_eq!(setup.status(), op_status::DONE_OK);
        assert_eq!(fs.status(), op_status::ERROR_SYNTH_PROG);
        assert_eq!(
            rx.try_recv(),
            Some(Interrupt::Cpe0(
                CpeInterrupt::COMMAND_DONE | CpeInterrupt::LAST_COMMAND_DONE
            ))
        );
        assert_eq!(radio.submitted_while_off(), 1);
    }

    #[test]
    fn test_held_command_and_abort() {
        let (line, mut rx) = irq_channel();
        let mut radio = SimRadio::new(line);
        radio.set_auto_complete(false);
        radio.enable_cpe_interrupts(CpeInterrupt::LAST_COMMAND_DONE);
        let op = Arc::new(RadioOp::new(0x3801));
        radio.submit(&[Arc::clone(&op)]);
        assert_eq!(op.status(), op_status::ACTIVE);
        assert!(rx.try_recv().is_none());

        radio.send_direct(crate::rfcore::mailbox::direct(CMD_ABORT));
        assert_eq!(op.status(), op_status::DONE_ABORT);
        assert_eq!(
            rx.try_recv(),
            Some(Interrupt::Cpe0(CpeInterrupt::LAST_COMMAND_DONE))
        );
        assert_eq!(radio.in_flight(), 0);
    }

    #[test]
    fn test_rssi_in_result_byte() {
        let (line, _rx) = irq_channel();
        let mut radio = SimRadio::new(line);
        radio.set_rssi(-42);
        let status = radio.send_direct(crate::rfcore::mailbox::direct(CMD_GET_RSSI));
        assert!(status.is_done());
        assert_eq!((status.0 >> 16) as u8 as i8, -42);
    }

    #[test]
    fn test_power_counters() {
        let mut power = SimPower::new();
        power.set_dependency(PowerResource::RfCore);
        power.set_dependency(PowerResource::RfCore);
        power.release_dependency(PowerResource::RfCore);
        assert_eq!(power.dependency_count(PowerResource::RfCore), 1);
        assert_eq!(power.constraint_count(SleepConstraint::StandbyDisallow), 0);
    }
}
