//! # Command Pool
//!
//! Fixed-capacity arena of command containers. A command stays at the same
//! slot index from allocation until it is released after its callback has run,
//! so queues refer to commands by slot index only.

use std::sync::Arc;

use bitflags::bitflags;

use crate::error::RfError;
use crate::rfcore::types::{ClientId, CmdCallback, CmdHandle, EventMask, Priority, RadioOp};

/// Index of a command inside the pool
pub type SlotId = usize;

bitflags! {
    /// Cancellation and scheduling flags of a command
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CmdFlags: u8 {
        /// Aborted while running
        const ABORTED = 1 << 0;
        /// Stopped gracefully while running
        const STOPPED = 1 << 1;
        /// Removed before it started
        const CANCELLED = 1 << 2;
        /// Marked for preemption by another client
        const PREEMPTED = 1 << 3;
        /// IEEE 802.15.4 background command
        const BACKGROUND = 1 << 4;
    }
}

impl CmdFlags {
    /// Any of the cancellation flags
    pub const CANCEL_MASK: CmdFlags = CmdFlags::ABORTED
        .union(CmdFlags::STOPPED)
        .union(CmdFlags::CANCELLED);
}

/// One posted command
#[derive(Clone)]
pub struct Command {
    /// Public handle
    pub handle: CmdHandle,
    /// Owning client
    pub client: ClientId,
    /// Operation (chain) handed to the doorbell
    pub op: Arc<RadioOp>,
    pub priority: Priority,
    /// Declared start (RAT ticks); `None` starts immediately
    pub start_time: Option<u32>,
    /// Declared end (RAT ticks); `None` is open ended
    pub end_time: Option<u32>,
    /// Subscribed events
    pub events: EventMask,
    /// Events raised by the hardware and not yet delivered
    pub rfifg: EventMask,
    pub callback: Option<CmdCallback>,
    pub flags: CmdFlags,
}

impl Command {
    /// Command with no accumulated events and no flags
    pub fn new(handle: CmdHandle, client: ClientId, op: Arc<RadioOp>) -> Self {
        Self {
            handle,
            client,
            start_time: op.start_time(),
            op,
            priority: Priority::Normal,
            end_time: None,
            events: EventMask::empty(),
            rfifg: EventMask::empty(),
            callback: None,
            flags: CmdFlags::empty(),
        }
    }

    /// Event mask delivered to the callback when the command retires
    ///
    /// A cancellation flag replaces the hardware bits; aborted wins over
    /// stopped, stopped over cancelled.
    pub fn retirement_events(&self, add_last_cmd_done: bool) -> EventMask {
        let mut events = self.rfifg;
        if add_last_cmd_done {
            events |= EventMask::LAST_CMD_DONE;
        }

        let cancel = if self.flags.contains(CmdFlags::ABORTED) {
            Some(EventMask::CMD_ABORTED)
        } else if self.flags.contains(CmdFlags::STOPPED) {
            Some(EventMask::CMD_STOPPED)
        } else if self.flags.contains(CmdFlags::CANCELLED) {
            Some(EventMask::CMD_CANCELLED)
        } else {
            None
        };

        if let Some(cancel) = cancel {
            events = cancel;
            if self.flags.contains(CmdFlags::PREEMPTED) {
                events |= EventMask::CMD_PREEMPTED;
            }
        }
        events
    }
}

/// Fixed array of command slots
pub struct CommandPool {
    slots: Vec<Option<Command>>,
}

impl CommandPool {
    /// Pool with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of allocated slots
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Store a command in the first free slot
    pub fn allocate(&mut self, command: Command) -> Result<SlotId, RfError> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(RfError::AllocationExhausted)?;
        self.slots[slot] = Some(command);
        Ok(slot)
    }

    /// Slot holding the live command with this handle
    pub fn lookup(&self, handle: CmdHandle) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|c| c.handle == handle))
    }

    pub fn get(&self, slot: SlotId) -> Option<&Command> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut Command> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Every live command
    pub fn commands(&self) -> impl Iterator<Item = &Command> + '_ {
        self.slots.iter().flatten()
    }

    /// Free a slot, returning its command
    pub fn release(&mut self, slot: SlotId) -> Option<Command> {
        self.slots.get_mut(slot).and_then(Option::take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(seq: u16) -> Command {
        Command::new(CmdHandle::new(seq), ClientId(0), Arc::new(RadioOp::new(0x0801)))
    }

    #[test]
    fn test_allocate_until_exhausted() {
        let mut pool = CommandPool::new(2);
        assert_eq!(pool.allocate(command(0)), Ok(0));
        assert_eq!(pool.allocate(command(1)), Ok(1));
        assert_eq!(pool.allocate(command(2)), Err(RfError::AllocationExhausted));
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn test_first_free_slot_is_reused() {
        let mut pool = CommandPool::new(3);
        pool.allocate(command(0)).unwrap();
        pool.allocate(command(1)).unwrap();
        pool.release(0);
        assert_eq!(pool.allocate(command(2)), Ok(0));
    }

    #[test]
    fn test_lookup_by_handle() {
        let mut pool = CommandPool::new(4);
        pool.allocate(command(7)).unwrap();
        let slot = pool.allocate(command(9)).unwrap();
        assert_eq!(pool.lookup(CmdHandle::new(9)), Some(slot));
        pool.release(slot);
        assert_eq!(pool.lookup(CmdHandle::new(9)), None);
    }

    #[test]
    fn test_retirement_events() {
        let mut cmd = command(0);
        cmd.rfifg = EventMask::TX_DONE;
        assert_eq!(
            cmd.retirement_events(true),
            EventMask::TX_DONE | EventMask::LAST_CMD_DONE
        );

        cmd.flags = CmdFlags::CANCELLED | CmdFlags::PREEMPTED;
        assert_eq!(
            cmd.retirement_events(true),
            EventMask::CMD_CANCELLED | EventMask::CMD_PREEMPTED
        );

        cmd.flags = CmdFlags::STOPPED | CmdFlags::ABORTED;
        assert_eq!(cmd.retirement_events(false), EventMask::CMD_ABORTED);

        cmd.flags = CmdFlags::PREEMPTED;
        assert_eq!(
            cmd.retirement_events(true),
            EventMask::TX_DONE | EventMask::LAST_CMD_DONE
        );
    }
}
