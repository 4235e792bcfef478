//! # Command Queue
//!
//! Index based queues over pool slots: the pending queue, the current slot,
//! the done queue and the background slot used by IEEE 802.15.4 clients.
//! A command sits in exactly one of them between allocation and retirement.
//!
//! The queue also owns the post/done sequence counters. Handles are issued
//! from the post counter; the done counter advances once per retirement.
//! Mixed-context safety comes from the single lock around the whole core.

use std::collections::VecDeque;

use crate::constants::CMD_HANDLE_MODMASK;
use crate::rfcore::pool::{CommandPool, SlotId};
use crate::rfcore::types::{ClientId, CmdHandle};

/// Pending, current and done queues of the radio
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<SlotId>,
    /// Command owned by the radio hardware
    pub current: Option<SlotId>,
    /// Command whose intermediate events are being delivered
    pub current_cb: Option<SlotId>,
    /// Background command parked while a foreground command runs
    pub current_bg: Option<SlotId>,
    done: VecDeque<SlotId>,
    seq_post: u16,
    seq_done: u16,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands posted and not yet retired
    pub fn outstanding(&self) -> u16 {
        self.seq_post
            .wrapping_add(CMD_HANDLE_MODMASK + 1)
            .wrapping_sub(self.seq_done)
            & CMD_HANDLE_MODMASK
    }

    /// True when another command fits in a pool of `capacity`
    pub fn has_room(&self, capacity: usize) -> bool {
        (self.outstanding() as usize) < capacity
    }

    /// Handle the next posted command receives
    pub fn next_handle(&self) -> CmdHandle {
        CmdHandle::new(self.seq_post.wrapping_add(1))
    }

    /// Commit the handle returned by `next_handle`
    pub fn commit_post(&mut self, handle: CmdHandle) {
        self.seq_post = handle.value();
    }

    /// Advance the done counter after a retirement
    pub fn commit_done(&mut self) {
        self.seq_done = self.seq_done.wrapping_add(1) & CMD_HANDLE_MODMASK;
    }

    /// True when every posted command has retired
    pub fn all_done(&self) -> bool {
        self.seq_post == self.seq_done
    }

    pub fn last_posted(&self) -> CmdHandle {
        CmdHandle::new(self.seq_post)
    }

    // pending queue

    pub fn peek(&self) -> Option<SlotId> {
        self.pending.front().copied()
    }

    pub fn pop(&mut self) -> Option<SlotId> {
        self.pending.pop_front()
    }

    pub fn push(&mut self, slot: SlotId) {
        self.pending.push_back(slot);
    }

    pub fn push_front(&mut self, slot: SlotId) {
        self.pending.push_front(slot);
    }

    /// Insert at `index`, appending when past the end
    pub fn insert(&mut self, index: usize, slot: SlotId) {
        if index >= self.pending.len() {
            self.pending.push_back(slot);
        } else {
            self.pending.insert(index, slot);
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.pending.iter().copied()
    }

    pub fn pending_at(&self, index: usize) -> Option<SlotId> {
        self.pending.get(index).copied()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn position(&self, slot: SlotId) -> Option<usize> {
        self.pending.iter().position(|&s| s == slot)
    }

    pub fn tail(&self) -> Option<SlotId> {
        self.pending.back().copied()
    }

    /// Position of the first pending command of `client`
    pub fn find_first(&self, pool: &CommandPool, client: ClientId) -> Option<usize> {
        self.pending
            .iter()
            .position(|&s| pool.get(s).is_some_and(|c| c.client == client))
    }

    /// Remove the pending commands at or after `from` that match `predicate`,
    /// returning them in queue order
    pub fn remove_if<F>(&mut self, from: usize, mut predicate: F) -> Vec<SlotId>
    where
        F: FnMut(SlotId) -> bool,
    {
        let mut removed = Vec::new();
        let mut index = from;
        while index < self.pending.len() {
            let slot = self.pending[index];
            if predicate(slot) {
                self.pending.remove(index);
                removed.push(slot);
            } else {
                index += 1;
            }
        }
        removed
    }

    // done queue

    pub fn push_done(&mut self, slot: SlotId) {
        self.done.push_back(slot);
    }

    /// Insert into the done queue ordered by handle age
    ///
    /// A running command and the younger commands flushed behind it can reach
    /// the done queue in either order; sorting on the distance from the done
    /// counter keeps every client's callbacks in post order.
    pub fn push_done_by_age(&mut self, slot: SlotId, pool: &CommandPool) {
        let age = |s: SlotId| {
            pool.get(s)
                .map(|c| self.age(c.handle))
                .unwrap_or(CMD_HANDLE_MODMASK)
        };
        let key = age(slot);
        let index = self
            .done
            .iter()
            .position(|&s| age(s) > key)
            .unwrap_or(self.done.len());
        self.done.insert(index, slot);
    }

    /// Distance of `handle` from the done counter; smaller is older
    pub fn age(&self, handle: CmdHandle) -> u16 {
        handle.value().wrapping_sub(self.seq_done) & CMD_HANDLE_MODMASK
    }

    pub fn done(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.done.iter().copied()
    }

    pub fn pop_done(&mut self) -> Option<SlotId> {
        self.done.pop_front()
    }

    pub fn has_done(&self) -> bool {
        !self.done.is_empty()
    }
}
