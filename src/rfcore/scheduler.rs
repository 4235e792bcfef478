//! # Command Scheduler
//!
//! Decides where a newly posted command goes in the pending queue. The
//! decision is a pure function of a snapshot of the queue, so it can be tested
//! and benchmarked without a radio.
//!
//! ## Resolution Order
//!
//! The first step that succeeds wins:
//!
//! 1. **Top of queue**: when the requesting client has nothing pending, the
//!    command may go in front of the queue head if it fits between the running
//!    command (or the current time) and the head.
//! 2. **Later in the queue**: starting at the client's last pending command,
//!    each adjacent pair is tested; the command goes between the first pair
//!    that leaves room for it.
//! 3. **Preemption**: if the priority of the new command is above every
//!    command of the other client, those commands are flushed.
//! 4. **Append**: commands without an absolute start (or with past-trigger
//!    tolerance) are appended. An absolute start has to fit after the tail.
//!
//! A fit takes the PHY switching overhead into account whenever the
//! neighbouring command belongs to another client.

use crate::error::RfError;
use crate::rfcore::pool::SlotId;
use crate::rfcore::timebase::{gap_admits, gap_us};
use crate::rfcore::types::{CancelMode, ClientId, CmdHandle, Priority};

/// Scheduling view of a queued or running command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedCmd {
    pub slot: SlotId,
    pub handle: CmdHandle,
    pub client: ClientId,
    pub priority: Priority,
    pub start: Option<u32>,
    pub end: Option<u32>,
}

/// The command being scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewCmd {
    pub client: ClientId,
    pub priority: Priority,
    pub start: Option<u32>,
    pub end: Option<u32>,
    /// An absolute start that may lie in the past
    pub past_trig: bool,
}

/// State of the radio the decision is taken against
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    /// Current RAT time
    pub now: u32,
    pub current: Option<QueuedCmd>,
    pub pending: &'a [QueuedCmd],
    /// Measured switching time into each client
    pub phy_switching_us: &'a [u32],
    /// The other open client, if any
    pub other: Option<ClientId>,
    /// The other client holds an access window
    pub other_access_active: bool,
}

/// Flush to issue against the losing client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreemptPlan {
    pub client: ClientId,
    /// Every command of the losing client, to be flagged as preempted
    pub marked: Vec<SlotId>,
    /// Earliest command of the losing client; the flush starts here
    pub target: CmdHandle,
    pub mode: CancelMode,
}

/// Outcome of the priority comparison against another client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preemption {
    /// The other client has nothing queued or running
    Unopposed,
    /// At least one command of the other client is not outranked
    Denied,
    Granted(PreemptPlan),
}

/// Where the new command goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// In front of the pending queue
    Top,
    /// At this pending queue index
    InsertAt(usize),
    /// At the tail, after flushing the other client
    Preempt(PreemptPlan),
    /// At the tail
    Append,
}

/// Left neighbour of a gap: the running command, a queued one, or "now"
#[derive(Debug, Clone, Copy)]
struct Boundary {
    client: Option<ClientId>,
    end: Option<u32>,
}

impl From<&QueuedCmd> for Boundary {
    fn from(cmd: &QueuedCmd) -> Self {
        Boundary {
            client: Some(cmd.client),
            end: cmd.end,
        }
    }
}

fn switching_time(new: &NewCmd, neighbour: Option<ClientId>, phy_switching_us: &[u32]) -> u32 {
    match neighbour {
        Some(client) if client != new.client => {
            phy_switching_us.get(client.index()).copied().unwrap_or(0)
        }
        _ => 0,
    }
}

/// True when `new` fits strictly after `prev` and strictly before `next`
///
/// A side with unknown timing only passes when there is no `next` at all; a
/// command without a start time never fits between two commands.
fn fits(new: &NewCmd, prev: Boundary, next: Option<&QueuedCmd>, phy_switching_us: &[u32]) -> bool {
    let mut after_prev = false;
    let mut before_next = next.is_none();

    if let (Some(prev_end), Some(start)) = (prev.end, new.start) {
        let overhead = switching_time(new, prev.client, phy_switching_us);
        if !gap_admits(gap_us(prev_end, start, overhead)) {
            return false;
        }
        after_prev = true;
    }

    if let Some(next) = next {
        if let (Some(next_start), Some(end)) = (next.start, new.end) {
            let overhead = switching_time(new, Some(next.client), phy_switching_us);
            if !gap_admits(gap_us(end, next_start, overhead)) {
                return false;
            }
            before_next = true;
        }
    }

    after_prev && before_next
}

/// Compare `priority` against every command `other` has queued or running
pub fn preemption(snapshot: &Snapshot<'_>, other: ClientId, priority: Priority) -> Preemption {
    let theirs: Vec<&QueuedCmd> = snapshot
        .current
        .iter()
        .chain(snapshot.pending.iter())
        .filter(|cmd| cmd.client == other)
        .collect();

    let Some(earliest) = theirs.first() else {
        return Preemption::Unopposed;
    };
    if theirs.iter().any(|cmd| priority <= cmd.priority) {
        return Preemption::Denied;
    }

    let mode = if priority == Priority::High {
        CancelMode::Graceful
    } else {
        CancelMode::Abrupt
    };
    Preemption::Granted(PreemptPlan {
        client: other,
        marked: theirs.iter().map(|cmd| cmd.slot).collect(),
        target: earliest.handle,
        mode,
    })
}

/// Resolve the placement of `new`
///
/// Fails with [`RfError::ScheduleRejected`] while the other client holds an
/// access window, or when an absolute start cannot be met. When a second
/// client is open, an open-ended tail rejects an absolute start since the gap
/// cannot be proven.
pub fn place(new: &NewCmd, snapshot: &Snapshot<'_>) -> Result<Placement, RfError> {
    if snapshot.other.is_some() && snapshot.other_access_active {
        return Err(RfError::ScheduleRejected);
    }

    let pending = snapshot.pending;
    let switching = snapshot.phy_switching_us;
    let own_last = pending.iter().rposition(|cmd| cmd.client == new.client);

    // step 1a
    if own_last.is_none() {
        if let Some(head) = pending.first() {
            let prev = match &snapshot.current {
                Some(current) => Boundary::from(current),
                None => Boundary {
                    client: None,
                    end: Some(snapshot.now),
                },
            };
            if fits(new, prev, Some(head), switching) {
                return Ok(Placement::Top);
            }
        }
    }

    // step 1b
    for index in own_last.unwrap_or(0)..pending.len() {
        let prev = Boundary::from(&pending[index]);
        if fits(new, prev, pending.get(index + 1), switching) {
            return Ok(Placement::InsertAt(index + 1));
        }
    }

    // step 2
    if let Some(other) = snapshot.other {
        if let Preemption::Granted(plan) = preemption(snapshot, other, new.priority) {
            return Ok(Placement::Preempt(plan));
        }
    }

    // step 3
    if new.start.is_some() && !new.past_trig {
        let predecessor = pending.last().or(snapshot.current.as_ref());
        if let Some(prev) = predecessor {
            let strict = snapshot.other.is_some();
            let proven = prev.end.is_some() || strict;
            if proven && !fits(new, Boundary::from(prev), None, switching) {
                return Err(RfError::ScheduleRejected);
            }
        }
    }
    Ok(Placement::Append)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ClientId = ClientId(0);
    const B: ClientId = ClientId(1);
    const SWITCH: [u32; 2] = [500, 500];

    fn queued(slot: SlotId, client: ClientId, priority: Priority, window: Option<(u32, u32)>) -> QueuedCmd {
        QueuedCmd {
            slot,
            handle: CmdHandle::new(slot as u16 + 1),
            client,
            priority,
            start: window.map(|w| w.0),
            end: window.map(|w| w.1),
        }
    }

    fn new_cmd(client: ClientId, priority: Priority, window: Option<(u32, u32)>) -> NewCmd {
        NewCmd {
            client,
            priority,
            start: window.map(|w| w.0),
            end: window.map(|w| w.1),
            past_trig: false,
        }
    }

    fn snapshot<'a>(current: Option<QueuedCmd>, pending: &'a [QueuedCmd], other: Option<ClientId>) -> Snapshot<'a> {
        Snapshot {
            now: 0,
            current,
            pending,
            phy_switching_us: &SWITCH,
            other,
            other_access_active: false,
        }
    }

    #[test]
    fn test_untimed_command_appends() {
        let pending = [queued(0, A, Priority::Normal, None)];
        let snap = snapshot(None, &pending, None);
        assert_eq!(place(&new_cmd(A, Priority::Normal, None), &snap), Ok(Placement::Append));
    }

    #[test]
    fn test_overlap_with_running_command_is_rejected() {
        let t0 = 400_000;
        let current = queued(0, A, Priority::Normal, Some((t0, t0 + 400)));
        let snap = snapshot(Some(current), &[], None);
        let overlapping = new_cmd(A, Priority::Normal, Some((t0 + 200, t0 + 320)));
        assert_eq!(place(&overlapping, &snap), Err(RfError::ScheduleRejected));

        let after = new_cmd(A, Priority::Normal, Some((t0 + 800, t0 + 900)));
        assert_eq!(place(&after, &snap), Ok(Placement::Append));
    }

    #[test]
    fn test_past_trigger_skips_timing_check() {
        let current = queued(0, A, Priority::Normal, Some((1000, 2000)));
        let snap = snapshot(Some(current), &[], None);
        let mut late = new_cmd(A, Priority::Normal, Some((1200, 1300)));
        late.past_trig = true;
        assert_eq!(place(&late, &snap), Ok(Placement::Append));
    }

    #[test]
    fn test_insert_at_top_across_clients() {
        // B's head starts at 1 s; A fits well before it, switching included
        let pending = [queued(0, B, Priority::Normal, Some((4_000_000, 4_400_000)))];
        let snap = snapshot(None, &pending, Some(B));
        let early = new_cmd(A, Priority::Normal, Some((40_000, 80_000)));
        assert_eq!(place(&early, &snap), Ok(Placement::Top));
    }

    #[test]
    fn test_switch_overhead_blocks_tight_fit() {
        // 400 us gap before B's head, 500 us switch into B
        let pending = [queued(0, B, Priority::Normal, Some((4_000, 8_000)))];
        let snap = snapshot(None, &pending, Some(B));
        let tight = new_cmd(A, Priority::Normal, Some((400, 2_400)));
        assert_eq!(place(&tight, &snap), Err(RfError::ScheduleRejected));
    }

    #[test]
    fn test_insert_between_other_clients_commands() {
        let pending = [
            queued(0, B, Priority::Normal, Some((0, 4_000))),
            queued(1, B, Priority::Normal, Some((40_000, 44_000))),
        ];
        let snap = snapshot(None, &pending, Some(B));
        // does not fit before the head (now = 0), fits between the two
        let middle = new_cmd(A, Priority::Normal, Some((12_000, 20_000)));
        assert_eq!(place(&middle, &snap), Ok(Placement::InsertAt(1)));
    }

    #[test]
    fn test_never_inserted_before_own_commands() {
        let pending = [
            queued(0, A, Priority::Normal, Some((40_000, 44_000))),
            queued(1, B, Priority::Normal, None),
        ];
        let snap = snapshot(None, &pending, Some(B));
        // would fit in front of the queue, but A already has a command there
        let early = new_cmd(A, Priority::Normal, Some((4_000, 8_000)));
        assert_ne!(place(&early, &snap), Ok(Placement::Top));
    }

    #[test]
    fn test_highest_preempts_untimed_commands() {
        let current = queued(0, B, Priority::Normal, None);
        let pending = [queued(1, B, Priority::Normal, None)];
        let snap = snapshot(Some(current), &pending, Some(B));
        let placement = place(&new_cmd(A, Priority::Highest, None), &snap).unwrap();
        assert_eq!(
            placement,
            Placement::Preempt(PreemptPlan {
                client: B,
                marked: vec![0, 1],
                target: CmdHandle::new(1),
                mode: CancelMode::Abrupt,
            })
        );
    }

    #[test]
    fn test_high_preempts_gracefully() {
        let pending = [queued(3, B, Priority::Normal, None)];
        let snap = snapshot(None, &pending, Some(B));
        match place(&new_cmd(A, Priority::High, None), &snap) {
            Ok(Placement::Preempt(plan)) => assert_eq!(plan.mode, CancelMode::Graceful),
            other => panic!("unexpected placement {other:?}"),
        }
    }

    #[test]
    fn test_preemption_needs_to_outrank_every_command() {
        let pending = [
            queued(0, B, Priority::Normal, None),
            queued(1, B, Priority::High, None),
        ];
        let snap = snapshot(None, &pending, Some(B));
        assert_eq!(preemption(&snap, B, Priority::High), Preemption::Denied);
        assert!(matches!(preemption(&snap, B, Priority::Highest), Preemption::Granted(_)));
        assert_eq!(preemption(&snap, A, Priority::Highest), Preemption::Unopposed);
    }

    #[test]
    fn test_normal_never_preempts() {
        let pending = [queued(0, B, Priority::Normal, None)];
        let snap = snapshot(None, &pending, Some(B));
        assert_eq!(place(&new_cmd(A, Priority::Normal, None), &snap), Ok(Placement::Append));
    }

    #[test]
    fn test_other_access_window_rejects() {
        let mut snap = snapshot(None, &[], Some(B));
        snap.other_access_active = true;
        assert_eq!(
            place(&new_cmd(A, Priority::Highest, None), &snap),
            Err(RfError::ScheduleRejected)
        );
    }

    #[test]
    fn test_open_ended_tail_with_second_client() {
        let current = queued(0, B, Priority::High, None);
        let timed = new_cmd(A, Priority::Normal, Some((40_000, 44_000)));

        let shared = snapshot(Some(current), &[], Some(B));
        assert_eq!(place(&timed, &shared), Err(RfError::ScheduleRejected));

        let alone = snapshot(Some(queued(0, A, Priority::Normal, None)), &[], None);
        assert_eq!(place(&timed, &alone), Ok(Placement::Append));
    }
}
