
use std::sync::Arc;

use mock_support::{timed_tx, tx, Harness, Recorder, CMD_PROP_TX};
use proptest::prelude::*;
use rfcore_rs::error::RfError;
use rfcore_rs::rfcore::fsm::FsmState;
use rfcore_rs::rfcore::hal::TimerId;
use rfcore_rs::rfcore::mailbox::{CpeInterrupt, CMD_STOP};
use rfcore_rs::rfcore::types::{
    ClientEvent, ClientEventMask, CmdCallback, EventMask, Priority, RadioOp, RfModeKind, RfParams,
    ScheduleParams, StartTrigger,
};

fn window(start: u32, length: u32) -> ScheduleParams {
    ScheduleParams {
        end_time: Some(start.wrapping_add(length)),
        ..ScheduleParams::default()
    }
}

/// Tests that an overlapping timed command is rejected and the client hears when the radio frees up.
#[test]
fn test_overlap_rejected_then_radio_free() {
    let h = Harness::new();
    let rec = Recorder::new();
    let rf = h.open_with(RfModeKind::ProprietarySub1G, rec.params(RfParams::default()));
    let t0 = h.driver.get_current_time().wrapping_add(40_000);

    let first = rf
        .schedule_cmd(timed_tx(1, t0), window(t0, 400), Some(rec.command_cb()), EventMask::empty())
        .unwrap();
    assert_eq!(
        rf.schedule_cmd(
            timed_tx(2, t0.wrapping_add(200)),
            window(t0.wrapping_add(200), 120),
            None,
            EventMask::empty()
        ),
        Err(RfError::ScheduleRejected)
    );

    h.radio.advance_us(7_500);
    assert!(h.timers.fire(TimerId::PowerUp));
    h.settle();

    assert_eq!(rec.handles(), vec![first]);
    assert_eq!(h.dispatched_tags(), vec![1]);
    assert_eq!(
        rec.power_events(),
        vec![EventMask::POWER_UP, EventMask::RADIO_FREE]
    );
}

/// Tests that a timed command after the end of another one is accepted.
#[test]
fn test_back_to_back_timed_commands() {
    let h = Harness::new();
    let rf = h.open(RfModeKind::ProprietarySub1G);
    let t0 = h.driver.get_current_time().wrapping_add(40_000);

    rf.schedule_cmd(timed_tx(1, t0), window(t0, 400), None, EventMask::empty())
        .unwrap();
    let later = t0.wrapping_add(4_000);
    rf.schedule_cmd(timed_tx(2, later), window(later, 400), None, EventMask::empty())
        .unwrap();

    let map = h.driver.schedule_map();
    assert_eq!(map.len(), 2);
    assert_eq!(map[0].start_time, Some(t0));
    assert_eq!(map[1].end_time, Some(later.wrapping_add(400)));

    h.radio.advance_us(7_500);
    assert!(h.timers.fire(TimerId::PowerUp));
    h.settle();
    assert_eq!(h.dispatched_tags(), vec![1]);

    // the second command is far enough out to power down and wake again
    assert_eq!(h.driver.fsm_state(), FsmState::PowerUp);
    let delay = h.timers.timeout_of(TimerId::PowerUp).unwrap();
    assert!(delay > 0 && delay < 4_000, "wakeup in {delay} us");

    h.radio.advance_us(delay.into());
    assert!(h.timers.fire(TimerId::PowerUp));
    h.settle();
    assert_eq!(h.dispatched_tags(), vec![1, 2]);
    assert!(h.driver.schedule_map().is_empty());
}

/// Tests that a past-trigger command skips the timing check.
#[test]
fn test_past_trigger_accepted() {
    let h = Harness::new();
    let rf = h.open(RfModeKind::ProprietarySub1G);
    let t0 = h.driver.get_current_time().wrapping_add(40_000);

    rf.schedule_cmd(timed_tx(1, t0), window(t0, 400), None, EventMask::empty())
        .unwrap();
    let late = Arc::new(
        RadioOp::new(CMD_PROP_TX)
            .with_payload(vec![2])
            .with_trigger(StartTrigger::AbsTime {
                time: t0.wrapping_add(100),
                past_trig: true,
            }),
    );
    assert!(rf
        .schedule_cmd(late, ScheduleParams::default(), None, EventMask::empty())
        .is_ok());
}

/// Tests that an absolute start behind an open-ended command only proves out with one client.
#[test]
fn test_open_ended_predecessor() {
    let h = Harness::new();
    h.radio.set_auto_complete(false);
    let a = h.open(RfModeKind::ProprietarySub1G);

    a.post_cmd(tx(1), Priority::Normal, None, EventMask::empty())
        .unwrap();
    h.settle();
    let start = h.driver.get_current_time().wrapping_add(400_000);
    assert!(a
        .post_cmd(timed_tx(2, start), Priority::Normal, None, EventMask::empty())
        .is_ok());

    let b = h.open(RfModeKind::Proprietary2G4);
    let start = start.wrapping_add(40_000);
    assert_eq!(
        b.post_cmd(timed_tx(3, start), Priority::Normal, None, EventMask::empty()),
        Err(RfError::ScheduleRejected)
    );
}

/// Tests that a High command stops the other client's work and runs next.
#[test]
fn test_high_priority_preempts_gracefully() {
    let h = Harness::new();
    h.radio.set_auto_complete(false);
    let a = h.open(RfModeKind::ProprietarySub1G);
    let b = h.open(RfModeKind::Proprietary2G4);
    let rec = Recorder::new();

    let running = b
        .post_cmd(tx(1), Priority::Normal, Some(rec.command_cb()), EventMask::empty())
        .unwrap();
    let queued = b
        .post_cmd(tx(2), Priority::Normal, Some(rec.command_cb()), EventMask::empty())
        .unwrap();
    h.settle();
    let winner = a
        .post_cmd(tx(3), Priority::High, Some(rec.command_cb()), EventMask::empty())
        .unwrap();
    h.settle();

    assert!(h.radio.direct_commands().contains(&CMD_STOP));
    assert_eq!(
        rec.events_of(running),
        vec![EventMask::CMD_STOPPED | EventMask::CMD_PREEMPTED]
    );
    assert_eq!(
        rec.events_of(queued),
        vec![EventMask::CMD_CANCELLED | EventMask::CMD_PREEMPTED]
    );
    assert_eq!(h.dispatched_tags(), vec![1, 3]);

    assert!(h.radio.complete_current(CpeInterrupt::empty()));
    h.settle();
    assert_eq!(rec.events_of(winner), vec![EventMask::LAST_CMD_DONE]);
}

/// Tests that a preempted command reports through its callback even when nobody pended in time.
#[tokio::test]
async fn test_preempted_events_reach_callback_without_pend() {
    let h = Harness::new();
    h.radio.set_auto_complete(false);
    let low = h.open(RfModeKind::ProprietarySub1G);
    let high = h.open(RfModeKind::Proprietary2G4);

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let on_retire: CmdCallback = Arc::new(move |_, handle, events| {
        let _ = events_tx.send((handle, events));
    });
    let victim = low
        .post_cmd(tx(1), Priority::Normal, Some(on_retire), EventMask::empty())
        .unwrap();
    h.settle();
    high.post_cmd(tx(2), Priority::High, None, EventMask::empty())
        .unwrap();
    h.settle();

    // retired already, so a late pend only learns that it finished
    assert_eq!(
        low.pend_cmd(victim, EventMask::empty()).await,
        Ok(EventMask::LAST_CMD_DONE)
    );
    assert_eq!(
        events_rx.try_recv(),
        Ok((victim, EventMask::CMD_STOPPED | EventMask::CMD_PREEMPTED))
    );
}

/// Tests that the preempted client is told once the winner is done.
#[test]
fn test_highest_preemption_frees_radio_for_loser() {
    let h = Harness::new();
    h.radio.set_auto_complete(false);
    let a = h.open(RfModeKind::ProprietarySub1G);
    let rec = Recorder::new();
    let params = RfParams {
        client_event_mask: ClientEventMask::RADIO_FREE,
        ..rec.params(RfParams::default())
    };
    let b = h.open_with(RfModeKind::Proprietary2G4, params);

    let victim = b
        .post_cmd(tx(1), Priority::Normal, Some(rec.command_cb()), EventMask::empty())
        .unwrap();
    h.settle();
    a.post_cmd(tx(2), Priority::Highest, None, EventMask::empty())
        .unwrap();
    h.settle();

    assert_eq!(
        rec.events_of(victim),
        vec![EventMask::CMD_ABORTED | EventMask::CMD_PREEMPTED]
    );
    assert!(rec.client_events().is_empty());

    assert!(h.radio.complete_current(CpeInterrupt::empty()));
    h.settle();
    assert_eq!(rec.client_events(), vec![ClientEvent::RadioFree]);
    assert!(!rec.power_events().contains(&EventMask::RADIO_FREE));
}

/// Tests that equal priorities queue up behind each other instead of preempting.
#[test]
fn test_equal_priority_does_not_preempt() {
    let h = Harness::new();
    h.radio.set_auto_complete(false);
    let a = h.open(RfModeKind::ProprietarySub1G);
    let b = h.open(RfModeKind::Proprietary2G4);
    let rec = Recorder::new();

    let first = b
        .post_cmd(tx(1), Priority::High, Some(rec.command_cb()), EventMask::empty())
        .unwrap();
    h.settle();
    let second = a
        .post_cmd(tx(2), Priority::High, Some(rec.command_cb()), EventMask::empty())
        .unwrap();
    h.settle();
    assert!(rec.commands().is_empty());

    for _ in 0..2 {
        assert!(h.radio.complete_current(CpeInterrupt::empty()));
        h.settle();
    }
    assert_eq!(rec.handles(), vec![first, second]);
    assert_eq!(h.dispatched_tags(), vec![1, 2]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Tests that each client's commands are dispatched in the order they were posted.
    #[test]
    fn prop_per_client_dispatch_order(
        batches in prop::collection::vec(prop::collection::vec(any::<bool>(), 1..=6), 1..10)
    ) {
        let h = Harness::new();
        let rec = Recorder::new();
        let clients = [
            h.open(RfModeKind::ProprietarySub1G),
            h.open(RfModeKind::Proprietary2G4),
        ];

        let mut posted = 0usize;
        for batch in &batches {
            for &second in batch {
                let who = usize::from(second);
                let op = Arc::new(
                    RadioOp::new(CMD_PROP_TX).with_payload(vec![who as u8, posted as u8]),
                );
                clients[who]
                    .post_cmd(op, Priority::Normal, Some(rec.command_cb()), EventMask::empty())
                    .unwrap();
                posted += 1;
            }
            h.settle();
        }

        prop_assert_eq!(rec.commands().len(), posted);
        for who in 0..2u8 {
            let order: Vec<u8> = h
                .radio
                .dispatched_payloads()
                .iter()
                .filter(|p| p.first() == Some(&who))
                .map(|p| p[1])
                .collect();
            prop_assert!(order.windows(2).all(|w| w[0] < w[1]), "client {} out of order: {:?}", who, order);
        }
    }
}
