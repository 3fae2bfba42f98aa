// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Protocol tests for `Session` / `SessionLink`: ordering, lifecycle, late
//! data and end-of-trial acknowledgement.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;
use trial_config::SessionConfig;
use trial_session::{
    Event, EventConsumer, EventType, Observation, OutgoingData, ParticipantInfo, Session,
    SessionError, SessionInfo, SessionLink, SessionState, Trial,
};

const WAIT: Duration = Duration::from_secs(5);

fn make_trial() -> Arc<Trial> {
    Arc::new(Trial::new(
        "trial-42",
        vec![
            ParticipantInfo::new("env", "environment"),
            ParticipantInfo::new("A", "agent"),
            ParticipantInfo::new("B", "agent"),
        ],
    ))
}

fn make_session() -> (Session, SessionLink) {
    Session::new(
        SessionInfo::new("A", "agent"),
        make_trial(),
        &SessionConfig::default(),
    )
}

fn observation(tick_id: i64) -> Observation {
    Observation {
        tick_id,
        timestamp: 1_000 + tick_id as u64,
        payload: vec![tick_id as u8],
    }
}

#[tokio::test]
async fn events_arrive_in_post_order_and_stop_after_final() {
    let (mut session, link) = make_session();
    session.start(true).unwrap();

    for tick in 0..3 {
        link.post_incoming_event(tick, Event::active().with_observation(observation(tick)))
            .unwrap();
    }
    link.post_incoming_event(3, Event::final_event()).unwrap();
    // Late: dropped with a warning, never queued
    link.post_incoming_event(4, Event::active()).unwrap();
    assert_eq!(link.pending_incoming(), 4);

    let events: Vec<Event> = timeout(WAIT, session.all_events().unwrap().collect::<Vec<_>>())
        .await
        .unwrap();

    let ticks: Vec<i64> = events
        .iter()
        .filter_map(|e| e.observation().map(|o| o.tick_id))
        .collect();
    assert_eq!(ticks, vec![0, 1, 2]);
    assert_eq!(events.len(), 4);
    assert_eq!(
        events.iter().filter(|e| e.is_final()).count(),
        1,
        "exactly one FINAL"
    );
    assert!(events.last().unwrap().is_final(), "FINAL comes last");

    assert_eq!(session.last_tick_delivered(), 3);
    assert!(session.last_event_delivered());
    assert!(session.is_trial_over());
    assert_eq!(session.state(), SessionState::Ended);
}

#[tokio::test]
async fn last_tick_moves_only_when_the_event_is_yielded() {
    let (mut session, link) = make_session();
    session.start(true).unwrap();
    let mut events = session.all_events().unwrap();

    link.post_incoming_event(3, Event::active().with_observation(observation(3)))
        .unwrap();
    assert_eq!(session.last_tick_delivered(), -1);
    assert_eq!(session.tick_id(), -1);

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.event_type(), EventType::Active);
    assert_eq!(session.last_tick_delivered(), 3);
    assert_eq!(session.tick_id(), 3);
}

#[tokio::test]
async fn second_start_is_rejected() {
    let (session, link) = make_session();
    session.start(true).unwrap();

    assert!(matches!(session.start(true), Err(SessionError::AlreadyStarted)));
    assert_eq!(link.pending_outgoing(), 1, "a single init ack");
}

#[tokio::test]
async fn start_after_the_trial_ended_is_rejected() {
    let trial = make_trial();
    let config = SessionConfig::default();
    let (first, first_link) = Session::new(SessionInfo::new("A", "agent"), trial.clone(), &config);
    first.start(true).unwrap();
    first_link.force_exit();
    assert!(trial.is_ended());

    let (late, late_link) = Session::new(SessionInfo::new("B", "agent"), trial, &config);
    assert!(matches!(late.start(true), Err(SessionError::TrialEnded)));
    assert_eq!(late_link.pending_outgoing(), 0);
}

#[tokio::test]
async fn all_events_can_only_be_taken_once() {
    let (mut session, _link) = make_session();
    session.start(true).unwrap();

    let _events = session.all_events().unwrap();
    assert!(matches!(
        session.all_events(),
        Err(SessionError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn rewards_fan_out_one_per_destination() {
    let (session, mut link) = make_session();
    session.start(true).unwrap();
    session.add_reward(2.0, 0.5, &["A", "B"]).unwrap();

    let mut outgoing = link.retrieve_outgoing_data().unwrap();
    assert!(matches!(outgoing.recv().await, Some(OutgoingData::InitAck)));

    let mut receivers = Vec::new();
    for _ in 0..2 {
        match timeout(WAIT, outgoing.recv()).await.unwrap() {
            Some(OutgoingData::Reward(reward)) => {
                assert_eq!(reward.tick_id, -1);
                assert_eq!(reward.sources.len(), 1);
                assert_eq!(reward.sources[0].sender, "A");
                assert_eq!(reward.value(), 2.0);
                assert_eq!(reward.confidence(), 0.5);
                receivers.push(reward.receiver);
            }
            other => panic!("expected a reward, got {:?}", other),
        }
    }
    assert_eq!(receivers, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(link.pending_outgoing(), 0);
}

#[tokio::test]
async fn messages_need_a_receiver() {
    let (session, link) = make_session();
    session.start(true).unwrap();

    session.send_message(b"hello".to_vec(), &["B"]).unwrap();
    let empty: [&str; 1] = [""];
    let err = session.send_message(b"hello".to_vec(), &empty).unwrap_err();
    assert!(matches!(err, SessionError::InvalidArgument(_)));
    assert_eq!(link.pending_outgoing(), 2);
}

#[tokio::test]
async fn active_then_final_leaves_only_the_init_ack() {
    let (mut session, mut link) = make_session();
    session.start(true).unwrap();

    link.post_incoming_event(1, Event::active()).unwrap();
    link.post_incoming_event(2, Event::final_event()).unwrap();
    let events: Vec<Event> = timeout(WAIT, session.all_events().unwrap().collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(events.len(), 2);

    assert_eq!(link.pending_outgoing(), 1);
    let mut outgoing = link.retrieve_outgoing_data().unwrap();
    assert!(matches!(outgoing.recv().await, Some(OutgoingData::InitAck)));
}

#[tokio::test]
async fn ending_with_auto_ack_sends_one_ending_ack() {
    let (mut session, mut link) = make_session();
    session.start(true).unwrap();

    link.post_incoming_event(0, Event::ending()).unwrap();
    link.post_incoming_event(1, Event::final_event()).unwrap();
    let events: Vec<Event> = timeout(WAIT, session.all_events().unwrap().collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(events[0].is_ending());

    assert_eq!(link.pending_outgoing(), 2);
    let mut outgoing = link.retrieve_outgoing_data().unwrap();
    assert!(matches!(outgoing.recv().await, Some(OutgoingData::InitAck)));
    assert!(matches!(outgoing.recv().await, Some(OutgoingData::EndingAck)));
    assert!(session.trial().is_ending_ack());
    assert!(session.is_trial_over());
}

#[tokio::test]
async fn automatic_ack_waits_for_the_ending_tick_answer() {
    let (mut session, mut link) = make_session();
    session.start(true).unwrap();
    let mut events = session.all_events().unwrap();

    link.post_incoming_event(7, Event::ending()).unwrap();
    let ending = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(ending.is_ending());

    session.send_message(b"done".to_vec(), &["B"]).unwrap();
    assert!(!session.trial().is_ending_ack());

    // Stopping moves past the ENDING event
    events.stop();
    assert!(events.recv().await.is_none());
    assert!(session.trial().is_ending_ack());

    let mut outgoing = link.retrieve_outgoing_data().unwrap();
    assert!(matches!(outgoing.recv().await, Some(OutgoingData::InitAck)));
    assert!(matches!(outgoing.recv().await, Some(OutgoingData::Message(_))));
    assert!(matches!(outgoing.recv().await, Some(OutgoingData::EndingAck)));
    assert_eq!(link.pending_outgoing(), 0);
}

#[tokio::test]
async fn sending_done_is_manual_only() {
    let (session, _link) = make_session();
    session.start(true).unwrap();
    assert!(matches!(
        session.sending_done(),
        Err(SessionError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn sending_done_requires_an_ending_trial() {
    let (session, link) = make_session();
    session.start(false).unwrap();
    assert!(matches!(
        session.sending_done(),
        Err(SessionError::InvalidOperation(_))
    ));
    assert_eq!(link.pending_outgoing(), 1);
}

#[tokio::test]
async fn data_after_ending_ack_is_dropped() {
    let (mut session, link) = make_session();
    session.start(false).unwrap();
    let mut events = session.all_events().unwrap();

    link.post_incoming_event(5, Event::ending()).unwrap();
    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(event.is_ending());
    assert_eq!(session.state(), SessionState::EndingObserved);
    assert_eq!(link.pending_outgoing(), 1, "no automatic acknowledgement");

    session.add_reward(1.0, 1.0, &["B"]).unwrap();
    session.sending_done().unwrap();
    assert_eq!(link.pending_outgoing(), 3);

    // Late data and repeated acknowledgements are no-ops
    session.add_reward(1.0, 1.0, &["B"]).unwrap();
    session.send_message(vec![1], &["B"]).unwrap();
    session.sending_done().unwrap();
    assert_eq!(link.pending_outgoing(), 3);
}

#[tokio::test]
async fn stop_ends_the_stream_early() {
    let (mut session, link) = make_session();
    session.start(true).unwrap();
    link.post_incoming_event(0, Event::active()).unwrap();
    link.post_incoming_event(1, Event::active()).unwrap();

    let mut events = session.all_events().unwrap();
    assert!(timeout(WAIT, events.recv()).await.unwrap().is_some());

    let stop = events.stop_handle();
    stop.stop();
    assert!(stop.is_stopped());
    assert!(events.recv().await.is_none());
    assert_eq!(session.last_tick_delivered(), 0);
}

#[tokio::test]
async fn force_exit_unblocks_a_waiting_consumer() {
    let (mut session, mut link) = make_session();
    session.start(true).unwrap();
    let mut events = session.all_events().unwrap();

    let waiter = tokio::spawn(async move { events.recv().await });
    tokio::task::yield_now().await;
    link.force_exit();

    let next = timeout(WAIT, waiter).await.unwrap().unwrap();
    assert!(next.is_none());
    assert!(session.is_trial_over());

    // Data already posted is drained before the stream ends
    let mut outgoing = link.retrieve_outgoing_data().unwrap();
    assert!(matches!(outgoing.recv().await, Some(OutgoingData::InitAck)));
    assert!(outgoing.recv().await.is_none());
    assert!(outgoing.is_terminated());

    // Idempotent
    link.force_exit();
}

#[tokio::test]
async fn bounded_incoming_waits_for_room() {
    let config = SessionConfig {
        incoming_queue_capacity: 1,
        ..SessionConfig::default()
    };
    let (mut session, link) = Session::new(SessionInfo::new("A", "agent"), make_trial(), &config);
    session.start(true).unwrap();
    let mut events = session.all_events().unwrap();

    link.post_incoming_event(0, Event::active()).unwrap();
    assert!(matches!(
        link.post_incoming_event(1, Event::active()),
        Err(SessionError::QueueFull("incoming"))
    ));

    let (posted, first) = timeout(WAIT, async {
        tokio::join!(
            link.post_incoming_event_wait(1, Event::active()),
            events.recv()
        )
    })
    .await
    .unwrap();
    posted.unwrap();
    assert!(first.is_some());
    assert!(timeout(WAIT, events.recv()).await.unwrap().is_some());
    assert_eq!(session.last_tick_delivered(), 1);
}

#[derive(Default)]
struct RecordingConsumer {
    seen: Mutex<Vec<(i64, EventType)>>,
    exited: Mutex<bool>,
}

impl EventConsumer for RecordingConsumer {
    fn on_event(&self, tick_id: i64, event: &Event) {
        self.seen.lock().unwrap().push((tick_id, event.event_type()));
    }

    fn on_exit(&self) {
        *self.exited.lock().unwrap() = true;
    }
}

#[tokio::test]
async fn consumer_sees_accepted_events_only() {
    let consumer = Arc::new(RecordingConsumer::default());
    let (session, link) = Session::with_consumer(
        SessionInfo::new("A", "agent"),
        make_trial(),
        &SessionConfig::default(),
        consumer.clone(),
    );

    link.post_incoming_event(0, Event::active()).unwrap();
    session.start(true).unwrap();
    link.post_incoming_event(1, Event::active()).unwrap();
    link.post_incoming_event(2, Event::final_event()).unwrap();
    link.post_incoming_event(3, Event::active()).unwrap();
    link.force_exit();

    assert_eq!(
        *consumer.seen.lock().unwrap(),
        vec![(1, EventType::Active), (2, EventType::Final)]
    );
    assert!(*consumer.exited.lock().unwrap());
}
