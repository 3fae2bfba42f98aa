// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Session protocol engine.
//!
//! A session bridges the transport adapter and one piece of user logic. It is
//! split in two halves sharing a `SessionCore`:
//! - [`Session`] is moved into the user task: start handshake, event stream,
//!   rewards, messages, end acknowledgement
//! - [`SessionLink`] stays with the transport adapter: it injects decoded
//!   events and drains the outgoing and produced queues
//!
//! Lifecycle: `NotStarted -> Started -> (EndingObserved) -> Ended`.
//!
//! Ordering guarantees:
//! - incoming events reach user code in the order they were posted, never
//!   reordered by tick
//! - outgoing and produced data reach the adapter in post order
//! - the queues are independent: posting on one never waits on another
//!
//! With `auto_ack`, the end acknowledgement follows the participant's answer
//! to the ENDING event, so the data of that last tick still goes out.
//!
//! Late data is logged and discarded, never queued: events after a FINAL or
//! after the trial ended, outgoing data after the end was acknowledged.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use futures::Stream;
use tracing::{debug, warn};
use trial_config::SessionConfig;

use crate::error::{Result, SessionError};
use crate::event::{Event, EventType};
use crate::queue::{session_queue, QueuePolicy, QueueReceiver, QueueSender, QueueStream};
use crate::trial::Trial;
use crate::types::{Message, OutgoingData, ProducedData, Reward, RewardSource, SessionInfo};

/// Explicit consumer notified of every event the session accepts.
///
/// Called synchronously on the transport adapter's side, right after the event
/// was queued for the user task. Implementations must not block.
pub trait EventConsumer: Send + Sync {
    fn on_event(&self, tick_id: i64, event: &Event);

    /// The session was forced to exit; nothing more will arrive.
    fn on_exit(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Started,
    /// The trial is ending; only the end acknowledgement and final data remain
    EndingObserved,
    Ended,
}

/// Shared between the user half, the adapter half and the implementation task.
pub(crate) struct SessionCore {
    info: SessionInfo,
    trial: Arc<Trial>,
    started: AtomicBool,
    auto_ack: AtomicBool,
    last_tick_delivered: AtomicI64,
    last_event_delivered: AtomicBool,
    final_posted: AtomicBool,
    ack_pending: AtomicBool,
    transport_lost: AtomicBool,
    incoming: QueueSender<(i64, Event)>,
    outgoing: QueueSender<OutgoingData>,
    produced: QueueSender<ProducedData>,
    consumer: Option<Arc<dyn EventConsumer>>,
}

impl SessionCore {
    pub(crate) fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub(crate) fn trial(&self) -> &Arc<Trial> {
        &self.trial
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn auto_ack(&self) -> bool {
        self.auto_ack.load(Ordering::Acquire)
    }

    fn state(&self) -> SessionState {
        if !self.is_started() {
            SessionState::NotStarted
        } else if self.trial.is_ended() || self.last_event_delivered.load(Ordering::Acquire) {
            SessionState::Ended
        } else if self.trial.is_ending() {
            SessionState::EndingObserved
        } else {
            SessionState::Started
        }
    }

    fn start(&self, auto_ack: bool) -> Result<()> {
        if self.is_started() {
            return Err(SessionError::AlreadyStarted);
        }
        if self.trial.is_ended() {
            return Err(SessionError::TrialEnded);
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::AlreadyStarted);
        }
        self.auto_ack.store(auto_ack, Ordering::Release);
        debug!(
            trial_id = %self.trial.id(),
            participant = %self.info.name,
            auto_ack,
            "session started"
        );
        self.outgoing.try_post(OutgoingData::InitAck)
    }

    /// Whether outgoing data may still be posted; logs the reason otherwise.
    fn accepts_outgoing(&self, kind: &str) -> bool {
        if !self.is_started() {
            warn!(
                trial_id = %self.trial.id(),
                participant = %self.info.name,
                kind,
                "session not started, outgoing data dropped"
            );
            return false;
        }
        if self.trial.is_ending_ack() {
            warn!(
                trial_id = %self.trial.id(),
                participant = %self.info.name,
                kind,
                "trial end already acknowledged, outgoing data dropped"
            );
            return false;
        }
        true
    }

    pub(crate) fn post_outgoing(&self, datum: OutgoingData) -> Result<()> {
        validate_outgoing(&datum)?;
        if !self.accepts_outgoing(datum.kind()) {
            return Ok(());
        }
        let is_ack = matches!(datum, OutgoingData::EndingAck);
        self.outgoing.try_post(datum)?;
        if is_ack {
            self.trial.mark_ending_ack();
            debug!(
                trial_id = %self.trial.id(),
                participant = %self.info.name,
                "trial end acknowledged"
            );
        }
        Ok(())
    }

    pub(crate) fn post_produced(&self, datum: ProducedData) -> Result<()> {
        if !self.accepts_outgoing("produced") {
            return Ok(());
        }
        let last = datum.is_last();
        self.produced.try_post(datum)?;
        if last && self.trial.mark_ending() {
            debug!(
                trial_id = %self.trial.id(),
                participant = %self.info.name,
                "last batch produced, trial ending"
            );
        }
        Ok(())
    }

    /// Gate for incoming events. No side effects.
    fn accepts_incoming(&self, tick_id: i64, event_type: EventType) -> bool {
        let reason = if !self.is_started() {
            "session not started"
        } else if self.trial.is_ended() {
            "trial ended"
        } else if self.final_posted.load(Ordering::Acquire) {
            "final event already posted"
        } else {
            return true;
        };
        warn!(
            trial_id = %self.trial.id(),
            participant = %self.info.name,
            tick_id,
            ?event_type,
            reason,
            "late or dropped event"
        );
        false
    }

    /// Side effects of an event that made it onto the incoming queue.
    fn incoming_accepted(&self, tick_id: i64, event_type: EventType, observed: Option<&Event>) {
        match event_type {
            EventType::Final => {
                self.final_posted.store(true, Ordering::Release);
            }
            EventType::Ending => {
                if self.trial.mark_ending() {
                    debug!(
                        trial_id = %self.trial.id(),
                        participant = %self.info.name,
                        tick_id,
                        "trial ending"
                    );
                }
            }
            EventType::Active => {}
        }
        if let (Some(consumer), Some(event)) = (&self.consumer, observed) {
            consumer.on_event(tick_id, event);
        }
    }

    /// Bookkeeping done when the user task receives an event.
    fn delivered(&self, tick_id: i64, event: &Event) {
        if tick_id >= 0 {
            self.last_tick_delivered.store(tick_id, Ordering::Release);
            self.trial.advance_tick(tick_id);
        }
        self.last_event_delivered
            .store(event.is_final(), Ordering::Release);

        match event.event_type() {
            EventType::Active => {}
            EventType::Ending => self.arm_auto_ack(),
            EventType::Final => {
                if self.trial.is_ending_ack() {
                    self.trial.mark_ended();
                } else {
                    debug!(
                        trial_id = %self.trial.id(),
                        participant = %self.info.name,
                        "final event before end acknowledgement"
                    );
                    self.trial.force_ended();
                }
                debug!(
                    trial_id = %self.trial.id(),
                    participant = %self.info.name,
                    tick_id,
                    "final event delivered"
                );
            }
        }
    }

    /// The participant still has to answer the ENDING tick: acknowledge once
    /// it moves on (next event, next awaited observation, or return).
    pub(crate) fn arm_auto_ack(&self) {
        if self.auto_ack() && !self.trial.is_ending_ack() {
            self.ack_pending.store(true, Ordering::Release);
        }
    }

    /// Post the automatic acknowledgement if one is armed.
    pub(crate) fn flush_auto_ack(&self) {
        if !self.ack_pending.swap(false, Ordering::AcqRel) {
            return;
        }
        if self.trial.is_ending_ack() || self.trial.is_ended() {
            return;
        }
        if let Err(e) = self.post_outgoing(OutgoingData::EndingAck) {
            warn!(
                trial_id = %self.trial.id(),
                participant = %self.info.name,
                "automatic end acknowledgement failed: {}",
                e
            );
        }
    }

    /// Transport lost: unblock every consumer. Idempotent.
    pub(crate) fn force_exit(&self) {
        if !self.transport_lost.swap(true, Ordering::AcqRel) {
            debug!(
                trial_id = %self.trial.id(),
                participant = %self.info.name,
                "forcing session exit"
            );
        }
        self.incoming.force_exit();
        self.outgoing.force_exit();
        self.produced.force_exit();
        self.trial.force_ended();
        if let Some(consumer) = &self.consumer {
            consumer.on_exit();
        }
    }

    /// The user implementation returned: end the adapter streams after the
    /// data already posted.
    pub(crate) async fn close_outgoing(&self) {
        self.flush_auto_ack();
        self.outgoing.close_wait().await;
        self.produced.close_wait().await;
    }
}

fn validate_outgoing(datum: &OutgoingData) -> Result<()> {
    match datum {
        OutgoingData::Reward(reward) => {
            if reward.receiver.is_empty() {
                return Err(SessionError::InvalidArgument(
                    "reward receiver is required".to_string(),
                ));
            }
            if reward.sources.is_empty() {
                return Err(SessionError::InvalidArgument(
                    "reward needs at least one source".to_string(),
                ));
            }
        }
        OutgoingData::Message(message) => {
            if message.receiver.is_empty() {
                return Err(SessionError::InvalidArgument(
                    "message receiver is required".to_string(),
                ));
            }
        }
        OutgoingData::InitAck | OutgoingData::EndingAck => {}
    }
    Ok(())
}

/// User-facing half of a session.
pub struct Session {
    core: Arc<SessionCore>,
    events: Option<QueueReceiver<(i64, Event)>>,
}

impl Session {
    /// Create a session and the link handed to the transport adapter.
    pub fn new(
        info: SessionInfo,
        trial: Arc<Trial>,
        config: &SessionConfig,
    ) -> (Session, SessionLink) {
        Self::build(info, trial, config, None)
    }

    /// Same as [`Session::new`], notifying `consumer` of every accepted event.
    pub fn with_consumer(
        info: SessionInfo,
        trial: Arc<Trial>,
        config: &SessionConfig,
        consumer: Arc<dyn EventConsumer>,
    ) -> (Session, SessionLink) {
        Self::build(info, trial, config, Some(consumer))
    }

    fn build(
        info: SessionInfo,
        trial: Arc<Trial>,
        config: &SessionConfig,
        consumer: Option<Arc<dyn EventConsumer>>,
    ) -> (Session, SessionLink) {
        let (incoming_tx, incoming_rx) = session_queue(
            "incoming",
            QueuePolicy::from_capacity(config.incoming_queue_capacity),
        );
        let (outgoing_tx, outgoing_rx) = session_queue(
            "outgoing",
            QueuePolicy::from_capacity(config.outgoing_queue_capacity),
        );
        let (produced_tx, produced_rx) = session_queue(
            "produced",
            QueuePolicy::from_capacity(config.produced_queue_capacity),
        );

        let core = Arc::new(SessionCore {
            info,
            trial,
            started: AtomicBool::new(false),
            auto_ack: AtomicBool::new(config.default_auto_ack),
            last_tick_delivered: AtomicI64::new(-1),
            last_event_delivered: AtomicBool::new(false),
            final_posted: AtomicBool::new(false),
            ack_pending: AtomicBool::new(false),
            transport_lost: AtomicBool::new(false),
            incoming: incoming_tx,
            outgoing: outgoing_tx,
            produced: produced_tx,
            consumer,
        });

        let session = Session {
            core: Arc::clone(&core),
            events: Some(incoming_rx),
        };
        let link = SessionLink {
            core,
            outgoing: Some(outgoing_rx),
            produced: Some(produced_rx),
        };
        (session, link)
    }

    pub(crate) fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    /// Whether user code consumes events through [`Session::all_events`]
    pub(crate) fn events_taken(&self) -> bool {
        self.events.is_none()
    }

    /// Start the session and acknowledge it to the orchestrator.
    ///
    /// With `auto_ack`, the end of the trial is acknowledged on the
    /// participant's behalf once it has answered the ENDING event; otherwise call [`Session::sending_done`] once the
    /// trial is ending.
    pub fn start(&self, auto_ack: bool) -> Result<()> {
        self.core.start(auto_ack)
    }

    /// Events for the user logic, in the order the adapter posted them.
    ///
    /// The stream can only be taken once.
    pub fn all_events(&mut self) -> Result<EventStream> {
        if !self.core.is_started() {
            return Err(SessionError::NotStarted);
        }
        let receiver = self.events.take().ok_or_else(|| {
            SessionError::InvalidOperation("event stream already taken".to_string())
        })?;
        Ok(EventStream {
            core: Arc::clone(&self.core),
            receiver,
            stop: StopHandle::default(),
        })
    }

    #[deprecated(note = "use all_events()")]
    pub fn event_loop(&mut self) -> Result<EventStream> {
        self.all_events()
    }

    /// Post a datum on the outgoing queue.
    ///
    /// Dropped with a warning before start or once the end was acknowledged.
    pub fn post_outgoing_data(&self, datum: OutgoingData) -> Result<()> {
        self.core.post_outgoing(datum)
    }

    /// Send the same reward to every participant in `to`, for the current tick.
    pub fn add_reward<S: AsRef<str>>(&self, value: f32, confidence: f32, to: &[S]) -> Result<()> {
        self.add_reward_with(value, confidence, to, -1, None)
    }

    /// One reward per destination, each with this participant as its single source.
    pub fn add_reward_with<S: AsRef<str>>(
        &self,
        value: f32,
        confidence: f32,
        to: &[S],
        tick_id: i64,
        user_data: Option<Vec<u8>>,
    ) -> Result<()> {
        for receiver in to {
            let reward = Reward {
                receiver: receiver.as_ref().to_string(),
                tick_id,
                sources: vec![RewardSource {
                    sender: self.core.info.name.clone(),
                    value,
                    confidence,
                    user_data: user_data.clone(),
                }],
            };
            self.core.post_outgoing(OutgoingData::Reward(reward))?;
        }
        Ok(())
    }

    /// One message per destination.
    pub fn send_message<S: AsRef<str>>(&self, payload: Vec<u8>, to: &[S]) -> Result<()> {
        for receiver in to {
            let message = Message {
                tick_id: -1,
                sender: self.core.info.name.clone(),
                receiver: receiver.as_ref().to_string(),
                payload: payload.clone(),
            };
            self.core.post_outgoing(OutgoingData::Message(message))?;
        }
        Ok(())
    }

    /// Acknowledge the end of the trial. Only valid without `auto_ack`, once
    /// the trial is ending. Calling it again is a no-op.
    pub fn sending_done(&self) -> Result<()> {
        if self.core.auto_ack() {
            return Err(SessionError::InvalidOperation(
                "sending_done is handled automatically with auto_ack".to_string(),
            ));
        }
        let trial = &self.core.trial;
        if !trial.is_ending() {
            return Err(SessionError::InvalidOperation(
                "trial is not ending, nothing to acknowledge".to_string(),
            ));
        }
        if trial.is_ending_ack() || trial.is_ended() {
            debug!(
                trial_id = %trial.id(),
                participant = %self.core.info.name,
                "end already acknowledged"
            );
            return Ok(());
        }
        self.core.post_outgoing(OutgoingData::EndingAck)
    }

    pub fn is_trial_over(&self) -> bool {
        self.core.trial.is_ended()
    }

    pub fn trial_id(&self) -> &str {
        self.core.trial.id()
    }

    pub fn tick_id(&self) -> i64 {
        self.core.trial.tick_id()
    }

    pub fn name(&self) -> &str {
        &self.core.info.name
    }

    pub fn info(&self) -> &SessionInfo {
        &self.core.info
    }

    pub fn trial(&self) -> &Arc<Trial> {
        &self.core.trial
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    pub fn auto_ack(&self) -> bool {
        self.core.auto_ack()
    }

    /// Tick of the last event handed to user code, `-1` before the first one
    pub fn last_tick_delivered(&self) -> i64 {
        self.core.last_tick_delivered.load(Ordering::Acquire)
    }

    /// Whether the last event handed to user code was the FINAL one
    pub fn last_event_delivered(&self) -> bool {
        self.core.last_event_delivered.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("trial_id", &self.core.trial.id())
            .field("name", &self.core.info.name)
            .field("state", &self.core.state())
            .finish()
    }
}

/// Out-of-band "stop early" signal for an [`EventStream`].
#[derive(Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    waker: Arc<AtomicWaker>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.waker.wake();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Lazy, finite, single-use sequence of events for the user logic.
///
/// Ends after the FINAL event, after [`EventStream::stop`], or on forced exit
/// (without yielding anything more).
pub struct EventStream {
    core: Arc<SessionCore>,
    receiver: QueueReceiver<(i64, Event)>,
    stop: StopHandle,
}

impl EventStream {
    /// Next event, or `None` once the sequence is over
    pub async fn recv(&mut self) -> Option<Event> {
        futures::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// End the sequence without waiting for FINAL
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Handle to stop the sequence from another task
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        // Moving past an ENDING event: its answer was posted
        self.core.flush_auto_ack();
        self.stop.waker.register(cx.waker());
        if self.stop.is_stopped() || self.core.last_event_delivered.load(Ordering::Acquire) {
            self.receiver.finish();
            return Poll::Ready(None);
        }
        match self.receiver.poll_next_item(cx) {
            Poll::Ready(Some((tick_id, event))) => {
                self.core.delivered(tick_id, &event);
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.poll_event(cx)
    }
}

/// Adapter-facing half of a session.
pub struct SessionLink {
    core: Arc<SessionCore>,
    outgoing: Option<QueueReceiver<OutgoingData>>,
    produced: Option<QueueReceiver<ProducedData>>,
}

impl SessionLink {
    pub(crate) fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    /// Inject a decoded event. Never blocks.
    ///
    /// Dropped with a warning before start, after the trial ended or after a
    /// FINAL event. A full bounded queue returns `QueueFull`.
    pub fn post_incoming_event(&self, tick_id: i64, event: Event) -> Result<()> {
        let event_type = event.event_type();
        if !self.core.accepts_incoming(tick_id, event_type) {
            return Ok(());
        }
        let observed = self.core.consumer.as_ref().map(|_| event.clone());
        self.core.incoming.try_post((tick_id, event))?;
        self.core
            .incoming_accepted(tick_id, event_type, observed.as_ref());
        Ok(())
    }

    /// Same as [`SessionLink::post_incoming_event`], waiting for room in a bounded queue.
    pub async fn post_incoming_event_wait(&self, tick_id: i64, event: Event) -> Result<()> {
        let event_type = event.event_type();
        if !self.core.accepts_incoming(tick_id, event_type) {
            return Ok(());
        }
        let observed = self.core.consumer.as_ref().map(|_| event.clone());
        self.core.incoming.post_wait((tick_id, event)).await?;
        self.core
            .incoming_accepted(tick_id, event_type, observed.as_ref());
        Ok(())
    }

    /// Outgoing data in post order, ending on forced exit or once the user
    /// implementation returned. Can only be taken once.
    pub fn retrieve_outgoing_data(&mut self) -> Result<QueueStream<OutgoingData>> {
        self.outgoing.take().map(QueueStream::new).ok_or_else(|| {
            SessionError::InvalidOperation("outgoing stream already taken".to_string())
        })
    }

    /// Actions or observation batches in post order. Can only be taken once.
    pub fn retrieve_produced_data(&mut self) -> Result<QueueStream<ProducedData>> {
        self.produced.take().map(QueueStream::new).ok_or_else(|| {
            SessionError::InvalidOperation("produced stream already taken".to_string())
        })
    }

    /// Transport lost: end every stream promptly and mark the trial ended.
    pub fn force_exit(&self) {
        self.core.force_exit();
    }

    pub fn pending_incoming(&self) -> usize {
        self.core.incoming.pending()
    }

    pub fn pending_outgoing(&self) -> usize {
        self.core.outgoing.pending()
    }

    pub fn pending_produced(&self) -> usize {
        self.core.produced.pending()
    }

    pub fn participant(&self) -> &str {
        &self.core.info.name
    }

    pub fn trial(&self) -> &Arc<Trial> {
        &self.core.trial
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }
}
