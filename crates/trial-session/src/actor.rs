// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Actor-facing session: receive an observation, act, await the next observation.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use trial_config::SessionConfig;

use crate::error::{Result, SessionError};
use crate::event::{Event, EventType};
use crate::session::{EventConsumer, Session, SessionLink};
use crate::slot::SingleSlot;
use crate::trial::Trial;
use crate::types::{Action, ActionOut, Observation, ProducedData, SessionInfo};

/// Fed by the transport side for every accepted event.
///
/// `None` in the observation slot and an empty action batch mean the trial
/// is over and nothing more will come.
#[derive(Debug)]
struct ActorSlots {
    observation: SingleSlot<Option<Observation>>,
    actions: SingleSlot<Vec<Action>>,
    observation_tick: AtomicI64,
    ending_observed: AtomicBool,
}

impl EventConsumer for ActorSlots {
    fn on_event(&self, _tick_id: i64, event: &Event) {
        if event.is_ending() {
            self.ending_observed.store(true, Ordering::Release);
        }
        match event.event_type() {
            EventType::Active | EventType::Ending => {
                if !event.actions().is_empty() {
                    self.actions.put(event.actions().to_vec());
                }
                if let Some(observation) = event.observation() {
                    self.observation_tick
                        .store(observation.tick_id, Ordering::Release);
                    self.observation.put(Some(observation.clone()));
                }
            }
            EventType::Final => {
                self.observation.put(event.observation().cloned());
                self.actions.put(event.actions().to_vec());
            }
        }
    }

    fn on_exit(&self) {
        self.observation.put(None);
        self.actions.put(Vec::new());
    }
}

/// Session of an actor: one action per observation received.
pub struct ActorSession {
    session: Session,
    slots: Arc<ActorSlots>,
}

impl ActorSession {
    pub fn new(
        info: SessionInfo,
        trial: Arc<Trial>,
        config: &SessionConfig,
    ) -> (ActorSession, SessionLink) {
        let slots = Arc::new(ActorSlots {
            observation: SingleSlot::new(),
            actions: SingleSlot::new(),
            observation_tick: AtomicI64::new(-1),
            ending_observed: AtomicBool::new(false),
        });
        let consumer: Arc<dyn EventConsumer> = slots.clone();
        let (session, link) = Session::with_consumer(info, trial, config, consumer);
        (ActorSession { session, slots }, link)
    }

    /// Start the session and wait for the first observation.
    ///
    /// Returns `None` if the trial ends before any observation arrives.
    pub async fn start(&self, auto_ack: bool) -> Result<Option<Observation>> {
        self.slots.observation.clear();
        self.session.start(auto_ack)?;
        Ok(self.slots.observation.take().await)
    }

    pub fn start_no_wait(&self, auto_ack: bool) -> Result<()> {
        self.session.start(auto_ack)
    }

    /// Wait until actions are available; returns immediately if some are buffered.
    ///
    /// An empty batch means the trial is over.
    pub async fn gather_actions(&self) -> Vec<Action> {
        self.slots.actions.take().await
    }

    /// Send an action and wait for the next observation.
    ///
    /// Returns `None` if the trial ends first. Answering the ENDING
    /// observation with `auto_ack` also acknowledges the end.
    pub async fn do_action(&self, payload: Vec<u8>) -> Result<Option<Observation>> {
        self.slots.observation.clear();
        self.do_action_no_wait(payload)?;
        self.session.core().flush_auto_ack();
        Ok(self.slots.observation.take().await)
    }

    /// Send an action for the observation being answered.
    ///
    /// With [`Session::all_events`] that is the last event yielded; otherwise
    /// the latest observation received.
    pub fn do_action_no_wait(&self, payload: Vec<u8>) -> Result<()> {
        let core = self.session.core();
        if !core.is_started() {
            return Err(SessionError::NotStarted);
        }
        let streaming = self.session.events_taken();
        let tick_id = if streaming {
            self.session.last_tick_delivered()
        } else {
            self.slots.observation_tick.load(Ordering::Acquire)
        };
        core.post_produced(ProducedData::Action(ActionOut { tick_id, payload }))?;
        if !streaming && self.slots.ending_observed.load(Ordering::Acquire) {
            core.arm_auto_ack();
        }
        Ok(())
    }
}

impl Deref for ActorSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl DerefMut for ActorSession {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

impl std::fmt::Debug for ActorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorSession")
            .field("session", &self.session)
            .finish()
    }
}
