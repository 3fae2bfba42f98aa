// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Events delivered to user code, one per tick.

use crate::types::{Action, Message, Observation, Reward};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Regular tick
    Active,
    /// The trial is ending; the participant should wrap up and acknowledge
    Ending,
    /// Last event of the session
    Final,
}

/// What happened at one tick. Built once by the transport adapter, immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_type: EventType,
    observation: Option<Observation>,
    actions: Vec<Action>,
    rewards: Vec<Reward>,
    messages: Vec<Message>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            observation: None,
            actions: Vec::new(),
            rewards: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn active() -> Self {
        Self::new(EventType::Active)
    }

    pub fn ending() -> Self {
        Self::new(EventType::Ending)
    }

    pub fn final_event() -> Self {
        Self::new(EventType::Final)
    }

    pub fn with_observation(mut self, observation: Observation) -> Self {
        self.observation = Some(observation);
        self
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_rewards(mut self, rewards: Vec<Reward>) -> Self {
        self.rewards = rewards;
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn observation(&self) -> Option<&Observation> {
        self.observation.as_ref()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn rewards(&self) -> &[Reward] {
        &self.rewards
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_final(&self) -> bool {
        self.event_type == EventType::Final
    }

    pub fn is_ending(&self) -> bool {
        self.event_type == EventType::Ending
    }

    /// Consume the event, keeping only its observation
    pub fn into_observation(self) -> Option<Observation> {
        self.observation
    }
}
