// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Value types exchanged between a session, its user task and the transport adapter.
//!
//! Payloads are opaque byte buffers: encoding them is the transport adapter's concern.

use serde::{Deserialize, Serialize};

/// A participant of a trial, as announced by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub name: String,
    pub class_name: String,
}

impl ParticipantInfo {
    pub fn new(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
        }
    }
}

/// Identity and configuration of the participant a session is running for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Participant name; used as the sender of rewards and messages
    pub name: String,
    /// Actor class, or the environment's implementation class
    pub class_name: String,
    /// Name of the user implementation selected by the orchestrator
    pub impl_name: String,
    /// Opaque user configuration sent with the trial parameters
    pub config: Option<Vec<u8>>,
}

impl SessionInfo {
    pub fn new(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            ..Default::default()
        }
    }

    pub fn with_impl_name(mut self, impl_name: impl Into<String>) -> Self {
        self.impl_name = impl_name.into();
        self
    }

    pub fn with_config(mut self, config: Vec<u8>) -> Self {
        self.config = Some(config);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub tick_id: i64,
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Index of the acting participant in the trial's participant list
    pub actor_index: usize,
    pub tick_id: i64,
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

/// One contribution to a reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSource {
    pub sender: String,
    pub value: f32,
    pub confidence: f32,
    pub user_data: Option<Vec<u8>>,
}

/// Reward addressed to one receiver, aggregated from one or more sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub receiver: String,
    /// Tick the reward applies to; `-1` means the current tick
    pub tick_id: i64,
    pub sources: Vec<RewardSource>,
}

impl Reward {
    /// Confidence-weighted mean of the source values.
    ///
    /// Returns `0.0` when the total confidence is zero.
    pub fn value(&self) -> f32 {
        let total = self.confidence();
        if total <= 0.0 {
            return 0.0;
        }
        let weighted: f32 = self.sources.iter().map(|s| s.value * s.confidence).sum();
        weighted / total
    }

    /// Sum of the source confidences
    pub fn confidence(&self) -> f32 {
        self.sources.iter().map(|s| s.confidence).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub tick_id: i64,
    pub sender: String,
    pub receiver: String,
    pub payload: Vec<u8>,
}

/// Data a session hands to the transport adapter on the generic outgoing queue.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingData {
    /// Acknowledges the start of the session
    InitAck,
    Reward(Reward),
    Message(Message),
    /// The participant is done sending
    EndingAck,
}

impl OutgoingData {
    pub fn kind(&self) -> &'static str {
        match self {
            OutgoingData::InitAck => "init_ack",
            OutgoingData::Reward(_) => "reward",
            OutgoingData::Message(_) => "message",
            OutgoingData::EndingAck => "ending_ack",
        }
    }
}

/// Action produced by an actor for the current tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOut {
    pub tick_id: i64,
    pub payload: Vec<u8>,
}

/// Observation produced by the environment for a set of actors.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationOut {
    /// Participant names or wildcard patterns resolved by the orchestrator
    pub destinations: Vec<String>,
    pub payload: Vec<u8>,
}

impl ObservationOut {
    pub fn new<S: Into<String>>(
        destinations: impl IntoIterator<Item = S>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            destinations: destinations.into_iter().map(Into::into).collect(),
            payload,
        }
    }
}

/// Every tick carries exactly one observation batch from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBatch {
    pub tick_id: i64,
    pub observations: Vec<ObservationOut>,
    /// Final batch of the trial
    pub last: bool,
}

/// Role-specific data, carried on a queue separate from [`OutgoingData`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProducedData {
    Action(ActionOut),
    Observations(ObservationBatch),
}

impl ProducedData {
    /// Whether this datum tells the orchestrator the participant is ending
    pub fn is_last(&self) -> bool {
        matches!(self, ProducedData::Observations(batch) if batch.last)
    }
}
