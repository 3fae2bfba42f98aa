// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared description of a running trial.
//!
//! A `Trial` is shared as `Arc<Trial>` by every session of the trial. Its
//! flags only ever move forward (`ending` -> `ending_ack` -> `ended`) and the
//! tick only increases, so plain atomics are enough: no lock is taken.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::types::ParticipantInfo;

#[derive(Debug)]
pub struct Trial {
    id: String,
    participants: Vec<ParticipantInfo>,
    tick_id: AtomicI64,
    ending: AtomicBool,
    ending_ack: AtomicBool,
    ended: AtomicBool,
}

impl Trial {
    pub fn new(id: impl Into<String>, participants: Vec<ParticipantInfo>) -> Self {
        Self {
            id: id.into(),
            participants,
            tick_id: AtomicI64::new(-1),
            ending: AtomicBool::new(false),
            ending_ack: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn participants(&self) -> &[ParticipantInfo] {
        &self.participants
    }

    pub fn participant(&self, name: &str) -> Option<&ParticipantInfo> {
        self.participants.iter().find(|p| p.name == name)
    }

    /// Position of a participant in the trial's participant list
    pub fn actor_index(&self, name: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.name == name)
    }

    /// Latest tick delivered to any session of this trial, `-1` before the first one
    pub fn tick_id(&self) -> i64 {
        self.tick_id.load(Ordering::Acquire)
    }

    pub fn is_ending(&self) -> bool {
        self.ending.load(Ordering::Acquire)
    }

    pub fn is_ending_ack(&self) -> bool {
        self.ending_ack.load(Ordering::Acquire)
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// The trial is over for user code once its end has been acknowledged or reached.
    pub fn is_over(&self) -> bool {
        self.is_ending_ack() || self.is_ended()
    }

    /// Move the tick forward. Older ticks are ignored.
    pub(crate) fn advance_tick(&self, tick_id: i64) {
        self.tick_id.fetch_max(tick_id, Ordering::AcqRel);
    }

    /// Returns true when this call performed the transition.
    pub(crate) fn mark_ending(&self) -> bool {
        !self.ending.swap(true, Ordering::AcqRel)
    }

    /// Acknowledging the end implies the end was seen.
    pub(crate) fn mark_ending_ack(&self) -> bool {
        self.ending.store(true, Ordering::Release);
        !self.ending_ack.swap(true, Ordering::AcqRel)
    }

    /// Only valid after the end was acknowledged. Returns false otherwise.
    pub(crate) fn mark_ended(&self) -> bool {
        if !self.is_ending_ack() {
            return false;
        }
        !self.ended.swap(true, Ordering::AcqRel)
    }

    /// Transport lost or the orchestrator closed the trial without an acknowledgement.
    pub(crate) fn force_ended(&self) {
        self.ending.store(true, Ordering::Release);
        self.ending_ack.store(true, Ordering::Release);
        self.ended.store(true, Ordering::Release);
    }
}
