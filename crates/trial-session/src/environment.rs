// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Environment-facing session: produce observations, then consume the actions of the tick.
//!
//! Observations travel on the produced queue, separate from rewards and
//! messages: every tick carries exactly one observation batch while rewards
//! and messages are optional. The transport adapter multiplexes both.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use tracing::warn;
use trial_config::SessionConfig;

use crate::error::{Result, SessionError};
use crate::session::{Session, SessionLink};
use crate::trial::Trial;
use crate::types::{ObservationBatch, ObservationOut, OutgoingData, ProducedData, SessionInfo};

/// Session of an environment: one observation batch per tick.
pub struct EnvironmentSession {
    session: Session,
    produced_tick: AtomicI64,
    end_sent: AtomicBool,
}

impl EnvironmentSession {
    pub fn new(
        info: SessionInfo,
        trial: Arc<Trial>,
        config: &SessionConfig,
    ) -> (EnvironmentSession, SessionLink) {
        let (session, link) = Session::new(info, trial, config);
        let session = EnvironmentSession {
            session,
            produced_tick: AtomicI64::new(-1),
            end_sent: AtomicBool::new(false),
        };
        (session, link)
    }

    /// Start the session and send the initial observations.
    pub fn start(&self, observations: Vec<ObservationOut>, auto_ack: bool) -> Result<()> {
        self.session.start(auto_ack)?;
        self.produce_batch(observations, false)
    }

    /// Observations for the next tick. Not allowed once the trial is ending:
    /// use [`EnvironmentSession::end`] for the last batch.
    pub fn produce_observations(&self, observations: Vec<ObservationOut>) -> Result<()> {
        if !self.session.core().is_started() {
            return Err(SessionError::NotStarted);
        }
        if self.session.trial().is_ending() {
            return Err(SessionError::InvalidOperation(
                "trial is ending, send the last observations with end()".to_string(),
            ));
        }
        self.produce_batch(observations, false)
    }

    /// Send the last observations of the trial.
    ///
    /// Marks the trial as ending. With `auto_ack`, the end is acknowledged
    /// right after; otherwise call `sending_done()`. Only the first call
    /// produces a batch.
    pub fn end(&self, final_observations: Vec<ObservationOut>) -> Result<()> {
        let core = self.session.core();
        if !core.is_started() {
            return Err(SessionError::NotStarted);
        }
        if self.end_sent.load(Ordering::Acquire) || core.trial().is_ending_ack() {
            warn!(
                trial_id = %core.trial().id(),
                participant = %core.info().name,
                "end already sent, final observations dropped"
            );
            return Ok(());
        }
        self.produce_batch(final_observations, true)?;
        self.end_sent.store(true, Ordering::Release);
        if core.auto_ack() {
            core.post_outgoing(OutgoingData::EndingAck)?;
        }
        Ok(())
    }

    /// Tick of the latest batch produced, `-1` before start
    pub fn produced_tick(&self) -> i64 {
        self.produced_tick.load(Ordering::Acquire)
    }

    fn produce_batch(&self, observations: Vec<ObservationOut>, last: bool) -> Result<()> {
        let core = self.session.core();
        let tick_id = self.produced_tick.load(Ordering::Acquire) + 1;
        core.post_produced(ProducedData::Observations(ObservationBatch {
            tick_id,
            observations,
            last,
        }))?;
        self.produced_tick.store(tick_id, Ordering::Release);
        core.trial().advance_tick(tick_id);
        Ok(())
    }
}

impl Deref for EnvironmentSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl DerefMut for EnvironmentSession {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

impl std::fmt::Debug for EnvironmentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentSession")
            .field("session", &self.session)
            .field("produced_tick", &self.produced_tick())
            .finish()
    }
}
