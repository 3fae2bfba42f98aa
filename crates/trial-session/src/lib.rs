// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # trial-session
//!
//! Session protocol engine for participants (actors and environments) of a
//! trial driven by a remote orchestrator.
//!
//! The transport adapter decodes wire frames into [`Event`]s and posts them
//! through a [`SessionLink`]; the user implementation consumes them through
//! [`Session::all_events`] and answers with rewards, messages, actions or
//! observations, which the adapter drains from the same link.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use trial_config::SessionConfig;
//! use trial_session::{spawn_implementation, ActorSession, SessionInfo, Trial};
//!
//! async fn play(mut actor: ActorSession) -> anyhow::Result<()> {
//!     actor.start_no_wait(true)?;
//!     let mut events = actor.all_events()?;
//!     while let Some(event) = events.next().await {
//!         if event.observation().is_some() {
//!             actor.do_action_no_wait(vec![1])?;
//!         }
//!     }
//!     Ok(())
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let trial = Arc::new(Trial::new("trial-1", Vec::new()));
//! let (actor, mut link) = ActorSession::new(
//!     SessionInfo::new("player", "agent"),
//!     trial,
//!     &SessionConfig::default(),
//! );
//! let handle = spawn_implementation(actor, play);
//! let mut outgoing = link.retrieve_outgoing_data()?;
//! while let Some(datum) = outgoing.recv().await {
//!     // encode and send on the streaming call
//!     let _ = datum;
//! }
//! handle.join().await?;
//! # Ok(())
//! # }
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod actor;
mod environment;
mod error;
mod event;
mod queue;
mod session;
mod slot;
mod task;
mod trial;
mod types;

pub use actor::ActorSession;
pub use environment::EnvironmentSession;
pub use error::{Result, SessionError};
pub use event::{Event, EventType};
pub use queue::{QueuePolicy, QueueStream};
pub use session::{EventConsumer, EventStream, Session, SessionLink, SessionState, StopHandle};
pub use slot::SingleSlot;
pub use task::{spawn_implementation, AsSession, ImplementationHandle, ImplementationOutcome};
pub use trial::Trial;
pub use types::{
    Action, ActionOut, Message, Observation, ObservationBatch, ObservationOut, OutgoingData,
    ParticipantInfo, ProducedData, Reward, RewardSource, SessionInfo,
};

/// Outgoing stream drained by the transport adapter
pub type OutgoingStream = QueueStream<OutgoingData>;

/// Produced stream (actions or observation batches) drained by the transport adapter
pub type ProducedStream = QueueStream<ProducedData>;
