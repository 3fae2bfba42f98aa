// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # trial-sdk
//!
//! Participant-side runtime for actors and environments taking part in an
//! orchestrated trial. An adapter feeds protocol events into a session, the
//! user implementation consumes them and produces actions, observations,
//! rewards and messages in return.
//!
//! ## Feature Flags
//!
//! - **`session`** (default): session engine, actor and environment facades
//! - **`config`** (default): `trial_sdk.toml` loader with env/CLI overrides
//! - **`observability`**: tracing subscriber setup and `--debug-<crate>` flags
//! - **`file-logging`**: daily-rotated JSON log file (implies `observability`)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trial_sdk::prelude::*;
//!
//! # async fn run() -> trial_sdk::session::Result<()> {
//! let trial = Arc::new(Trial::new("trial-1", vec![ParticipantInfo::new("env", "environment")]));
//! let info = SessionInfo::new("env", "environment");
//! let (env, _link) = EnvironmentSession::new(info, trial, &SessionConfig::default());
//!
//! env.start(vec![], true)?;
//! env.end(vec![])?;
//! # Ok(())
//! # }
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(feature = "session")]
pub use trial_session as session;

#[cfg(feature = "config")]
pub use trial_config as config;

#[cfg(feature = "observability")]
pub use trial_observability as observability;

/// Common imports for implementing a participant
pub mod prelude {
    #[cfg(feature = "session")]
    pub use trial_session::{
        spawn_implementation, Action, ActionOut, ActorSession, EnvironmentSession, Event,
        EventConsumer, EventStream, EventType, ImplementationOutcome, Message, Observation,
        ObservationOut, OutgoingData, ParticipantInfo, ProducedData, Reward, Session,
        SessionError, SessionInfo, SessionLink, Trial,
    };

    #[cfg(feature = "config")]
    pub use trial_config::{load_config, SessionConfig, TrialSdkConfig};

    #[cfg(feature = "observability")]
    pub use trial_observability::{init_logging, parse_debug_flags, CrateDebugFlags};
}
