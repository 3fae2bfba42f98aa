// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Background task running the user implementation of a session.
//!
//! Exactly one task per session. It is the only writer of outgoing data and
//! the only reader of incoming events. Timeouts are not handled here: a
//! watchdog belongs to the transport adapter, which calls `cancel()`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

use crate::actor::ActorSession;
use crate::environment::EnvironmentSession;
use crate::error::{Result, SessionError};
use crate::session::{Session, SessionCore};

/// Anything that wraps a [`Session`] and can be handed to an implementation.
pub trait AsSession {
    fn as_session(&self) -> &Session;
}

impl AsSession for Session {
    fn as_session(&self) -> &Session {
        self
    }
}

impl AsSession for ActorSession {
    fn as_session(&self) -> &Session {
        self
    }
}

impl AsSession for EnvironmentSession {
    fn as_session(&self) -> &Session {
        self
    }
}

/// How an implementation task ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplementationOutcome {
    Completed,
    Cancelled,
}

/// Handle on a running implementation task.
pub struct ImplementationHandle {
    join: JoinHandle<anyhow::Result<()>>,
    core: Arc<SessionCore>,
    cancelled: AtomicBool,
}

/// Run `implementation` on its own tokio task.
///
/// When the implementation returns, the outgoing and produced streams end
/// after the data it posted.
pub fn spawn_implementation<S, F, Fut>(session: S, implementation: F) -> ImplementationHandle
where
    S: AsSession + Send + 'static,
    F: FnOnce(S) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let core = Arc::clone(session.as_session().core());
    let span = tracing::debug_span!(
        "implementation",
        trial_id = %core.trial().id(),
        participant = %core.info().name
    );
    let task_core = Arc::clone(&core);
    let user_task = implementation(session);
    let join = tokio::spawn(
        async move {
            let result = user_task.await;
            match &result {
                Ok(()) => debug!("implementation completed"),
                Err(e) => debug!("implementation failed: {:#}", e),
            }
            task_core.close_outgoing().await;
            result
        }
        .instrument(span),
    );
    ImplementationHandle {
        join,
        core,
        cancelled: AtomicBool::new(false),
    }
}

impl ImplementationHandle {
    /// Unblock the session's streams and abort the task. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!(
                trial_id = %self.core.trial().id(),
                participant = %self.core.info().name,
                "cancelling implementation"
            );
        }
        self.core.force_exit();
        self.join.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task. Cancellation is a normal outcome; a user error or a
    /// panic is reported as an error.
    pub async fn join(self) -> Result<ImplementationOutcome> {
        let cancelled = self.is_cancelled();
        match self.join.await {
            Ok(Ok(())) if cancelled => Ok(ImplementationOutcome::Cancelled),
            Ok(Ok(())) => Ok(ImplementationOutcome::Completed),
            Ok(Err(e)) => Err(SessionError::Implementation(e)),
            Err(join_err) if join_err.is_cancelled() => Ok(ImplementationOutcome::Cancelled),
            Err(join_err) => {
                self.core.force_exit();
                let panic = join_err.into_panic();
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                Err(SessionError::ImplementationPanicked(msg))
            }
        }
    }
}
