// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Single-value hand-off between the transport side and a waiting user task.

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Holds at most one value. `put` overwrites a value nobody collected yet.
#[derive(Debug)]
pub struct SingleSlot<T> {
    value: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Default for SingleSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SingleSlot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Resolve the pending waiter, or cache the value for the next `take`
    pub fn put(&self, value: T) {
        *self.value.lock() = Some(value);
        self.notify.notify_one();
    }

    /// Wait until a value is available. Returns immediately when one is cached.
    pub async fn take(&self) -> T {
        loop {
            let notified = self.notify.notified();
            if let Some(value) = self.value.lock().take() {
                return value;
            }
            notified.await;
        }
    }

    pub fn try_take(&self) -> Option<T> {
        self.value.lock().take()
    }

    pub fn clear(&self) {
        self.value.lock().take();
    }

    pub fn is_filled(&self) -> bool {
        self.value.lock().is_some()
    }
}
