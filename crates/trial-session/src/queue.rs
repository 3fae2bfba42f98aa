// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Session queues (tokio::sync::mpsc) with an explicit backpressure policy
//! and a forced-exit sentinel.
//!
//! # Backpressure
//! - `try_post()` never blocks: a full bounded queue returns `SessionError::QueueFull`
//! - `post_wait().await` waits for room in a bounded queue
//! - Unbounded queues accept everything (source behaviour, default)
//!
//! # Forced exit
//! `force_exit()` queues a sentinel behind the items already posted, so the
//! consumer drains them first. When a bounded queue is full the sentinel
//! cannot be queued; an exit flag is raised instead and the consumer stops as
//! soon as the queue is empty.
//!
//! Receiving is cancel-safe: dropping a pending `recv()` never loses an item.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::error::{Result, SessionError};

/// Capacity policy of one session queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    #[default]
    Unbounded,
    Bounded { capacity: usize },
}

impl QueuePolicy {
    /// A capacity of `0` means unbounded (configuration convention).
    pub fn from_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            QueuePolicy::Unbounded
        } else {
            QueuePolicy::Bounded { capacity }
        }
    }
}

enum QueueItem<T> {
    Item(T),
    ForcedExit,
}

struct QueueShared {
    name: &'static str,
    pending: AtomicUsize,
    forced_exit_posted: AtomicBool,
    exit_requested: AtomicBool,
    receiver_waker: AtomicWaker,
}

enum SenderKind<T> {
    Bounded(mpsc::Sender<QueueItem<T>>),
    Unbounded(mpsc::UnboundedSender<QueueItem<T>>),
}

impl<T> Clone for SenderKind<T> {
    fn clone(&self) -> Self {
        match self {
            SenderKind::Bounded(tx) => SenderKind::Bounded(tx.clone()),
            SenderKind::Unbounded(tx) => SenderKind::Unbounded(tx.clone()),
        }
    }
}

enum ReceiverKind<T> {
    Bounded(mpsc::Receiver<QueueItem<T>>),
    Unbounded(mpsc::UnboundedReceiver<QueueItem<T>>),
}

/// Create the two ends of a named session queue
pub(crate) fn session_queue<T>(
    name: &'static str,
    policy: QueuePolicy,
) -> (QueueSender<T>, QueueReceiver<T>) {
    let shared = Arc::new(QueueShared {
        name,
        pending: AtomicUsize::new(0),
        forced_exit_posted: AtomicBool::new(false),
        exit_requested: AtomicBool::new(false),
        receiver_waker: AtomicWaker::new(),
    });
    let (tx, rx) = match policy {
        QueuePolicy::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (SenderKind::Unbounded(tx), ReceiverKind::Unbounded(rx))
        }
        QueuePolicy::Bounded { capacity } => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (SenderKind::Bounded(tx), ReceiverKind::Bounded(rx))
        }
    };
    (
        QueueSender {
            tx,
            shared: Arc::clone(&shared),
        },
        QueueReceiver {
            rx,
            shared,
            done: false,
        },
    )
}

pub(crate) struct QueueSender<T> {
    tx: SenderKind<T>,
    shared: Arc<QueueShared>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> QueueSender<T> {
    /// Post without waiting.
    ///
    /// A closed queue (consumer gone) swallows the item: nobody is left to read it.
    pub(crate) fn try_post(&self, item: T) -> Result<()> {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        let outcome = match &self.tx {
            SenderKind::Unbounded(tx) => match tx.send(QueueItem::Item(item)) {
                Ok(()) => Ok(()),
                Err(_) => Err(None),
            },
            SenderKind::Bounded(tx) => match tx.try_send(QueueItem::Item(item)) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(Some(SessionError::QueueFull(self.shared.name))),
                Err(TrySendError::Closed(_)) => Err(None),
            },
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                self.shared.pending.fetch_sub(1, Ordering::AcqRel);
                match err {
                    Some(err) => Err(err),
                    None => {
                        debug!(queue = self.shared.name, "consumer gone, item discarded");
                        Ok(())
                    }
                }
            }
        }
    }

    /// Post, waiting for room in a bounded queue
    pub(crate) async fn post_wait(&self, item: T) -> Result<()> {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        let sent = match &self.tx {
            SenderKind::Unbounded(tx) => tx.send(QueueItem::Item(item)).is_ok(),
            SenderKind::Bounded(tx) => tx.send(QueueItem::Item(item)).await.is_ok(),
        };
        if !sent {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            debug!(queue = self.shared.name, "consumer gone, item discarded");
        }
        Ok(())
    }

    /// Unblock the consumer. Idempotent.
    pub(crate) fn force_exit(&self) {
        if self.shared.forced_exit_posted.swap(true, Ordering::AcqRel) {
            return;
        }
        let queued = match &self.tx {
            SenderKind::Unbounded(tx) => tx.send(QueueItem::ForcedExit).is_ok(),
            SenderKind::Bounded(tx) => match tx.try_send(QueueItem::ForcedExit) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => false,
                Err(TrySendError::Closed(_)) => true,
            },
        };
        if !queued {
            debug!(queue = self.shared.name, "queue full, raising exit flag");
            self.shared.exit_requested.store(true, Ordering::Release);
            self.shared.receiver_waker.wake();
        }
    }

    /// End the consumer's stream after everything already posted, waiting for
    /// room in a bounded queue. Idempotent with `force_exit`.
    ///
    /// The sentinel only counts as posted once it is queued: a `force_exit`
    /// racing a blocked close still unblocks the consumer.
    pub(crate) async fn close_wait(&self) {
        if self.shared.forced_exit_posted.load(Ordering::Acquire) {
            return;
        }
        let queued = match &self.tx {
            SenderKind::Unbounded(tx) => tx.send(QueueItem::ForcedExit).is_ok(),
            SenderKind::Bounded(tx) => tx.send(QueueItem::ForcedExit).await.is_ok(),
        };
        if queued {
            self.shared.forced_exit_posted.store(true, Ordering::Release);
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }
}

pub(crate) struct QueueReceiver<T> {
    rx: ReceiverKind<T>,
    shared: Arc<QueueShared>,
    done: bool,
}

impl<T> Unpin for QueueReceiver<T> {}

impl<T> QueueReceiver<T> {
    pub(crate) fn poll_next_item(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if self.done {
            return Poll::Ready(None);
        }
        self.shared.receiver_waker.register(cx.waker());
        let polled = match &mut self.rx {
            ReceiverKind::Bounded(rx) => rx.poll_recv(cx),
            ReceiverKind::Unbounded(rx) => rx.poll_recv(cx),
        };
        match polled {
            Poll::Pending if self.shared.exit_requested.load(Ordering::Acquire) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(QueueItem::Item(item))) => {
                self.shared.pending.fetch_sub(1, Ordering::AcqRel);
                Poll::Ready(Some(item))
            }
            Poll::Ready(Some(QueueItem::ForcedExit)) | Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn finish(&mut self) {
        self.done = true;
    }
}

/// Consumer side of a session queue, yielding each item once in post order.
///
/// Ends when a forced exit is dequeued or every sender is gone.
pub struct QueueStream<T> {
    receiver: QueueReceiver<T>,
}

impl<T> QueueStream<T> {
    pub(crate) fn new(receiver: QueueReceiver<T>) -> Self {
        Self { receiver }
    }

    /// Next item, or `None` once the stream is over
    pub async fn recv(&mut self) -> Option<T> {
        futures::future::poll_fn(|cx| self.receiver.poll_next_item(cx)).await
    }

    /// Whether the stream already ended
    pub fn is_terminated(&self) -> bool {
        self.receiver.is_done()
    }
}

impl<T> Stream for QueueStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_next_item(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_unbounded_preserves_post_order() {
        let (tx, rx) = session_queue::<i32>("test", QueuePolicy::Unbounded);
        for i in 0..5 {
            tx.try_post(i).unwrap();
        }
        tx.force_exit();
        let items: Vec<i32> = QueueStream::new(rx).collect().await;
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_bounded_full_is_reported() {
        let (tx, mut rx) = session_queue::<i32>("test", QueuePolicy::Bounded { capacity: 2 });
        tx.try_post(1).unwrap();
        tx.try_post(2).unwrap();
        let err = tx.try_post(3).unwrap_err();
        assert!(matches!(err, SessionError::QueueFull("test")));
        assert_eq!(tx.pending(), 2);

        let first = futures::future::poll_fn(|cx| rx.poll_next_item(cx)).await;
        assert_eq!(first, Some(1));
        tx.try_post(3).unwrap();
        assert_eq!(tx.pending(), 2);
    }

    #[tokio::test]
    async fn test_forced_exit_on_full_queue_raises_flag() {
        let (tx, rx) = session_queue::<i32>("test", QueuePolicy::Bounded { capacity: 1 });
        tx.try_post(1).unwrap();
        tx.force_exit();
        tx.force_exit();
        let items: Vec<i32> = QueueStream::new(rx).collect().await;
        assert_eq!(items, vec![1]);
    }

    #[tokio::test]
    async fn test_force_exit_unblocks_a_pending_close() {
        let (tx, rx) = session_queue::<i32>("test", QueuePolicy::Bounded { capacity: 1 });
        tx.try_post(1).unwrap();
        let closer = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.close_wait().await })
        };
        // Let the close block on the full queue
        tokio::task::yield_now().await;
        assert!(!closer.is_finished());

        tx.force_exit();
        closer.abort();
        let items = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            QueueStream::new(rx).collect::<Vec<i32>>(),
        )
        .await
        .unwrap();
        assert_eq!(items, vec![1]);
    }

    #[tokio::test]
    async fn test_close_after_drain_ends_the_stream() {
        let (tx, rx) = session_queue::<i32>("test", QueuePolicy::Bounded { capacity: 2 });
        tx.try_post(1).unwrap();
        tx.close_wait().await;
        tx.force_exit();
        let items: Vec<i32> = QueueStream::new(rx).collect().await;
        assert_eq!(items, vec![1]);
    }

    #[tokio::test]
    async fn test_post_wait_waits_for_room() {
        let (tx, rx) = session_queue::<i32>("test", QueuePolicy::Bounded { capacity: 1 });
        tx.try_post(1).unwrap();
        let producer = {
            let tx = tx.clone();
            tokio::spawn(async move { tx.post_wait(2).await.unwrap() })
        };
        let mut stream = QueueStream::new(rx);
        assert_eq!(stream.recv().await, Some(1));
        assert_eq!(stream.recv().await, Some(2));
        producer.await.unwrap();
        tx.force_exit();
        assert_eq!(stream.recv().await, None);
        assert!(stream.is_terminated());
    }

    #[test]
    fn test_policy_from_capacity() {
        assert_eq!(QueuePolicy::from_capacity(0), QueuePolicy::Unbounded);
        assert_eq!(
            QueuePolicy::from_capacity(8),
            QueuePolicy::Bounded { capacity: 8 }
        );
    }
}
