//! Object-mode output channels for transformed entries.
//!
//! An [`EntrySink`] accepts whole [`TarEntry`] records.  Pushing never blocks: the sink always
//! takes the entry and reports whether it is still below its high-water mark.  Once it reports
//! `false`, whoever supplies input (the driver) must wait on [`EntrySink::poll_ready`] before
//! handing the transformer more work.  This keeps buffering bounded by the high-water mark plus
//! whatever a single hook invocation emits.
//!
//! [`channel`] creates the in-memory implementation: an [`EntrySender`] for the transformer side
//! and an [`EntryReceiver`] (a [`Stream`]) for the consumer side.

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

use futures::Stream;
use log::{debug, trace};

use crate::{
    entry::TarEntry,
    error::{Result, TransformError},
};

/// Number of queued entries at which a [`channel`] starts signalling backpressure, unless
/// configured otherwise.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

/// The write side of an object-mode entry stream.
pub trait EntrySink: Send {
    /// Enqueues one entry.  Returns `Ok(false)` if the sink is now at or above its high-water
    /// mark, in which case no further input should be supplied until [`poll_ready`] completes.
    ///
    /// [`poll_ready`]: EntrySink::poll_ready
    fn push(&mut self, entry: TarEntry) -> Result<bool>;

    /// Completes once the sink can accept more entries (or can never accept any more, in which
    /// case the next push reports the problem).
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<()>;

    /// Signals the end of input.  Entries already pushed are still delivered.
    fn finish(&mut self);

    /// Terminates the stream with an error.  Entries already pushed are still delivered, followed
    /// by the error.
    fn abort(&mut self, reason: &str);
}

/// Collects entries in memory without any limit.  Useful when the whole output is wanted at once.
impl EntrySink for Vec<TarEntry> {
    fn push(&mut self, entry: TarEntry) -> Result<bool> {
        Vec::push(self, entry);
        Ok(true)
    }

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<()> {
        Poll::Ready(())
    }

    fn finish(&mut self) {}

    fn abort(&mut self, _reason: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChannelState {
    Open,
    Finished,
    Aborted(String),
}

struct Shared {
    queue: VecDeque<TarEntry>,
    high_water_mark: usize,
    state: ChannelState,
    receiver_alive: bool,
    sender_waker: Option<Waker>,
    receiver_waker: Option<Waker>,
}

impl Shared {
    fn wake_sender(&mut self) {
        if let Some(waker) = self.sender_waker.take() {
            waker.wake();
        }
    }

    fn wake_receiver(&mut self) {
        if let Some(waker) = self.receiver_waker.take() {
            waker.wake();
        }
    }

    fn has_room(&self) -> bool {
        self.queue.len() < self.high_water_mark
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Creates a bounded-by-signal entry channel.
///
/// `high_water_mark` is the queue length at which [`EntrySender::push`] starts returning `false`;
/// zero is treated as one.
pub fn channel(high_water_mark: usize) -> (EntrySender, EntryReceiver) {
    let shared = Arc::new(Mutex::new(Shared {
        queue: VecDeque::new(),
        high_water_mark: high_water_mark.max(1),
        state: ChannelState::Open,
        receiver_alive: true,
        sender_waker: None,
        receiver_waker: None,
    }));

    (
        EntrySender {
            shared: Arc::clone(&shared),
        },
        EntryReceiver {
            shared,
            done: false,
        },
    )
}

/// Producer half of [`channel`].
///
/// Dropping the sender without calling [`EntrySink::finish`] aborts the stream, so the receiver
/// never waits forever.
pub struct EntrySender {
    shared: Arc<Mutex<Shared>>,
}

impl EntrySender {
    /// Number of entries pushed but not yet received.
    pub fn len(&self) -> usize {
        lock(&self.shared).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether another push would still be below the high-water mark.
    pub fn is_ready(&self) -> bool {
        lock(&self.shared).has_room()
    }

    pub fn high_water_mark(&self) -> usize {
        lock(&self.shared).high_water_mark
    }

    /// Waits until the channel drops below its high-water mark.
    pub async fn ready(&mut self) {
        std::future::poll_fn(|cx| self.poll_ready(cx)).await
    }

    fn close(&mut self, state: ChannelState) {
        let mut shared = lock(&self.shared);
        if shared.state == ChannelState::Open {
            debug!("closing entry channel: {state:?}");
            shared.state = state;
            shared.wake_receiver();
        }
    }
}

impl EntrySink for EntrySender {
    fn push(&mut self, entry: TarEntry) -> Result<bool> {
        let mut shared = lock(&self.shared);
        if !shared.receiver_alive || shared.state != ChannelState::Open {
            return Err(TransformError::SinkClosed);
        }

        trace!("queueing {}", entry.path());
        shared.queue.push_back(entry);
        shared.wake_receiver();
        Ok(shared.has_room())
    }

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        let mut shared = lock(&self.shared);
        if shared.has_room() || !shared.receiver_alive || shared.state != ChannelState::Open {
            Poll::Ready(())
        } else {
            shared.sender_waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }

    fn finish(&mut self) {
        self.close(ChannelState::Finished);
    }

    fn abort(&mut self, reason: &str) {
        self.close(ChannelState::Aborted(reason.to_string()));
    }
}

impl Drop for EntrySender {
    fn drop(&mut self) {
        self.close(ChannelState::Aborted(
            "sender dropped before finishing".to_string(),
        ));
    }
}

/// Consumer half of [`channel`].
///
/// Yields entries in push order.  After a finish the stream ends; after an abort it yields a
/// single [`TransformError::Aborted`] and then ends.
pub struct EntryReceiver {
    shared: Arc<Mutex<Shared>>,
    done: bool,
}

impl Stream for EntryReceiver {
    type Item = Result<TarEntry>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        let mut shared = lock(&self.shared);
        if let Some(entry) = shared.queue.pop_front() {
            if shared.has_room() {
                shared.wake_sender();
            }
            return Poll::Ready(Some(Ok(entry)));
        }

        let state = shared.state.clone();
        match state {
            ChannelState::Open => {
                shared.receiver_waker = Some(cx.waker().clone());
                Poll::Pending
            }
            ChannelState::Finished => {
                drop(shared);
                self.done = true;
                Poll::Ready(None)
            }
            ChannelState::Aborted(reason) => {
                drop(shared);
                self.done = true;
                Poll::Ready(Some(Err(TransformError::Aborted(reason))))
            }
        }
    }
}

impl Drop for EntryReceiver {
    fn drop(&mut self) {
        let mut shared = lock(&self.shared);
        shared.receiver_alive = false;
        shared.queue.clear();
        shared.wake_sender();
    }
}
