//! Bounded hand-off queues between pipeline stages
//!
//! Queues are `flume` bounded MPMC channels. A queue is closed for further
//! adds when its last sender is dropped; takers then see exhaustion once the
//! remaining items are drained. Every blocking operation here also returns
//! early when the run is cancelled.

use flume::{Receiver, Sender};
use tokio_util::sync::CancellationToken;

use crate::model::Record;

/// Capacity of the queue of records whose fields are all inline
pub const READY_QUEUE_CAPACITY: usize = 2000;

/// Capacity of the queue of records waiting for their streams to be opened
pub const STREAM_QUEUE_CAPACITY: usize = 2000;

/// Capacity of the queue of records holding open streams
///
/// Kept small: every entry pins open connections to the source.
pub const DELIVERY_QUEUE_CAPACITY: usize = 10;

pub(crate) fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    flume::bounded(capacity)
}

/// Result of a cancellation-aware enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    Sent,
    /// Cancelled before space was available; the item was dropped
    Dropped,
    /// Every receiver is gone; the item was dropped
    Closed,
}

/// Put `item` on the queue, waiting for space unless the run is cancelled
///
/// A dropped [`Record`] releases any streams it holds.
pub(crate) async fn enqueue<T>(tx: &Sender<T>, item: T, cancel: &CancellationToken) -> Enqueued {
    if cancel.is_cancelled() {
        return Enqueued::Dropped;
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Enqueued::Dropped,
        sent = tx.send_async(item) => match sent {
            Ok(()) => Enqueued::Sent,
            Err(_) => Enqueued::Closed,
        },
    }
}

/// Take the next item, or `None` once the queue is exhausted or the run is cancelled
pub(crate) async fn take<T>(rx: &Receiver<T>, cancel: &CancellationToken) -> Option<T> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        item = rx.recv_async() => item.ok(),
    }
}

/// Outcome of taking from several queues at once
#[derive(Debug)]
pub(crate) enum Taken<T> {
    Item(T),
    /// Every queue is closed and drained
    Exhausted,
    Cancelled,
}

/// Takes from two queues, returning whichever has an item first
///
/// Ready branches are polled in random order, so neither queue can starve
/// the other. A queue that reports closed-and-drained is skipped from then on.
pub(crate) struct EitherQueue<T> {
    queues: [Receiver<T>; 2],
    open: [bool; 2],
}

impl<T> EitherQueue<T> {
    pub(crate) fn new(first: Receiver<T>, second: Receiver<T>) -> Self {
        Self {
            queues: [first, second],
            open: [true, true],
        }
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        !self.open[0] && !self.open[1]
    }

    pub(crate) async fn take(&mut self, cancel: &CancellationToken) -> Taken<T> {
        loop {
            if self.is_exhausted() {
                return Taken::Exhausted;
            }

            let [first, second] = &self.queues;
            tokio::select! {
                _ = cancel.cancelled() => return Taken::Cancelled,
                item = first.recv_async(), if self.open[0] => match item {
                    Ok(item) => return Taken::Item(item),
                    Err(_) => self.open[0] = false,
                },
                item = second.recv_async(), if self.open[1] => match item {
                    Ok(item) => return Taken::Item(item),
                    Err(_) => self.open[1] = false,
                },
            }
        }
    }
}

/// Drain whatever is queued right now, closing the streams each record holds
///
/// # Returns
/// * `(usize, usize)` - Records drained and streams closed
pub(crate) fn drain_closing_streams(rx: &Receiver<Record>) -> (usize, usize) {
    let mut records = 0;
    let mut streams = 0;
    for mut record in rx.drain() {
        streams += record.close_streams();
        records += 1;
    }
    (records, streams)
}
