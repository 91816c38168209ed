//! Stripe Frames and Frame Queues
//!
//! A frame is one [`StripeMatrix`] in flight. The pipeline allocates a fixed
//! ring of frames and passes `Arc`s to them through bounded FIFO queues; a
//! frame only returns to the free queue after every consumer released it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::stripe::matrix::StripeMatrix;

// =============================================================================
// Stripe Frame
// =============================================================================

/// One reusable matrix plus its hand-off state
#[derive(Debug)]
pub(crate) struct StripeFrame {
    index: usize,
    pub(crate) matrix: StripeMatrix,
    /// Consumers that still hold the frame
    remaining: AtomicUsize,
    /// Data bytes carried by the frame
    bytes: AtomicUsize,
    eof: AtomicBool,
}

impl StripeFrame {
    pub(crate) fn new(index: usize, matrix: StripeMatrix) -> Self {
        Self {
            index,
            matrix,
            remaining: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
            eof: AtomicBool::new(false),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Record what the frame carries before handing it to `consumers` threads
    pub(crate) fn dispatch(&self, consumers: usize, bytes: usize, eof: bool) {
        self.bytes.store(bytes, Ordering::Relaxed);
        self.eof.store(eof, Ordering::Relaxed);
        self.remaining.store(consumers, Ordering::Release);
    }

    /// Drop one consumer's hold; true for the last one
    pub(crate) fn release(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Last frame of the stream
    pub(crate) fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Shared stop flag that also wakes threads blocked on a [`FrameQueue`]
#[derive(Debug)]
pub(crate) struct Cancellation {
    cancelled: AtomicBool,
    /// Dropped on cancel, which disconnects `signal`
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl Cancellation {
    pub(crate) fn new() -> Self {
        let (trigger, signal) = channel::bounded(0);
        Self {
            cancelled: AtomicBool::new(false),
            trigger: Mutex::new(Some(trigger)),
            signal,
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.trigger.lock().take();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Frame Queue
// =============================================================================

/// Bounded FIFO of frames feeding one consumer
#[derive(Debug)]
pub(crate) struct FrameQueue {
    name: &'static str,
    tx: Sender<Arc<StripeFrame>>,
    rx: Receiver<Arc<StripeFrame>>,
}

impl FrameQueue {
    pub(crate) fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Self { name, tx, rx }
    }

    /// Append a frame. Capacity always covers every frame of the ring, so
    /// this never waits.
    pub(crate) fn put(&self, frame: Arc<StripeFrame>) -> Result<()> {
        self.tx.send(frame).map_err(|_| Error::QueueClosed(self.name))
    }

    /// Wait for the next frame; `None` once the run is cancelled
    pub(crate) fn take(&self, cancel: &Cancellation) -> Option<Arc<StripeFrame>> {
        if cancel.is_cancelled() {
            return None;
        }
        channel::select! {
            recv(self.rx) -> frame => frame.ok(),
            recv(cancel.signal) -> _ => None,
        }
    }
}
