//! Bounded FIFO hand-off of frames between the capture loop and the classifier

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::capture::Frame;
use crate::error::{PipelineError, Result};

/// Create a channel holding at most `capacity` frames.
///
/// The halves are not `Clone`: one producer, one consumer.
pub fn frame_channel(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    let stats = Arc::new(CachePadded::new(Stats::default()));
    (
        FrameSender {
            tx,
            stats: Arc::clone(&stats),
        },
        FrameReceiver { rx, stats },
    )
}

#[derive(Default)]
struct Stats {
    frames_published: AtomicU64,
    frames_consumed: AtomicU64,
}

/// Producer half
pub struct FrameSender {
    tx: Sender<Frame>,
    stats: Arc<CachePadded<Stats>>,
}

/// Consumer half
pub struct FrameReceiver {
    rx: Receiver<Frame>,
    stats: Arc<CachePadded<Stats>>,
}

impl FrameSender {
    /// Blocks while the channel is full. A closed channel drops the frame,
    /// which returns it to its pool.
    pub fn publish(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| PipelineError::ChannelClosed)?;
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Like [`publish`](Self::publish) but gives the frame back as
    /// [`PipelineError::ChannelFull`] after `timeout`.
    pub fn publish_timeout(&self, frame: Frame, timeout: Duration) -> Result<()> {
        match self.tx.send_timeout(frame, timeout) {
            Ok(()) => {
                self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(frame)) => Err(PipelineError::ChannelFull(frame)),
            Err(SendTimeoutError::Disconnected(_)) => Err(PipelineError::ChannelClosed),
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }
}

impl FrameReceiver {
    /// Blocks until a frame arrives. Fails once the sender is gone and the channel is drained.
    pub fn consume(&self) -> Result<Frame> {
        let frame = self.rx.recv().map_err(|_| PipelineError::ChannelClosed)?;
        self.stats.frames_consumed.fetch_add(1, Ordering::Relaxed);
        Ok(frame)
    }

    pub fn consume_timeout(&self, timeout: Duration) -> Result<Frame> {
        let frame = self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => PipelineError::ChannelEmpty,
            RecvTimeoutError::Disconnected => PipelineError::ChannelClosed,
        })?;
        self.stats.frames_consumed.fetch_add(1, Ordering::Relaxed);
        Ok(frame)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// (published, consumed)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.frames_published.load(Ordering::Relaxed),
            self.stats.frames_consumed.load(Ordering::Relaxed),
        )
    }
}
