//! Producer side: acquire frames and publish them to the channel

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::channel::FrameSender;
use crate::capture::FrameSource;
use crate::error::{PipelineError, Result};
use crate::utils::spawn_pinned;
use crate::PipelineStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl CaptureState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CaptureState::Idle,
            1 => CaptureState::Running,
            2 => CaptureState::Stopping,
            _ => CaptureState::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Running => "running",
            CaptureState::Stopping => "stopping",
            CaptureState::Stopped => "stopped",
        }
    }
}

/// Where the loop runs and how long it yields between frames
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopOptions {
    pub core: Option<usize>,
    pub yield_for: Duration,
}

/// Capture loop handle. Stopping is cooperative: the flag is checked at the
/// top of each iteration and an acquisition in progress is allowed to finish.
pub struct CaptureLoop {
    state: Arc<AtomicU8>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Default for CaptureLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureLoop {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(CaptureState::Idle as u8)),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Start capturing on a dedicated thread.
    ///
    /// An unavailable source is a configuration fault: it is reported once and
    /// the loop goes straight to `Stopped` instead of retrying.
    pub fn start(
        &mut self,
        source: Arc<FrameSource>,
        tx: FrameSender,
        stats: Arc<PipelineStats>,
        options: LoopOptions,
    ) -> Result<()> {
        let current = self.state();
        if current != CaptureState::Idle {
            return Err(PipelineError::AlreadyStarted(current.as_str()));
        }
        if !source.is_ready() {
            error!("frame source unavailable, capture loop will not start");
            self.set_state(CaptureState::Stopped);
            return Err(PipelineError::SourceUnavailable);
        }

        self.set_state(CaptureState::Running);
        let state = Arc::clone(&self.state);
        let stop = Arc::clone(&self.stop);

        let spawned = spawn_pinned("capture", options.core, move || {
            info!("capture loop started");
            run(&source, tx, &stats, &stop, options.yield_for);
            state.store(CaptureState::Stopped as u8, Ordering::Release);
            info!("capture loop stopped");
        });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.set_state(CaptureState::Stopped);
                Err(e.into())
            }
        }
    }

    /// Signal the loop to stop after the current iteration.
    ///
    /// A loop that was never started goes straight to `Stopped` and cannot be
    /// started afterwards.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                match CaptureState::from_u8(state) {
                    CaptureState::Idle => Some(CaptureState::Stopped as u8),
                    CaptureState::Running => Some(CaptureState::Stopping as u8),
                    CaptureState::Stopping | CaptureState::Stopped => None,
                }
            });
    }

    /// Wait for the loop thread to exit
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("capture thread panicked");
                self.set_state(CaptureState::Stopped);
            }
        } else if self.state() == CaptureState::Idle {
            self.set_state(CaptureState::Stopped);
        }
    }

    fn set_state(&self, state: CaptureState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

fn run(
    source: &FrameSource,
    tx: FrameSender,
    stats: &PipelineStats,
    stop: &AtomicBool,
    yield_for: Duration,
) {
    while !stop.load(Ordering::Acquire) {
        match source.acquire_frame() {
            Ok(frame) => {
                stats.record_captured();
                if let Err(e) = tx.publish(frame) {
                    // Consumer is gone; the frame went back to the pool on drop.
                    warn!(error = %e, "consumer disconnected");
                    break;
                }
            }
            Err(PipelineError::CaptureTimeout { waited }) => {
                stats.record_capture_timeout();
                warn!(?waited, "no frame from sensor");
            }
            Err(PipelineError::PoolExhausted { waited }) => {
                // Classifier is behind; every buffer is still in use downstream.
                stats.record_pool_exhausted();
                debug!(?waited, "waiting for a free frame buffer");
            }
            Err(PipelineError::SourceUnavailable) => {
                error!("frame source went away");
                break;
            }
            Err(e) => {
                stats.record_dropped();
                warn!(error = %e, "capture failed, skipping frame");
            }
        }

        if yield_for.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(yield_for);
        }
    }
    // Dropping `tx` here lets the consumer drain and exit.
}
