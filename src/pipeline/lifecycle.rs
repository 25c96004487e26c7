//! Construction and teardown ordering for the whole pipeline

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info, warn};

use super::capture_loop::{CaptureLoop, CaptureState, LoopOptions};
use super::channel::{frame_channel, FrameReceiver};
use super::classify::{process_frame, Classifier, InferenceEngine, ResultSink};
use crate::capture::{FrameSource, SensorDriver};
use crate::error::{PipelineError, Result};
use crate::utils::spawn_pinned;
use crate::{Config, PipelineStats, RunReport};

/// A running capture → classify pipeline.
///
/// The sensor is up before capture starts and is shut down only after both
/// workers have exited.
pub struct Pipeline {
    source: Arc<FrameSource>,
    capture: CaptureLoop,
    classifier: Option<JoinHandle<()>>,
    stats: Arc<PipelineStats>,
    stopped: bool,
}

impl Pipeline {
    /// Bring up the frame source, then the classifier thread, then the capture loop.
    ///
    /// Any failure here is fatal and reported once; nothing is retried.
    pub fn start<E, S>(
        config: &Config,
        sensor: Box<dyn SensorDriver>,
        engine: E,
        sink: S,
    ) -> Result<Self>
    where
        E: InferenceEngine + 'static,
        S: ResultSink + 'static,
    {
        config.validate()?;

        let source = match FrameSource::initialize(&config.sensor, sensor) {
            Ok(source) => Arc::new(source),
            Err(e) => {
                error!(error = %e, "sensor initialization failed, pipeline halted");
                return Err(e.into());
            }
        };

        let stats = Arc::new(PipelineStats::default());
        let (tx, rx) = frame_channel(config.pipeline.channel_capacity);

        let classifier = Classifier::new(engine, &config.classifier);
        let worker_stats = Arc::clone(&stats);
        let classifier = spawn_pinned("classify", config.pipeline.classify_core, move || {
            classify_worker(rx, classifier, sink, &worker_stats)
        })?;

        let mut capture = CaptureLoop::new();
        let options = LoopOptions {
            core: config.pipeline.capture_core,
            yield_for: Duration::from_millis(config.pipeline.yield_ms),
        };
        // On failure `tx` is dropped, which stops the classifier thread.
        if let Err(e) = capture.start(Arc::clone(&source), tx, Arc::clone(&stats), options) {
            join_worker("classifier", classifier);
            return Err(e);
        }

        info!(
            model = ?source.model(),
            buffers = source.buffer_count(),
            channel = config.pipeline.channel_capacity,
            "pipeline running"
        );

        Ok(Self {
            source,
            capture,
            classifier: Some(classifier),
            stats,
            stopped: false,
        })
    }

    pub fn source(&self) -> &Arc<FrameSource> {
        &self.source
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn report(&self) -> RunReport {
        self.stats.snapshot()
    }

    /// Stop capture, let the classifier drain the channel, then shut the sensor down
    pub fn stop(mut self) -> Result<RunReport> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<RunReport> {
        if self.stopped {
            return Ok(self.stats.snapshot());
        }
        self.stopped = true;

        info!("stopping pipeline");
        self.capture.stop();
        self.capture.join();

        if let Some(handle) = self.classifier.take() {
            join_worker("classifier", handle);
        }

        self.source.shutdown()?;

        let report = self.stats.snapshot();
        info!(
            captured = report.captured,
            classified = report.classified,
            dropped = report.dropped,
            capture_timeouts = report.capture_timeouts,
            pool_exhausted = report.pool_exhausted,
            "pipeline stopped"
        );
        Ok(report)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "pipeline shutdown incomplete");
        }
    }
}

/// Join a worker thread, logging a panic instead of propagating it.
/// Returns whether the thread exited cleanly.
fn join_worker(name: &str, handle: JoinHandle<()>) -> bool {
    let clean = handle.join().is_ok();
    if !clean {
        error!(worker = name, "worker thread panicked");
    }
    clean
}

/// Consumer side: classify frames in channel order until the producer hangs up
fn classify_worker<E, S>(
    rx: FrameReceiver,
    mut classifier: Classifier<E>,
    mut sink: S,
    stats: &PipelineStats,
) where
    E: InferenceEngine,
    S: ResultSink,
{
    info!("classifier started");
    loop {
        let frame = match rx.consume() {
            Ok(frame) => frame,
            Err(PipelineError::ChannelClosed) => break,
            Err(e) => {
                warn!(error = %e, "receive failed");
                continue;
            }
        };

        match process_frame(&mut classifier, &mut sink, frame) {
            Ok(()) => stats.record_classified(),
            Err(PipelineError::OwnershipViolation { slot, reason }) => {
                error!(slot, reason, "frame ownership violated");
                debug_assert!(false, "ownership violation on slot {slot}: {reason}");
            }
            Err(_) => stats.record_dropped(),
        }
    }
    info!("classifier stopped");
}
