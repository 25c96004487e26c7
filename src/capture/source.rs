//! Frame source: owns the sensor and the buffer pool

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use super::frame::{Frame, FrameMetadata};
use super::pool::BufferPool;
use super::sensor::{
    DriverSettings, GrabMode, SensorDriver, SensorModel, SensorSetting, TuningProfile,
};
use crate::error::{DriverError, InitError, PipelineError, Result};
use crate::SensorConfig;

/// Sensor plus its fixed pool of frame buffers
pub struct FrameSource {
    sensor: Mutex<Box<dyn SensorDriver>>,
    pool: Arc<BufferPool>,
    config: SensorConfig,
    model: SensorModel,
    sequence: AtomicU64,
    ready: AtomicBool,
}

impl FrameSource {
    /// Validate the configuration, allocate the pool, open and tune the sensor.
    ///
    /// Nothing acquired along the way outlives a failure: the pool is dropped
    /// and an opened sensor is closed before the error is returned.
    pub fn initialize(
        config: &SensorConfig,
        mut sensor: Box<dyn SensorDriver>,
    ) -> Result<Self, InitError> {
        config.validate()?;

        let (width, height) = config.frame_size.dimensions();
        info!(
            format = ?config.pixel_format,
            width,
            height,
            buffers = config.buffer_count,
            location = ?config.buffer_location,
            "initializing frame source"
        );

        let pool = BufferPool::allocate(
            config.buffer_count,
            config.buffer_size(),
            config.buffer_location,
            config.memory.available(config.buffer_location),
        )?;

        let settings = DriverSettings {
            pins: config.pins,
            xclk_freq_hz: config.xclk_freq_hz,
            pixel_format: config.pixel_format,
            frame_size: config.frame_size,
            jpeg_quality: config.jpeg_quality,
            buffer_count: config.buffer_count,
            buffer_location: config.buffer_location,
            grab_mode: GrabMode::WhenEmpty,
        };

        let pid = sensor.open(&settings).map_err(|e| {
            error!(error = %e, "camera init failed");
            InitError::SensorOpen(e)
        })?;
        let model = SensorModel::from_pid(pid);
        info!(?model, pid, "sensor detected");

        let source = Self {
            sensor: Mutex::new(sensor),
            pool: Arc::new(pool),
            config: config.clone(),
            model,
            sequence: AtomicU64::new(0),
            ready: AtomicBool::new(true),
        };

        // Dropping `source` on failure closes the sensor.
        source.apply_sensor_tuning()?;
        Ok(source)
    }

    /// Apply orientation and image-quality settings for the detected model
    pub fn apply_sensor_tuning(&self) -> Result<TuningProfile, InitError> {
        let profile = TuningProfile::for_model(self.model, &self.config.tuning);
        let mut sensor = self.sensor();
        for setting in &profile.settings {
            sensor.apply(*setting).map_err(InitError::Tuning)?;
        }
        if profile
            .settings
            .iter()
            .any(|s| matches!(s, SensorSetting::Brightness(_) | SensorSetting::Saturation(_)))
        {
            info!(model = ?self.model, "applied colour correction");
        }
        Ok(profile)
    }

    /// Wait for a free buffer and fill it with the next frame
    #[instrument(level = "trace", skip(self))]
    pub fn acquire_frame(&self) -> Result<Frame> {
        if !self.is_ready() {
            return Err(PipelineError::SourceUnavailable);
        }

        let timeout = self.config.capture_timeout();
        let (slot, mut buf) = self.pool.check_out(timeout)?;

        let captured = self.sensor().capture_into(&mut buf, timeout);
        let info = match captured {
            Ok(info) => info,
            Err(e) => {
                self.pool.check_in(buf)?;
                return Err(match e {
                    DriverError::Timeout(waited) => PipelineError::CaptureTimeout { waited },
                    other => PipelineError::Sensor(other),
                });
            }
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let (width, height) = self.config.frame_size.dimensions();
        let meta = FrameMetadata {
            slot,
            sequence,
            width,
            height,
            format: self.config.pixel_format,
            len: info.len.min(buf.len()),
            captured_at: Instant::now(),
            sensor_timestamp: info.timestamp,
        };

        Ok(Frame::new(buf, meta, Arc::clone(&self.pool)))
    }

    /// Return a frame to the pool. Frames from another source are rejected.
    pub fn release_frame(&self, frame: Frame) -> Result<()> {
        if !frame.belongs_to(&self.pool) {
            // Its own pool still reclaims it on drop.
            return Err(PipelineError::OwnershipViolation {
                slot: frame.meta().slot,
                reason: "frame belongs to another source",
            });
        }
        frame.release()
    }

    /// Stop the sensor and free the pool. Refused while frames are outstanding.
    pub fn shutdown(&self) -> Result<()> {
        let outstanding = self.pool.outstanding();
        if outstanding > 0 {
            return Err(PipelineError::FramesOutstanding(outstanding));
        }
        if !self.ready.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        self.sensor().close();
        let freed = self.pool.drain();
        info!(freed, "frame source shut down");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn model(&self) -> SensorModel {
        self.model
    }

    pub fn buffer_count(&self) -> usize {
        self.pool.capacity()
    }

    pub fn capture_timeout(&self) -> Duration {
        self.config.capture_timeout()
    }

    /// Frames currently held outside the pool
    pub fn outstanding(&self) -> usize {
        self.pool.outstanding()
    }

    pub fn peak_outstanding(&self) -> usize {
        self.pool.peak_outstanding()
    }

    fn sensor(&self) -> MutexGuard<'_, Box<dyn SensorDriver>> {
        self.sensor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if self.ready.swap(false, Ordering::AcqRel) {
            let outstanding = self.pool.outstanding();
            if outstanding > 0 {
                warn!(outstanding, "frame source dropped with frames outstanding");
            }
            self.sensor().close();
        }
    }
}
