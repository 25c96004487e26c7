//! Host-side stand-ins for the sensor driver and the inference engine

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::capture::{
    CaptureInfo, DriverSettings, PixelFormat, SensorDriver, SensorModel, SensorSetting,
};
use crate::error::DriverError;
use crate::pipeline::classify::{Classification, ImageView, InferenceEngine};

/// Shared view into a [`SimulatedSensor`] after it has been boxed and handed off
#[derive(Debug, Clone, Default)]
pub struct SensorProbe {
    applied: Arc<Mutex<Vec<SensorSetting>>>,
    opened: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
}

impl SensorProbe {
    pub fn applied(&self) -> Vec<SensorSetting> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn was_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

/// Test-pattern sensor. Each frame is a solid colour cycling red, green, blue.
#[derive(Debug)]
pub struct SimulatedSensor {
    model: SensorModel,
    frame_interval: Duration,
    stall_after: Option<u64>,
    open_error: Option<DriverError>,
    rejected: Option<&'static str>,
    settings: Option<DriverSettings>,
    opened_at: Option<Instant>,
    probe: SensorProbe,
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new(SensorModel::Ov2640)
    }
}

impl SimulatedSensor {
    pub fn new(model: SensorModel) -> Self {
        Self {
            model,
            frame_interval: Duration::ZERO,
            stall_after: None,
            open_error: None,
            rejected: None,
            settings: None,
            opened_at: None,
            probe: SensorProbe::default(),
        }
    }

    /// Time the sensor takes to deliver each frame
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Stop producing frames after `frames` have been delivered
    pub fn stall_after(mut self, frames: u64) -> Self {
        self.stall_after = Some(frames);
        self
    }

    pub fn fail_open(mut self, error: DriverError) -> Self {
        self.open_error = Some(error);
        self
    }

    /// Reject the named setting (see [`SensorSetting::name`])
    pub fn reject_setting(mut self, name: &'static str) -> Self {
        self.rejected = Some(name);
        self
    }

    pub fn probe(&self) -> SensorProbe {
        self.probe.clone()
    }

    fn fill(&self, buf: &mut [u8], format: PixelFormat, frame: u64) -> usize {
        let (r, g, b): (u8, u8, u8) = match frame % 3 {
            0 => (230, 20, 20),
            1 => (20, 230, 20),
            _ => (20, 20, 230),
        };
        match format {
            PixelFormat::Rgb565 => {
                let pixel = ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
                let bytes = pixel.to_be_bytes();
                for chunk in buf.chunks_exact_mut(2) {
                    chunk.copy_from_slice(&bytes);
                }
                buf.len()
            }
            PixelFormat::Rgb888 => {
                for chunk in buf.chunks_exact_mut(3) {
                    chunk.copy_from_slice(&[r, g, b]);
                }
                buf.len()
            }
            PixelFormat::Grayscale => {
                buf.fill(((r as u16 + g as u16 + b as u16) / 3) as u8);
                buf.len()
            }
            PixelFormat::Yuv422 => {
                for chunk in buf.chunks_exact_mut(2) {
                    chunk.copy_from_slice(&[(frame * 40 % 256) as u8, 128]);
                }
                buf.len()
            }
            PixelFormat::Jpeg => {
                // SOI, a little payload, EOI
                let payload = [0xff, 0xd8, r, g, b, 0xff, 0xd9];
                let len = payload.len().min(buf.len());
                buf[..len].copy_from_slice(&payload[..len]);
                len
            }
        }
    }
}

impl SensorDriver for SimulatedSensor {
    fn open(&mut self, settings: &DriverSettings) -> Result<u16, DriverError> {
        if let Some(error) = self.open_error.clone() {
            return Err(error);
        }
        debug!(model = ?self.model, "simulated sensor opened");
        self.settings = Some(settings.clone());
        self.opened_at = Some(Instant::now());
        self.probe.opened.store(true, Ordering::Release);
        Ok(self.model.pid())
    }

    fn apply(&mut self, setting: SensorSetting) -> Result<(), DriverError> {
        if self.rejected == Some(setting.name()) {
            return Err(DriverError::Rejected(setting.name()));
        }
        self.probe
            .applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(setting);
        Ok(())
    }

    fn capture_into(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<CaptureInfo, DriverError> {
        let format = match &self.settings {
            Some(settings) => settings.pixel_format,
            None => return Err(DriverError::Io("sensor not opened".into())),
        };

        let produced = self.probe.frames.load(Ordering::Acquire);
        if self.stall_after.is_some_and(|limit| produced >= limit) {
            thread::sleep(timeout);
            return Err(DriverError::Timeout(timeout));
        }
        if self.frame_interval > timeout {
            thread::sleep(timeout);
            return Err(DriverError::Timeout(timeout));
        }
        if !self.frame_interval.is_zero() {
            thread::sleep(self.frame_interval);
        }

        let len = self.fill(buf, format, produced);
        self.probe.frames.fetch_add(1, Ordering::AcqRel);
        Ok(CaptureInfo {
            len,
            timestamp: self.opened_at.map(|t| t.elapsed()),
        })
    }

    fn close(&mut self) {
        self.settings = None;
        self.probe.closed.store(true, Ordering::Release);
    }
}

/// Scores an RGB888 image by its mean colour
#[derive(Debug, Default, Clone, Copy)]
pub struct DominantColorEngine;

impl InferenceEngine for DominantColorEngine {
    fn input_format(&self) -> PixelFormat {
        PixelFormat::Rgb888
    }

    fn infer(
        &mut self,
        image: ImageView<'_>,
    ) -> Result<Vec<Classification>, Box<dyn std::error::Error + Send + Sync>> {
        let pixels = image.data.len() / 3;
        if pixels == 0 {
            return Err("empty image".into());
        }

        let mut sums = [0u64; 3];
        for px in image.data.chunks_exact(3) {
            sums[0] += px[0] as u64;
            sums[1] += px[1] as u64;
            sums[2] += px[2] as u64;
        }
        let [r, g, b] = sums.map(|s| s as f32 / pixels as f32 / 255.0);
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        let total = (r + g + b).max(f32::EPSILON);

        Ok(vec![
            Classification::new("red", r / total),
            Classification::new("green", g / total),
            Classification::new("blue", b / total),
            Classification::new("dark", 1.0 - luma),
            Classification::new("bright", luma),
        ])
    }
}
