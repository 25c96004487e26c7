pub mod capture;
pub mod error;
pub mod pipeline;
pub mod sim;
pub mod utils;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameSize, FrameSource, PixelFormat};
pub use error::{DriverError, InitError, PipelineError};
pub use pipeline::Pipeline;

use capture::{BufferLocation, PinAssignment, SensorModel};

/// System configuration, loaded once at startup and immutable afterwards
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub sensor: SensorConfig,
    pub pipeline: PipelineConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub pixel_format: PixelFormat,
    pub frame_size: FrameSize,
    pub buffer_count: usize,
    pub buffer_location: BufferLocation,
    pub memory: MemoryBudget,
    pub jpeg_quality: u8, // 0-63, lower is better
    pub xclk_freq_hz: u32,
    pub capture_timeout_ms: u64,
    pub tuning: SensorTuning,
    pub pins: PinAssignment,
}

/// Bytes available for frame buffers in each memory region
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryBudget {
    pub psram_bytes: usize,
    pub dram_bytes: usize,
}

impl MemoryBudget {
    pub fn available(&self, location: BufferLocation) -> usize {
        match location {
            BufferLocation::Psram => self.psram_bytes,
            BufferLocation::Dram => self.dram_bytes,
        }
    }
}

/// Orientation and image-quality adjustments applied after the sensor is opened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorTuning {
    pub vflip: bool,
    pub hmirror: bool,
    pub sharpness: i8,
    pub awb_gain: bool,
    pub brightness: i8,
    pub saturation: i8,
    /// Correction for sensors that ship oversaturated
    pub color_correction: ColorCorrection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorCorrection {
    pub brightness_delta: i8,
    pub saturation_delta: i8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub capture_core: Option<usize>,
    pub classify_core: Option<usize>,
    pub yield_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub top_k: usize,
    pub min_score: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Rgb565,
            frame_size: FrameSize::R240x240,
            buffer_count: 1,
            buffer_location: BufferLocation::Psram,
            memory: MemoryBudget {
                psram_bytes: 8 * 1024 * 1024,
                dram_bytes: 320 * 1024,
            },
            jpeg_quality: 12,
            xclk_freq_hz: 20_000_000,
            capture_timeout_ms: 1000,
            tuning: SensorTuning::default(),
            pins: PinAssignment::ESP32_S3_EYE,
        }
    }
}

impl Default for SensorTuning {
    fn default() -> Self {
        Self {
            vflip: false,
            hmirror: true,
            sharpness: 2,
            awb_gain: true,
            brightness: 0,
            saturation: 0,
            color_correction: ColorCorrection {
                brightness_delta: 1,
                saturation_delta: -2,
            },
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1,
            capture_core: Some(0),
            classify_core: Some(1),
            yield_ms: 1,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.0,
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `VISION__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, InitError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("VISION")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml_str(toml: &str) -> Result<Self, InitError> {
        let config: Config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), InitError> {
        self.sensor.validate()?;

        if self.pipeline.channel_capacity == 0 {
            return Err(InitError::InvalidConfig("channel capacity must be at least 1".into()));
        }
        // More slots than buffers could never fill; the pool bounds frames in flight.
        if self.pipeline.channel_capacity > self.sensor.buffer_count {
            return Err(InitError::InvalidConfig(format!(
                "channel capacity {} exceeds buffer count {}",
                self.pipeline.channel_capacity, self.sensor.buffer_count
            )));
        }
        if self.classifier.top_k == 0 {
            return Err(InitError::InvalidConfig("top_k must be at least 1".into()));
        }
        if !self.classifier.min_score.is_finite() {
            return Err(InitError::InvalidConfig("min_score must be finite".into()));
        }
        Ok(())
    }
}

impl SensorConfig {
    pub fn validate(&self) -> Result<(), InitError> {
        if self.buffer_count == 0 {
            return Err(InitError::InvalidConfig("buffer count must be at least 1".into()));
        }
        if self.jpeg_quality > 63 {
            return Err(InitError::InvalidConfig(format!(
                "jpeg quality {} out of range 0-63",
                self.jpeg_quality
            )));
        }
        if !(1_000_000..=40_000_000).contains(&self.xclk_freq_hz) {
            return Err(InitError::InvalidConfig(format!(
                "xclk frequency {} Hz out of range",
                self.xclk_freq_hz
            )));
        }
        if self.capture_timeout_ms == 0 {
            return Err(InitError::InvalidConfig("capture timeout must be non-zero".into()));
        }
        self.pins.validate().map_err(InitError::InvalidConfig)?;
        Ok(())
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    /// Bytes needed for one frame buffer
    pub fn buffer_size(&self) -> usize {
        let (width, height) = self.frame_size.dimensions();
        self.pixel_format.frame_bytes(width, height)
    }
}

impl SensorTuning {
    /// Correction to apply for `model`, if the model needs one
    pub fn correction_for(&self, model: SensorModel) -> Option<ColorCorrection> {
        model
            .ships_oversaturated()
            .then_some(self.color_correction)
    }
}

/// Counters collected throughout the pipeline
#[derive(Debug, Default)]
pub struct PipelineStats {
    counters: CachePadded<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    captured: AtomicU64,
    classified: AtomicU64,
    dropped: AtomicU64,
    capture_timeouts: AtomicU64,
    pool_exhausted: AtomicU64,
}

/// Snapshot of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub captured: u64,
    pub classified: u64,
    pub dropped: u64,
    /// Sensor stalls
    pub capture_timeouts: u64,
    /// Waits that ended with every buffer still held downstream
    pub pool_exhausted: u64,
}

impl PipelineStats {
    pub fn record_captured(&self) {
        self.counters.captured.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("vision.frames_captured").increment(1);
    }

    pub fn record_classified(&self) {
        self.counters.classified.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("vision.frames_classified").increment(1);
    }

    pub fn record_dropped(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("vision.frames_dropped").increment(1);
    }

    pub fn record_capture_timeout(&self) {
        self.counters.capture_timeouts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("vision.capture_timeouts").increment(1);
    }

    pub fn record_pool_exhausted(&self) {
        self.counters.pool_exhausted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("vision.pool_exhausted").increment(1);
    }

    pub fn snapshot(&self) -> RunReport {
        RunReport {
            captured: self.counters.captured.load(Ordering::Relaxed),
            classified: self.counters.classified.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            capture_timeouts: self.counters.capture_timeouts.load(Ordering::Relaxed),
            pool_exhausted: self.counters.pool_exhausted.load(Ordering::Relaxed),
        }
    }
}
