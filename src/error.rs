//! Error types for the capture and classification pipeline

use std::time::Duration;

use thiserror::Error;

use crate::capture::frame::Frame;
use crate::capture::BufferLocation;

/// Failures reported by the sensor driver collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("no sensor detected on the camera bus")]
    NotDetected,
    #[error("sensor I/O failed: {0}")]
    Io(String),
    #[error("sensor did not produce a frame within {0:?}")]
    Timeout(Duration),
    #[error("sensor rejected setting {0}")]
    Rejected(&'static str),
}

/// Startup failures. All of these are fatal.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("sensor could not be opened: {0}")]
    SensorOpen(#[source] DriverError),
    #[error("sensor tuning failed: {0}")]
    Tuning(#[source] DriverError),
    #[error("cannot allocate {requested} bytes of frame buffers in {location:?} ({available} available)")]
    OutOfMemory {
        requested: usize,
        available: usize,
        location: BufferLocation,
    },
}

/// Runtime pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Init(#[from] InitError),
    /// The sensor produced nothing within the capture timeout
    #[error("no frame from sensor after {waited:?}")]
    CaptureTimeout { waited: Duration },
    /// Every buffer stayed checked out for the whole wait
    #[error("no free frame buffer after {waited:?}")]
    PoolExhausted { waited: Duration },
    /// The channel stayed full for the whole wait. The frame is handed back
    /// so the caller can release it.
    #[error("frame channel full")]
    ChannelFull(Frame),
    #[error("frame channel empty")]
    ChannelEmpty,
    #[error("frame channel closed")]
    ChannelClosed,
    #[error("ownership violation on buffer slot {slot}: {reason}")]
    OwnershipViolation { slot: usize, reason: &'static str },
    #[error("buffer does not belong to this pool")]
    ForeignBuffer,
    #[error("frame source is not initialized")]
    SourceUnavailable,
    #[error("{0} frames still outstanding")]
    FramesOutstanding(usize),
    #[error("sensor error: {0}")]
    Sensor(#[from] DriverError),
    #[error("capture loop is {0}, expected idle")]
    AlreadyStarted(&'static str),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("malformed frame #{sequence}: {reason}")]
    MalformedFrame { sequence: u64, reason: String },
    #[error("inference failed: {0}")]
    Inference(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
