use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use super::pool::BufferPool;
use crate::error::{PipelineError, Result};

/// A captured frame, exclusively owned by whoever holds it.
///
/// The buffer goes back to the pool exactly once: either through
/// [`Frame::release`] or, on every other exit path, when the frame is dropped.
pub struct Frame {
    data: Option<BytesMut>,
    meta: FrameMetadata,

    pool: Arc<BufferPool>,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    /// Pool slot backing this frame. Informational: the pool finds the slot
    /// from the buffer itself on return.
    pub slot: usize,
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Valid bytes in the buffer (JPEG frames are shorter than the slot)
    pub len: usize,
    pub captured_at: Instant,
    pub sensor_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats the sensor can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb565,
    Yuv422,
    Grayscale,
    Jpeg,
    Rgb888,
}

impl PixelFormat {
    /// Bytes needed to hold one frame. JPEG uses the driver's worst-case estimate.
    pub fn frame_bytes(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgb565 | PixelFormat::Yuv422 => pixels * 2,
            PixelFormat::Grayscale => pixels,
            PixelFormat::Rgb888 => pixels * 3,
            PixelFormat::Jpeg => pixels * 3 / 5,
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, PixelFormat::Jpeg)
    }
}

/// Resolution presets supported by the sensor driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    Qqvga,
    Qcif,
    Hqvga,
    #[serde(rename = "240x240")]
    R240x240,
    Qvga,
    Cif,
    Hvga,
    Vga,
    Svga,
    Xga,
    Hd,
    Sxga,
    Uxga,
}

impl FrameSize {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qcif => (176, 144),
            FrameSize::Hqvga => (240, 176),
            FrameSize::R240x240 => (240, 240),
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Hvga => (480, 320),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Hd => (1280, 720),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }
}

impl Frame {
    pub(crate) fn new(data: BytesMut, meta: FrameMetadata, pool: Arc<BufferPool>) -> Self {
        Self {
            data: Some(data),
            meta,
            pool,
        }
    }

    /// Valid pixel bytes
    pub fn data(&self) -> &[u8] {
        match &self.data {
            Some(buf) => &buf[..self.meta.len.min(buf.len())],
            None => &[],
        }
    }

    pub fn meta(&self) -> &FrameMetadata {
        &self.meta
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub(crate) fn belongs_to(&self, pool: &Arc<BufferPool>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    /// Hand the buffer back to its pool
    pub fn release(mut self) -> Result<()> {
        let buf = self.data.take().ok_or(PipelineError::OwnershipViolation {
            slot: self.meta.slot,
            reason: "frame already released",
        })?;
        self.pool.check_in(buf).map(drop)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let Some(buf) = self.data.take() else {
            return;
        };
        if let Err(e) = self.pool.check_in(buf) {
            tracing::error!(slot = self.meta.slot, error = %e, "frame returned to pool twice");
            debug_assert!(false, "{e}");
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("held", &self.data.is_some())
            .finish()
    }
}
