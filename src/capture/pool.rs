//! Fixed pool of frame buffers with per-slot ownership tracking

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{InitError, PipelineError, Result};

/// Memory region the pool is carved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferLocation {
    /// Large external RAM, the default for bulky frame data
    Psram,
    /// Fast internal RAM
    Dram,
}

/// Free list of buffers. A buffer is either in `free` or held by exactly one frame.
///
/// Slots are identified by the address of their backing allocation, so a
/// returned buffer always lands back on its own slot.
pub struct BufferPool {
    free_tx: Sender<(usize, BytesMut)>,
    free_rx: Receiver<(usize, BytesMut)>,
    bases: Box<[usize]>,
    outstanding: Box<[AtomicBool]>,
    buffer_size: usize,
    location: BufferLocation,
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    checkouts: AtomicU64,
}

impl BufferPool {
    pub fn allocate(
        count: usize,
        buffer_size: usize,
        location: BufferLocation,
        available: usize,
    ) -> std::result::Result<Self, InitError> {
        let requested = count.saturating_mul(buffer_size);
        if requested > available {
            return Err(InitError::OutOfMemory {
                requested,
                available,
                location,
            });
        }

        let (free_tx, free_rx) = flume::bounded(count);
        let mut bases = Vec::with_capacity(count);
        for slot in 0..count {
            let buf = BytesMut::zeroed(buffer_size);
            bases.push(buf.as_ptr() as usize);
            // Capacity equals the pool size, so this never blocks.
            let _ = free_tx.send((slot, buf));
        }

        debug!(count, buffer_size, ?location, "frame buffer pool allocated");

        Ok(Self {
            free_tx,
            free_rx,
            bases: bases.into_boxed_slice(),
            outstanding: (0..count).map(|_| AtomicBool::new(false)).collect(),
            buffer_size,
            location,
            stats: CachePadded::new(Stats::default()),
        })
    }

    /// Take a free buffer, waiting up to `timeout` for one to be returned.
    ///
    /// Running dry is backpressure from the consumer, not a sensor fault, and
    /// is reported as [`PipelineError::PoolExhausted`].
    pub fn check_out(&self, timeout: Duration) -> Result<(usize, BytesMut)> {
        let (slot, buf) = match self.free_rx.recv_timeout(timeout) {
            Ok(entry) => entry,
            Err(RecvTimeoutError::Timeout) => {
                return Err(PipelineError::PoolExhausted { waited: timeout })
            }
            Err(RecvTimeoutError::Disconnected) => return Err(PipelineError::SourceUnavailable),
        };

        if self.outstanding[slot].swap(true, Ordering::AcqRel) {
            return Err(PipelineError::OwnershipViolation {
                slot,
                reason: "slot handed out while already outstanding",
            });
        }

        let in_flight = self.stats.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats.peak_in_flight.fetch_max(in_flight, Ordering::AcqRel);
        self.stats.checkouts.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("vision.frames_outstanding").set(in_flight as f64);

        Ok((slot, buf))
    }

    /// Return a buffer to the slot it was carved from and report that slot.
    ///
    /// A buffer this pool never handed out is rejected. It was never part of
    /// the pool, so dropping it leaves the pool at full capacity.
    pub fn check_in(&self, buf: BytesMut) -> Result<usize> {
        let addr = buf.as_ptr() as usize;
        let Some(slot) = self.bases.iter().position(|&base| base == addr) else {
            return Err(PipelineError::ForeignBuffer);
        };
        if !self.outstanding[slot].swap(false, Ordering::AcqRel) {
            return Err(PipelineError::OwnershipViolation {
                slot,
                reason: "slot is not outstanding",
            });
        }

        let in_flight = self.stats.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::gauge!("vision.frames_outstanding").set(in_flight as f64);

        // The receiver lives in `self`, so the send cannot fail.
        let _ = self.free_tx.send((slot, buf));
        Ok(slot)
    }

    /// Drop every free buffer. Returns how many were freed.
    pub fn drain(&self) -> usize {
        self.free_rx.drain().count()
    }

    pub fn capacity(&self) -> usize {
        self.outstanding.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn location(&self) -> BufferLocation {
        self.location
    }

    /// Frames currently held outside the pool
    pub fn outstanding(&self) -> usize {
        self.stats.in_flight.load(Ordering::Acquire)
    }

    pub fn peak_outstanding(&self) -> usize {
        self.stats.peak_in_flight.load(Ordering::Acquire)
    }

    pub fn checkouts(&self) -> u64 {
        self.stats.checkouts.load(Ordering::Relaxed)
    }
}
