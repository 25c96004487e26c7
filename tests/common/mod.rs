//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sentry_vision::capture::PixelFormat;
use sentry_vision::pipeline::{Classification, FrameReport, ImageView, InferenceEngine};
use sentry_vision::Config;

/// Initialise a tracing subscriber for tests. Safe to call more than once.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentry_vision=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Small, fast configuration: no pinning, short timeouts
pub fn test_config(buffers: usize, channel: usize) -> Config {
    let mut config = Config::default();
    config.sensor.buffer_count = buffers;
    config.sensor.capture_timeout_ms = 50;
    config.pipeline.channel_capacity = channel;
    config.pipeline.capture_core = None;
    config.pipeline.classify_core = None;
    config.pipeline.yield_ms = 0;
    config
}

/// Engine that returns a fixed score list, optionally taking its time
pub struct ScriptedEngine {
    pub scores: Vec<(String, f32)>,
    pub delay: Duration,
}

impl ScriptedEngine {
    pub fn new(scores: &[(&str, f32)]) -> Self {
        Self {
            scores: scores.iter().map(|(l, s)| (l.to_string(), *s)).collect(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl InferenceEngine for ScriptedEngine {
    fn input_format(&self) -> PixelFormat {
        PixelFormat::Rgb565
    }

    fn infer(
        &mut self,
        _image: ImageView<'_>,
    ) -> Result<Vec<Classification>, Box<dyn std::error::Error + Send + Sync>> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(self
            .scores
            .iter()
            .map(|(label, score)| Classification::new(label.clone(), *score))
            .collect())
    }
}

/// Sink that keeps every report for later inspection
#[derive(Clone, Default)]
pub struct CollectingSink {
    reports: Arc<Mutex<Vec<FrameReport>>>,
}

impl CollectingSink {
    pub fn reports(&self) -> Vec<FrameReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.reports().iter().map(|r| r.sequence).collect()
    }

    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if self.reports.lock().unwrap().len() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }
}

impl sentry_vision::pipeline::ResultSink for CollectingSink {
    fn report(&mut self, report: &FrameReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}
