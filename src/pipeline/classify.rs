//! Classification stage: frame in, ranked (label, score) list out

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::capture::convert::convert_pixels;
use crate::capture::{Frame, PixelFormat};
use crate::error::{PipelineError, Result};
use crate::ClassifierConfig;

/// One (category, confidence) pair
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub score: f32,
}

impl Classification {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Pixels handed to the inference engine
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// The inference engine collaborator. Results may come back in any order.
pub trait InferenceEngine: Send {
    /// Pixel format the model consumes
    fn input_format(&self) -> PixelFormat;

    fn infer(
        &mut self,
        image: ImageView<'_>,
    ) -> std::result::Result<Vec<Classification>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Keep the `k` highest scores, highest first. Ties keep engine order; NaN scores are discarded.
pub fn top_k(mut results: Vec<Classification>, k: usize, min_score: f32) -> Vec<Classification> {
    results.retain(|c| c.score.is_finite() && c.score >= min_score);
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(k);
    results
}

/// Wraps an engine with format conversion and top-K ranking
pub struct Classifier<E> {
    engine: E,
    top_k: usize,
    min_score: f32,
}

impl<E: InferenceEngine> Classifier<E> {
    pub fn new(engine: E, config: &ClassifierConfig) -> Self {
        Self {
            engine,
            top_k: config.top_k,
            min_score: config.min_score,
        }
    }

    /// Classify a frame without keeping or modifying it
    pub fn classify(&mut self, frame: &Frame) -> Result<Vec<Classification>> {
        let meta = frame.meta();
        let malformed = |reason: String| PipelineError::MalformedFrame {
            sequence: meta.sequence,
            reason,
        };

        if !meta.format.is_compressed() {
            let expected = meta.format.frame_bytes(meta.width, meta.height);
            if frame.data().len() != expected {
                return Err(malformed(format!(
                    "expected {expected} bytes, got {}",
                    frame.data().len()
                )));
            }
        } else if frame.data().is_empty() {
            return Err(malformed("empty frame".into()));
        }

        let target = self.engine.input_format();
        let pixels = convert_pixels(frame.data(), meta.format, target).map_err(malformed)?;

        let image = ImageView {
            data: &pixels,
            width: meta.width,
            height: meta.height,
            format: target,
        };
        let raw = self
            .engine
            .infer(image)
            .map_err(|e| PipelineError::Inference(e.to_string()))?;

        Ok(top_k(raw, self.top_k, self.min_score))
    }
}

/// Results for one frame
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub sequence: u64,
    pub latency: Duration,
    pub results: Vec<Classification>,
}

/// Where per-frame results go
pub trait ResultSink: Send {
    fn report(&mut self, report: &FrameReport);
}

impl<F> ResultSink for F
where
    F: FnMut(&FrameReport) + Send,
{
    fn report(&mut self, report: &FrameReport) {
        self(report)
    }
}

/// Logs every result through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn report(&mut self, report: &FrameReport) {
        debug!(
            sequence = report.sequence,
            latency_ms = report.latency.as_secs_f64() * 1000.0,
            "frame classified"
        );
        for result in &report.results {
            info!(category = %result.label, score = result.score, "classification");
        }
    }
}

/// Classify one frame, release it, and report. A bad frame is logged and dropped.
pub(crate) fn process_frame<E: InferenceEngine, S: ResultSink + ?Sized>(
    classifier: &mut Classifier<E>,
    sink: &mut S,
    frame: Frame,
) -> Result<()> {
    let sequence = frame.sequence();
    let captured_at = frame.meta().captured_at;
    let outcome = classifier.classify(&frame);
    frame.release()?;

    match outcome {
        Ok(results) => {
            sink.report(&FrameReport {
                sequence,
                latency: Instant::now().saturating_duration_since(captured_at),
                results,
            });
            Ok(())
        }
        Err(e) => {
            warn!(sequence, error = %e, "dropping frame");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameSource;
    use crate::sim::{DominantColorEngine, SimulatedSensor};
    use crate::SensorConfig;

    fn scored(scores: &[f32]) -> Vec<Classification> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &s)| Classification::new(format!("cat{i}"), s))
            .collect()
    }

    #[test]
    fn top_three_in_descending_order() {
        let out = top_k(scored(&[0.9, 0.8, 0.95, 0.1, 0.3]), 3, 0.0);
        assert_eq!(
            out,
            vec![
                Classification::new("cat2", 0.95),
                Classification::new("cat0", 0.9),
                Classification::new("cat1", 0.8),
            ]
        );
    }

    #[test]
    fn k_larger_than_results_keeps_all() {
        let out = top_k(scored(&[0.2, 0.7]), 5, 0.0);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].score, 0.7);
    }

    #[test]
    fn nan_and_low_scores_are_dropped() {
        let out = top_k(scored(&[f32::NAN, 0.05, 0.6]), 5, 0.1);
        assert_eq!(out, vec![Classification::new("cat2", 0.6)]);
    }

    #[test]
    fn equal_scores_keep_engine_order() {
        let out = top_k(scored(&[0.5, 0.5, 0.5]), 2, 0.0);
        assert_eq!(out[0].label, "cat0");
        assert_eq!(out[1].label, "cat1");
    }

    #[test]
    fn classify_converts_and_ranks() {
        let source =
            FrameSource::initialize(&SensorConfig::default(), Box::new(SimulatedSensor::default()))
                .unwrap();
        let mut classifier = Classifier::new(
            DominantColorEngine,
            &ClassifierConfig {
                top_k: 2,
                min_score: 0.0,
            },
        );

        let frame = source.acquire_frame().unwrap();
        let results = classifier.classify(&frame).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        frame.release().unwrap();
        assert_eq!(source.outstanding(), 0);
    }

    #[test]
    fn bad_frame_is_released_and_reported_as_error() {
        let config = SensorConfig {
            pixel_format: PixelFormat::Jpeg,
            ..SensorConfig::default()
        };
        let source =
            FrameSource::initialize(&config, Box::new(SimulatedSensor::default())).unwrap();
        let mut classifier = Classifier::new(DominantColorEngine, &ClassifierConfig::default());
        let mut reports = Vec::new();
        let mut sink = |r: &FrameReport| reports.push(r.sequence);

        let frame = source.acquire_frame().unwrap();
        let err = process_frame(&mut classifier, &mut sink, frame).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedFrame { sequence: 1, .. }));
        assert_eq!(source.outstanding(), 0);
        assert!(reports.is_empty());
    }
}
