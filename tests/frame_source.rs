//! Frame source lifecycle, tuning and buffer ownership

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::init_test_tracing;
use sentry_vision::capture::{BufferLocation, FrameSize, PixelFormat, SensorModel, SensorSetting};
use sentry_vision::sim::SimulatedSensor;
use sentry_vision::{DriverError, FrameSource, InitError, PipelineError, SensorConfig};

fn single_buffer_config() -> SensorConfig {
    SensorConfig {
        pixel_format: PixelFormat::Rgb565,
        frame_size: FrameSize::R240x240,
        buffer_count: 1,
        capture_timeout_ms: 1000,
        ..SensorConfig::default()
    }
}

#[test]
fn single_buffer_acquire_waits_for_release() {
    init_test_tracing();
    let source = Arc::new(
        FrameSource::initialize(&single_buffer_config(), Box::new(SimulatedSensor::default()))
            .unwrap(),
    );

    let mut held = source.acquire_frame().unwrap();
    assert_eq!(held.sequence(), 1);
    assert_eq!((held.meta().width, held.meta().height), (240, 240));
    assert_eq!(held.data().len(), 240 * 240 * 2);

    for expected in 2..=10 {
        let waiter = {
            let source = Arc::clone(&source);
            thread::spawn(move || source.acquire_frame())
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished(), "acquire returned while the only buffer was held");
        assert_eq!(source.outstanding(), 1);

        held.release().unwrap();
        let next = waiter.join().unwrap().unwrap();
        assert_eq!(next.sequence(), expected);
        held = next;
    }

    held.release().unwrap();
    assert_eq!(source.outstanding(), 0);
    assert_eq!(source.peak_outstanding(), 1);
}

#[test]
fn exhausted_pool_is_reported_as_backpressure() {
    let config = SensorConfig {
        capture_timeout_ms: 20,
        ..single_buffer_config()
    };
    let sensor = SimulatedSensor::default();
    let probe = sensor.probe();
    let source = FrameSource::initialize(&config, Box::new(sensor)).unwrap();

    let _held = source.acquire_frame().unwrap();
    let err = source.acquire_frame().unwrap_err();
    assert!(matches!(err, PipelineError::PoolExhausted { .. }));
    // The sensor was never asked for a second frame.
    assert_eq!(probe.frames_produced(), 1);
}

#[test]
fn oversaturated_sensor_gets_corrected() {
    let sensor = SimulatedSensor::new(SensorModel::Ov3660);
    let probe = sensor.probe();
    let source = FrameSource::initialize(&single_buffer_config(), Box::new(sensor)).unwrap();

    assert_eq!(source.model(), SensorModel::Ov3660);
    let applied = probe.applied();
    assert!(applied.contains(&SensorSetting::Brightness(1)));
    assert!(applied.contains(&SensorSetting::Saturation(-2)));
    assert!(applied.contains(&SensorSetting::HMirror(true)));
    assert!(applied.contains(&SensorSetting::VFlip(false)));
}

#[test]
fn other_sensor_keeps_default_colour() {
    let sensor = SimulatedSensor::new(SensorModel::Ov2640);
    let probe = sensor.probe();
    let _source = FrameSource::initialize(&single_buffer_config(), Box::new(sensor)).unwrap();

    let applied = probe.applied();
    assert!(!applied
        .iter()
        .any(|s| matches!(s, SensorSetting::Brightness(_) | SensorSetting::Saturation(_))));
    assert!(applied.contains(&SensorSetting::Sharpness(2)));
    assert!(applied.contains(&SensorSetting::AwbGain(true)));
}

#[test]
fn configured_delta_is_applied_exactly() {
    let mut config = single_buffer_config();
    config.tuning.brightness = -1;
    config.tuning.color_correction.brightness_delta = 2;
    config.tuning.color_correction.saturation_delta = -1;

    let sensor = SimulatedSensor::new(SensorModel::Ov3660);
    let probe = sensor.probe();
    let _source = FrameSource::initialize(&config, Box::new(sensor)).unwrap();

    let applied = probe.applied();
    assert!(applied.contains(&SensorSetting::Brightness(1)));
    assert!(applied.contains(&SensorSetting::Saturation(-1)));
}

#[test]
fn open_failure_is_fatal_and_leaves_nothing_behind() {
    let sensor = SimulatedSensor::default().fail_open(DriverError::NotDetected);
    let probe = sensor.probe();

    let err = FrameSource::initialize(&single_buffer_config(), Box::new(sensor))
        .err()
        .unwrap();
    assert!(matches!(err, InitError::SensorOpen(DriverError::NotDetected)));
    assert!(!probe.was_opened());
    assert!(!probe.was_closed());
}

#[test]
fn tuning_failure_closes_the_sensor() {
    let sensor = SimulatedSensor::default().reject_setting("sharpness");
    let probe = sensor.probe();

    let err = FrameSource::initialize(&single_buffer_config(), Box::new(sensor))
        .err()
        .unwrap();
    assert!(matches!(err, InitError::Tuning(DriverError::Rejected("sharpness"))));
    assert!(probe.was_opened());
    assert!(probe.was_closed());
}

#[test]
fn pool_larger_than_memory_is_rejected_before_opening() {
    let config = SensorConfig {
        frame_size: FrameSize::Vga,
        buffer_count: 2,
        buffer_location: BufferLocation::Dram,
        ..single_buffer_config()
    };
    let sensor = SimulatedSensor::default();
    let probe = sensor.probe();

    let err = FrameSource::initialize(&config, Box::new(sensor)).err().unwrap();
    assert!(matches!(
        err,
        InitError::OutOfMemory {
            location: BufferLocation::Dram,
            ..
        }
    ));
    assert!(!probe.was_opened());
}

#[test]
fn foreign_frame_is_rejected() {
    let config = SensorConfig {
        buffer_count: 2,
        ..single_buffer_config()
    };
    let a = FrameSource::initialize(&config, Box::new(SimulatedSensor::default())).unwrap();
    let b = FrameSource::initialize(&config, Box::new(SimulatedSensor::default())).unwrap();

    let frame = a.acquire_frame().unwrap();
    let err = b.release_frame(frame).unwrap_err();
    assert!(matches!(err, PipelineError::OwnershipViolation { .. }));
    // The frame still found its way home.
    assert_eq!(a.outstanding(), 0);
    assert_eq!(b.outstanding(), 0);
}

#[test]
fn release_order_does_not_matter() {
    let config = SensorConfig {
        buffer_count: 3,
        ..single_buffer_config()
    };
    let source = FrameSource::initialize(&config, Box::new(SimulatedSensor::default())).unwrap();

    for _ in 0..3 {
        let a = source.acquire_frame().unwrap();
        let b = source.acquire_frame().unwrap();
        let c = source.acquire_frame().unwrap();
        assert_eq!(source.outstanding(), 3);

        source.release_frame(b).unwrap();
        drop(c);
        source.release_frame(a).unwrap();
        assert_eq!(source.outstanding(), 0);
    }
    assert_eq!(source.peak_outstanding(), 3);
}

#[test]
fn frame_rejected_by_another_source_is_not_released_twice() {
    let config = SensorConfig {
        buffer_count: 1,
        capture_timeout_ms: 20,
        ..single_buffer_config()
    };
    let a = FrameSource::initialize(&config, Box::new(SimulatedSensor::default())).unwrap();
    let b = FrameSource::initialize(&config, Box::new(SimulatedSensor::default())).unwrap();

    let from_b = b.acquire_frame().unwrap();
    let from_a = a.acquire_frame().unwrap();
    assert!(a.release_frame(from_b).is_err());

    // b got its buffer back exactly once; a still counts its own frame as held.
    assert_eq!(b.outstanding(), 0);
    assert_eq!(a.outstanding(), 1);
    assert!(matches!(a.acquire_frame(), Err(PipelineError::PoolExhausted { .. })));

    a.release_frame(from_a).unwrap();
    let again = b.acquire_frame().unwrap();
    b.release_frame(again).unwrap();
    assert_eq!((a.outstanding(), b.outstanding()), (0, 0));
}

#[test]
fn shutdown_waits_for_outstanding_frames() {
    let sensor = SimulatedSensor::default();
    let probe = sensor.probe();
    let source = FrameSource::initialize(&single_buffer_config(), Box::new(sensor)).unwrap();

    let frame = source.acquire_frame().unwrap();
    assert!(matches!(source.shutdown(), Err(PipelineError::FramesOutstanding(1))));
    assert!(source.is_ready());

    source.release_frame(frame).unwrap();
    source.shutdown().unwrap();
    assert!(!source.is_ready());
    assert!(probe.was_closed());
    assert!(matches!(source.acquire_frame(), Err(PipelineError::SourceUnavailable)));
}

#[test]
fn stalled_sensor_reports_timeout_and_keeps_buffer() {
    let config = SensorConfig {
        capture_timeout_ms: 10,
        ..single_buffer_config()
    };
    let sensor = SimulatedSensor::default().stall_after(1);
    let source = FrameSource::initialize(&config, Box::new(sensor)).unwrap();

    source.acquire_frame().unwrap().release().unwrap();
    let err = source.acquire_frame().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::CaptureTimeout { waited } if waited == Duration::from_millis(10)
    ));
    assert_eq!(source.outstanding(), 0);
}
