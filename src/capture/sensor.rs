//! Boundary to the image sensor driver

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::frame::{FrameSize, PixelFormat};
use super::pool::BufferLocation;
use crate::error::DriverError;
use crate::SensorTuning;

/// Sensors the pipeline knows how to tune
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorModel {
    Ov2640,
    Ov3660,
    Ov5640,
    Ov7725,
    Gc0308,
    Unknown(u16),
}

impl SensorModel {
    /// Map the product id read back from the sensor
    pub fn from_pid(pid: u16) -> Self {
        match pid {
            0x26 => SensorModel::Ov2640,
            0x3660 => SensorModel::Ov3660,
            0x5640 => SensorModel::Ov5640,
            0x77 => SensorModel::Ov7725,
            0x9b => SensorModel::Gc0308,
            other => SensorModel::Unknown(other),
        }
    }

    pub fn pid(self) -> u16 {
        match self {
            SensorModel::Ov2640 => 0x26,
            SensorModel::Ov3660 => 0x3660,
            SensorModel::Ov5640 => 0x5640,
            SensorModel::Ov7725 => 0x77,
            SensorModel::Gc0308 => 0x9b,
            SensorModel::Unknown(pid) => pid,
        }
    }

    /// OV3660 defaults to oversaturated colours and needs a brightness/saturation correction
    pub fn ships_oversaturated(self) -> bool {
        matches!(self, SensorModel::Ov3660)
    }
}

/// A single register-level adjustment understood by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorSetting {
    VFlip(bool),
    HMirror(bool),
    Brightness(i8),
    Saturation(i8),
    Sharpness(i8),
    AwbGain(bool),
}

impl SensorSetting {
    pub fn name(&self) -> &'static str {
        match self {
            SensorSetting::VFlip(_) => "vflip",
            SensorSetting::HMirror(_) => "hmirror",
            SensorSetting::Brightness(_) => "brightness",
            SensorSetting::Saturation(_) => "saturation",
            SensorSetting::Sharpness(_) => "sharpness",
            SensorSetting::AwbGain(_) => "awb_gain",
        }
    }
}

/// Ordered list of settings for one sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuningProfile {
    pub model: SensorModel,
    pub settings: Vec<SensorSetting>,
}

/// Driver range for brightness, saturation and sharpness
const LEVEL_RANGE: (i8, i8) = (-2, 2);

fn clamp_level(value: i8) -> i8 {
    value.clamp(LEVEL_RANGE.0, LEVEL_RANGE.1)
}

impl TuningProfile {
    pub fn for_model(model: SensorModel, tuning: &SensorTuning) -> Self {
        let mut brightness = tuning.brightness;
        let mut saturation = tuning.saturation;
        if let Some(correction) = tuning.correction_for(model) {
            brightness = brightness.saturating_add(correction.brightness_delta);
            saturation = saturation.saturating_add(correction.saturation_delta);
        }

        let mut settings = vec![
            SensorSetting::VFlip(tuning.vflip),
            SensorSetting::HMirror(tuning.hmirror),
        ];
        // Sensors power up at level 0; only write what differs.
        if brightness != 0 {
            settings.push(SensorSetting::Brightness(clamp_level(brightness)));
        }
        if saturation != 0 {
            settings.push(SensorSetting::Saturation(clamp_level(saturation)));
        }
        settings.push(SensorSetting::Sharpness(clamp_level(tuning.sharpness)));
        settings.push(SensorSetting::AwbGain(tuning.awb_gain));

        Self { model, settings }
    }
}

/// Fixed wiring between the MCU and the camera connector. -1 means not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinAssignment {
    pub xclk: i8,
    pub pclk: i8,
    pub vsync: i8,
    pub href: i8,
    pub data: [i8; 8],
    pub sccb_sda: i8,
    pub sccb_scl: i8,
    pub pwdn: i8,
    pub reset: i8,
}

impl PinAssignment {
    /// ESP32-S3-EYE camera connector
    pub const ESP32_S3_EYE: PinAssignment = PinAssignment {
        xclk: 15,
        pclk: 13,
        vsync: 6,
        href: 7,
        data: [11, 9, 8, 10, 12, 18, 17, 16],
        sccb_sda: 4,
        sccb_scl: 5,
        pwdn: -1,
        reset: -1,
    };

    pub fn validate(&self) -> Result<(), String> {
        let required = [
            ("xclk", self.xclk),
            ("pclk", self.pclk),
            ("vsync", self.vsync),
            ("href", self.href),
        ]
        .into_iter()
        .chain(self.data.iter().map(|&pin| ("data", pin)));

        let mut seen = HashSet::new();
        for (name, pin) in required {
            if pin < 0 {
                return Err(format!("pin {name} must be connected"));
            }
            if !seen.insert(pin) {
                return Err(format!("pin {pin} assigned twice"));
            }
        }
        for pin in [self.sccb_sda, self.sccb_scl, self.pwdn, self.reset] {
            if pin >= 0 && !seen.insert(pin) {
                return Err(format!("pin {pin} assigned twice"));
            }
        }
        Ok(())
    }
}

/// Capture policy when every buffer is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabMode {
    /// Wait for an empty buffer rather than overwrite one in use
    WhenEmpty,
}

/// Everything the driver needs to bring the sensor up
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub pins: PinAssignment,
    pub xclk_freq_hz: u32,
    pub pixel_format: PixelFormat,
    pub frame_size: FrameSize,
    pub jpeg_quality: u8,
    pub buffer_count: usize,
    pub buffer_location: BufferLocation,
    pub grab_mode: GrabMode,
}

/// What the driver reports for one filled buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    pub len: usize,
    pub timestamp: Option<Duration>,
}

/// The sensor driver collaborator
pub trait SensorDriver: Send {
    /// Program the sensor and return its product id
    fn open(&mut self, settings: &DriverSettings) -> Result<u16, DriverError>;

    fn apply(&mut self, setting: SensorSetting) -> Result<(), DriverError>;

    /// Fill `buf` with the next frame, waiting at most `timeout`
    fn capture_into(&mut self, buf: &mut [u8], timeout: Duration)
        -> Result<CaptureInfo, DriverError>;

    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_pids() {
        assert_eq!(SensorModel::from_pid(0x3660), SensorModel::Ov3660);
        assert_eq!(SensorModel::from_pid(0x26), SensorModel::Ov2640);
        assert_eq!(SensorModel::from_pid(0x1234), SensorModel::Unknown(0x1234));
        assert_eq!(SensorModel::Ov5640.pid(), 0x5640);
    }

    #[test]
    fn ov3660_gets_colour_correction() {
        let profile = TuningProfile::for_model(SensorModel::Ov3660, &SensorTuning::default());
        assert_eq!(
            profile.settings,
            vec![
                SensorSetting::VFlip(false),
                SensorSetting::HMirror(true),
                SensorSetting::Brightness(1),
                SensorSetting::Saturation(-2),
                SensorSetting::Sharpness(2),
                SensorSetting::AwbGain(true),
            ]
        );
    }

    #[test]
    fn other_models_leave_colour_alone() {
        let profile = TuningProfile::for_model(SensorModel::Ov2640, &SensorTuning::default());
        assert!(!profile
            .settings
            .iter()
            .any(|s| matches!(s, SensorSetting::Brightness(_) | SensorSetting::Saturation(_))));
    }

    #[test]
    fn corrected_levels_stay_in_driver_range() {
        let tuning = SensorTuning {
            brightness: 2,
            saturation: -1,
            ..SensorTuning::default()
        };
        let profile = TuningProfile::for_model(SensorModel::Ov3660, &tuning);
        assert!(profile.settings.contains(&SensorSetting::Brightness(2)));
        assert!(profile.settings.contains(&SensorSetting::Saturation(-2)));
    }

    #[test]
    fn board_pins_are_valid() {
        PinAssignment::ESP32_S3_EYE.validate().unwrap();

        let mut pins = PinAssignment::ESP32_S3_EYE;
        pins.pclk = pins.xclk;
        assert!(pins.validate().is_err());

        let mut pins = PinAssignment::ESP32_S3_EYE;
        pins.vsync = -1;
        assert!(pins.validate().is_err());
    }
}
