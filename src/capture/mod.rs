pub mod convert;
pub mod frame;
pub mod pool;
pub mod sensor;
pub mod source;

pub use frame::{Frame, FrameMetadata, FrameSize, PixelFormat};
pub use pool::BufferLocation;
pub use sensor::{
    CaptureInfo, DriverSettings, PinAssignment, SensorDriver, SensorModel, SensorSetting,
    TuningProfile,
};
pub use source::FrameSource;
