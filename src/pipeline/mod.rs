pub mod capture_loop;
pub mod channel;
pub mod classify;
pub mod lifecycle;

pub use capture_loop::{CaptureLoop, CaptureState, LoopOptions};
pub use channel::{frame_channel, FrameReceiver, FrameSender};
pub use classify::{
    top_k, Classification, Classifier, FrameReport, ImageView, InferenceEngine, LogSink,
    ResultSink,
};
pub use lifecycle::Pipeline;
