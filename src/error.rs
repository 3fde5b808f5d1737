// One error type for the whole app.
// Every variant states *where* things went wrong.
use crate::types::Rect;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Window init error: {0}")]
    WindowInit(String), // Creating the window failed
    #[error("Window update error: {0}")]
    WindowUpdate(String), // Updating the window buffer failed
    #[error("Camera init error: {0}")]
    CameraInit(String), // Opening/starting the camera failed
    #[error("Camera frame error: {0}")]
    CameraFrame(String), // Grabbing/decoding a frame failed
    #[error("Frame source error: {0}")]
    FrameSource(String), // Opening an image sequence failed
    #[error("Image load error: {0}")]
    ImageLoad(String), // Decoding a still image failed
    #[error("video source produced no first frame")]
    NoFirstFrame,
    #[error("ROI selection was cancelled")]
    SelectionCancelled,
    #[error("tracker rejected the initial ROI {0}")]
    TrackerInit(Rect),
    #[error("Logging setup error: {0}")]
    Logging(String),

    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCv(String),
}
