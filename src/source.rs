// Where frames come from: a live camera (camera.rs), a folder of images or,
// with the `opencv` feature, a video file.

use crate::error::Error;
use crate::types::FrameBuffer;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// A stream of frames. `Ok(None)` means the stream has ended.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>, Error>;
}

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Plays a directory of still images in file-name order, or a single image.
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequence {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let paths = if path.is_dir() {
            let entries = std::fs::read_dir(path)
                .map_err(|e| Error::FrameSource(format!("Read {}: {e}", path.display())))?;
            let mut paths = Vec::new();
            for entry in entries {
                let entry = entry
                    .map_err(|e| Error::FrameSource(format!("Read {}: {e}", path.display())))?;
                let p = entry.path();
                if p.is_file() && has_image_extension(&p) {
                    paths.push(p);
                }
            }
            paths.sort();
            paths
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(Error::FrameSource(format!("{} does not exist", path.display())));
        };

        if paths.is_empty() {
            return Err(Error::FrameSource(format!(
                "{} contains no images ({})",
                path.display(),
                IMAGE_EXTENSIONS.join(", ")
            )));
        }
        info!("playing {} image(s) from {}", paths.len(), path.display());
        Ok(Self { paths, cursor: 0 })
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>, Error> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        debug!("frame {} <- {}", self.cursor, path.display());
        load_image(path).map(Some)
    }
}

/// Decodes a video file through OpenCV's VideoCapture.
#[cfg(feature = "opencv")]
pub struct VideoFile {
    cap: opencv::videoio::VideoCapture,
    frame: opencv::core::Mat,
}

#[cfg(feature = "opencv")]
impl VideoFile {
    pub fn open(path: &Path) -> Result<Self, Error> {
        use opencv::prelude::*;
        use opencv::videoio::{CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, VideoCapture};

        let name = path
            .to_str()
            .ok_or_else(|| Error::FrameSource(format!("{} is not valid UTF-8", path.display())))?;
        let cap = VideoCapture::from_file(name, CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(Error::FrameSource(format!("Could not open video {}", path.display())));
        }
        info!(
            "playing {} ({} frames at {:.1} fps)",
            path.display(),
            cap.get(CAP_PROP_FRAME_COUNT)?,
            cap.get(CAP_PROP_FPS)?
        );
        Ok(Self { cap, frame: opencv::core::Mat::default() })
    }
}

#[cfg(feature = "opencv")]
impl FrameSource for VideoFile {
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>, Error> {
        use opencv::prelude::*;

        if !self.cap.read(&mut self.frame)? || self.frame.empty() {
            return Ok(None);
        }
        crate::cv::from_mat(&self.frame).map(Some)
    }
}

/// Decode one image file into a FrameBuffer.
pub fn load_image(path: &Path) -> Result<FrameBuffer, Error> {
    let rgb = image::open(path)
        .map_err(|e| Error::ImageLoad(format!("{}: {e}", path.display())))?
        .to_rgb8();
    let (w, h) = rgb.dimensions();
    Ok(FrameBuffer::from_rgb_bytes(w as usize, h as usize, rgb.as_raw()))
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
