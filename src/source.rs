// src/source.rs
//
// Frame acquisition. A numeric source string opens a camera device, anything
// else is handed to the backend as a file/URL. Open failure is fatal before
// the first tick; a read failure mid-stream is the caller's signal to wind
// down with whatever was counted so far.

use anyhow::{bail, Result};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst},
};
use tracing::{info, warn};

#[derive(Debug)]
pub struct VideoSource {
    cap: VideoCapture,
    pub fps: f64,
    pub width: i32,
    pub height: i32,
}

impl VideoSource {
    pub fn open(target: &str) -> Result<Self> {
        let cap = match target.parse::<i32>() {
            Ok(index) => {
                info!("Opening camera device {}", index);
                VideoCapture::new(index, videoio::CAP_ANY)?
            }
            Err(_) => {
                info!("Opening video: {}", target);
                VideoCapture::from_file(target, videoio::CAP_ANY)?
            }
        };

        if !cap.is_opened()? {
            bail!("Failed to open video source '{}'", target);
        }

        let mut fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        if !fps.is_finite() || fps <= 0.0 {
            warn!("Source reports no frame rate, assuming 30 FPS");
            fps = 30.0;
        }
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!("Video properties: {}x{} @ {:.1} FPS", width, height, fps);

        Ok(Self {
            cap,
            fps,
            width,
            height,
        })
    }

    /// Next BGR frame, `Ok(None)` at end of stream.
    pub fn read(&mut self) -> Result<Option<Mat>> {
        use opencv::videoio::VideoCaptureTrait;

        let mut frame = Mat::default();
        if !VideoCaptureTrait::read(&mut self.cap, &mut frame)? || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    pub fn close(&mut self) -> Result<()> {
        use opencv::videoio::VideoCaptureTrait;

        self.cap.release()?;
        Ok(())
    }
}
