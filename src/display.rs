// src/display.rs
//
// On-screen output, split in two: `render_overlay` draws onto a clone of the
// frame and returns it (usable headless, for the annotated-video writer and
// in tests), while `DisplaySink` owns the window and key polling.

use anyhow::Result;
use opencv::{
    core::{self, Mat},
    highgui, imgproc,
    prelude::*,
};

use crate::pipeline::TickReport;
use crate::tripwire::{LatchState, SideCounts, Tripwire};

pub const ESC_KEY: i32 = 27;

/// Draw lane lines, motion boxes, zone outlines and the running tally onto a
/// copy of `frame`. The input frame is left untouched.
pub fn render_overlay(
    frame: &Mat,
    report: &TickReport,
    tripwires: &[Tripwire],
    counts: SideCounts,
) -> Result<Mat> {
    let blue = core::Scalar::new(255.0, 0.0, 0.0, 0.0);
    let green = core::Scalar::new(0.0, 255.0, 0.0, 0.0);
    let red = core::Scalar::new(0.0, 0.0, 255.0, 0.0);

    let mut canvas = frame.try_clone()?;

    for line in &report.lines {
        imgproc::line(
            &mut canvas,
            core::Point::new(line.x1, line.y1),
            core::Point::new(line.x2, line.y2),
            blue,
            3,
            imgproc::LINE_AA,
            0,
        )?;
    }

    for rect in &report.motion_boxes {
        imgproc::rectangle(&mut canvas, *rect, red, 2, imgproc::LINE_8, 0)?;
    }

    for wire in tripwires {
        // Armed zones outline green; a latched (occupied) zone flips red
        // until it releases.
        let outline = match wire.state() {
            LatchState::Clear => green,
            LatchState::Occupied => red,
        };
        let corners = wire.corners();
        for i in 0..4 {
            let a = corners[i];
            let b = corners[(i + 1) % 4];
            imgproc::line(
                &mut canvas,
                core::Point::new(a.x.round() as i32, a.y.round() as i32),
                core::Point::new(b.x.round() as i32, b.y.round() as i32),
                outline,
                2,
                imgproc::LINE_AA,
                0,
            )?;
        }
    }

    let tally = format!("Cars left: {}  |  Cars right: {}", counts.left, counts.right);
    imgproc::put_text(
        &mut canvas,
        &tally,
        core::Point::new(10, 20),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.75,
        red,
        2,
        imgproc::LINE_AA,
        false,
    )?;

    Ok(canvas)
}

/// What the key poll asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPoll {
    None,
    Stop,
}

/// A named preview window.
pub struct DisplaySink {
    window: String,
}

impl DisplaySink {
    pub fn open(window: &str) -> Result<Self> {
        highgui::named_window(window, highgui::WINDOW_AUTOSIZE)?;
        Ok(Self {
            window: window.to_string(),
        })
    }

    pub fn present(&self, frame: &Mat) -> Result<()> {
        highgui::imshow(&self.window, frame)?;
        Ok(())
    }

    /// Pump the GUI event loop for at most `wait_ms` and report whether the
    /// user pressed ESC. Masking to the low byte keeps the comparison stable
    /// across platforms that return modifier bits in the high bytes.
    pub fn poll(&self, wait_ms: i32) -> Result<KeyPoll> {
        let key = highgui::wait_key(wait_ms.max(1))?;
        if key >= 0 && key & 0xFF == ESC_KEY {
            Ok(KeyPoll::Stop)
        } else {
            Ok(KeyPoll::None)
        }
    }
}

impl Drop for DisplaySink {
    fn drop(&mut self) {
        let _ = highgui::destroy_all_windows();
    }
}
