// src/motion.rs
//
// Frame-differencing motion mask: absolute difference against a baseline
// frame, median smoothing, binary threshold, then a morphological opening
// to drop remaining speckle. The mask is what the trip-wire zones sample;
// the bounding boxes derived from it are overlay-only and never feed the
// counters.

use anyhow::Result;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};

use crate::config::MotionConfig;

pub struct MotionMaskBuilder {
    config: MotionConfig,
    kernel: Mat,
}

impl MotionMaskBuilder {
    pub fn new(config: &MotionConfig) -> Result<Self> {
        let r = config.morph_radius;
        let kernel = imgproc::get_structuring_element(
            imgproc::MORPH_RECT,
            core::Size::new(2 * r + 1, 2 * r + 1),
            core::Point::new(r, r),
        )?;
        Ok(Self {
            config: config.clone(),
            kernel,
        })
    }

    /// Binary 8-bit mask of where `current` differs from `baseline`, same
    /// dimensions as the inputs. Identical frames give an all-zero mask.
    pub fn build(&self, current: &Mat, baseline: &Mat) -> Result<Mat> {
        let mut diff = Mat::default();
        core::absdiff(current, baseline, &mut diff)?;

        let mut smoothed = Mat::default();
        imgproc::median_blur(&diff, &mut smoothed, self.config.median_window)?;

        let mut thresholded = Mat::default();
        imgproc::threshold(
            &smoothed,
            &mut thresholded,
            self.config.diff_threshold,
            255.0,
            imgproc::THRESH_BINARY,
        )?;

        // Opening: erode away what the median left, then restore the
        // surviving blobs to full size.
        let anchor = core::Point::new(-1, -1);
        let mut eroded = Mat::default();
        imgproc::erode(
            &thresholded,
            &mut eroded,
            &self.kernel,
            anchor,
            1,
            core::BORDER_CONSTANT,
            imgproc::morphology_default_border_value()?,
        )?;
        let mut opened = Mat::default();
        imgproc::dilate(
            &eroded,
            &mut opened,
            &self.kernel,
            anchor,
            1,
            core::BORDER_CONSTANT,
            imgproc::morphology_default_border_value()?,
        )?;

        Ok(opened)
    }
}

/// Bounding boxes of the mask's motion blobs, for the overlay. Contours
/// with area below `min_area` are treated as noise and skipped.
pub fn motion_bounding_boxes(mask: &Mat, min_area: f64) -> Result<Vec<core::Rect>> {
    let mut contours = core::Vector::<core::Vector<core::Point>>::new();
    imgproc::find_contours(
        mask,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
        core::Point::new(0, 0),
    )?;

    let mut boxes = Vec::new();
    for contour in contours.iter() {
        if imgproc::contour_area(&contour, false)? < min_area {
            continue;
        }
        boxes.push(imgproc::bounding_rect(&contour)?);
    }
    Ok(boxes)
}
