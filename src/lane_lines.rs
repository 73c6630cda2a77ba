// src/lane_lines.rs
//
// Lane-line discovery for the warm-up phase, and the pure geometry that
// stretches the found segments across the frame for the overlay. Detection
// runs color-first: the lane paint is isolated in HSV, then edges and a
// probabilistic Hough transform pull segments out of the paint mask.

use anyhow::Result;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};

use crate::config::WarmupConfig;

/// One raw Hough segment, frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSegment {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl LineSegment {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// A segment's carrier line extended across the frame width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtrapolatedLine {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

/// Extend `segment` along its carrier line to x = 0 and x = width - 1.
///
/// A vertical segment has no finite slope to extend along x; it comes back
/// unchanged instead of being dropped, so the overlay still shows it. The
/// computed endpoints may leave the frame's y-range; rendering clips,
/// geometry does not.
pub fn extrapolate(segment: &LineSegment, frame_width: i32) -> ExtrapolatedLine {
    if segment.x1 == segment.x2 {
        return ExtrapolatedLine {
            x1: segment.x1,
            y1: segment.y1,
            x2: segment.x2,
            y2: segment.y2,
        };
    }

    let slope = f64::from(segment.y2 - segment.y1) / f64::from(segment.x2 - segment.x1);
    let intercept = f64::from(segment.y1) - slope * f64::from(segment.x1);
    let right_x = frame_width - 1;

    ExtrapolatedLine {
        x1: 0,
        y1: intercept.round() as i32,
        x2: right_x,
        y2: (slope * f64::from(right_x) + intercept).round() as i32,
    }
}

/// One warm-up scan's products.
#[derive(Debug, Clone)]
pub struct LaneScan {
    pub segments: Vec<LineSegment>,
    /// Set pixels in the HSV paint mask, the warm-up exit measure.
    pub mask_px: i32,
}

pub struct LaneDetector {
    config: WarmupConfig,
}

impl LaneDetector {
    pub fn new(config: &WarmupConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Scan one BGR frame for lane paint. Never mutates the input.
    pub fn scan(&self, frame_bgr: &Mat) -> Result<LaneScan> {
        let cfg = &self.config;

        let mut blurred = Mat::default();
        imgproc::gaussian_blur(
            frame_bgr,
            &mut blurred,
            core::Size::new(cfg.blur_kernel, cfg.blur_kernel),
            cfg.blur_sigma,
            0.0,
            core::BORDER_DEFAULT,
        )?;

        let mut hsv = Mat::default();
        imgproc::cvt_color(&blurred, &mut hsv, imgproc::COLOR_BGR2HSV, 0)?;

        let lower = core::Vector::<u8>::from(cfg.hsv_low.to_vec());
        let upper = core::Vector::<u8>::from(cfg.hsv_high.to_vec());
        let mut mask = Mat::default();
        core::in_range(&hsv, &lower, &upper, &mut mask)?;
        let mask_px = core::count_non_zero(&mask)?;

        let mut edges = Mat::default();
        imgproc::canny(
            &mask,
            &mut edges,
            cfg.canny_low,
            cfg.canny_high,
            cfg.canny_aperture,
            false,
        )?;

        let mut raw_lines = core::Vector::<core::Vec4i>::new();
        imgproc::hough_lines_p(
            &edges,
            &mut raw_lines,
            cfg.hough_rho,
            std::f64::consts::PI / 180.0,
            cfg.hough_threshold,
            cfg.hough_min_length,
            cfg.hough_max_gap,
        )?;

        let segments = raw_lines
            .iter()
            .map(|l| LineSegment::new(l[0], l[1], l[2], l[3]))
            .collect();

        Ok(LaneScan { segments, mask_px })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Rect, Scalar};

    #[test]
    fn test_horizontal_segment_keeps_its_y() {
        let segment = LineSegment::new(40, 75, 200, 75);
        let line = extrapolate(&segment, 640);
        assert_eq!(line, ExtrapolatedLine { x1: 0, y1: 75, x2: 639, y2: 75 });
    }

    #[test]
    fn test_diagonal_segment_recovers_its_carrier_line() {
        // y = x: the 45-degree line through the origin
        let segment = LineSegment::new(10, 10, 20, 20);
        let line = extrapolate(&segment, 100);
        assert_eq!(line, ExtrapolatedLine { x1: 0, y1: 0, x2: 99, y2: 99 });
    }

    #[test]
    fn test_negative_slope_may_leave_the_frame() {
        // y = -x + 10: the right endpoint dips below y = 0, which is fine;
        // rendering clips, the geometry stays exact.
        let segment = LineSegment::new(0, 10, 10, 0);
        let line = extrapolate(&segment, 21);
        assert_eq!(line, ExtrapolatedLine { x1: 0, y1: 10, x2: 20, y2: -10 });
    }

    #[test]
    fn test_extrapolation_passes_through_the_original_endpoints() {
        let segment = LineSegment::new(30, 12, 90, 42);
        let line = extrapolate(&segment, 320);
        // slope 0.5, intercept -3
        assert_eq!(line.y1, -3);
        assert_eq!(line.x2, 319);
        assert_eq!(line.y2, (0.5f64 * 319.0 - 3.0).round() as i32);

        // Re-evaluating the extrapolated line at the original endpoints must
        // land on them, up to the rounding of the stretched endpoints.
        let slope = f64::from(line.y2 - line.y1) / f64::from(line.x2 - line.x1);
        let at = |x: i32| f64::from(line.y1) + slope * f64::from(x - line.x1);
        assert!((at(segment.x1) - f64::from(segment.y1)).abs() < 0.5);
        assert!((at(segment.x2) - f64::from(segment.y2)).abs() < 0.5);
    }

    #[test]
    fn test_vertical_segment_comes_back_unchanged() {
        let segment = LineSegment::new(50, 10, 50, 200);
        let line = extrapolate(&segment, 640);
        assert_eq!(line, ExtrapolatedLine { x1: 50, y1: 10, x2: 50, y2: 200 });
    }

    /// BGR frame whose `block` region carries the given HSV color.
    fn frame_with_hsv_block(rows: i32, cols: i32, block: Rect, hsv: (f64, f64, f64)) -> Mat {
        let mut hsv_mat = Mat::new_rows_cols_with_default(
            rows,
            cols,
            core::CV_8UC3,
            Scalar::new(0.0, 0.0, 0.0, 0.0),
        )
        .unwrap();
        imgproc::rectangle(
            &mut hsv_mat,
            block,
            Scalar::new(hsv.0, hsv.1, hsv.2, 0.0),
            -1,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
        let mut bgr = Mat::default();
        imgproc::cvt_color(&hsv_mat, &mut bgr, imgproc::COLOR_HSV2BGR, 0).unwrap();
        bgr
    }

    #[test]
    fn test_dark_frame_yields_an_empty_mask() {
        let detector = LaneDetector::new(&WarmupConfig::default());
        let frame = frame_with_hsv_block(200, 400, Rect::new(0, 0, 1, 1), (0.0, 0.0, 0.0));
        let scan = detector.scan(&frame).unwrap();
        assert_eq!(scan.mask_px, 0);
        assert!(scan.segments.is_empty());
    }

    #[test]
    fn test_painted_stripe_masks_in_and_yields_segments() {
        // A long in-gamut stripe: enough mask pixels to pass the warm-up
        // exit measure, and long enough edges for the Hough stage.
        let detector = LaneDetector::new(&WarmupConfig::default());
        let frame =
            frame_with_hsv_block(200, 400, Rect::new(20, 100, 300, 8), (60.0, 130.0, 130.0));
        let scan = detector.scan(&frame).unwrap();

        assert!(
            scan.mask_px > WarmupConfig::default().exit_pixel_count,
            "stripe should clear the exit measure, got {} px",
            scan.mask_px
        );
        assert!(
            !scan.segments.is_empty(),
            "a 300 px stripe edge should register in the Hough stage"
        );
    }
}
