// src/tripwire.rs
//
// Oriented trip-wire zones over the motion mask. Each zone samples its
// rectangle from the mask (rotate the mask about the zone center so the
// rectangle becomes axis-aligned, then crop the patch) and runs a
// two-threshold occupancy latch. The rising edge of the latch is the count
// event; the gap between the thresholds keeps a vehicle that straddles the
// zone for many frames from counting more than once.

use anyhow::Result;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ZoneConfig;

/// Which carriageway a zone counts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Occupancy latch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LatchState {
    /// Below the upper threshold; armed.
    Clear,
    /// Above it since the last trigger; waiting to fall below the lower
    /// threshold before re-arming.
    Occupied,
}

impl LatchState {
    /// Advance the latch one tick. Returns the next state and whether this
    /// tick is the trigger (the Clear → Occupied rising edge).
    ///
    /// Both comparisons are strict, so occupancy sitting exactly on a
    /// threshold changes nothing. Needs `down < up` (config-validated);
    /// occupancy between the two thresholds holds the current state either
    /// way.
    pub fn step(self, occupied_px: i32, area_px: i32, up: f32, down: f32) -> (LatchState, bool) {
        let occupied = f64::from(occupied_px);
        let area = f64::from(area_px);
        match self {
            LatchState::Clear if occupied > f64::from(up) * area => (LatchState::Occupied, true),
            LatchState::Occupied if occupied < f64::from(down) * area => (LatchState::Clear, false),
            state => (state, false),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "CLEAR",
            Self::Occupied => "OCCUPIED",
        }
    }
}

/// One tick's evaluation of a zone.
#[derive(Debug, Clone, Copy)]
pub struct ZoneReading {
    pub occupied_px: i32,
    pub area_px: i32,
    pub state: LatchState,
    pub triggered: bool,
}

/// A configured zone with its latch state and lifetime trigger count.
pub struct Tripwire {
    pub label: String,
    pub side: Side,
    center: core::Point2f,
    width: i32,
    height: i32,
    angle_deg: f32,
    up: f32,
    down: f32,
    state: LatchState,
    triggers: u64,
}

impl Tripwire {
    pub fn new(config: &ZoneConfig) -> Self {
        Self {
            label: config.label.clone(),
            side: config.side,
            center: core::Point2f::new(config.center[0], config.center[1]),
            width: config.size[0],
            height: config.size[1],
            angle_deg: config.angle_deg,
            up: config.up,
            down: config.down,
            state: LatchState::Clear,
            triggers: 0,
        }
    }

    pub fn area_px(&self) -> i32 {
        self.width * self.height
    }

    pub fn state(&self) -> LatchState {
        self.state
    }

    /// Lifetime trigger count of this zone.
    pub fn triggers(&self) -> u64 {
        self.triggers
    }

    /// Mask pixels under the oriented rectangle.
    fn occupancy(&self, mask: &Mat) -> Result<i32> {
        let rotation =
            imgproc::get_rotation_matrix_2d(self.center, f64::from(self.angle_deg), 1.0)?;
        let mut rotated = Mat::default();
        imgproc::warp_affine(
            mask,
            &mut rotated,
            &rotation,
            mask.size()?,
            imgproc::INTER_CUBIC,
            core::BORDER_CONSTANT,
            core::Scalar::default(),
        )?;

        let mut patch = Mat::default();
        imgproc::get_rect_sub_pix(
            &rotated,
            core::Size::new(self.width, self.height),
            self.center,
            &mut patch,
            -1,
        )?;

        Ok(core::count_non_zero(&patch)?)
    }

    /// Sample the mask and advance the latch.
    pub fn evaluate(&mut self, mask: &Mat) -> Result<ZoneReading> {
        let occupied_px = self.occupancy(mask)?;
        let area_px = self.area_px();

        let (next, triggered) = self.state.step(occupied_px, area_px, self.up, self.down);
        self.state = next;
        if triggered {
            self.triggers += 1;
            debug!(
                "Zone '{}' triggered: {}/{} px ({:.0}%)",
                self.label,
                occupied_px,
                area_px,
                100.0 * occupied_px as f64 / area_px as f64
            );
        }

        Ok(ZoneReading {
            occupied_px,
            area_px,
            state: self.state,
            triggered,
        })
    }

    /// Outline of the sampled region in frame coordinates: the preimages of
    /// the cropped patch's corners under the sampling rotation, so the drawn
    /// outline frames exactly what `evaluate` counts.
    pub fn corners(&self) -> [core::Point2f; 4] {
        let rad = f64::from(self.angle_deg).to_radians();
        let (sin, cos) = rad.sin_cos();
        let half_w = f64::from(self.width) / 2.0;
        let half_h = f64::from(self.height) / 2.0;
        let offsets = [
            (-half_w, -half_h),
            (half_w, -half_h),
            (half_w, half_h),
            (-half_w, half_h),
        ];
        offsets.map(|(dx, dy)| {
            core::Point2f::new(
                self.center.x + (dx * cos - dy * sin) as f32,
                self.center.y + (dx * sin + dy * cos) as f32,
            )
        })
    }
}

/// Per-side running totals. Counters only ever go up.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SideCounts {
    pub left: u64,
    pub right: u64,
}

impl SideCounts {
    pub fn increment(&mut self, side: Side) {
        match side {
            Side::Left => self.left += 1,
            Side::Right => self.right += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.left + self.right
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_zone(label: &str, center: [f32; 2], size: [i32; 2], angle_deg: f32) -> ZoneConfig {
        ZoneConfig {
            label: label.to_string(),
            center,
            size,
            angle_deg,
            up: 0.40,
            down: 0.39,
            side: Side::Left,
        }
    }

    fn run_profile(profile: &[f64], area: i32, up: f32, down: f32) -> Vec<usize> {
        let mut state = LatchState::Clear;
        let mut fired = Vec::new();
        for (tick, fraction) in profile.iter().enumerate() {
            let occupied = (fraction * f64::from(area)) as i32;
            let (next, triggered) = state.step(occupied, area, up, down);
            state = next;
            if triggered {
                fired.push(tick + 1);
            }
        }
        fired
    }

    // ---- Latch tests ----

    #[test]
    fn test_one_passage_counts_once_on_the_rising_edge() {
        // 80x6 zone, 40%/39% thresholds, one vehicle crossing over five
        // ticks: only the second tick (first above 40%) fires.
        let fired = run_profile(&[0.0, 0.45, 0.45, 0.2, 0.0], 80 * 6, 0.40, 0.39);
        assert_eq!(fired, vec![2]);
    }

    #[test]
    fn test_occupancy_wobbling_inside_the_gap_counts_once() {
        let fired = run_profile(&[0.45, 0.395, 0.42, 0.395, 0.41, 0.1], 480, 0.40, 0.39);
        assert_eq!(fired, vec![1]);
    }

    #[test]
    fn test_release_then_return_counts_again() {
        let fired = run_profile(&[0.45, 0.0, 0.45], 480, 0.40, 0.39);
        assert_eq!(fired, vec![1, 3]);
    }

    #[test]
    fn test_threshold_equality_is_a_no_op() {
        // Exactly at the upper threshold: 50 of 100 with up = 0.5
        let (state, fired) = LatchState::Clear.step(50, 100, 0.5, 0.25);
        assert_eq!(state, LatchState::Clear);
        assert!(!fired);

        // Exactly at the lower threshold: 25 of 100 with down = 0.25
        let (state, fired) = LatchState::Occupied.step(25, 100, 0.5, 0.25);
        assert_eq!(state, LatchState::Occupied);
        assert!(!fired);
    }

    #[test]
    fn test_occupied_zone_never_retriggers_without_release() {
        let mut state = LatchState::Occupied;
        for _ in 0..10 {
            let (next, triggered) = state.step(480, 480, 0.40, 0.39);
            assert!(!triggered);
            state = next;
        }
        assert_eq!(state, LatchState::Occupied);
    }

    // ---- Sampler tests ----

    fn mask(rows: i32, cols: i32, value: f64) -> Mat {
        Mat::new_rows_cols_with_default(rows, cols, core::CV_8UC1, core::Scalar::all(value))
            .unwrap()
    }

    #[test]
    fn test_saturated_mask_reads_full_area_and_triggers() {
        let mut wire = Tripwire::new(&make_zone("full", [60.0, 40.0], [21, 7], 0.0));
        let reading = wire.evaluate(&mask(80, 120, 255.0)).unwrap();

        assert_eq!(reading.occupied_px, reading.area_px);
        assert_eq!(reading.area_px, 21 * 7);
        assert!(reading.triggered);
        assert_eq!(wire.state(), LatchState::Occupied);
        assert_eq!(wire.triggers(), 1);
    }

    #[test]
    fn test_empty_mask_reads_zero_and_stays_clear() {
        let mut wire = Tripwire::new(&make_zone("empty", [60.0, 40.0], [21, 7], 0.0));
        let reading = wire.evaluate(&mask(80, 120, 0.0)).unwrap();

        assert_eq!(reading.occupied_px, 0);
        assert!(!reading.triggered);
        assert_eq!(wire.state(), LatchState::Clear);
    }

    #[test]
    fn test_rotated_zone_on_saturated_mask_still_reads_full_area() {
        // The zone sits well inside the mask, so the rotation never pulls
        // border pixels into the sampled patch.
        let mut wire = Tripwire::new(&make_zone("tilted", [100.0, 100.0], [80, 6], 45.0));
        let reading = wire.evaluate(&mask(200, 200, 255.0)).unwrap();

        assert_eq!(reading.occupied_px, reading.area_px);
        assert!(reading.triggered);
    }

    #[test]
    fn test_lingering_occupancy_holds_the_latch_across_evaluations() {
        let mut wire = Tripwire::new(&make_zone("hold", [60.0, 40.0], [21, 7], 0.0));
        let full = mask(80, 120, 255.0);

        assert!(wire.evaluate(&full).unwrap().triggered);
        assert!(!wire.evaluate(&full).unwrap().triggered);
        assert!(!wire.evaluate(&full).unwrap().triggered);
        assert_eq!(wire.triggers(), 1);

        // Release, then a second passage
        wire.evaluate(&mask(80, 120, 0.0)).unwrap();
        assert!(wire.evaluate(&full).unwrap().triggered);
        assert_eq!(wire.triggers(), 2);
    }

    #[test]
    fn test_corners_stay_centered_and_axis_aligned_at_zero_angle() {
        let wire = Tripwire::new(&make_zone("flat", [60.0, 40.0], [20, 10], 0.0));
        let corners = wire.corners();
        assert_eq!(corners[0], core::Point2f::new(50.0, 35.0));
        assert_eq!(corners[2], core::Point2f::new(70.0, 45.0));
    }

    // ---- Side counters ----

    #[test]
    fn test_side_totals_sum() {
        let mut counts = SideCounts::default();
        for _ in 0..3 {
            counts.increment(Side::Left);
        }
        for _ in 0..5 {
            counts.increment(Side::Right);
        }
        assert_eq!(counts.left, 3);
        assert_eq!(counts.right, 5);
        assert_eq!(counts.total(), 8);
    }
}
