// src/pipeline.rs
//
// The per-frame state machine. Warm-up ticks scan for lane paint and keep
// re-snapshotting the motion baseline; once the paint mask clears the exit
// threshold the lane lines freeze and every later tick runs the motion mask
// and the trip-wire latches against the frozen (or rolling) baseline.

use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};
use tracing::{info, trace};

use crate::config::{BaselineMode, Config};
use crate::lane_lines::{extrapolate, ExtrapolatedLine, LaneDetector, LineSegment};
use crate::motion::{motion_bounding_boxes, MotionMaskBuilder};
use crate::tripwire::{Side, SideCounts, Tripwire};

/// Pipeline lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Looking for lane paint; nothing is counted yet.
    Warmup,
    /// Lane lines frozen; trip-wires live.
    Counting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warmup => "WARMUP",
            Self::Counting => "COUNTING",
        }
    }
}

/// One zone firing during a tick.
#[derive(Debug, Clone)]
pub struct ZoneTrigger {
    pub zone: String,
    pub side: Side,
    pub occupied_px: i32,
    pub area_px: i32,
}

/// Everything one tick produced, for the caller to log, draw and record.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub frame_index: u64,
    pub phase: Phase,
    /// True on the tick that switched from warm-up to counting.
    pub phase_changed: bool,
    pub triggers: Vec<ZoneTrigger>,
    pub lines: Vec<ExtrapolatedLine>,
    pub motion_boxes: Vec<core::Rect>,
    /// Lane paint pixels seen this tick; only present during warm-up.
    pub mask_px: Option<i32>,
}

pub struct CounterPipeline {
    phase: Phase,
    frames_seen: u64,
    segments: Vec<LineSegment>,
    baseline: Option<Mat>,
    tripwires: Vec<Tripwire>,
    counts: SideCounts,
    motion: MotionMaskBuilder,
    lanes: LaneDetector,
    warmup_exit: i32,
    min_contour_area: f64,
    baseline_mode: BaselineMode,
}

impl CounterPipeline {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            phase: Phase::Warmup,
            frames_seen: 0,
            segments: Vec::new(),
            baseline: None,
            tripwires: config.zones.iter().map(Tripwire::new).collect(),
            counts: SideCounts::default(),
            motion: MotionMaskBuilder::new(&config.motion)?,
            lanes: LaneDetector::new(&config.warmup),
            warmup_exit: config.warmup.exit_pixel_count,
            min_contour_area: config.overlay.min_contour_area,
            baseline_mode: config.motion.baseline,
        })
    }

    /// Process one BGR frame.
    pub fn tick(&mut self, frame: &Mat) -> Result<TickReport> {
        self.frames_seen += 1;

        let mut gray = Mat::default();
        imgproc::cvt_color(frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;

        let mut phase_changed = false;
        let mut triggers = Vec::new();
        let mut motion_boxes = Vec::new();
        let mut mask_px = None;

        match self.phase {
            Phase::Warmup => {
                let scan = self.lanes.scan(frame)?;
                mask_px = Some(scan.mask_px);

                // Every warm-up tick overwrites both: the last scan before
                // lock-in is the one that sticks.
                self.segments = scan.segments;
                self.baseline = Some(gray);

                if scan.mask_px > self.warmup_exit {
                    self.phase = Phase::Counting;
                    phase_changed = true;
                    info!(
                        "🛣️  Lane lines locked after {} frame(s): {} segment(s), {} mask px",
                        self.frames_seen,
                        self.segments.len(),
                        scan.mask_px
                    );
                }
            }
            Phase::Counting => {
                let baseline = self
                    .baseline
                    .as_ref()
                    .context("motion baseline missing in counting phase")?;
                let mask = self.motion.build(&gray, baseline)?;

                for wire in &mut self.tripwires {
                    let reading = wire.evaluate(&mask)?;
                    trace!(
                        "zone '{}': {}/{} px, {}",
                        wire.label,
                        reading.occupied_px,
                        reading.area_px,
                        reading.state.as_str()
                    );
                    if reading.triggered {
                        self.counts.increment(wire.side);
                        triggers.push(ZoneTrigger {
                            zone: wire.label.clone(),
                            side: wire.side,
                            occupied_px: reading.occupied_px,
                            area_px: reading.area_px,
                        });
                    }
                }

                motion_boxes = motion_bounding_boxes(&mask, self.min_contour_area)?;

                if self.baseline_mode == BaselineMode::Rolling {
                    self.baseline = Some(gray);
                }
            }
        }

        // Frozen segments extended across the full frame width. Empty until
        // lock-in, populated from the lock-in tick onward.
        let lines = if self.phase == Phase::Counting {
            let width = frame.cols();
            self.segments
                .iter()
                .map(|segment| extrapolate(segment, width))
                .collect()
        } else {
            Vec::new()
        };

        Ok(TickReport {
            frame_index: self.frames_seen,
            phase: self.phase,
            phase_changed,
            triggers,
            lines,
            motion_boxes,
            mask_px,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn counts(&self) -> SideCounts {
        self.counts
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn tripwires(&self) -> &[Tripwire] {
        &self.tripwires
    }
}
