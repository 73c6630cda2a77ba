// src/report.rs
//
// Line-delimited JSON event log. One record per line so the file tails
// cleanly and survives a mid-run stop; everything after the header is
// appended as it happens and flushed on shutdown.

use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::tripwire::Side;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Written once at startup, before any frames.
#[derive(Serialize)]
pub struct SessionRecord {
    pub event: &'static str,
    pub timestamp: String,
    pub source: String,
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    pub zones: Vec<String>,
}

impl SessionRecord {
    pub fn new(source: &str, width: i32, height: i32, fps: f64, zones: Vec<String>) -> Self {
        Self {
            event: "session_started",
            timestamp: now_rfc3339(),
            source: source.to_string(),
            width,
            height,
            fps,
            zones,
        }
    }
}

/// Written when warm-up ends and counting begins.
#[derive(Serialize)]
pub struct PhaseRecord {
    pub event: &'static str,
    pub timestamp: String,
    pub frame_index: u64,
    pub lane_segments: usize,
}

impl PhaseRecord {
    pub fn counting_started(frame_index: u64, lane_segments: usize) -> Self {
        Self {
            event: "counting_started",
            timestamp: now_rfc3339(),
            frame_index,
            lane_segments,
        }
    }
}

/// One vehicle count.
#[derive(Serialize)]
pub struct TriggerRecord {
    pub event: &'static str,
    pub timestamp: String,
    pub frame_index: u64,
    pub video_ms: f64,
    pub zone: String,
    pub side: Side,
    pub occupied_px: i32,
    pub area_px: i32,
    pub occupancy: f64,
}

impl TriggerRecord {
    /// `video_ms` is media time, derived from the source's own frame rate.
    /// Pacing overrides change playback speed, never the recorded position.
    pub fn new(
        frame_index: u64,
        source_fps: f64,
        zone: &str,
        side: Side,
        occupied_px: i32,
        area_px: i32,
    ) -> Self {
        Self {
            event: "vehicle_counted",
            timestamp: now_rfc3339(),
            frame_index,
            video_ms: frame_index as f64 / source_fps * 1000.0,
            zone: zone.to_string(),
            side,
            occupied_px,
            area_px,
            occupancy: f64::from(occupied_px) / f64::from(area_px),
        }
    }
}

/// Final totals, written once at shutdown.
#[derive(Serialize)]
pub struct SummaryRecord {
    pub event: &'static str,
    pub timestamp: String,
    pub frames: u64,
    pub left: u64,
    pub right: u64,
    pub total: u64,
    pub elapsed_secs: f64,
    pub stopped_by_user: bool,
}

impl SummaryRecord {
    pub fn new(
        frames: u64,
        left: u64,
        right: u64,
        elapsed_secs: f64,
        stopped_by_user: bool,
    ) -> Self {
        Self {
            event: "session_summary",
            timestamp: now_rfc3339(),
            frames,
            left,
            right,
            total: left + right,
            elapsed_secs,
            stopped_by_user,
        }
    }
}

pub struct CountLog {
    writer: BufWriter<File>,
}

impl CountLog {
    pub fn create(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
        }
        let file =
            File::create(path).with_context(|| format!("Failed to create event log {}", path))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_event<T: Serialize>(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
