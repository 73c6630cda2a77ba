// src/config.rs
//
// Layered configuration: YAML file → struct tree, with CLI overrides applied
// in main. Every section has a Default carrying the reference deployment's
// tuning, so a missing file or a partial one still runs. validate() rejects
// degenerate setups before the capture device is opened.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::tripwire::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub video: VideoConfig,
    pub motion: MotionConfig,
    pub warmup: WarmupConfig,
    pub overlay: OverlayConfig,
    pub zones: Vec<ZoneConfig>,
    pub report: ReportConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            video: VideoConfig::default(),
            motion: MotionConfig::default(),
            warmup: WarmupConfig::default(),
            overlay: OverlayConfig::default(),
            zones: default_zones(),
            report: ReportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Camera index ("0", "1", ...) or media file/URL.
    pub source: String,
    /// Playback pacing override. When unset, the source's rate hint is used,
    /// falling back to 30 when the backend reports none.
    pub target_fps: Option<f64>,
    /// No display window; pacing via sleep instead of waitKey.
    pub headless: bool,
    /// Write the annotated video to `output_path`.
    pub save_annotated: bool,
    pub output_path: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            target_fps: None,
            headless: false,
            save_annotated: false,
            output_path: "output/annotated.mp4".to_string(),
        }
    }
}

/// Which frame the motion diff runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaselineMode {
    /// Diff against the warm-up exit frame for the whole run. Behaves like
    /// background subtraction; a stopped vehicle stays in the mask.
    Fixed,
    /// Re-snapshot the baseline every tick (frame-to-frame differencing).
    /// Tolerates background drift; a stopped vehicle fades from the mask.
    Rolling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Minimum grayscale difference that counts as motion (0-255).
    pub diff_threshold: f64,
    /// Median filter aperture applied to the raw diff. Odd, >= 3.
    pub median_window: i32,
    /// Radius of the rectangular opening element; the kernel is
    /// (2r+1) x (2r+1).
    pub morph_radius: i32,
    pub baseline: BaselineMode,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            diff_threshold: 25.0,
            median_window: 11,
            morph_radius: 2,
            baseline: BaselineMode::Fixed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    /// Gaussian kernel side applied before the color scan. Odd.
    pub blur_kernel: i32,
    pub blur_sigma: f64,
    /// HSV lower bound for the lane-paint mask (H 0-179, S/V 0-255).
    pub hsv_low: [u8; 3],
    pub hsv_high: [u8; 3],
    pub canny_low: f64,
    pub canny_high: f64,
    pub canny_aperture: i32,
    pub hough_rho: f64,
    pub hough_threshold: i32,
    pub hough_min_length: f64,
    pub hough_max_gap: f64,
    /// Set pixels the color mask must exceed before the line set is frozen
    /// and counting starts.
    pub exit_pixel_count: i32,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            blur_kernel: 3,
            blur_sigma: 7.0,
            hsv_low: [25, 25, 60],
            hsv_high: [110, 240, 200],
            canny_low: 180.0,
            canny_high: 200.0,
            canny_aperture: 3,
            hough_rho: 1.5,
            hough_threshold: 138,
            hough_min_length: 100.0,
            hough_max_gap: 100.0,
            exit_pixel_count: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Motion contours below this area are noise and get no bounding box.
    pub min_contour_area: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            min_contour_area: 10.0,
        }
    }
}

/// One trip-wire zone. `up`/`down` are occupancy fractions of the zone
/// area; a zone fires when occupancy rises above `up` and re-arms when it
/// falls below `down`. `down` must stay below `up`; the gap is what keeps
/// a straddling vehicle from double-counting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub label: String,
    /// Zone center in frame coordinates.
    pub center: [f32; 2],
    /// Width and height of the sampled rectangle, in pixels.
    pub size: [i32; 2],
    /// Orientation of the rectangle, degrees.
    pub angle_deg: f32,
    pub up: f32,
    pub down: f32,
    pub side: Side,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// JSONL event stream destination. Off when unset.
    pub events_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// The reference deployment: two zones per carriageway, 40%/39% thresholds.
fn default_zones() -> Vec<ZoneConfig> {
    vec![
        ZoneConfig {
            label: "left-near".to_string(),
            center: [90.0, 90.0],
            size: [80, 6],
            angle_deg: 45.0,
            up: 0.40,
            down: 0.39,
            side: Side::Left,
        },
        ZoneConfig {
            label: "left-far".to_string(),
            center: [150.0, 150.0],
            size: [80, 6],
            angle_deg: 45.0,
            up: 0.40,
            down: 0.39,
            side: Side::Left,
        },
        ZoneConfig {
            label: "right-far".to_string(),
            center: [600.0, 150.0],
            size: [100, 6],
            angle_deg: -25.0,
            up: 0.40,
            down: 0.39,
            side: Side::Right,
        },
        ZoneConfig {
            label: "right-near".to_string(),
            center: [720.0, 100.0],
            size: [80, 6],
            angle_deg: -25.0,
            up: 0.40,
            down: 0.39,
            side: Side::Right,
        },
    ]
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path))?;
        Ok(config)
    }

    /// Reject configurations that would misbehave at runtime. Runs before
    /// the capture device is opened.
    pub fn validate(&self) -> Result<()> {
        if self.motion.diff_threshold < 0.0 || self.motion.diff_threshold > 255.0 {
            bail!(
                "motion.diff_threshold must be within 0-255, got {}",
                self.motion.diff_threshold
            );
        }
        if self.motion.median_window < 3 || self.motion.median_window % 2 == 0 {
            bail!(
                "motion.median_window must be odd and >= 3, got {}",
                self.motion.median_window
            );
        }
        if self.motion.morph_radius < 0 {
            bail!(
                "motion.morph_radius must not be negative, got {}",
                self.motion.morph_radius
            );
        }
        if self.warmup.blur_kernel < 1 || self.warmup.blur_kernel % 2 == 0 {
            bail!(
                "warmup.blur_kernel must be odd and >= 1, got {}",
                self.warmup.blur_kernel
            );
        }
        for channel in 0..3 {
            if self.warmup.hsv_low[channel] > self.warmup.hsv_high[channel] {
                bail!(
                    "warmup.hsv_low[{}] ({}) exceeds hsv_high[{}] ({})",
                    channel,
                    self.warmup.hsv_low[channel],
                    channel,
                    self.warmup.hsv_high[channel]
                );
            }
        }
        if let Some(fps) = self.video.target_fps {
            if fps <= 0.0 {
                bail!("video.target_fps must be positive, got {}", fps);
            }
        }
        for zone in &self.zones {
            if zone.size[0] <= 0 || zone.size[1] <= 0 {
                bail!(
                    "zone '{}' has a degenerate size {}x{}",
                    zone.label,
                    zone.size[0],
                    zone.size[1]
                );
            }
            if !(0.0..=1.0).contains(&zone.up) || !(0.0..=1.0).contains(&zone.down) {
                bail!(
                    "zone '{}' thresholds must be within 0-1 (up={}, down={})",
                    zone.label,
                    zone.up,
                    zone.down
                );
            }
            if zone.down >= zone.up {
                bail!(
                    "zone '{}' needs down < up for hysteresis (up={}, down={})",
                    zone.label,
                    zone.up,
                    zone.down
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_carry_reference_tuning() {
        let config = Config::default();
        assert_eq!(config.motion.diff_threshold, 25.0);
        assert_eq!(config.motion.median_window, 11);
        assert_eq!(config.motion.morph_radius, 2);
        assert_eq!(config.motion.baseline, BaselineMode::Fixed);
        assert_eq!(config.warmup.hsv_low, [25, 25, 60]);
        assert_eq!(config.warmup.hsv_high, [110, 240, 200]);
        assert_eq!(config.warmup.exit_pixel_count, 100);
        assert_eq!(config.overlay.min_contour_area, 10.0);
        assert_eq!(config.zones.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_from_defaults() {
        let config: Config = serde_yaml::from_str(
            "motion:\n  diff_threshold: 40\n  baseline: rolling\n",
        )
        .unwrap();
        assert_eq!(config.motion.diff_threshold, 40.0);
        assert_eq!(config.motion.baseline, BaselineMode::Rolling);
        // Untouched sections keep their defaults
        assert_eq!(config.motion.median_window, 11);
        assert_eq!(config.warmup.hough_threshold, 138);
        assert_eq!(config.zones.len(), 4);
    }

    #[test]
    fn test_rejects_inverted_hysteresis() {
        let mut config = Config::default();
        config.zones[0].down = 0.5;
        config.zones[0].up = 0.4;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("down < up"), "unexpected error: {}", err);
    }

    #[test]
    fn test_rejects_degenerate_zone_size() {
        let mut config = Config::default();
        config.zones[1].size = [80, 0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_even_median_window() {
        let mut config = Config::default();
        config.motion.median_window = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_crossed_hsv_bounds() {
        let mut config = Config::default();
        config.warmup.hsv_low = [120, 25, 60];
        assert!(config.validate().is_err());
    }
}
