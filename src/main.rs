// src/main.rs
//
// Entry point: parse the CLI, load and validate the config, then run the
// frame loop until the stream ends or the user stops it.

mod cancel;
mod config;
mod display;
mod lane_lines;
mod motion;
mod pipeline;
mod report;
mod source;
mod tripwire;

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use opencv::{prelude::*, videoio};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cancel::CancelToken;
use config::Config;
use display::{DisplaySink, KeyPoll};
use pipeline::{CounterPipeline, Phase};
use report::{CountLog, PhaseRecord, SessionRecord, SummaryRecord, TriggerRecord};
use source::VideoSource;

/// Trip-wire vehicle counter for road video streams.
#[derive(Parser, Debug)]
#[command(name = "roadcount", version, about)]
struct Args {
    /// Video source: a device index ("0") or a file path. Overrides the
    /// config file when given.
    source: Option<String>,

    /// Path to the YAML config file.
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Run without a preview window.
    #[arg(long)]
    headless: bool,

    /// Save the annotated video alongside the counts.
    #[arg(long)]
    save_annotated: bool,

    /// Write JSONL count events to this file.
    #[arg(long)]
    events: Option<String>,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let from_file = Path::new(&args.config).exists();
    let mut config = if from_file {
        Config::load(&args.config)?
    } else {
        Config::default()
    };

    if let Some(source) = args.source {
        config.video.source = source;
    }
    if args.headless {
        config.video.headless = true;
    }
    if args.save_annotated {
        config.video.save_annotated = true;
    }
    if let Some(events) = args.events {
        config.report.events_path = Some(events);
    }

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("roadcount={}", level))),
        )
        .init();

    info!("🚗 Road vehicle counter starting");
    if from_file {
        info!("✓ Configuration loaded from {}", args.config);
    } else {
        info!("No config file at {}; using built-in defaults", args.config);
    }

    config.validate()?;
    run(&config)
}

fn run(config: &Config) -> Result<()> {
    let cancel = CancelToken::new();

    let mut source = VideoSource::open(&config.video.source)?;
    let rate = config.video.target_fps.unwrap_or(source.fps);
    let wait_ms = ((1000.0 / rate).round() as i32).max(1);

    let mut pipeline = CounterPipeline::new(config)?;
    info!(
        "✓ Pipeline ready: {} zone(s), baseline={:?}",
        config.zones.len(),
        config.motion.baseline
    );

    let sink = if config.video.headless {
        None
    } else {
        Some(DisplaySink::open("roadcount")?)
    };

    let mut writer = if config.video.save_annotated {
        Some(create_writer(
            &config.video.output_path,
            rate,
            source.width,
            source.height,
        )?)
    } else {
        None
    };

    let mut events = match &config.report.events_path {
        Some(path) => {
            let mut log = CountLog::create(path)?;
            log.write_event(&SessionRecord::new(
                &config.video.source,
                source.width,
                source.height,
                source.fps,
                config.zones.iter().map(|zone| zone.label.clone()).collect(),
            ))?;
            Some(log)
        }
        None => None,
    };

    let started = Instant::now();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let frame = match source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("End of stream after {} frame(s)", pipeline.frames_seen());
                break;
            }
            Err(err) => {
                warn!("Frame acquisition failed: {}", err);
                break;
            }
        };

        let report = pipeline.tick(&frame)?;

        if let Some(log) = events.as_mut() {
            if report.phase_changed {
                log.write_event(&PhaseRecord::counting_started(
                    report.frame_index,
                    report.lines.len(),
                ))?;
            }
            for trigger in &report.triggers {
                log.write_event(&TriggerRecord::new(
                    report.frame_index,
                    source.fps,
                    &trigger.zone,
                    trigger.side,
                    trigger.occupied_px,
                    trigger.area_px,
                ))?;
            }
        }

        if sink.is_some() || writer.is_some() {
            let annotated =
                display::render_overlay(&frame, &report, pipeline.tripwires(), pipeline.counts())?;
            if let Some(sink) = &sink {
                sink.present(&annotated)?;
            }
            if let Some(writer) = writer.as_mut() {
                writer.write(&annotated)?;
            }
        }

        // Pacing doubles as the GUI event pump when a window is open.
        match &sink {
            Some(sink) => {
                if sink.poll(wait_ms)? == KeyPoll::Stop {
                    cancel.cancel();
                }
            }
            None => std::thread::sleep(Duration::from_millis(wait_ms as u64)),
        }

        if report.frame_index % 50 == 0 {
            let counts = pipeline.counts();
            match report.phase {
                Phase::Warmup => info!(
                    "Frame {}: {} | lane mask {} px",
                    report.frame_index,
                    report.phase.as_str(),
                    report.mask_px.unwrap_or(0)
                ),
                Phase::Counting => info!(
                    "Frame {}: {} | left {} | right {} | total {}",
                    report.frame_index,
                    report.phase.as_str(),
                    counts.left,
                    counts.right,
                    counts.total()
                ),
            }
        }
    }

    let stopped_by_user = cancel.is_cancelled();
    if stopped_by_user {
        warn!("⏹️  Stopped by user");
    }
    if pipeline.phase() == Phase::Warmup {
        warn!("Stream ended during warm-up; no lane lock, nothing was counted");
    }

    let counts = pipeline.counts();
    let elapsed = started.elapsed().as_secs_f64();
    info!("📊 Final count:");
    info!("   Left:  {}", counts.left);
    info!("   Right: {}", counts.right);
    info!("   Total: {}", counts.total());
    for wire in pipeline.tripwires() {
        info!(
            "   Zone '{}' ({}): {}",
            wire.label,
            wire.side.as_str(),
            wire.triggers()
        );
    }
    info!("   {} frame(s) in {:.1}s", pipeline.frames_seen(), elapsed);

    if let Some(log) = events.as_mut() {
        log.write_event(&SummaryRecord::new(
            pipeline.frames_seen(),
            counts.left,
            counts.right,
            elapsed,
            stopped_by_user,
        ))?;
        log.flush()?;
        if let Some(path) = &config.report.events_path {
            info!("💾 Events written to {}", path);
        }
    }

    if let Some(mut writer) = writer.take() {
        writer.release()?;
        info!("💾 Annotated video saved to {}", config.video.output_path);
    }

    source.close()?;
    Ok(())
}

fn create_writer(path: &str, fps: f64, width: i32, height: i32) -> Result<videoio::VideoWriter> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    let fourcc = videoio::VideoWriter::fourcc('m', 'p', '4', 'v')?;
    let writer = videoio::VideoWriter::new(
        path,
        fourcc,
        fps,
        opencv::core::Size::new(width, height),
        true,
    )?;
    if !writer.is_opened()? {
        bail!("Failed to open video writer for {}", path);
    }
    Ok(writer)
}
