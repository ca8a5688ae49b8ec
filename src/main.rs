use anyhow::{bail, Context, Result};
use clap::Parser;
use opencv::{highgui, prelude::*, videoio};
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod annotate;
mod cli;
mod detector;
mod geometry;
mod history;
mod tracker;

use annotate::annotate_frame;
use cli::Args;
use detector::{class_names, YoloDetector};
use history::TrackHistory;
use tracker::IouTracker;

const WINDOW_NAME: &str = "YOLOv8 Tracking";

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
    let args = Args::parse();
    args.validate()?;
    run(args)
}

fn run(args: Args) -> Result<()> {
    let source = args.source()?;
    let names = class_names(args.names.as_deref())?;
    let mut detector = YoloDetector::new(args.detector_config(), names.len())?;

    let mut capture = open_capture(&source)?;

    let mut display_enabled = !args.headless;
    if display_enabled {
        if let Err(err) = highgui::named_window(WINDOW_NAME, highgui::WINDOW_AUTOSIZE) {
            tracing::warn!("Failed to open display window: {}. Running headless.", err);
            display_enabled = false;
        }
    }

    let mut tracker = IouTracker::new(args.tracker_config());
    let mut history = TrackHistory::new();
    let options = args.annotate_options();

    let start_time = Instant::now();
    let mut last_summary = Instant::now();
    let mut frame_index: u64 = 0;
    let mut frame = Mat::default();

    loop {
        if !capture.read(&mut frame)? || frame.empty() {
            break;
        }
        frame_index += 1;

        let detections = detector.detect(&frame)?;
        tracing::debug!("frame={} detections={}", frame_index, detections.len());
        let tracks = tracker.update(detections);
        let (annotated, summary) = annotate_frame(&frame, &tracks, &names, &mut history, options)?;

        for track_id in &summary.printed_ids {
            tracing::info!("frame={} track id={}", frame_index, track_id);
        }

        if display_enabled {
            highgui::imshow(WINDOW_NAME, &annotated)?;
            let key = highgui::wait_key(args.wait_ms)?;
            if key & 0xFF == 27 || key & 0xFF == i32::from(b'q') {
                break;
            }
        }

        if last_summary.elapsed().as_secs() >= args.log_interval_seconds {
            log_summary(&tracker, &history, start_time, frame_index);
            last_summary = Instant::now();
        }
    }

    capture.release()?;
    if display_enabled {
        highgui::destroy_all_windows()?;
    }
    log_summary(&tracker, &history, start_time, frame_index);
    Ok(())
}

fn open_capture(source: &str) -> Result<videoio::VideoCapture> {
    let capture = videoio::VideoCapture::from_file(source, videoio::CAP_ANY)
        .with_context(|| format!("Error opening video stream or file: {}", source))?;
    if !capture.is_opened()? {
        bail!("Error opening video stream or file: {}", source);
    }
    Ok(capture)
}

fn log_summary(tracker: &IouTracker, history: &TrackHistory, start_time: Instant, frame_index: u64) {
    let elapsed = start_time.elapsed().as_secs_f64();
    let fps = if elapsed > 0.0 {
        frame_index as f64 / elapsed
    } else {
        0.0
    };
    tracing::info!(
        "frames={} fps={:.1} active={} unique={} history_tracks={} history_points={}",
        frame_index,
        fps,
        tracker.active(),
        tracker.total_unique(),
        history.len(),
        history.total_points()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_video_source_is_reported() {
        let source = std::env::temp_dir().join("yolotrack-missing-video.mp4");
        let err = open_capture(&source.to_string_lossy()).err().unwrap();
        assert!(err.to_string().contains("Error opening video stream or file"));
    }
}
