use anyhow::{bail, ensure, Result};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use crate::{annotate::AnnotateOptions, detector::DetectorConfig, tracker::TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "yolotrack", about = "YOLOv8 object detection and tracking")]
#[command(group(ArgGroup::new("input").required(true).args(["file", "rtsp"])))]
pub struct Args {
    #[arg(long, value_name = "PATH", conflicts_with = "rtsp")]
    pub file: Option<PathBuf>,
    #[arg(long, value_name = "URL", conflicts_with = "file")]
    pub rtsp: Option<String>,
    /// YOLOv8 checkpoint exported to ONNX
    #[arg(long, default_value = "models/yolov8n.onnx")]
    pub model: PathBuf,
    /// Class names, one per line (defaults to COCO)
    #[arg(long, value_name = "PATH")]
    pub names: Option<PathBuf>,
    #[arg(long, default_value_t = 640)]
    pub input_size: i32,
    #[arg(long, default_value_t = 0.25)]
    pub conf: f32,
    #[arg(long, default_value_t = 0.45)]
    pub nms_iou: f32,
    /// Only keep these class ids, e.g. `2,3,5,7` for vehicles
    #[arg(long, value_delimiter = ',')]
    pub classes: Vec<usize>,
    #[arg(long, default_value_t = 0.3)]
    pub track_iou: f32,
    #[arg(long, default_value_t = 30)]
    pub max_missing: u32,
    /// Matches a track needs before its id is shown
    #[arg(long, default_value_t = 1)]
    pub min_hits: u32,
    /// Draw each track's centroid trail
    #[arg(long)]
    pub trails: bool,
    #[arg(long)]
    pub headless: bool,
    /// Delay passed to the window event loop per frame
    #[arg(long, default_value_t = 100)]
    pub wait_ms: i32,
    #[arg(long, default_value_t = 5)]
    pub log_interval_seconds: u64,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("--conf", self.conf),
            ("--nms-iou", self.nms_iou),
            ("--track-iou", self.track_iou),
        ] {
            ensure!(
                (0.0..=1.0).contains(&value),
                "{} must be within [0, 1], got {}",
                name,
                value
            );
        }
        ensure!(self.input_size > 0, "--input-size must be positive");
        ensure!(self.wait_ms > 0, "--wait-ms must be positive");
        Ok(())
    }

    pub fn source(&self) -> Result<String> {
        if let Some(file) = &self.file {
            Ok(file.to_string_lossy().to_string())
        } else if let Some(rtsp) = &self.rtsp {
            Ok(rtsp.clone())
        } else {
            bail!("Provide --file or --rtsp");
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            model_path: self.model.clone(),
            input_size: self.input_size,
            conf_threshold: self.conf,
            nms_iou: self.nms_iou,
            classes: self.classes.clone(),
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            iou_threshold: self.track_iou,
            max_missing: self.max_missing,
            min_hits: self.min_hits,
        }
    }

    pub fn annotate_options(&self) -> AnnotateOptions {
        AnnotateOptions {
            trails: self.trails,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_model() {
        let args = Args::try_parse_from(["yolotrack", "--file", "traffic.mp4"]).unwrap();
        args.validate().unwrap();
        assert_eq!(args.source().unwrap(), "traffic.mp4");
        assert_eq!(args.input_size, 640);
        assert_eq!(args.wait_ms, 100);
        assert!(args.classes.is_empty());

        let tracker = args.tracker_config();
        assert_eq!(tracker.max_missing, 30);
        assert_eq!(tracker.min_hits, 1);
    }

    #[test]
    fn class_filter_is_comma_separated() {
        let args =
            Args::try_parse_from(["yolotrack", "--rtsp", "rtsp://cam/1", "--classes", "2,3,5,7"])
                .unwrap();
        assert_eq!(args.detector_config().classes, vec![2, 3, 5, 7]);
        assert_eq!(args.source().unwrap(), "rtsp://cam/1");
    }

    #[test]
    fn an_input_is_required_and_exclusive() {
        assert!(Args::try_parse_from(["yolotrack"]).is_err());
        assert!(
            Args::try_parse_from(["yolotrack", "--file", "a.mp4", "--rtsp", "rtsp://b"]).is_err()
        );
    }

    #[test]
    fn thresholds_outside_unit_range_are_rejected() {
        let args =
            Args::try_parse_from(["yolotrack", "--file", "a.mp4", "--conf", "1.5"]).unwrap();
        let err = args.validate().unwrap_err();
        assert!(err.to_string().contains("--conf"));
    }
}
