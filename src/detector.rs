//! YOLOv8 inference through the OpenCV DNN module.
//!
//! The stock YOLOv8 ONNX export takes a `[1, 3, S, S]` RGB blob scaled to
//! `[0, 1]` and returns `[1, 4 + num_classes, N]`: per candidate a center box
//! followed by one score per class, stored channel-major.

use anyhow::{bail, ensure, Context, Result};
use opencv::{
    core::{self, Mat, Scalar, Size},
    dnn,
    prelude::*,
};
use std::{
    cmp::Ordering,
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use crate::geometry::BoxXywh;

/// Class names of the COCO-trained checkpoints Ultralytics ships.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub input_size: i32,
    pub conf_threshold: f32,
    pub nms_iou: f32,
    /// Keep only these class ids; empty keeps everything.
    pub classes: Vec<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoxXywh,
    pub class_id: usize,
    pub confidence: f32,
}

pub struct YoloDetector {
    net: dnn::Net,
    config: DetectorConfig,
    num_classes: usize,
    out_names: core::Vector<String>,
}

impl YoloDetector {
    pub fn new(config: DetectorConfig, num_classes: usize) -> Result<Self> {
        if !config.model_path.is_file() {
            bail!("Model checkpoint missing: {}", config.model_path.display());
        }
        ensure!(num_classes > 0, "Model needs at least one class name");

        let path = config
            .model_path
            .to_str()
            .context("Model path is not valid UTF-8")?;
        let mut net = dnn::read_net_from_onnx(path)
            .with_context(|| format!("Failed to load ONNX model {}", path))?;
        net.set_preferable_backend(dnn::DNN_BACKEND_OPENCV)?;
        net.set_preferable_target(dnn::DNN_TARGET_CPU)?;
        let out_names = net.get_unconnected_out_layers_names()?;

        tracing::info!(
            "Loaded {} (input {}x{}, {} classes)",
            config.model_path.display(),
            config.input_size,
            config.input_size,
            num_classes
        );

        Ok(Self {
            net,
            config,
            num_classes,
            out_names,
        })
    }

    pub fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        let size = self.config.input_size;
        let blob = dnn::blob_from_image(
            frame,
            1.0 / 255.0,
            Size::new(size, size),
            Scalar::default(),
            true,
            false,
            core::CV_32F,
        )
        .context("Failed to build input blob")?;
        self.net.set_input(&blob, "", 1.0, Scalar::default())?;

        let mut outputs = core::Vector::<Mat>::new();
        self.net
            .forward(&mut outputs, &self.out_names)
            .context("Model forward pass failed")?;
        let output = outputs.get(0).context("Model produced no output")?;
        let candidates = output_candidates(&output.mat_size(), self.num_classes)?;
        let values = output.data_typed::<f32>()?;

        let scale_x = frame.cols() as f32 / size as f32;
        let scale_y = frame.rows() as f32 / size as f32;
        let mut detections = decode_output(
            values,
            self.num_classes,
            candidates,
            scale_x,
            scale_y,
            self.config.conf_threshold,
        )?;
        if !self.config.classes.is_empty() {
            let keep: HashSet<usize> = self.config.classes.iter().copied().collect();
            detections.retain(|det| keep.contains(&det.class_id));
        }
        Ok(non_max_suppression(detections, self.config.nms_iou))
    }
}

/// Number of candidates in a `[1, 4 + num_classes, N]` output, or an error
/// naming both class counts when the model disagrees with the class names.
pub fn output_candidates(dims: &[i32], num_classes: usize) -> Result<usize> {
    let channels = 4 + num_classes;
    match dims {
        [1, c, n] if *c as usize == channels && *n >= 0 => Ok(*n as usize),
        [1, c, _] if *c >= 4 => bail!(
            "Model outputs {} classes but {} class names were given (output shape {:?})",
            c - 4,
            num_classes,
            dims
        ),
        _ => bail!("Unexpected output shape {:?}, expected [1, {}, N]", dims, channels),
    }
}

/// Decode a raw YOLOv8 head into detections in source-frame pixels.
pub fn decode_output(
    values: &[f32],
    num_classes: usize,
    candidates: usize,
    scale_x: f32,
    scale_y: f32,
    conf_threshold: f32,
) -> Result<Vec<Detection>> {
    let channels = 4 + num_classes;
    ensure!(
        values.len() == channels * candidates,
        "Output holds {} values, expected {} x {}",
        values.len(),
        channels,
        candidates
    );
    let at = |channel: usize, i: usize| values[channel * candidates + i];

    let mut detections = Vec::new();
    for i in 0..candidates {
        let mut best_class = 0;
        let mut best_score = f32::MIN;
        for class in 0..num_classes {
            let score = at(4 + class, i);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if best_score < conf_threshold {
            continue;
        }
        let bbox = BoxXywh::new(
            at(0, i) * scale_x,
            at(1, i) * scale_y,
            at(2, i) * scale_x,
            at(3, i) * scale_y,
        );
        detections.push(Detection {
            bbox,
            class_id: best_class,
            confidence: best_score,
        });
    }
    Ok(detections)
}

/// Greedy confidence-ordered suppression, applied within each class only.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep
            .iter()
            .filter(|kept| kept.class_id == det.class_id)
            .all(|kept| kept.bbox.iou(&det.bbox) <= iou_threshold)
        {
            keep.push(det);
        }
    }
    keep
}

/// One class name per non-empty line, or the COCO names when no file is given.
pub fn class_names(path: Option<&Path>) -> Result<Vec<String>> {
    let Some(path) = path else {
        return Ok(COCO_CLASSES.iter().map(|name| name.to_string()).collect());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read class names from {}", path.display()))?;
    let names: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    ensure!(!names.is_empty(), "No class names in {}", path.display());
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lay out candidates channel-major the way the model does.
    fn head(candidates: &[[f32; 6]]) -> Vec<f32> {
        let mut values = Vec::new();
        for channel in 0..6 {
            values.extend(candidates.iter().map(|c| c[channel]));
        }
        values
    }

    fn det(cx: f32, class_id: usize, confidence: f32) -> Detection {
        Detection {
            bbox: BoxXywh::new(cx, 50.0, 20.0, 20.0),
            class_id,
            confidence,
        }
    }

    #[test]
    fn decode_picks_best_class_and_scales() {
        let values = head(&[
            [320.0, 320.0, 64.0, 32.0, 0.1, 0.9],
            [100.0, 100.0, 10.0, 10.0, 0.05, 0.1],
        ]);
        let dets = decode_output(&values, 2, 2, 2.0, 0.5, 0.25).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(dets[0].bbox, BoxXywh::new(640.0, 160.0, 128.0, 16.0));
    }

    #[test]
    fn decode_rejects_mismatched_layout() {
        let values = vec![0.0; 13];
        assert!(decode_output(&values, 2, 2, 1.0, 1.0, 0.25).is_err());
    }

    #[test]
    fn output_shape_must_match_class_names() {
        assert_eq!(output_candidates(&[1, 84, 8400], 80).unwrap(), 8400);

        // A 2-class checkpoint run with the COCO names: 6 x 8400 is also 84 x 600
        let err = output_candidates(&[1, 6, 8400], 80).unwrap_err().to_string();
        assert!(err.contains("2 classes"));
        assert!(err.contains("80 class names"));

        assert!(output_candidates(&[6, 8400], 2).is_err());
        assert!(output_candidates(&[1, 3, 8400], 80).is_err());
    }

    #[test]
    fn decode_finds_the_box_of_a_small_custom_head() {
        let mut values = vec![0.0; 6 * 8400];
        let column = 4321;
        for (channel, value) in [100.0, 100.0, 30.0, 20.0, 0.0, 0.95].into_iter().enumerate() {
            values[channel * 8400 + column] = value;
        }
        let candidates = output_candidates(&[1, 6, 8400], 2).unwrap();
        let dets = decode_output(&values, 2, candidates, 1.0, 1.0, 0.25).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
        assert_eq!(dets[0].bbox, BoxXywh::new(100.0, 100.0, 30.0, 20.0));
    }

    #[test]
    fn decode_empty_output_yields_nothing() {
        assert!(decode_output(&[], 80, 0, 1.0, 1.0, 0.25).unwrap().is_empty());
    }

    #[test]
    fn nms_suppresses_overlaps_within_class() {
        let dets = vec![det(50.0, 0, 0.6), det(52.0, 0, 0.9), det(200.0, 0, 0.5)];
        let kept = non_max_suppression(dets, 0.45);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(kept[1].bbox.cx, 200.0);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_different_classes() {
        let dets = vec![det(50.0, 0, 0.9), det(50.0, 2, 0.8)];
        assert_eq!(non_max_suppression(dets, 0.45).len(), 2);
    }

    #[test]
    fn default_class_names_are_coco() {
        let names = class_names(None).unwrap();
        assert_eq!(names.len(), 80);
        assert_eq!(names[2], "car");
        assert_eq!(names[7], "truck");
    }

    #[test]
    fn class_names_from_file_skip_blank_lines() {
        let path = std::env::temp_dir().join(format!("yolotrack-names-{}.txt", std::process::id()));
        fs::write(&path, "car\n\n  truck \nbus\n").unwrap();
        let names = class_names(Some(&path)).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(names, vec!["car", "truck", "bus"]);
    }

    #[test]
    fn missing_model_is_reported() {
        let config = DetectorConfig {
            model_path: PathBuf::from("does/not/exist.onnx"),
            input_size: 640,
            conf_threshold: 0.25,
            nms_iou: 0.45,
            classes: Vec::new(),
        };
        let err = YoloDetector::new(config, 80).err().unwrap();
        assert!(err.to_string().contains("Model checkpoint missing"));
    }
}
