use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use crate::{detector::Detection, geometry::BoxXywh};

#[derive(Clone, Copy, Debug)]
pub struct TrackerConfig {
    /// Minimum IoU between a predicted track box and a detection to match.
    pub iou_threshold: f32,
    /// Frames a track may go unmatched before it is dropped.
    pub max_missing: u32,
    /// Matches needed before a track's id is reported.
    pub min_hits: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            max_missing: 30,
            min_hits: 1,
        }
    }
}

/// A detection after association. `track_id` stays `None` until the
/// track behind it has been confirmed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedBox {
    pub bbox: BoxXywh,
    pub class_id: usize,
    pub confidence: f32,
    pub track_id: Option<u32>,
}

struct Track {
    class_id: usize,
    bbox: BoxXywh,
    velocity: (f32, f32),
    missing: u32,
    hits: u32,
}

impl Track {
    /// Constant-velocity guess, extrapolated across missed frames.
    fn predicted(&self) -> BoxXywh {
        let steps = (self.missing + 1) as f32;
        self.bbox
            .translated(self.velocity.0 * steps, self.velocity.1 * steps)
    }
}

/// Multi-object tracker that keeps ids alive across frames by greedy IoU
/// matching of predicted track boxes against fresh detections.
pub struct IouTracker {
    tracks: HashMap<u32, Track>,
    next_id: u32,
    config: TrackerConfig,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            tracks: HashMap::new(),
            next_id: 1,
            config,
        }
    }

    pub fn total_unique(&self) -> usize {
        self.next_id.saturating_sub(1) as usize
    }

    pub fn active(&self) -> usize {
        self.tracks.len()
    }

    pub fn update(&mut self, detections: Vec<Detection>) -> Vec<TrackedBox> {
        // Phase 1: build IoU pairs between predictions and same-class detections
        let mut pairs: Vec<(f32, u32, usize)> = Vec::new();
        for (track_id, track) in &self.tracks {
            let predicted = track.predicted();
            for (det_idx, det) in detections.iter().enumerate() {
                if det.class_id != track.class_id {
                    continue;
                }
                let iou = predicted.iou(&det.bbox);
                if iou > 0.0 {
                    pairs.push((iou, *track_id, det_idx));
                }
            }
        }
        // Ties broken by id so the assignment does not depend on map order
        pairs.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        // Phase 2: greedy assignment
        let mut matched_tracks: HashSet<u32> = HashSet::new();
        let mut assigned: Vec<Option<u32>> = vec![None; detections.len()];
        for (iou, track_id, det_idx) in pairs {
            if iou < self.config.iou_threshold {
                break;
            }
            if matched_tracks.contains(&track_id) || assigned[det_idx].is_some() {
                continue;
            }
            if let Some(track) = self.tracks.get_mut(&track_id) {
                let bbox = detections[det_idx].bbox;
                let steps = (track.missing + 1) as f32;
                track.velocity = (
                    (bbox.cx - track.bbox.cx) / steps,
                    (bbox.cy - track.bbox.cy) / steps,
                );
                track.bbox = bbox;
                track.missing = 0;
                track.hits = track.hits.saturating_add(1);
            }
            matched_tracks.insert(track_id);
            assigned[det_idx] = Some(track_id);
        }

        // Phase 3: age unmatched tracks and drop the stale ones
        let max_missing = self.config.max_missing;
        for (track_id, track) in self.tracks.iter_mut() {
            if !matched_tracks.contains(track_id) {
                track.missing = track.missing.saturating_add(1);
            }
        }
        self.tracks.retain(|_, track| track.missing <= max_missing);

        // Phase 4: new tracks for unmatched detections
        for (det_idx, det) in detections.iter().enumerate() {
            if assigned[det_idx].is_some() {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.insert(
                id,
                Track {
                    class_id: det.class_id,
                    bbox: det.bbox,
                    velocity: (0.0, 0.0),
                    missing: 0,
                    hits: 1,
                },
            );
            assigned[det_idx] = Some(id);
        }

        detections
            .iter()
            .zip(assigned)
            .map(|(det, track_id)| {
                let confirmed = track_id.filter(|id| {
                    self.tracks
                        .get(id)
                        .is_some_and(|track| track.hits >= self.config.min_hits)
                });
                TrackedBox {
                    bbox: det.bbox,
                    class_id: det.class_id,
                    confidence: det.confidence,
                    track_id: confirmed,
                }
            })
            .collect()
    }
}
