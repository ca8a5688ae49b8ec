use anyhow::Result;
use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
    prelude::*,
};
use std::collections::HashSet;

use crate::{
    geometry::to_point,
    history::TrackHistory,
    tracker::TrackedBox,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct AnnotateOptions {
    /// Draw each track's centroid history as a polyline.
    pub trails: bool,
}

/// What the annotation step did with one frame.
#[derive(Debug, Default, PartialEq)]
pub struct FrameSummary {
    /// Track ids seen this frame, each once, in detection order.
    pub printed_ids: Vec<u32>,
    /// Whether boxes were drawn; otherwise the raw frame was passed through.
    pub plotted: bool,
}

/// Append one centroid per tracked box to the history and collect the ids
/// seen this frame. Boxes without an id are not recorded.
pub fn process_tracks(tracks: &[TrackedBox], history: &mut TrackHistory) -> FrameSummary {
    let mut summary = FrameSummary::default();
    let mut printed: HashSet<u32> = HashSet::new();
    for tracked in tracks {
        let Some(track_id) = tracked.track_id else {
            continue;
        };
        history.record(track_id, tracked.bbox.centroid());
        if printed.insert(track_id) {
            summary.printed_ids.push(track_id);
        }
    }
    summary.plotted = !summary.printed_ids.is_empty();
    summary
}

/// Annotated copy of `frame`, or a plain copy when nothing carries an id.
pub fn annotate_frame(
    frame: &Mat,
    tracks: &[TrackedBox],
    names: &[String],
    history: &mut TrackHistory,
    options: AnnotateOptions,
) -> Result<(Mat, FrameSummary)> {
    let summary = process_tracks(tracks, history);
    let mut annotated = frame.try_clone()?;
    if !summary.plotted {
        return Ok((annotated, summary));
    }

    let (width, height) = (annotated.cols(), annotated.rows());
    for tracked in tracks {
        let color = class_color(tracked.class_id);
        let rect = tracked.bbox.to_rect(width, height);
        imgproc::rectangle(&mut annotated, rect, color, 2, imgproc::LINE_8, 0)?;
        let label = box_label(tracked, names);
        draw_label(&mut annotated, &label, rect.x, rect.y, color)?;
    }

    if options.trails {
        for track_id in &summary.printed_ids {
            draw_trail(&mut annotated, history.trail(*track_id))?;
        }
    }
    Ok((annotated, summary))
}

pub fn box_label(tracked: &TrackedBox, names: &[String]) -> String {
    let class = names
        .get(tracked.class_id)
        .cloned()
        .unwrap_or_else(|| format!("class{}", tracked.class_id));
    match tracked.track_id {
        Some(id) => format!("id:{} {} {:.2}", id, class, tracked.confidence),
        None => format!("{} {:.2}", class, tracked.confidence),
    }
}

/// Fixed per-class color so the same class always draws the same way.
pub fn class_color(class_id: usize) -> Scalar {
    const PALETTE: [(f64, f64, f64); 8] = [
        (56.0, 56.0, 255.0),
        (151.0, 157.0, 255.0),
        (31.0, 112.0, 255.0),
        (29.0, 178.0, 255.0),
        (49.0, 210.0, 207.0),
        (10.0, 249.0, 72.0),
        (23.0, 204.0, 146.0),
        (134.0, 219.0, 61.0),
    ];
    let (b, g, r) = PALETTE[class_id % PALETTE.len()];
    Scalar::new(b, g, r, 0.0)
}

fn draw_label(frame: &mut Mat, text: &str, x: i32, y: i32, color: Scalar) -> Result<()> {
    let mut baseline = 0;
    let size = imgproc::get_text_size(text, imgproc::FONT_HERSHEY_SIMPLEX, 0.5, 1, &mut baseline)?;
    let top = (y - size.height - baseline).max(0);
    let background = core::Rect::new(x, top, size.width, size.height + baseline);
    imgproc::rectangle(frame, background, color, imgproc::FILLED, imgproc::LINE_8, 0)?;
    imgproc::put_text(
        frame,
        text,
        core::Point::new(x, top + size.height),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        1,
        imgproc::LINE_AA,
        false,
    )?;
    Ok(())
}

fn draw_trail(frame: &mut Mat, trail: &[(f32, f32)]) -> Result<()> {
    let color = Scalar::new(230.0, 230.0, 230.0, 0.0);
    for segment in trail.windows(2) {
        imgproc::line(
            frame,
            to_point(segment[0]),
            to_point(segment[1]),
            color,
            2,
            imgproc::LINE_8,
            0,
        )?;
    }
    Ok(())
}
