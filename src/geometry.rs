use opencv::core::{Point, Rect};

/// Center-based box in source-frame pixels, the layout the YOLOv8 head emits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxXywh {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl BoxXywh {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { cx, cy, w, h }
    }

    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            cx: (x1 + x2) / 2.0,
            cy: (y1 + y2) / 2.0,
            w: (x2 - x1).max(0.0),
            h: (y2 - y1).max(0.0),
        }
    }

    /// Returns `(x1, y1, x2, y2)`.
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        let hw = self.w / 2.0;
        let hh = self.h / 2.0;
        (self.cx - hw, self.cy - hh, self.cx + hw, self.cy + hh)
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn centroid(&self) -> (f32, f32) {
        (self.cx, self.cy)
    }

    pub fn iou(&self, other: &BoxXywh) -> f32 {
        let (ax1, ay1, ax2, ay2) = self.corners();
        let (bx1, by1, bx2, by2) = other.corners();

        let inter_w = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
        let inter_h = (ay2.min(by2) - ay1.max(by1)).max(0.0);
        let inter_area = inter_w * inter_h;

        let union = self.area() + other.area() - inter_area;
        if union <= 0.0 {
            0.0
        } else {
            inter_area / union
        }
    }

    /// Shift the box by `(dx, dy)` keeping its size.
    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            cx: self.cx + dx,
            cy: self.cy + dy,
            ..*self
        }
    }

    /// Pixel rectangle clamped to a `frame_w` x `frame_h` frame.
    pub fn to_rect(&self, frame_w: i32, frame_h: i32) -> Rect {
        let (x1, y1, x2, y2) = self.corners();
        let max_x = (frame_w - 1).max(0);
        let max_y = (frame_h - 1).max(0);
        let left = (x1.round() as i32).clamp(0, max_x);
        let top = (y1.round() as i32).clamp(0, max_y);
        let right = (x2.round() as i32).clamp(0, max_x);
        let bottom = (y2.round() as i32).clamp(0, max_y);
        Rect::new(left, top, (right - left).max(0), (bottom - top).max(0))
    }
}

pub fn to_point((x, y): (f32, f32)) -> Point {
    Point::new(x.round() as i32, y.round() as i32)
}
