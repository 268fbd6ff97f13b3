//! Bounding-box normalization.
//!
//! Layout parsers report span rectangles in absolute page units, and not all of
//! them agree on where the origin is. Highlights in the UI are drawn in a
//! top-left origin with both axes scaled to `[0, 1]`, so every span rectangle
//! goes through [`normalize`] before the per-passage fold in [`BoxAccumulator`].

use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};

/// Vertical origin of a rectangle's coordinate frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoordOrigin {
    /// y grows downwards from the top edge (screen/image convention).
    #[default]
    TopLeft,
    /// y grows upwards from the bottom edge (PDF user space).
    BottomLeft,
}

/// A rectangle in absolute page units, as emitted by a layout parser.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawRect {
    /// Left.
    pub l: f32,
    /// Top.
    pub t: f32,
    /// Right.
    pub r: f32,
    /// Bottom.
    pub b: f32,
    /// Origin the coordinates are measured from.
    #[serde(default)]
    pub coord_origin: CoordOrigin,
}

/// Page dimensions in the same units as [`RawRect`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
}

impl PageSize {
    /// Both dimensions positive and finite.
    pub fn is_valid(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.width.is_finite() && self.height.is_finite()
    }
}

/// Convert one rectangle to top-left origin and scale it into `[0, 1]`.
///
/// Returns `None` when the page has no usable dimensions or the rectangle has
/// non-finite coordinates.
pub fn normalize(rect: &RawRect, page: PageSize) -> Option<BoundingBox> {
    if !page.is_valid() {
        return None;
    }
    if ![rect.l, rect.t, rect.r, rect.b].iter().all(|v| v.is_finite()) {
        return None;
    }

    let (top, bottom) = match rect.coord_origin {
        CoordOrigin::TopLeft => (rect.t, rect.b),
        CoordOrigin::BottomLeft => (page.height - rect.t, page.height - rect.b),
    };

    let left = rect.l / page.width;
    let right = rect.r / page.width;
    let top = top / page.height;
    let bottom = bottom / page.height;

    Some(BoundingBox {
        left: clamp_unit(left.min(right)),
        top: clamp_unit(top.min(bottom)),
        right: clamp_unit(left.max(right)),
        bottom: clamp_unit(top.max(bottom)),
    })
}

fn clamp_unit(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Running min/max fold of normalized boxes: the smallest rectangle covering
/// every box added so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoxAccumulator {
    acc: Option<BoundingBox>,
}

impl BoxAccumulator {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the union to cover `bbox`.
    pub fn add(&mut self, bbox: BoundingBox) {
        self.acc = Some(match self.acc {
            None => bbox,
            Some(cur) => BoundingBox {
                left: cur.left.min(bbox.left),
                top: cur.top.min(bbox.top),
                right: cur.right.max(bbox.right),
                bottom: cur.bottom.max(bbox.bottom),
            },
        });
    }

    /// Normalize `rect` against `page` and fold it in. Unusable rectangles are ignored.
    pub fn add_raw(&mut self, rect: &RawRect, page: PageSize) {
        if let Some(bbox) = normalize(rect, page) {
            self.add(bbox);
        }
    }

    /// No box added yet.
    pub fn is_empty(&self) -> bool {
        self.acc.is_none()
    }

    /// The union, if anything was added.
    pub fn finish(self) -> Option<BoundingBox> {
        self.acc
    }
}
