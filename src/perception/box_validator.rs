/// Geometric validation of pixel-space boxes.
///
/// Order matters and is fixed: swap inverted edges, clamp to the image, then
/// discard what is too thin to click. Nothing here returns an error; a bad
/// element is corrected or dropped so it never takes the rest of a response
/// down with it.
use crate::perception::types::BoundingBox;

/// Minimum post-clamp width and height, in pixels.
pub const MIN_BOX_EDGE_PX: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    NonFinite,
    Degenerate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoxOutcome {
    Valid {
        bbox: BoundingBox,
        /// Edges were swapped or clamped on the way.
        corrected: bool,
    },
    Discarded(DiscardReason),
}

impl BoxOutcome {
    pub fn bbox(&self) -> Option<BoundingBox> {
        match self {
            BoxOutcome::Valid { bbox, .. } => Some(*bbox),
            BoxOutcome::Discarded(_) => None,
        }
    }
}

pub fn validate_box(px: [f64; 4], width: u32, height: u32, min_edge: f64) -> BoxOutcome {
    if px.iter().any(|v| !v.is_finite()) {
        return BoxOutcome::Discarded(DiscardReason::NonFinite);
    }
    let [mut x1, mut y1, mut x2, mut y2] = px;
    let mut corrected = false;

    if x1 > x2 {
        std::mem::swap(&mut x1, &mut x2);
        corrected = true;
    }
    if y1 > y2 {
        std::mem::swap(&mut y1, &mut y2);
        corrected = true;
    }

    let (w, h) = (width as f64, height as f64);
    let clamped = [x1.clamp(0.0, w), y1.clamp(0.0, h), x2.clamp(0.0, w), y2.clamp(0.0, h)];
    if clamped != [x1, y1, x2, y2] {
        corrected = true;
    }
    let [x1, y1, x2, y2] = clamped;

    if x2 - x1 < min_edge || y2 - y1 < min_edge {
        return BoxOutcome::Discarded(DiscardReason::Degenerate);
    }

    match BoundingBox::from_corners(
        x1.round() as u32,
        y1.round() as u32,
        x2.round() as u32,
        y2.round() as u32,
    ) {
        Some(bbox) => BoxOutcome::Valid { bbox, corrected },
        None => BoxOutcome::Discarded(DiscardReason::Degenerate),
    }
}
