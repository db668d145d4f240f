/// Coordinate-convention inference.
///
/// Backends emit boxes in one of three units with no tag saying which:
/// fractions of the image, a fixed 1000-unit grid, or absolute pixels.
/// The unit is inferred from the value range, first match wins. This is a
/// best-effort heuristic: a pixel box that happens to lie entirely inside
/// `[0, 1000]` is read as grid units.
use serde::Serialize;

/// Upper bound of the fractional convention.
pub const FRACTIONAL_MAX: f64 = 1.0;
/// Upper bound (and scale) of the normalized grid convention.
pub const GRID_MAX: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateConvention {
    Fractional,
    Grid1000,
    Pixels,
}

impl CoordinateConvention {
    pub fn infer(raw: &[f64; 4]) -> Self {
        let within = |max: f64| raw.iter().all(|v| (0.0..=max).contains(v));
        if within(FRACTIONAL_MAX) {
            CoordinateConvention::Fractional
        } else if within(GRID_MAX) {
            CoordinateConvention::Grid1000
        } else {
            CoordinateConvention::Pixels
        }
    }
}

/// Map `[x_min, y_min, x_max, y_max]` onto pixel space of a `width` × `height`
/// image. The result is neither ordered nor clamped.
pub fn to_pixels(raw: &[f64; 4], width: u32, height: u32) -> ([f64; 4], CoordinateConvention) {
    let convention = CoordinateConvention::infer(raw);
    let (sx, sy) = match convention {
        CoordinateConvention::Fractional => (width as f64, height as f64),
        CoordinateConvention::Grid1000 => (width as f64 / GRID_MAX, height as f64 / GRID_MAX),
        CoordinateConvention::Pixels => (1.0, 1.0),
    };
    let [x1, y1, x2, y2] = *raw;
    ([x1 * sx, y1 * sy, x2 * sx, y2 * sy], convention)
}
