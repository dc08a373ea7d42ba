//! Horizontal direction buckets for spoken cues.
//!
//! The model-input square is split into a 3x3 grid. Only the column is spoken:
//! left third, middle third, right third. Cells are half-open `[lo, hi)` except
//! the last one on each axis, which also includes the far edge.

use std::fmt;

use crate::detect::Detection;
use crate::geometry::{BoundingBox, CoordinateSpace};

const GRID: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Zone {
    Left,
    Center,
    Right,
    /// Centre fell outside the grid or the box was not in model-input space.
    Unknown,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Left => "Left",
            Zone::Center => "Center",
            Zone::Right => "Right",
            Zone::Unknown => "unknown",
        }
    }

    fn from_column(column: u32) -> Self {
        match column {
            1 => Zone::Left,
            2 => Zone::Center,
            3 => Zone::Right,
            _ => Zone::Unknown,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1-based grid index along one axis, or `None` outside `[0, side]`.
fn axis_cell(value: f32, side: f32) -> Option<u32> {
    if !value.is_finite() || !side.is_finite() || side <= 0.0 || value < 0.0 || value > side {
        return None;
    }
    (1..=GRID).find(|&i| {
        let upper = side * i as f32 / GRID as f32;
        i == GRID || value < upper
    })
}

/// 1-based `(column, row)` cell holding the centre of `rect`.
pub fn grid_cell(rect: &BoundingBox, side: u32) -> Option<(u32, u32)> {
    let (cx, cy) = rect.center();
    let side = side as f32;
    Some((axis_cell(cx, side)?, axis_cell(cy, side)?))
}

/// Row-major cell number, 1..=9 (1, 4, 7 form the left column).
pub fn cell_number(rect: &BoundingBox, side: u32) -> Option<u32> {
    grid_cell(rect, side).map(|(column, row)| (row - 1) * GRID + column)
}

/// Classify a model-input box of a `side x side` crop.
pub fn classify(rect: &BoundingBox, side: u32) -> Zone {
    match grid_cell(rect, side) {
        Some((column, _)) => Zone::from_column(column),
        None => {
            log::debug!("box {:?} outside {}x{} grid", rect, side, side);
            Zone::Unknown
        }
    }
}

/// Classify a detection; only model-input boxes can be bucketed.
pub fn classify_detection(detection: &Detection, side: u32) -> Zone {
    if detection.space != CoordinateSpace::ModelInput {
        return Zone::Unknown;
    }
    classify(&detection.location, side)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centred_at(cx: f32, cy: f32) -> BoundingBox {
        BoundingBox::new(cx - 1.0, cy - 1.0, cx + 1.0, cy + 1.0)
    }

    #[test]
    fn bottle_near_top_left_is_left() {
        let rect = BoundingBox::new(10.0, 10.0, 50.0, 50.0);
        assert_eq!(classify(&rect, 300), Zone::Left);
        assert_eq!(grid_cell(&rect, 300), Some((1, 1)));
        assert_eq!(cell_number(&rect, 300), Some(1));
    }

    #[test]
    fn columns_are_monotonic_in_cx() {
        let side = 300u32;
        for step in 0..=300 {
            let cx = step as f32;
            let zone = classify(&centred_at(cx, 150.0), side);
            let expected = if cx < 100.0 {
                Zone::Left
            } else if cx >= 200.0 {
                Zone::Right
            } else {
                Zone::Center
            };
            assert_eq!(zone, expected, "cx={}", cx);
        }
    }

    #[test]
    fn boundaries_are_deterministic() {
        let side = 300u32;
        let first = classify(&centred_at(100.0, 10.0), side);
        for _ in 0..10 {
            assert_eq!(classify(&centred_at(100.0, 10.0), side), first);
        }
        assert_eq!(classify(&centred_at(200.0, 10.0), side), Zone::Right);
        assert_eq!(classify(&centred_at(300.0, 300.0), side), Zone::Right);
        assert_eq!(classify(&centred_at(0.0, 0.0), side), Zone::Left);
    }

    #[test]
    fn row_does_not_change_zone() {
        assert_eq!(classify(&centred_at(250.0, 20.0), 300), Zone::Right);
        assert_eq!(classify(&centred_at(250.0, 280.0), 300), Zone::Right);
        assert_eq!(cell_number(&centred_at(250.0, 280.0), 300), Some(9));
        assert_eq!(cell_number(&centred_at(150.0, 150.0), 300), Some(5));
    }

    #[test]
    fn out_of_grid_is_unknown() {
        assert_eq!(classify(&centred_at(-20.0, 10.0), 300), Zone::Unknown);
        assert_eq!(classify(&centred_at(150.0, 400.0), 300), Zone::Unknown);
        assert_eq!(classify(&centred_at(150.0, 150.0), 0), Zone::Unknown);
    }

    #[test]
    fn frame_space_detections_are_unknown() {
        let det = Detection::new(
            "0",
            "cup",
            0.9,
            BoundingBox::new(10.0, 10.0, 50.0, 50.0),
            CoordinateSpace::Frame,
        );
        assert_eq!(classify_detection(&det, 300), Zone::Unknown);
    }
}
