//! Coordinate transforms between the camera frame and the model input crop.
//!
//! The local detector sees a fixed-size square crop of every frame. This module
//! owns the affine map from full-frame pixels into that crop, its inverse, and
//! the nearest-neighbour resampler that renders the crop.
//!
//! Boxes always travel with an explicit `CoordinateSpace`; nothing in here
//! guesses which space a box belongs to.

use anyhow::{anyhow, Result};

use crate::frame::CropImage;

const SINGULAR_EPSILON: f64 = 1e-12;

/// Which pixel grid a bounding box is expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoordinateSpace {
    /// Pixels of the square model-input crop.
    ModelInput,
    /// Pixels of the original camera frame.
    Frame,
}

/// Axis-aligned bounding box. `left <= right` and `top <= bottom` always hold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    /// Build a box from two opposite corners. Swapped edges are normalized.
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    /// Build a box from an origin plus extent (`x, y, w, h`).
    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }
}

/// 2D affine map `(x, y) -> (a*x + b*y + tx, c*x + d*y + ty)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    tx: f64,
    ty: f64,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    fn translate(tx: f64, ty: f64) -> Self {
        Self {
            tx,
            ty,
            ..Self::identity()
        }
    }

    fn scale(sx: f64, sy: f64) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::identity()
        }
    }

    /// Quarter-turn rotation with exact coefficients.
    fn rotate_quarter_turns(degrees: i32) -> Result<Self> {
        if degrees % 90 != 0 {
            return Err(anyhow!(
                "rotation must be a multiple of 90 degrees, got {}",
                degrees
            ));
        }
        let (cos, sin) = match degrees.rem_euclid(360) {
            0 => (1.0, 0.0),
            90 => (0.0, 1.0),
            180 => (-1.0, 0.0),
            _ => (0.0, -1.0),
        };
        Ok(Self {
            a: cos,
            b: -sin,
            c: sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        })
    }

    /// Map from full-frame pixels into a `crop_width x crop_height` crop.
    ///
    /// Rotation is applied about the frame centre before scaling. With
    /// `maintain_aspect == false` each axis is stretched to fill the crop
    /// exactly; otherwise one uniform scale letterboxes the rotated frame,
    /// centred in the crop.
    pub fn frame_to_crop(
        frame_width: u32,
        frame_height: u32,
        crop_width: u32,
        crop_height: u32,
        rotation_degrees: i32,
        maintain_aspect: bool,
    ) -> Result<Self> {
        if frame_width == 0 || frame_height == 0 || crop_width == 0 || crop_height == 0 {
            return Err(anyhow!(
                "transform dimensions must be non-zero ({}x{} -> {}x{})",
                frame_width,
                frame_height,
                crop_width,
                crop_height
            ));
        }
        let rotation = Self::rotate_quarter_turns(rotation_degrees)?;
        let transpose = rotation_degrees.rem_euclid(180) == 90;
        let (in_width, in_height) = if transpose {
            (frame_height as f64, frame_width as f64)
        } else {
            (frame_width as f64, frame_height as f64)
        };

        let scale_x = crop_width as f64 / in_width;
        let scale_y = crop_height as f64 / in_height;
        let scale = if maintain_aspect {
            let uniform = scale_x.min(scale_y);
            Self::scale(uniform, uniform)
        } else {
            Self::scale(scale_x, scale_y)
        };

        Ok(
            Self::translate(-(frame_width as f64) / 2.0, -(frame_height as f64) / 2.0)
                .then(&rotation)
                .then(&scale)
                .then(&Self::translate(
                    crop_width as f64 / 2.0,
                    crop_height as f64 / 2.0,
                )),
        )
    }

    /// Compose: the returned transform applies `self` first, then `next`.
    pub fn then(&self, next: &Transform) -> Transform {
        Transform {
            a: next.a * self.a + next.b * self.c,
            b: next.a * self.b + next.b * self.d,
            c: next.c * self.a + next.d * self.c,
            d: next.c * self.b + next.d * self.d,
            tx: next.a * self.tx + next.b * self.ty + next.tx,
            ty: next.c * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn invert(&self) -> Result<Transform> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < SINGULAR_EPSILON {
            return Err(anyhow!("transform is not invertible (det={})", det));
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Ok(Transform {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + b * self.ty),
            ty: -(c * self.tx + d * self.ty),
        })
    }

    pub fn map_point(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.b * y + self.tx,
            self.c * x + self.d * y + self.ty,
        )
    }

    /// Map a box by its four corners and return their axis-aligned bounds.
    pub fn apply(&self, rect: &BoundingBox) -> BoundingBox {
        let corners = [
            self.map_point(rect.left as f64, rect.top as f64),
            self.map_point(rect.right as f64, rect.top as f64),
            self.map_point(rect.left as f64, rect.bottom as f64),
            self.map_point(rect.right as f64, rect.bottom as f64),
        ];
        let (mut min_x, mut min_y) = corners[0];
        let (mut max_x, mut max_y) = corners[0];
        for &(x, y) in &corners[1..] {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        BoundingBox::new(min_x as f32, min_y as f32, max_x as f32, max_y as f32)
    }

    /// Component-wise comparison within `epsilon`.
    pub fn approx_eq(&self, other: &Transform, epsilon: f64) -> bool {
        [
            self.a - other.a,
            self.b - other.b,
            self.c - other.c,
            self.d - other.d,
            self.tx - other.tx,
            self.ty - other.ty,
        ]
        .iter()
        .all(|delta| delta.abs() <= epsilon)
    }
}

/// Render the model input by sampling `rgb` through `frame_to_crop`.
///
/// Each crop pixel centre is mapped back into the frame; samples that land
/// outside the frame stay black (letterbox bars).
pub fn crop_rgb(
    rgb: &[u8],
    frame_width: u32,
    frame_height: u32,
    frame_to_crop: &Transform,
    crop_size: u32,
) -> Result<CropImage> {
    let expected = (frame_width as usize)
        .checked_mul(frame_height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    if rgb.len() != expected {
        return Err(anyhow!(
            "RGB frame length mismatch: expected {}, got {}",
            expected,
            rgb.len()
        ));
    }

    let crop_to_frame = frame_to_crop.invert()?;
    let side = crop_size as usize;
    let mut pixels = vec![0u8; side * side * 3];
    for v in 0..side {
        for u in 0..side {
            let (x, y) = crop_to_frame.map_point(u as f64 + 0.5, v as f64 + 0.5);
            if x < 0.0 || y < 0.0 {
                continue;
            }
            let (sx, sy) = (x.floor() as usize, y.floor() as usize);
            if sx >= frame_width as usize || sy >= frame_height as usize {
                continue;
            }
            let src = (sy * frame_width as usize + sx) * 3;
            let dst = (v * side + u) * 3;
            pixels[dst..dst + 3].copy_from_slice(&rgb[src..src + 3]);
        }
    }

    Ok(CropImage::new(pixels, crop_size, crop_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_box_close(actual: &BoundingBox, expected: &BoundingBox) {
        let pairs = [
            (actual.left, expected.left),
            (actual.top, expected.top),
            (actual.right, expected.right),
            (actual.bottom, expected.bottom),
        ];
        for (a, e) in pairs {
            let tolerance = 1e-3 * e.abs().max(1.0);
            assert!(
                (a - e).abs() <= tolerance,
                "expected {:?}, got {:?}",
                expected,
                actual
            );
        }
    }

    #[test]
    fn box_constructor_normalizes_edges() {
        let rect = BoundingBox::new(50.0, 40.0, 10.0, 20.0);
        assert_eq!(rect, BoundingBox::new(10.0, 20.0, 50.0, 40.0));
        assert_eq!(rect.center(), (30.0, 30.0));
        assert_eq!(BoundingBox::from_xywh(5.0, 6.0, 10.0, 20.0).bottom, 26.0);
    }

    #[test]
    fn stretch_maps_frame_corners_onto_crop_corners() -> Result<()> {
        let t = Transform::frame_to_crop(640, 480, 300, 300, 0, false)?;
        let mapped = t.apply(&BoundingBox::new(0.0, 0.0, 640.0, 480.0));
        assert_box_close(&mapped, &BoundingBox::new(0.0, 0.0, 300.0, 300.0));
        Ok(())
    }

    #[test]
    fn letterbox_keeps_aspect_and_centres() -> Result<()> {
        let t = Transform::frame_to_crop(640, 480, 300, 300, 0, true)?;
        let mapped = t.apply(&BoundingBox::new(0.0, 0.0, 640.0, 480.0));
        // 300/640 uniform scale -> 225 rows tall, 37.5 px bars top and bottom.
        assert_box_close(&mapped, &BoundingBox::new(0.0, 37.5, 300.0, 262.5));
        Ok(())
    }

    #[test]
    fn quarter_turn_transposes_the_frame() -> Result<()> {
        let t = Transform::frame_to_crop(640, 480, 480, 640, 90, false)?;
        let mapped = t.apply(&BoundingBox::new(0.0, 0.0, 640.0, 480.0));
        assert_box_close(&mapped, &BoundingBox::new(0.0, 0.0, 480.0, 640.0));
        Ok(())
    }

    #[test]
    fn rejects_non_quarter_rotation_and_zero_sizes() {
        assert!(Transform::frame_to_crop(640, 480, 300, 300, 45, false).is_err());
        assert!(Transform::frame_to_crop(0, 480, 300, 300, 0, false).is_err());
    }

    #[test]
    fn singular_transform_does_not_invert() {
        let flat = Transform::scale(0.0, 1.0);
        assert!(flat.invert().is_err());
    }

    #[test]
    fn transform_round_trip_reconstructs_boxes() -> Result<()> {
        let frames = [(640, 480), (480, 640), (1280, 720), (300, 300)];
        let boxes = [
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            BoundingBox::new(100.0, 50.0, 220.0, 190.0),
            BoundingBox::new(12.5, 33.25, 299.0, 299.0),
        ];
        for (width, height) in frames {
            for rotation in [0, 90, 180, 270] {
                for maintain_aspect in [false, true] {
                    let t = Transform::frame_to_crop(width, height, 300, 300, rotation, maintain_aspect)?;
                    let inverse = t.invert()?;
                    assert!(inverse.invert()?.approx_eq(&t, 1e-9));
                    for rect in &boxes {
                        let back = inverse.apply(&t.apply(rect));
                        assert_box_close(&back, rect);
                    }
                }
            }
        }
        Ok(())
    }

    #[test]
    fn crop_samples_source_pixels() -> Result<()> {
        // 2x2 frame, each pixel a distinct colour, stretched onto a 4x4 crop.
        let rgb = vec![
            10, 10, 10, 20, 20, 20, //
            30, 30, 30, 40, 40, 40,
        ];
        let t = Transform::frame_to_crop(2, 2, 4, 4, 0, false)?;
        let crop = crop_rgb(&rgb, 2, 2, &t, 4)?;
        assert_eq!(crop.width(), 4);
        assert_eq!(crop.pixels()[0], 10);
        assert_eq!(crop.pixels()[3 * 3], 20);
        assert_eq!(crop.pixels()[12 * 3], 30);
        assert_eq!(crop.pixels()[15 * 3], 40);
        Ok(())
    }

    #[test]
    fn crop_rejects_short_buffers() {
        let t = Transform::identity();
        assert!(crop_rgb(&[0u8; 5], 2, 2, &t, 2).is_err());
    }
}
