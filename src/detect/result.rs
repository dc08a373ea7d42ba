use crate::geometry::{BoundingBox, CoordinateSpace, Transform};

/// One detected object.
///
/// `id` is opaque and only unique within the list it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub id: String,
    pub label: String,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f32,
    pub location: BoundingBox,
    /// The pixel grid `location` is expressed in.
    pub space: CoordinateSpace,
}

impl Detection {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        confidence: f32,
        location: BoundingBox,
        space: CoordinateSpace,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            location,
            space,
        }
    }

    /// Shorthand for a detection in model-input space.
    pub fn in_model_input(
        id: impl Into<String>,
        label: impl Into<String>,
        confidence: f32,
        location: BoundingBox,
    ) -> Self {
        Self::new(id, label, confidence, location, CoordinateSpace::ModelInput)
    }

    /// Re-express this detection through `transform`, tagging it with `space`.
    pub fn mapped(&self, transform: &Transform, space: CoordinateSpace) -> Self {
        Self {
            location: transform.apply(&self.location),
            space,
            ..self.clone()
        }
    }
}
