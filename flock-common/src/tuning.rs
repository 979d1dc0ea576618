use serde::{Deserialize, Serialize};

/// Steering parameters recomputed once per tick by the adaptive controller.
///
/// Read-only while agents are being integrated; callers receive copies, never a live handle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuningParams {
    /// Upper bound on agent speed (plane units per tick).
    pub max_speed: f32,
    /// Upper bound on each steering force and on their sum.
    pub max_force: f32,
    /// Radius within which an agent can pick up a target directly.
    pub perception_radius: f32,
    /// Radius within which neighbors push each other apart.
    pub separation_radius: f32,
    /// Multiplier on the target-seeking steering force.
    pub target_force_weight: f32,
}

impl TuningParams {
    #[inline(always)]
    pub fn separation_radius_sq(&self) -> f32 {
        self.separation_radius * self.separation_radius
    }

    #[inline(always)]
    pub fn perception_radius_sq(&self) -> f32 {
        self.perception_radius * self.perception_radius
    }

    pub fn is_finite(&self) -> bool {
        self.max_speed.is_finite()
            && self.max_force.is_finite()
            && self.perception_radius.is_finite()
            && self.separation_radius.is_finite()
            && self.target_force_weight.is_finite()
    }
}
