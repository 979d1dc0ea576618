use flock_common::{ControllerConfig, TuningParams};
use serde::{Deserialize, Serialize};

/// What the controller observes at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerInputs {
    pub active_count: usize,
    pub target_count: usize,
    /// Mean agents per occupied grid cell.
    pub mean_density: f32,
    pub pool_capacity: usize,
}

/// Parameters for this tick plus the population for the next one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerOutput {
    pub tuning: TuningParams,
    /// Population the controller is steering toward.
    pub desired_active: usize,
    /// Population after this tick's bounded ramp step.
    pub next_active: usize,
    /// Target pressure in `[0, 1]`.
    pub pressure: f32,
    /// Crowding in `[0, 1)`.
    pub crowding: f32,
}

/// Retunes steering once per tick from target pressure and crowding.
///
/// * pressure `p = kT / (kT + A)`: 0 with no targets, 1/2 when the population matches its
///   target `kT`, approaching 1 as targets outnumber agents. `max_force`, `target_force_weight`
///   and `max_speed` rise linearly with `p` across their ranges.
/// * crowding `q = d / (d + c)` for mean occupied-cell density `d` and per-cell capacity `c`:
///   `separation_radius` rises and `perception_radius` falls linearly with `q`.
///
/// Both maps are monotonic and every output is clamped to its configured range, with max speed
/// further capped by the hard speed limit.
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    config: ControllerConfig,
    capacity_per_cell: u32,
}

impl AdaptiveController {
    pub fn new(config: ControllerConfig, capacity_per_cell: u32) -> Self {
        AdaptiveController { config, capacity_per_cell: capacity_per_cell.max(1) }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Parameters for an empty, uncrowded plane; what the engine reports before its first tick.
    pub fn baseline(&self) -> TuningParams {
        self.tuning_for(0.0, 0.0)
    }

    pub fn update(&self, inputs: &ControllerInputs) -> ControllerOutput {
        let pressure = self.pressure(inputs.target_count, inputs.active_count);
        let crowding = self.crowding(inputs.mean_density);
        let desired_active = self.desired_population(inputs.target_count, inputs.pool_capacity);
        let next_active = self.ramp(inputs.active_count, desired_active);
        ControllerOutput { tuning: self.tuning_for(pressure, crowding), desired_active, next_active, pressure, crowding }
    }

    pub fn pressure(&self, target_count: usize, active_count: usize) -> f32 {
        let demand = self.config.agents_per_target * target_count as f32;
        if demand <= 0.0 {
            return 0.0;
        }
        (demand / (demand + active_count as f32)).clamp(0.0, 1.0)
    }

    pub fn crowding(&self, mean_density: f32) -> f32 {
        if !(mean_density.is_finite() && mean_density > 0.0) {
            return 0.0;
        }
        mean_density / (mean_density + self.capacity_per_cell as f32)
    }

    /// `min(capacity, ceil(k * targets))`, raised to the configured floor.
    pub fn desired_population(&self, target_count: usize, pool_capacity: usize) -> usize {
        let demand = (self.config.agents_per_target as f64 * target_count as f64).ceil();
        let demand = if demand.is_finite() { demand.min(pool_capacity as f64) as usize } else { pool_capacity };
        demand.max(self.config.min_active as usize).min(pool_capacity)
    }

    /// Moves `current` toward `desired` by at most `max_active_step`.
    pub fn ramp(&self, current: usize, desired: usize) -> usize {
        let step = self.config.max_active_step as usize;
        if desired > current {
            current + (desired - current).min(step)
        } else {
            current - (current - desired).min(step)
        }
    }

    fn tuning_for(&self, pressure: f32, crowding: f32) -> TuningParams {
        let c = &self.config;
        let max_speed = c.max_speed.clamp(c.max_speed.at(pressure)).min(c.speed_hard_cap);
        TuningParams {
            max_speed,
            max_force: c.max_force.clamp(c.max_force.at(pressure)),
            perception_radius: c.perception_radius.clamp(c.perception_radius.at_descending(crowding)),
            separation_radius: c.separation_radius.clamp(c.separation_radius.at(crowding)),
            target_force_weight: c.target_force_weight.clamp(c.target_force_weight.at(pressure)),
        }
    }
}
