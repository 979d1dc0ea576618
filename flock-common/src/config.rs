use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

// Plane and pool size
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UniverseConfig {
    pub width: f32,
    pub height: f32,
    pub pool_capacity: u32,
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    /// Simulation ticks per simulated second.
    pub tick_rate_hz: f32,
    /// How often a new video frame (and therefore a new target set) becomes available.
    pub frame_rate_hz: f32,
    pub total_secs: f32,
    pub record_interval_secs: f32,
    /// How far ahead of playback the sampled frame is taken. Variants used both 0.3 and 0.6.
    #[serde(default = "default_lookahead_secs")]
    pub lookahead_secs: f32,
}

fn default_lookahead_secs() -> f32 {
    0.6
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    /// Leaving one edge re-enters at the opposite one.
    #[default]
    Wrap,
    /// Positions are clamped to the plane and the outward velocity is dropped.
    Clamp,
}

/// Upper bound on `engine.redirect_radius`; the search visits `(2r + 1)^2` cells.
pub const MAX_REDIRECT_RADIUS: u32 = 512;

/// Fixed engine tunables. The adaptive parameters live in [`ControllerConfig`].
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct EngineSettings {
    /// Seed for initial placement, the noise field and agent resets.
    pub seed: u64,
    pub boundary: BoundaryMode,
    /// Lower bound on the grid cell size. The actual size also covers the largest radius
    /// the controller may produce.
    pub min_cell_size: f32,
    /// Maximum number of agents assigned to targets inside one grid cell.
    pub capacity_per_cell: u32,
    /// How many rings of cells an overflowing agent searches for a free target.
    pub redirect_radius: u32,
    /// Target points beyond this count are dropped from a frame.
    pub max_targets: u32,
    pub separation_weight: f32,
    pub flow_weight: f32,
    /// Distance below which target steering slows the agent down.
    pub arrival_radius: f32,
    /// Seed the flow field from target cells so wandering agents drift toward bright regions.
    pub guide_flow: bool,
    /// Spatial frequency of the base noise layer (cycles per plane unit).
    pub noise_frequency: f32,
    pub noise_octaves: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            seed: 12345,
            boundary: BoundaryMode::Wrap,
            min_cell_size: 20.0,
            capacity_per_cell: 5,
            redirect_radius: 4,
            max_targets: 20_000,
            separation_weight: 1.5,
            flow_weight: 1.0,
            arrival_radius: 50.0,
            guide_flow: true,
            noise_frequency: 0.004,
            noise_octaves: 3,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_cell_size.is_finite() && self.min_cell_size > 0.0) {
            anyhow::bail!("engine.min_cell_size must be positive.");
        }
        if self.capacity_per_cell == 0 {
            anyhow::bail!("engine.capacity_per_cell must be greater than 0.");
        }
        if self.redirect_radius > MAX_REDIRECT_RADIUS {
            anyhow::bail!(
                "engine.redirect_radius ({}) exceeds the limit of {} cells.",
                self.redirect_radius,
                MAX_REDIRECT_RADIUS
            );
        }
        if !(self.separation_weight.is_finite() && self.separation_weight >= 0.0) {
            anyhow::bail!("engine.separation_weight must be non-negative.");
        }
        if !(self.flow_weight.is_finite() && self.flow_weight >= 0.0) {
            anyhow::bail!("engine.flow_weight must be non-negative.");
        }
        if !(self.arrival_radius.is_finite() && self.arrival_radius >= 0.0) {
            anyhow::bail!("engine.arrival_radius must be non-negative.");
        }
        if !(self.noise_frequency.is_finite() && self.noise_frequency > 0.0) {
            anyhow::bail!("engine.noise_frequency must be positive.");
        }
        if self.noise_octaves == 0 {
            anyhow::bail!("engine.noise_octaves must be greater than 0.");
        }
        Ok(())
    }
}

/// Inclusive `[min, max]` range one tuning parameter is confined to.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f32,
    pub max: f32,
}

impl ParamRange {
    pub const fn new(min: f32, max: f32) -> Self {
        ParamRange { min, max }
    }

    /// Maps `t` in `[0, 1]` onto the range.
    #[inline(always)]
    pub fn at(&self, t: f32) -> f32 {
        crate::vecmath::lerp(self.min, self.max, t)
    }

    /// Maps `t` in `[0, 1]` onto the range from the top down.
    #[inline(always)]
    pub fn at_descending(&self, t: f32) -> f32 {
        crate::vecmath::lerp(self.max, self.min, t)
    }

    #[inline(always)]
    pub fn clamp(&self, value: f32) -> f32 {
        crate::vecmath::clamp(value, self.min, self.max)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite()) {
            anyhow::bail!("controller.{} bounds must be finite.", name);
        }
        if self.min < 0.0 || self.min > self.max {
            anyhow::bail!("controller.{} must satisfy 0 <= min <= max (got {} .. {}).", name, self.min, self.max);
        }
        Ok(())
    }
}

/// Bounds and gains for the adaptive controller.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ControllerConfig {
    /// `k`: active agents wanted per target point.
    pub agents_per_target: f32,
    /// Floor on the active population, so the flock never fully disappears on dark frames.
    pub min_active: u32,
    /// Largest change of the active population in one tick.
    pub max_active_step: u32,
    /// No tick may ever produce a max speed above this.
    pub speed_hard_cap: f32,
    pub max_speed: ParamRange,
    pub max_force: ParamRange,
    pub perception_radius: ParamRange,
    pub separation_radius: ParamRange,
    pub target_force_weight: ParamRange,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            agents_per_target: 0.6,
            min_active: 0,
            max_active_step: 50,
            speed_hard_cap: 12.0,
            max_speed: ParamRange::new(4.0, 6.0),
            max_force: ParamRange::new(0.2, 0.6),
            perception_radius: ParamRange::new(10.0, 20.0),
            separation_radius: ParamRange::new(3.0, 8.0),
            target_force_weight: ParamRange::new(0.5, 1.5),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.agents_per_target.is_finite() && self.agents_per_target >= 0.0) {
            anyhow::bail!("controller.agents_per_target must be non-negative.");
        }
        if self.max_active_step == 0 {
            anyhow::bail!("controller.max_active_step must be greater than 0.");
        }
        self.max_speed.validate("max_speed")?;
        self.max_force.validate("max_force")?;
        self.perception_radius.validate("perception_radius")?;
        self.separation_radius.validate("separation_radius")?;
        self.target_force_weight.validate("target_force_weight")?;
        if !(self.speed_hard_cap.is_finite() && self.speed_hard_cap > 0.0) {
            anyhow::bail!("controller.speed_hard_cap must be positive.");
        }
        if self.max_speed.max > self.speed_hard_cap {
            anyhow::bail!(
                "controller.max_speed.max ({}) exceeds speed_hard_cap ({}).",
                self.max_speed.max,
                self.speed_hard_cap
            );
        }
        Ok(())
    }

    /// The largest radius the controller can ever emit.
    pub fn max_interaction_radius(&self) -> f32 {
        self.perception_radius.max.max(self.separation_radius.max)
    }
}

/// Bright-pixel extraction settings. Variants of the source used thresholds of both 110 and 128.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SamplerConfig {
    /// A pixel is bright when the mean of its R, G and B channels is strictly above this.
    pub threshold: u8,
    /// Only every `stride`-th pixel in each direction is examined.
    pub stride: u32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig { threshold: 128, stride: 8, frame_width: 800, frame_height: 600 }
    }
}

/// One filled shape of a scripted scene.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ShapeConfig {
    /// Filled disc, rasterized into the frame then sampled.
    Disc { x: f32, y: f32, radius: f32 },
    /// Filled axis-aligned rectangle, rasterized into the frame then sampled.
    Rect { x: f32, y: f32, width: f32, height: f32 },
    /// Raw plane coordinates passed to the engine as-is.
    Points { points: Vec<[f32; 2]> },
}

/// A scripted frame: bright shapes visible from `start_secs` until the next scene starts.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SceneConfig {
    pub start_secs: f32,
    #[serde(default)]
    pub shapes: Vec<ShapeConfig>,
}

// Configuration for output settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    pub save_positions: bool,
    pub save_stats: bool,
    pub save_positions_in_snapshot: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub universe: UniverseConfig,
    pub timing: TimingConfig,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub scenes: Vec<SceneConfig>,
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;
        Ok(config)
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.universe.width.is_finite() && self.universe.width > 0.0)
            || !(self.universe.height.is_finite() && self.universe.height > 0.0)
        {
            anyhow::bail!("universe width and height must be positive.");
        }
        if self.universe.pool_capacity == 0 {
            anyhow::bail!("universe.pool_capacity must be greater than 0.");
        }
        if !(self.timing.tick_rate_hz > 0.0) || !(self.timing.frame_rate_hz > 0.0) {
            anyhow::bail!("timing tick_rate_hz and frame_rate_hz must be positive.");
        }
        if !(self.timing.total_secs >= 0.0) || !(self.timing.lookahead_secs >= 0.0) {
            anyhow::bail!("timing total_secs and lookahead_secs must be non-negative.");
        }
        if self.sampler.stride == 0 {
            anyhow::bail!("sampler.stride must be greater than 0.");
        }
        if self.sampler.frame_width == 0 || self.sampler.frame_height == 0 {
            anyhow::bail!("sampler frame dimensions must be greater than 0.");
        }
        if self.scenes.windows(2).any(|w| w[1].start_secs < w[0].start_secs) {
            anyhow::bail!("scenes must be sorted by start_secs.");
        }
        self.engine.validate()?;
        self.controller.validate()?;
        Ok(())
    }

    /// The scene visible at `time_secs`, if any has started yet.
    pub fn scene_at(&self, time_secs: f32) -> Option<(usize, &SceneConfig)> {
        self.scenes
            .iter()
            .enumerate()
            .rev()
            .find(|(_, scene)| scene.start_secs <= time_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [universe]
        width = 800.0
        height = 600.0
        pool_capacity = 1000

        [timing]
        tick_rate_hz = 60.0
        frame_rate_hz = 30.0
        total_secs = 2.0
        record_interval_secs = 0.5

        [[scenes]]
        start_secs = 0.0
        shapes = [
            { kind = "disc", x = 200.0, y = 300.0, radius = 60.0 },
            { kind = "points", points = [[10.0, 20.0]] },
        ]

        [[scenes]]
        start_secs = 1.0
        shapes = [{ kind = "rect", x = 100.0, y = 100.0, width = 50.0, height = 40.0 }]

        [output]
        base_filename = "flock"
        save_positions = false
        save_stats = true
        save_positions_in_snapshot = false
    "#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = SimulationConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.timing.lookahead_secs, 0.6);
        assert_eq!(config.sampler.threshold, 128);
        assert_eq!(config.engine.boundary, BoundaryMode::Wrap);
        assert_eq!(config.controller.max_force, ParamRange::new(0.2, 0.6));
        assert_eq!(config.scenes.len(), 2);
        assert_eq!(
            config.scenes[0].shapes[0],
            ShapeConfig::Disc { x: 200.0, y: 300.0, radius: 60.0 }
        );
    }

    #[test]
    fn scene_lookup_picks_latest_started() {
        let config = SimulationConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.scene_at(0.5).map(|(i, _)| i), Some(0));
        assert_eq!(config.scene_at(1.0).map(|(i, _)| i), Some(1));
        assert_eq!(config.scene_at(9.0).map(|(i, _)| i), Some(1));
        assert!(config.scene_at(-1.0).is_none());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let mut controller = ControllerConfig::default();
        controller.separation_radius = ParamRange::new(9.0, 3.0);
        assert!(controller.validate().is_err());

        let mut controller = ControllerConfig::default();
        controller.max_speed = ParamRange::new(1.0, 50.0);
        assert!(controller.validate().is_err());
    }

    #[test]
    fn oversized_redirect_radius_is_rejected() {
        let settings = EngineSettings { redirect_radius: MAX_REDIRECT_RADIUS, ..EngineSettings::default() };
        assert!(settings.validate().is_ok());
        let settings = EngineSettings { redirect_radius: 4_000_000_000, ..EngineSettings::default() };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_capacity_per_cell_is_rejected() {
        let settings = EngineSettings { capacity_per_cell: 0, ..EngineSettings::default() };
        assert!(settings.validate().is_err());
    }
}
