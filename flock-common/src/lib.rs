pub mod config;
pub mod snapshot;
pub mod tuning;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    BoundaryMode, ControllerConfig, EngineSettings, OutputConfig, ParamRange, SamplerConfig,
    SceneConfig, ShapeConfig, SimulationConfig, TimingConfig, UniverseConfig,
};
pub use snapshot::Snapshot;
pub use tuning::TuningParams;
pub use vecmath::{clamp, lerp, Vec2};
