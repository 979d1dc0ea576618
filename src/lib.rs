pub mod agent_pool;
pub mod controller;
pub mod engine;
pub mod error;
pub mod flow_field;
pub mod grid;
pub mod integrator;
pub mod sampler;
pub mod simulation;
pub mod targets;

// Re-export the engine surface for callers that only drive and read it
pub use controller::{AdaptiveController, ControllerInputs, ControllerOutput};
pub use engine::{Engine, EngineState, TickMetrics};
pub use error::{EngineError, EngineResult, SampleError};
pub use grid::GridDims;
pub use sampler::BrightPixelSampler;
pub use simulation::FlockSimulation;
pub use targets::IngestReport;

pub use flock_common::{BoundaryMode, ControllerConfig, EngineSettings, ParamRange, TuningParams, Vec2};
