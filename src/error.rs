use crate::engine::EngineState;
use thiserror::Error;

/// Hard failures of the engine API. Truncated or degenerate input is never an error; see
/// [`IngestReport`](crate::targets::IngestReport).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Called before `initialize`, or after an internal consistency check failed.
    #[error("{operation} is not allowed while the engine is {state}")]
    InvalidState { operation: &'static str, state: EngineState },
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}

/// Problems with a frame handed to the bright-pixel sampler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    FrameSize { width: u32, height: u32, expected: usize, actual: usize },
    #[error("sampling stride must be greater than 0")]
    ZeroStride,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
