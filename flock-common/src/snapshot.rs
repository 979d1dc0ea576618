use crate::tuning::TuningParams;
use serde::{Deserialize, Serialize};

/// A snapshot of the flock and its metrics at a specific tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Tick index at which the snapshot was taken.
    pub tick: u64,
    /// Simulated time in seconds (`tick / tick_rate_hz`).
    pub time_secs: f32,
    /// Number of agents participating in flocking.
    pub active_count: u32,
    /// Number of target points in the current frame.
    pub target_count: u32,
    /// Number of active agents currently steering toward a target.
    pub assigned_count: u32,
    /// Tuning parameters the controller produced for the last tick.
    pub tuning: TuningParams,
    pub grid_cols: u32,
    pub grid_rows: u32,
    pub grid_cell_size: f32,
    /// Agent count in each grid cell, row-major.
    pub cell_occupancy: Vec<u32>,
    /// `crowding_distribution[N]` = number of agents with exactly N neighbors inside the
    /// separation radius. The last bin collects everything at or above it.
    pub crowding_distribution: Vec<u32>,
    /// Optional: raw (x, y) positions of all active agents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub positions: Option<Vec<(f32, f32)>>,
}
