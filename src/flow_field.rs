use crate::grid::SpatialGrid;
use flock_common::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::f32::consts::TAU;

/// Visit order for the guide sweep; diagonals included for smoother flow.
const SWEEP_NEIGHBORS: [(i64, i64); 8] = [(0, -1), (0, 1), (-1, 0), (1, 0), (-1, -1), (-1, 1), (1, -1), (1, 1)];

/// One sinusoidal layer of the stream function.
#[derive(Debug, Clone, Copy)]
struct NoiseLayer {
    freq_x: f32,
    freq_y: f32,
    phase_x: f32,
    phase_y: f32,
    amplitude: f32,
}

/// Deterministic steering field for agents without a target.
///
/// Two layers: a guide field pointing from target-free cells toward the nearest cell holding
/// targets (breadth-first over the 8-neighborhood), and underneath it a smooth divergence-free
/// curl-noise field so agents with nowhere to go still drift coherently.
#[derive(Debug)]
pub struct FlowField {
    layers: Vec<NoiseLayer>,
    guide_enabled: bool,
    guide: Vec<Vec2>,
}

impl FlowField {
    pub fn new(seed: u64, base_frequency: f32, octaves: u32, guide_enabled: bool) -> Self {
        let mut rng = StdRng::seed_from_u64(seed ^ 0x5EED_F10E);
        let layers = (0..octaves.max(1))
            .map(|octave| {
                let scale = TAU * base_frequency * 2f32.powi(octave as i32);
                NoiseLayer {
                    freq_x: scale * rng.random_range(0.8f32..1.2),
                    freq_y: scale * rng.random_range(0.8f32..1.2),
                    phase_x: rng.random_range(0.0f32..TAU),
                    phase_y: rng.random_range(0.0f32..TAU),
                    amplitude: 0.5f32.powi(octave as i32),
                }
            })
            .collect();
        FlowField { layers, guide_enabled, guide: Vec::new() }
    }

    /// Recomputes the guide layer from the targets bucketed in `grid`.
    pub fn rebuild_guide(&mut self, grid: &SpatialGrid) {
        let num_cells = grid.num_cells();
        self.guide.clear();
        self.guide.resize(num_cells, Vec2::zero());
        if !self.guide_enabled {
            return;
        }

        let mut visited = vec![false; num_cells];
        let mut queue: VecDeque<u32> = VecDeque::new();
        for (cell, &count) in grid.target_occupancy().iter().enumerate() {
            if count > 0 {
                visited[cell] = true;
                queue.push_back(cell as u32);
            }
        }

        while let Some(cell) = queue.pop_front() {
            let (col, row) = grid.cell_coords(cell);
            for &(dx, dy) in &SWEEP_NEIGHBORS {
                let Some(next) = grid.cell_at(col as i64 + dx, row as i64 + dy) else { continue };
                if visited[next as usize] {
                    continue;
                }
                visited[next as usize] = true;
                // Point back at the cell we came from.
                self.guide[next as usize] = Vec2::new(-dx as f32, -dy as f32).normalize_or_zero();
                queue.push_back(next);
            }
        }
    }

    /// Unit steering direction at `pos` (inside grid cell `cell`), or zero where the field
    /// vanishes.
    #[inline]
    pub fn sample(&self, pos: Vec2, cell: u32) -> Vec2 {
        if let Some(&dir) = self.guide.get(cell as usize) {
            if dir != Vec2::zero() {
                return dir;
            }
        }
        self.noise(pos)
    }

    /// Curl of the layered stream function, normalized.
    pub fn noise(&self, pos: Vec2) -> Vec2 {
        let mut dpsi_dx = 0.0;
        let mut dpsi_dy = 0.0;
        for layer in &self.layers {
            let ax = layer.freq_x * pos.x + layer.phase_x;
            let ay = layer.freq_y * pos.y + layer.phase_y;
            dpsi_dx += layer.amplitude * layer.freq_x * ax.cos() * ay.sin();
            dpsi_dy += layer.amplitude * layer.freq_y * ax.sin() * ay.cos();
        }
        Vec2::new(dpsi_dy, -dpsi_dx).normalize_or_zero()
    }

    /// True when `cell` has a guide direction toward targets.
    #[cfg(test)]
    pub fn is_guided(&self, cell: u32) -> bool {
        self.guide.get(cell as usize).is_some_and(|d| *d != Vec2::zero())
    }
}
