use crate::targets::Assignment;
use flock_common::Vec2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// How an agent was steered during the last tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentStatus {
    #[default]
    Dormant,
    /// Steered toward its assigned target.
    Targeted,
    /// No target; followed the flow field.
    Wandering,
    /// Integration produced a non-finite value; held in place until reset.
    NonFinite,
}

/// Fixed-capacity agent arena addressed by slot index.
///
/// Allocated once; agents are recycled between active and dormant, never freed. Active agents
/// always occupy slots `0..active_count`.
#[derive(Debug)]
pub struct AgentPool {
    capacity: usize,
    active_count: usize,

    // --- Ping-Pong Buffers for Parallel Update ---
    // Current tick's input
    pub positions_in: Vec<Vec2>,
    pub velocities_in: Vec<Vec2>,
    // Current tick's output, next tick's input
    pub positions_out: Vec<Vec2>,
    pub velocities_out: Vec<Vec2>,

    // --- Per-agent state outside the ping-pong pair ---
    pub assignments: Vec<Option<Assignment>>,
    pub status: Vec<AgentStatus>,
    /// Set after a non-finite integration result; cleared by `apply_resets`.
    pub needs_reset: Vec<bool>,
}

impl AgentPool {
    /// Creates a pool with one dormant, motionless agent per initial position.
    pub fn new(initial_positions: Vec<Vec2>) -> Self {
        let capacity = initial_positions.len();
        AgentPool {
            capacity,
            active_count: 0,
            positions_out: initial_positions.clone(),
            positions_in: initial_positions,
            velocities_in: vec![Vec2::zero(); capacity],
            velocities_out: vec![Vec2::zero(); capacity],
            assignments: vec![None; capacity],
            status: vec![AgentStatus::Dormant; capacity],
            needs_reset: vec![false; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    #[cfg(test)]
    pub fn is_active(&self, slot: usize) -> bool {
        slot < self.active_count
    }

    /// Swaps the input and output buffers for position and velocity.
    pub fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.positions_in, &mut self.positions_out);
        std::mem::swap(&mut self.velocities_in, &mut self.velocities_out);
    }

    /// Resizes the active prefix. Newly woken agents start motionless where they were left;
    /// agents put to sleep lose their velocity and target. Returns the dropped assignments.
    pub fn set_active_count(&mut self, count: usize) -> Vec<Assignment> {
        let count = count.min(self.capacity);
        let mut released = Vec::new();
        if count < self.active_count {
            for slot in count..self.active_count {
                if let Some(a) = self.assignments[slot].take() {
                    released.push(a);
                }
                self.velocities_in[slot] = Vec2::zero();
                self.status[slot] = AgentStatus::Dormant;
            }
        } else {
            for slot in self.active_count..count {
                self.velocities_in[slot] = Vec2::zero();
                self.assignments[slot] = None;
            }
        }
        self.active_count = count;
        released
    }

    /// Re-seeds every flagged agent at a random in-bounds position with zero velocity.
    /// The RNG is derived from the slot and tick so the result is independent of visit order.
    pub fn apply_resets(&mut self, seed: u64, tick: u64, width: f32, height: f32) -> Vec<Assignment> {
        let mut released = Vec::new();
        for slot in 0..self.capacity {
            if !self.needs_reset[slot] {
                continue;
            }
            let mut rng = agent_rng(seed, slot, tick);
            self.positions_in[slot] = Vec2::new(rng.random_range(0.0..width), rng.random_range(0.0..height));
            self.velocities_in[slot] = Vec2::zero();
            if let Some(a) = self.assignments[slot].take() {
                released.push(a);
            }
            self.needs_reset[slot] = false;
        }
        released
    }
}

/// Per-agent RNG; seeding mixes slot and tick so parallel and serial visits agree.
pub fn agent_rng(seed: u64, slot: usize, tick: u64) -> StdRng {
    StdRng::seed_from_u64(
        seed.wrapping_add((slot as u64).wrapping_mul(0x1F3A))
            .wrapping_add(tick.wrapping_mul(0x58C7)),
    )
}

/// Initial placement: jittered sampling over a shuffled lattice of bins, one agent per bin,
/// so the pool starts spread over the whole plane.
pub fn place_initial_agents(count: usize, width: f32, height: f32, rng: &mut StdRng) -> Vec<Vec2> {
    if count == 0 {
        return Vec::new();
    }
    let cols = ((count as f32 * width / height).sqrt().ceil() as usize).max(1);
    let rows = count.div_ceil(cols).max(1);

    let mut bins: Vec<(usize, usize)> = (0..cols).flat_map(|ix| (0..rows).map(move |iy| (ix, iy))).collect();
    bins.shuffle(rng);
    bins.truncate(count);

    let cell_w = width / cols as f32;
    let cell_h = height / rows as f32;
    bins.into_iter()
        .map(|(ix, iy)| {
            let x0 = ix as f32 * cell_w;
            let y0 = iy as f32 * cell_h;
            Vec2::new(x0 + rng.random::<f32>() * cell_w, y0 + rng.random::<f32>() * cell_h)
        })
        .collect()
}
