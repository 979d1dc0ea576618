use crate::agent_pool::{place_initial_agents, AgentPool, AgentStatus};
use crate::controller::{AdaptiveController, ControllerInputs};
use crate::error::{EngineError, EngineResult};
use crate::flow_field::FlowField;
use crate::grid::{GridDims, SpatialGrid};
use crate::integrator::{integrate, StepContext, SteeringWeights};
use crate::targets::{IngestReport, TargetPool};
use flock_common::{ControllerConfig, EngineSettings, TuningParams, Vec2};
use log::{debug, error, info, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Uninitialized,
    /// Initialized, no tick run yet.
    Ready,
    Ticking,
    /// An internal consistency check failed. Only `initialize` is accepted.
    Faulted,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Ready => "ready",
            EngineState::Ticking => "ticking",
            EngineState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// What happened during the last tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TickMetrics {
    /// Index of the tick these metrics describe (the first tick is 0).
    pub tick: u64,
    /// Agents that took part in the tick.
    pub active_count: usize,
    pub target_count: usize,
    /// Agents steering toward a target.
    pub assigned: usize,
    /// Claims made through the outward cell search.
    pub redirected: usize,
    /// Agents that followed the flow field.
    pub flow_steered: usize,
    /// Agents re-seeded after a non-finite integration result.
    pub resets: usize,
    /// Mean agents per occupied grid cell.
    pub mean_density: f32,
}

/// Everything allocated by `initialize`.
#[derive(Debug)]
struct World {
    width: f32,
    height: f32,
    cell_size: f32,
    pool: AgentPool,
    grid: SpatialGrid,
    targets: TargetPool,
    flow: FlowField,
    tuning: TuningParams,
    metrics: TickMetrics,
    tick: u64,
}

/// The flocking engine: owns the agent pool, grid, target pool and tuning state.
///
/// Frames go in through [`set_targets`](Self::set_targets), time advances with
/// [`tick`](Self::tick), and the query methods return values or borrows that stay valid until
/// the next mutating call.
#[derive(Debug)]
pub struct Engine {
    settings: EngineSettings,
    controller: AdaptiveController,
    state: EngineState,
    desired_override: Option<usize>,
    world: Option<World>,
}

impl Engine {
    pub fn new(settings: EngineSettings, controller: ControllerConfig) -> EngineResult<Self> {
        settings.validate().map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        controller.validate().map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        let controller = AdaptiveController::new(controller, settings.capacity_per_cell);
        Ok(Engine { settings, controller, state: EngineState::Uninitialized, desired_override: None, world: None })
    }

    /// Allocates the fixed agent pool (all dormant, motionless, spread over the plane) and
    /// moves to `Ready`. Calling it again discards the previous world, which is also how a
    /// faulted engine recovers.
    pub fn initialize(&mut self, pool_capacity: usize, width: f32, height: f32) -> EngineResult<()> {
        if pool_capacity == 0 {
            return Err(EngineError::InvalidConfig("pool capacity must be greater than 0".into()));
        }
        if !(width.is_finite() && width > 0.0 && height.is_finite() && height > 0.0) {
            return Err(EngineError::InvalidConfig(format!("plane size {}x{} must be positive", width, height)));
        }

        // A 3x3 window must cover the largest radius the controller can produce.
        let cell_size = self.settings.min_cell_size.max(self.controller.config().max_interaction_radius());
        let s = &self.settings;
        let mut rng = StdRng::seed_from_u64(s.seed);
        let pool = AgentPool::new(place_initial_agents(pool_capacity, width, height, &mut rng));
        let grid = SpatialGrid::new(width, height, cell_size);
        // Rings past the far edge of the grid hold no cells.
        let dims = grid.dims();
        let redirect_radius = s.redirect_radius.min(dims.cols.max(dims.rows));
        let targets = TargetPool::new(width, height, s.max_targets as usize, s.capacity_per_cell, redirect_radius);
        let flow = FlowField::new(s.seed, s.noise_frequency, s.noise_octaves, s.guide_flow);

        info!(
            "Engine initialized: {} agents on a {}x{} plane, grid {}x{} (cell size {:.1}), redirect radius {}.",
            pool_capacity,
            width,
            height,
            dims.cols,
            dims.rows,
            cell_size,
            targets.redirect_radius()
        );
        self.world = Some(World {
            width,
            height,
            cell_size,
            pool,
            grid,
            targets,
            flow,
            tuning: self.controller.baseline(),
            metrics: TickMetrics::default(),
            tick: 0,
        });
        self.state = EngineState::Ready;
        Ok(())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn world(&self, operation: &'static str) -> EngineResult<&World> {
        match (self.state, self.world.as_ref()) {
            (EngineState::Ready | EngineState::Ticking, Some(world)) => Ok(world),
            (state, _) => Err(EngineError::InvalidState { operation, state }),
        }
    }

    fn world_mut(&mut self, operation: &'static str) -> EngineResult<&mut World> {
        match (self.state, self.world.as_mut()) {
            (EngineState::Ready | EngineState::Ticking, Some(world)) => Ok(world),
            (state, _) => Err(EngineError::InvalidState { operation, state }),
        }
    }

    /// Replaces the assignable targets from the next tick on. Only the last call before a tick
    /// counts. A list with no usable points (empty or all non-finite) changes nothing: targets,
    /// assignments and the population goal carry over.
    pub fn set_targets(&mut self, points: &[Vec2]) -> EngineResult<IngestReport> {
        let world = self.world_mut("set_targets")?;
        Ok(world.targets.set_targets(points))
    }

    /// Overrides the controller's `k * targets` population goal. The active count still moves
    /// toward it by bounded steps and never exceeds the pool capacity. `None` restores the
    /// target-driven goal.
    pub fn set_desired_active(&mut self, desired: Option<usize>) -> EngineResult<()> {
        self.world("set_desired_active")?;
        self.desired_override = desired;
        Ok(())
    }

    /// Advances the flock one fixed step.
    ///
    /// Order: re-seed agents flagged last tick, install the latest target frame, rebuild the
    /// grid, run the controller, hand out targets, integrate, then apply the controller's
    /// population change so the next tick sees it.
    pub fn tick(&mut self) -> EngineResult<TickMetrics> {
        let seed = self.settings.seed;
        let weights = SteeringWeights {
            separation: self.settings.separation_weight,
            flow: self.settings.flow_weight,
            arrival_radius: self.settings.arrival_radius,
        };
        let boundary = self.settings.boundary;
        let desired_override = self.desired_override;
        let controller = &self.controller;

        let world = match (self.state, self.world.as_mut()) {
            (EngineState::Ready | EngineState::Ticking, Some(world)) => world,
            (state, _) => return Err(EngineError::InvalidState { operation: "tick", state }),
        };
        let tick = world.tick;
        let active = world.pool.active_count();

        // --- 1. Re-seed agents that went non-finite last tick ---
        let resets = world.pool.needs_reset.iter().filter(|&&flag| flag).count();
        if resets > 0 {
            for released in world.pool.apply_resets(seed, tick, world.width, world.height) {
                world.targets.release(&released);
            }
            debug!("Tick {}: re-seeded {} non-finite agents.", tick, resets);
        }

        // --- 2. Latest frame, grid, guide field ---
        let frame_changed = world.targets.begin_tick();
        let rebuilt = world.grid.rebuild(&world.pool.positions_in[..active], world.targets.points(), world.cell_size);
        if let Err(mismatch) = rebuilt {
            error!(
                "Tick {}: grid scatter wrote {} of {} entries; engine faulted.",
                tick, mismatch.written, mismatch.expected
            );
            self.state = EngineState::Faulted;
            return Err(EngineError::InvalidState { operation: "tick", state: EngineState::Faulted });
        }
        if frame_changed {
            world.flow.rebuild_guide(&world.grid);
            trace!("Tick {}: new target frame with {} points.", tick, world.targets.len());
        }

        // --- 3. Controller ---
        let capacity = world.pool.capacity();
        let out = controller.update(&ControllerInputs {
            active_count: active,
            target_count: world.targets.len(),
            mean_density: world.grid.mean_density(),
            pool_capacity: capacity,
        });
        let next_active = match desired_override {
            Some(desired) => controller.ramp(active, desired.min(capacity)),
            None => out.next_active,
        };
        world.tuning = out.tuning;

        // --- 4. Target assignment (serial, slot order) ---
        let stats = world.targets.assign(
            &world.grid,
            &world.pool.positions_in[..active],
            &mut world.pool.assignments[..active],
            &world.tuning,
        );

        // --- 5. Integrate (parallel) ---
        let pool = &mut world.pool;
        let ctx = StepContext {
            grid: &world.grid,
            flow: &world.flow,
            positions: &pool.positions_in,
            velocities: &pool.velocities_in,
            assignments: &pool.assignments,
            active_count: active,
            tuning: world.tuning,
            weights,
            width: world.width,
            height: world.height,
            boundary,
        };
        integrate(&ctx, &mut pool.positions_out, &mut pool.velocities_out, &mut pool.status);
        pool.swap_buffers();

        let mut flow_steered = 0;
        let mut non_finite = 0;
        for slot in 0..active {
            match pool.status[slot] {
                AgentStatus::Wandering => flow_steered += 1,
                AgentStatus::NonFinite => {
                    pool.needs_reset[slot] = true;
                    non_finite += 1;
                }
                _ => {}
            }
        }
        if non_finite > 0 {
            warn!("Tick {}: {} agents produced non-finite state; resetting next tick.", tick, non_finite);
        }

        // --- 6. Population change ---
        if next_active != active {
            let released = pool.set_active_count(next_active);
            for assignment in &released {
                world.targets.release(assignment);
            }
            debug!(
                "Tick {}: active agents {} -> {} (goal {}).",
                tick,
                active,
                next_active,
                desired_override.unwrap_or(out.desired_active)
            );
        }

        world.metrics = TickMetrics {
            tick,
            active_count: active,
            target_count: world.targets.len(),
            assigned: stats.assigned,
            redirected: stats.redirected,
            flow_steered,
            resets,
            mean_density: world.grid.mean_density(),
        };
        trace!(
            "Tick {}: assigned {}, redirected {}, wandering {}, pressure {:.3}, crowding {:.3}.",
            tick,
            stats.assigned,
            stats.redirected,
            flow_steered,
            out.pressure,
            out.crowding
        );
        world.tick += 1;
        self.state = EngineState::Ticking;
        Ok(world.metrics)
    }

    pub fn active_count(&self) -> EngineResult<usize> {
        Ok(self.world("active_count")?.pool.active_count())
    }

    pub fn pool_capacity(&self) -> EngineResult<usize> {
        Ok(self.world("pool_capacity")?.pool.capacity())
    }

    /// Positions of the active agents, indexed by slot.
    pub fn positions(&self) -> EngineResult<&[Vec2]> {
        let world = self.world("positions")?;
        Ok(&world.pool.positions_in[..world.pool.active_count()])
    }

    /// Velocities of the active agents, indexed by slot.
    pub fn velocities(&self) -> EngineResult<&[Vec2]> {
        let world = self.world("velocities")?;
        Ok(&world.pool.velocities_in[..world.pool.active_count()])
    }

    pub fn grid_dims(&self) -> EngineResult<GridDims> {
        Ok(self.world("grid_dims")?.grid.dims())
    }

    /// Active agents per grid cell at their current positions, row-major.
    pub fn cell_occupancy(&self) -> EngineResult<Vec<u32>> {
        let world = self.world("cell_occupancy")?;
        let mut counts = vec![0u32; world.grid.num_cells()];
        for &pos in &world.pool.positions_in[..world.pool.active_count()] {
            counts[world.grid.cell_of(pos) as usize] += 1;
        }
        Ok(counts)
    }

    /// Tuning parameters used by the last tick (the controller baseline before the first).
    pub fn tuning(&self) -> EngineResult<TuningParams> {
        Ok(self.world("tuning")?.tuning)
    }

    pub fn metrics(&self) -> EngineResult<TickMetrics> {
        Ok(self.world("metrics")?.metrics)
    }

    /// Number of ticks run since `initialize`.
    pub fn tick_count(&self) -> EngineResult<u64> {
        Ok(self.world("tick_count")?.tick)
    }

    /// Target points installed by the last tick.
    pub fn target_count(&self) -> EngineResult<usize> {
        Ok(self.world("target_count")?.targets.len())
    }

    /// The point agent `slot` is steering toward, if any.
    pub fn assigned_target(&self, slot: usize) -> EngineResult<Option<Vec2>> {
        let world = self.world("assigned_target")?;
        if slot >= world.pool.active_count() {
            return Ok(None);
        }
        Ok(world.pool.assignments[slot].map(|a| a.point))
    }

    /// Claims per grid cell as of the last assignment pass.
    pub fn assigned_per_cell(&self) -> EngineResult<&[u32]> {
        Ok(self.world("assigned_per_cell")?.targets.assigned_per_cell())
    }

    /// For each active agent, how many other agents sit inside the current separation radius.
    pub fn crowding_counts(&self) -> EngineResult<Vec<u32>> {
        let world = self.world("crowding_counts")?;
        let positions = &world.pool.positions_in[..world.pool.active_count()];
        let mut grid = SpatialGrid::new(world.width, world.height, world.cell_size);
        if let Err(mismatch) = grid.rebuild(positions, &[], world.cell_size) {
            warn!("Crowding grid scatter wrote {} of {} agents.", mismatch.written, mismatch.expected);
        }
        let radius_sq = world.tuning.separation_radius_sq();
        Ok(positions
            .par_iter()
            .enumerate()
            .map(|(slot, &pos)| {
                grid.neighbors_of(grid.cell_of(pos))
                    .filter(|&other| other as usize != slot)
                    .filter(|&other| pos.distance_squared(positions[other as usize]) < radius_sq)
                    .count() as u32
            })
            .collect())
    }
}
