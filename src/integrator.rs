use crate::agent_pool::AgentStatus;
use crate::flow_field::FlowField;
use crate::grid::SpatialGrid;
use crate::targets::Assignment;
use flock_common::{BoundaryMode, TuningParams, Vec2};
use rayon::prelude::*;

/// Neighbors closer than this are treated as coincident and skipped.
const MIN_SEPARATION_DIST_SQ: f32 = 1e-6;

/// Fixed weights that do not change between ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringWeights {
    pub separation: f32,
    pub flow: f32,
    pub arrival_radius: f32,
}

/// Everything one tick's force pass reads. Immutable for the whole pass.
pub struct StepContext<'a> {
    pub grid: &'a SpatialGrid,
    pub flow: &'a FlowField,
    pub positions: &'a [Vec2],
    pub velocities: &'a [Vec2],
    pub assignments: &'a [Option<Assignment>],
    pub active_count: usize,
    pub tuning: TuningParams,
    pub weights: SteeringWeights,
    pub width: f32,
    pub height: f32,
    pub boundary: BoundaryMode,
}

/// One agent's result for the tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentStep {
    pub position: Vec2,
    pub velocity: Vec2,
    pub status: AgentStatus,
}

/// Reynolds steering: the change of velocity needed to move at `desired`, weighted and clamped.
#[inline(always)]
fn steer(desired: Vec2, velocity: Vec2, weight: f32, max_force: f32) -> Vec2 {
    ((desired - velocity) * weight).limit(max_force)
}

/// Push away from every neighbor inside the separation radius, each contribution a unit
/// vector scaled by inverse distance. Zero when nobody is that close.
pub fn separation_force(ctx: &StepContext, slot: usize, pos: Vec2, velocity: Vec2) -> Vec2 {
    let radius_sq = ctx.tuning.separation_radius_sq();
    let mut push = Vec2::zero();
    let mut neighbors = 0u32;
    for other in ctx.grid.neighbors_of(ctx.grid.cell_of(pos)) {
        let other = other as usize;
        if other == slot {
            continue;
        }
        let Some(&other_pos) = ctx.positions.get(other) else { continue };
        let away = pos - other_pos;
        let dist_sq = away.length_squared();
        if dist_sq < radius_sq && dist_sq > MIN_SEPARATION_DIST_SQ {
            let dist = dist_sq.sqrt();
            push += away / (dist * dist);
            neighbors += 1;
        }
    }
    if neighbors == 0 || push.length_squared() <= 0.0 {
        return Vec2::zero();
    }
    steer(push.with_length(ctx.tuning.max_speed), velocity, ctx.weights.separation, ctx.tuning.max_force)
}

/// Seek `target`, slowing down inside the arrival radius. Zero once on top of it.
pub fn seek_force(ctx: &StepContext, pos: Vec2, velocity: Vec2, target: Vec2) -> Vec2 {
    let offset = target - pos;
    let dist = offset.length();
    if dist < 1e-6 {
        return Vec2::zero();
    }
    let arrival = ctx.weights.arrival_radius;
    let speed = if arrival > 0.0 && dist < arrival {
        ctx.tuning.max_speed * dist / arrival
    } else {
        ctx.tuning.max_speed
    };
    steer(offset.with_length(speed), velocity, ctx.tuning.target_force_weight, ctx.tuning.max_force)
}

/// Follow the flow field at full speed. Zero where the field vanishes.
pub fn flow_force(ctx: &StepContext, pos: Vec2, velocity: Vec2) -> Vec2 {
    let dir = ctx.flow.sample(pos, ctx.grid.cell_of(pos));
    if dir == Vec2::zero() {
        return Vec2::zero();
    }
    steer(dir * ctx.tuning.max_speed, velocity, ctx.weights.flow, ctx.tuning.max_force)
}

/// Brings a moved agent back onto the plane.
#[inline]
pub fn apply_boundary(mode: BoundaryMode, width: f32, height: f32, pos: Vec2, velocity: Vec2) -> (Vec2, Vec2) {
    match mode {
        BoundaryMode::Wrap => (Vec2::new(wrap(pos.x, width), wrap(pos.y, height)), velocity),
        BoundaryMode::Clamp => {
            let mut v = velocity;
            if (pos.x <= 0.0 && v.x < 0.0) || (pos.x >= width && v.x > 0.0) {
                v.x = 0.0;
            }
            if (pos.y <= 0.0 && v.y < 0.0) || (pos.y >= height && v.y > 0.0) {
                v.y = 0.0;
            }
            (Vec2::new(pos.x.clamp(0.0, width), pos.y.clamp(0.0, height)), v)
        }
    }
}

#[inline(always)]
fn wrap(value: f32, extent: f32) -> f32 {
    // rem_euclid can round up to `extent` for tiny negative inputs; that is still in bounds.
    value.rem_euclid(extent).clamp(0.0, extent)
}

/// Computes one active agent's forces and integrates a single fixed step.
pub fn step_agent(ctx: &StepContext, slot: usize) -> AgentStep {
    let pos = ctx.positions[slot];
    let mut velocity = ctx.velocities[slot];
    if !velocity.is_finite() {
        velocity = Vec2::zero();
    }
    if !pos.is_finite() {
        return AgentStep { position: pos, velocity: Vec2::zero(), status: AgentStatus::NonFinite };
    }

    let separation = separation_force(ctx, slot, pos, velocity);
    let (steering, status) = match ctx.assignments.get(slot).copied().flatten() {
        Some(assignment) => (seek_force(ctx, pos, velocity, assignment.point), AgentStatus::Targeted),
        None => (flow_force(ctx, pos, velocity), AgentStatus::Wandering),
    };

    let acceleration = (separation + steering).limit(ctx.tuning.max_force);
    let velocity = (velocity + acceleration).limit(ctx.tuning.max_speed);
    let (position, velocity) = apply_boundary(ctx.boundary, ctx.width, ctx.height, pos + velocity, velocity);

    if !(position.is_finite() && velocity.is_finite()) {
        return AgentStep { position: pos, velocity: Vec2::zero(), status: AgentStatus::NonFinite };
    }
    AgentStep { position, velocity, status }
}

/// Integrates every slot in parallel, writing only each slot's own output.
///
/// Dormant slots copy through with zero velocity. A non-finite result keeps the agent's last
/// finite position (or the plane center if it had none) and is flagged for reset.
pub fn integrate(
    ctx: &StepContext,
    positions_out: &mut [Vec2],
    velocities_out: &mut [Vec2],
    status_out: &mut [AgentStatus],
) {
    let center = Vec2::new(ctx.width * 0.5, ctx.height * 0.5);
    positions_out
        .par_iter_mut()
        .zip(velocities_out.par_iter_mut())
        .zip(status_out.par_iter_mut())
        .enumerate()
        .for_each(|(slot, ((pos_out, vel_out), status))| {
            if slot >= ctx.active_count {
                *pos_out = ctx.positions[slot];
                *vel_out = Vec2::zero();
                *status = AgentStatus::Dormant;
                return;
            }
            let step = step_agent(ctx, slot);
            *pos_out = if step.position.is_finite() { step.position } else { center };
            *vel_out = step.velocity;
            *status = step.status;
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    const TUNING: TuningParams = TuningParams {
        max_speed: 4.0,
        max_force: 0.5,
        perception_radius: 20.0,
        separation_radius: 10.0,
        target_force_weight: 1.0,
    };

    struct Fixture {
        grid: SpatialGrid,
        flow: FlowField,
        positions: Vec<Vec2>,
        velocities: Vec<Vec2>,
        assignments: Vec<Option<Assignment>>,
    }

    impl Fixture {
        fn new(positions: Vec<Vec2>) -> Self {
            let mut grid = SpatialGrid::new(200.0, 200.0, 20.0);
            grid.rebuild(&positions, &[], 20.0).unwrap();
            let mut flow = FlowField::new(5, 0.004, 2, true);
            flow.rebuild_guide(&grid);
            let n = positions.len();
            Fixture { grid, flow, positions, velocities: vec![Vec2::zero(); n], assignments: vec![None; n] }
        }

        fn ctx(&self) -> StepContext<'_> {
            StepContext {
                grid: &self.grid,
                flow: &self.flow,
                positions: &self.positions,
                velocities: &self.velocities,
                assignments: &self.assignments,
                active_count: self.positions.len(),
                tuning: TUNING,
                weights: SteeringWeights { separation: 1.5, flow: 1.0, arrival_radius: 50.0 },
                width: 200.0,
                height: 200.0,
                boundary: BoundaryMode::Wrap,
            }
        }
    }

    #[test]
    fn separation_pushes_apart_and_ignores_far_or_coincident() {
        let f = Fixture::new(vec![Vec2::new(100.0, 100.0), Vec2::new(105.0, 100.0), Vec2::new(100.0, 100.0)]);
        let ctx = f.ctx();
        let push = separation_force(&ctx, 0, f.positions[0], Vec2::zero());
        assert!(push.x < 0.0);
        assert!(push.y.abs() < 1e-6);
        assert!(push.length() <= TUNING.max_force + 1e-6);

        let lonely = Fixture::new(vec![Vec2::new(10.0, 10.0), Vec2::new(150.0, 150.0)]);
        assert_eq!(separation_force(&lonely.ctx(), 0, lonely.positions[0], Vec2::zero()), Vec2::zero());
    }

    #[test]
    fn seek_slows_inside_arrival_radius() {
        let f = Fixture::new(vec![Vec2::new(100.0, 100.0)]);
        let ctx = f.ctx();
        let pos = f.positions[0];
        assert_eq!(seek_force(&ctx, pos, Vec2::zero(), pos), Vec2::zero());

        let far = seek_force(&ctx, pos, Vec2::zero(), Vec2::new(190.0, 100.0));
        assert!((far.length() - TUNING.max_force).abs() < 1e-5);
        // Already moving at the slowed desired speed: nothing to correct.
        let near = seek_force(&ctx, pos, Vec2::new(0.8, 0.0), Vec2::new(110.0, 100.0));
        assert!(near.length() < 1e-5);
    }

    #[test]
    fn step_respects_speed_and_bounds() {
        let mut f = Fixture::new(vec![Vec2::new(199.5, 0.2), Vec2::new(50.0, 50.0)]);
        f.velocities[0] = Vec2::new(3.9, -0.5);
        f.assignments[1] = Some(Assignment { point: Vec2::new(150.0, 150.0), cell: 0, target: 0, generation: 1 });
        let ctx = f.ctx();

        let wrapped = step_agent(&ctx, 0);
        assert!(wrapped.position.x >= 0.0 && wrapped.position.x <= 200.0);
        assert!(wrapped.position.y >= 0.0 && wrapped.position.y <= 200.0);
        assert!(wrapped.velocity.length() <= TUNING.max_speed + 1e-5);
        assert_eq!(wrapped.status, AgentStatus::Wandering);

        let seeking = step_agent(&ctx, 1);
        assert_eq!(seeking.status, AgentStatus::Targeted);
        assert!(seeking.velocity.x > 0.0 && seeking.velocity.y > 0.0);
    }

    #[test]
    fn clamp_mode_stops_outward_motion() {
        let (p, v) = apply_boundary(BoundaryMode::Clamp, 100.0, 100.0, Vec2::new(104.0, 50.0), Vec2::new(4.0, 1.0));
        assert_eq!(p, Vec2::new(100.0, 50.0));
        assert_eq!(v, Vec2::new(0.0, 1.0));

        let (p, _) = apply_boundary(BoundaryMode::Wrap, 100.0, 100.0, Vec2::new(-2.0, 103.0), Vec2::zero());
        assert!((p.x - 98.0).abs() < 1e-4 && (p.y - 3.0).abs() < 1e-4);
    }

    #[test]
    fn non_finite_agent_is_held_and_flagged() {
        let mut f = Fixture::new(vec![Vec2::new(50.0, 50.0), Vec2::new(60.0, 60.0)]);
        f.positions[1] = Vec2::new(f32::NAN, 60.0);
        f.velocities[0] = Vec2::new(f32::NAN, 0.0);
        let ctx = f.ctx();

        let mut pos_out = vec![Vec2::zero(); 2];
        let mut vel_out = vec![Vec2::zero(); 2];
        let mut status = vec![AgentStatus::Dormant; 2];
        integrate(&ctx, &mut pos_out, &mut vel_out, &mut status);

        assert_eq!(status[1], AgentStatus::NonFinite);
        assert_eq!(pos_out[1], Vec2::new(100.0, 100.0));
        assert!(pos_out.iter().all(|p| p.is_finite()));
        assert!(vel_out.iter().all(|v| v.is_finite()));
        assert_ne!(status[0], AgentStatus::NonFinite);
    }

    #[test]
    fn dormant_slots_copy_through() {
        let f = Fixture::new(vec![Vec2::new(50.0, 50.0), Vec2::new(70.0, 30.0)]);
        let mut ctx = f.ctx();
        ctx.active_count = 1;
        let mut pos_out = vec![Vec2::zero(); 2];
        let mut vel_out = vec![Vec2::new(1.0, 1.0); 2];
        let mut status = vec![AgentStatus::Targeted; 2];
        integrate(&ctx, &mut pos_out, &mut vel_out, &mut status);
        assert_eq!(pos_out[1], Vec2::new(70.0, 30.0));
        assert_eq!(vel_out[1], Vec2::zero());
        assert_eq!(status[1], AgentStatus::Dormant);
    }
}
