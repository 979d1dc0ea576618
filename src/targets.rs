use crate::grid::SpatialGrid;
use flock_common::{TuningParams, Vec2};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// An agent's claim on one target point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    /// Where the agent is steering.
    pub point: Vec2,
    /// Grid cell of `point`; the cell whose capacity this claim counts against.
    pub cell: u32,
    /// Index of the claimed point in the target set of `generation`.
    pub target: u32,
    pub generation: u64,
}

/// What `set_targets` did with its input. None of these conditions fail the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Points kept as assignable targets.
    pub accepted: usize,
    /// Points dropped for non-finite coordinates (degenerate input).
    pub dropped_non_finite: usize,
    /// Points outside the plane that were clamped onto it.
    pub clamped: usize,
    /// Points dropped because the frame exceeded the target limit (capacity exceeded).
    pub truncated: usize,
}

/// Outcome of one assignment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssignStats {
    /// Active agents holding a target after the pass.
    pub assigned: usize,
    /// Claims made this pass through the outward cell search.
    pub redirected: usize,
    /// Old claims carried over to the new frame by re-binding inside the same cell.
    pub rebound: usize,
    /// Claims dropped because their cell was over capacity or the frame changed under them.
    pub released: usize,
}

/// The assignable target set plus per-cell claim bookkeeping.
///
/// A frame's points replace the previous set wholesale. Each point can be claimed by at most
/// one agent, and at most `capacity_per_cell` agents hold claims inside one grid cell.
#[derive(Debug)]
pub struct TargetPool {
    width: f32,
    height: f32,
    max_targets: usize,
    capacity_per_cell: u32,
    points: Vec<Vec2>,
    claimed: Vec<bool>,
    /// Latest `set_targets` input not yet picked up by a tick.
    pending: Option<Vec<Vec2>>,
    generation: u64,
    /// The current set arrived since the last assignment pass.
    fresh: bool,
    redirect_radius: u32,
    /// Cell offsets searched by overflowing agents, nearest first.
    search_order: Vec<(i64, i64)>,
    assigned_per_cell: Vec<u32>,
    unclaimed_per_cell: Vec<u32>,
}

impl TargetPool {
    pub fn new(width: f32, height: f32, max_targets: usize, capacity_per_cell: u32, redirect_radius: u32) -> Self {
        TargetPool {
            redirect_radius,
            width,
            height,
            max_targets,
            capacity_per_cell,
            points: Vec::new(),
            claimed: Vec::new(),
            pending: None,
            generation: 0,
            fresh: false,
            search_order: search_order(redirect_radius),
            assigned_per_cell: Vec::new(),
            unclaimed_per_cell: Vec::new(),
        }
    }

    /// Stages a new frame's points. Only the most recent call before a tick is used.
    ///
    /// Non-finite points are dropped, points off the plane are clamped onto it, and anything
    /// beyond the target limit is truncated. A frame with nothing left carries no new targets:
    /// the current set, any staged frame and all claims stay as they are.
    pub fn set_targets(&mut self, points: &[Vec2]) -> IngestReport {
        let mut report = IngestReport::default();
        let mut accepted = Vec::with_capacity(points.len().min(self.max_targets));
        for &p in points {
            if !p.is_finite() {
                report.dropped_non_finite += 1;
                continue;
            }
            if accepted.len() >= self.max_targets {
                report.truncated += 1;
                continue;
            }
            let clamped = Vec2::new(p.x.clamp(0.0, self.width), p.y.clamp(0.0, self.height));
            if clamped != p {
                report.clamped += 1;
            }
            accepted.push(clamped);
        }
        report.accepted = accepted.len();

        if report.dropped_non_finite > 0 {
            debug!("Dropped {} target points with non-finite coordinates.", report.dropped_non_finite);
        }
        if report.truncated > 0 {
            warn!(
                "Frame carried {} target points; keeping the first {}.",
                report.accepted + report.truncated,
                self.max_targets
            );
        }
        if accepted.is_empty() {
            debug!("Frame carried no usable target points; keeping the current targets.");
            return report;
        }
        if self.pending.is_some() {
            debug!("Replacing target frame that was never ticked.");
        }
        self.pending = Some(accepted);
        report
    }

    /// Installs the staged frame, if any. Returns true when the target set changed.
    pub fn begin_tick(&mut self) -> bool {
        match self.pending.take() {
            Some(points) => {
                self.claimed.clear();
                self.claimed.resize(points.len(), false);
                self.points = points;
                self.generation += 1;
                self.fresh = true;
                true
            }
            None => false,
        }
    }

    /// Current assignable points, indexed as in `Assignment::target`.
    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// How many rings of cells an overflowing agent searches.
    pub fn redirect_radius(&self) -> u32 {
        self.redirect_radius
    }

    /// Claims per grid cell as of the last assignment pass.
    pub fn assigned_per_cell(&self) -> &[u32] {
        &self.assigned_per_cell
    }

    /// Gives a claim back, e.g. when its agent goes dormant.
    pub fn release(&mut self, assignment: &Assignment) {
        if let Some(n) = self.assigned_per_cell.get_mut(assignment.cell as usize) {
            *n = n.saturating_sub(1);
        }
        self.unclaim(assignment);
    }

    fn unclaim(&mut self, assignment: &Assignment) {
        if assignment.generation != self.generation {
            return;
        }
        if let Some(flag) = self.claimed.get_mut(assignment.target as usize) {
            if *flag {
                *flag = false;
                if let Some(n) = self.unclaimed_per_cell.get_mut(assignment.cell as usize) {
                    *n += 1;
                }
            }
        }
    }

    /// Hands targets to unassigned agents for this tick.
    ///
    /// `grid` must have been rebuilt from `positions` and [`points`](Self::points). Runs in slot
    /// order so the outcome is deterministic.
    ///
    /// 1. Existing claims are recounted per cell. When a new frame arrived, claims from the old
    ///    frame re-bind to the nearest free point in the same cell or are dropped. Claims kept
    ///    across an empty frame stay put.
    /// 2. An unassigned agent takes the nearest free point within the perception radius, if the
    ///    point's cell is under capacity.
    /// 3. Otherwise it scans cells outward from its own cell (nearest first, ties by lower row,
    ///    then lower column) for one under capacity, not crowded, and holding a free point.
    /// 4. Failing that it stays unassigned and follows the flow field this tick.
    pub fn assign(
        &mut self,
        grid: &SpatialGrid,
        positions: &[Vec2],
        assignments: &mut [Option<Assignment>],
        tuning: &TuningParams,
    ) -> AssignStats {
        let mut stats = AssignStats::default();
        let num_cells = grid.num_cells();
        let capacity = self.capacity_per_cell;

        self.assigned_per_cell.clear();
        self.assigned_per_cell.resize(num_cells, 0);
        self.unclaimed_per_cell.clear();
        self.unclaimed_per_cell.resize(num_cells, 0);
        for (idx, &claimed) in self.claimed.iter().enumerate() {
            if !claimed {
                if let Some(p) = self.points.get(idx) {
                    self.unclaimed_per_cell[grid.cell_of(*p) as usize] += 1;
                }
            }
        }

        // --- 1. Recount (and, on a new frame, re-bind) existing claims ---
        let rebinding = self.fresh && !self.is_empty();
        for (slot, entry) in assignments.iter_mut().enumerate() {
            let Some(mut current) = *entry else { continue };
            current.cell = grid.cell_of(current.point);

            if current.generation != self.generation && rebinding {
                let pos = positions.get(slot).copied().unwrap_or(current.point);
                match self.nearest_free_in(grid, current.cell, pos, None) {
                    Some(target) => {
                        self.claim(grid, target);
                        current.point = self.points[target as usize];
                        current.target = target;
                        current.generation = self.generation;
                        stats.rebound += 1;
                    }
                    None => {
                        *entry = None;
                        stats.released += 1;
                        continue;
                    }
                }
            }

            let count = &mut self.assigned_per_cell[current.cell as usize];
            if *count >= capacity {
                // Only reachable if capacity bookkeeping drifted; never exceed it.
                self.unclaim(&current);
                *entry = None;
                stats.released += 1;
                continue;
            }
            *count += 1;
            *entry = Some(current);
        }
        self.fresh = false;

        // --- 2-4. New claims for unassigned agents ---
        let mut free_left: usize = self.unclaimed_per_cell.iter().map(|&n| n as usize).sum();
        for (slot, entry) in assignments.iter_mut().enumerate() {
            if free_left == 0 {
                break;
            }
            if entry.is_some() {
                continue;
            }
            let Some(&pos) = positions.get(slot) else { continue };
            let home = grid.cell_of(pos);

            let mut choice = None;
            let mut best_dist_sq = tuning.perception_radius_sq();
            for cell in grid.window(home) {
                if let Some(target) = self.nearest_free_in(grid, cell, pos, Some(best_dist_sq)) {
                    best_dist_sq = pos.distance_squared(self.points[target as usize]);
                    choice = Some(target);
                }
            }
            let mut redirected = false;
            if let Some(target) = choice {
                let cell = grid.cell_of(self.points[target as usize]);
                if self.assigned_per_cell[cell as usize] >= capacity {
                    choice = None;
                }
            }
            if choice.is_none() {
                choice = self.redirect(grid, home, pos);
                redirected = choice.is_some();
            }

            if let Some(target) = choice {
                let point = self.points[target as usize];
                let cell = grid.cell_of(point);
                self.claim(grid, target);
                self.assigned_per_cell[cell as usize] += 1;
                free_left -= 1;
                *entry = Some(Assignment { point, cell, target, generation: self.generation });
                if redirected {
                    stats.redirected += 1;
                }
            }
        }

        stats.assigned = assignments.iter().filter(|a| a.is_some()).count();
        stats
    }

    /// First cell in search order that is under capacity, not crowded, and has a free point.
    fn redirect(&self, grid: &SpatialGrid, home: u32, pos: Vec2) -> Option<u32> {
        let capacity = self.capacity_per_cell;
        let (col, row) = grid.cell_coords(home);
        for &(dx, dy) in &self.search_order {
            let Some(cell) = grid.cell_at(col as i64 + dx, row as i64 + dy) else { continue };
            if self.unclaimed_per_cell[cell as usize] == 0
                || self.assigned_per_cell[cell as usize] >= capacity
                || grid.density_of(cell) >= capacity
            {
                continue;
            }
            if let Some(target) = self.nearest_free_in(grid, cell, pos, None) {
                return Some(target);
            }
        }
        None
    }

    /// Nearest unclaimed point of `cell` strictly closer than `within_sq` (if given).
    fn nearest_free_in(&self, grid: &SpatialGrid, cell: u32, pos: Vec2, within_sq: Option<f32>) -> Option<u32> {
        let mut best: Option<(u32, f32)> = None;
        for &idx in grid.targets_of(cell) {
            if self.claimed.get(idx as usize).copied().unwrap_or(true) {
                continue;
            }
            let d = pos.distance_squared(self.points[idx as usize]);
            if within_sq.is_some_and(|limit| d > limit) {
                continue;
            }
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((idx, d));
            }
        }
        best.map(|(idx, _)| idx)
    }

    fn claim(&mut self, grid: &SpatialGrid, target: u32) {
        self.claimed[target as usize] = true;
        let cell = grid.cell_of(self.points[target as usize]) as usize;
        self.unclaimed_per_cell[cell] = self.unclaimed_per_cell[cell].saturating_sub(1);
    }
}

/// Cell offsets within Chebyshev distance `radius`, the home cell first, then by squared
/// distance, ties broken by lower row then lower column.
fn search_order(radius: u32) -> Vec<(i64, i64)> {
    let r = radius as i64;
    let mut offsets: Vec<(i64, i64)> = (-r..=r).flat_map(|dy| (-r..=r).map(move |dx| (dx, dy))).collect();
    offsets.sort_by_key(|&(dx, dy)| (dx * dx + dy * dy, dy, dx));
    offsets
}
