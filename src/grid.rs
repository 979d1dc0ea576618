use flock_common::Vec2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Grid geometry exposed to renderers for density overlays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridDims {
    pub cols: u32,
    pub rows: u32,
    pub cell_size: f32,
}

/// Raised when a rebuild scatters a different number of entries than it counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterMismatch {
    pub expected: usize,
    pub written: usize,
}

/// One bucket set (agents or targets) in counting-sort layout: `counts[c]` entries of cell `c`
/// live at `indices[starts[c]..starts[c] + counts[c]]`, in ascending input order.
#[derive(Debug, Default)]
struct Buckets {
    item_cells: Vec<u32>,
    counts: Vec<u32>,
    starts: Vec<u32>,
    indices: Vec<u32>,
}

impl Buckets {
    fn reset(&mut self, num_cells: usize) {
        self.counts.clear();
        self.counts.resize(num_cells, 0);
        self.starts.clear();
        self.starts.resize(num_cells, 0);
    }

    fn slice(&self, cell: u32) -> &[u32] {
        let cell = cell as usize;
        match (self.starts.get(cell), self.counts.get(cell)) {
            (Some(&start), Some(&count)) => {
                let end = (start.saturating_add(count) as usize).min(self.indices.len());
                &self.indices[(start as usize).min(end)..end]
            }
            _ => &[],
        }
    }

    /// Counting sort of `points` into cells. Returns the number of entries written.
    fn scatter(&mut self, points: &[Vec2], num_cells: usize, cell_of: impl Fn(Vec2) -> u32 + Sync) -> usize {
        self.reset(num_cells);

        // Phase 1: cell index per item (parallel).
        self.item_cells.resize(points.len(), 0);
        self.item_cells
            .par_iter_mut()
            .zip(points.par_iter())
            .for_each(|(cell_out, &pos)| *cell_out = cell_of(pos));

        // Phase 2: per-cell counts.
        for &cell in &self.item_cells {
            if let Some(count) = self.counts.get_mut(cell as usize) {
                *count += 1;
            }
        }

        // Phase 3: prefix sum into start offsets.
        let mut total = 0u32;
        for (start, &count) in self.starts.iter_mut().zip(self.counts.iter()) {
            *start = total;
            total += count;
        }

        // Phase 4: serial scatter keeps each bucket in ascending item order.
        self.indices.clear();
        self.indices.resize(total as usize, 0);
        let mut cursor = self.starts.clone();
        let mut written = 0;
        for (item, &cell) in self.item_cells.iter().enumerate() {
            if let Some(slot) = cursor.get_mut(cell as usize) {
                if let Some(out) = self.indices.get_mut(*slot as usize) {
                    *out = item as u32;
                    *slot += 1;
                    written += 1;
                }
            }
        }
        written
    }
}

/// Uniform bucket grid over the plane, rebuilt from scratch every tick.
///
/// Cells are square with side `cell_size`; `cols`/`rows` are rounded up so the grid covers the
/// whole plane. Positions on or past the far edge land in the last row/column. Index arithmetic
/// is bounds-checked and never wraps around.
#[derive(Debug)]
pub struct SpatialGrid {
    width: f32,
    height: f32,
    cell_size: f32,
    inv_cell_size: f32,
    cols: u32,
    rows: u32,
    agents: Buckets,
    targets: Buckets,
    occupied_cells: u32,
}

impl SpatialGrid {
    pub fn new(width: f32, height: f32, cell_size: f32) -> Self {
        let mut grid = SpatialGrid {
            width,
            height,
            cell_size: 0.0,
            inv_cell_size: 0.0,
            cols: 1,
            rows: 1,
            agents: Buckets::default(),
            targets: Buckets::default(),
            occupied_cells: 0,
        };
        grid.resize(cell_size);
        grid.agents.reset(grid.num_cells());
        grid.targets.reset(grid.num_cells());
        grid
    }

    fn resize(&mut self, cell_size: f32) {
        self.cell_size = cell_size;
        self.inv_cell_size = if cell_size > 1e-9 { 1.0 / cell_size } else { 0.0 };
        self.cols = ((self.width * self.inv_cell_size).ceil() as u32).max(1);
        self.rows = ((self.height * self.inv_cell_size).ceil() as u32).max(1);
    }

    /// Clears all buckets and re-inserts every agent and every target.
    ///
    /// `agent_positions` is indexed by agent slot. A different `cell_size` re-derives the grid
    /// dimensions. Errors if the scatter wrote a different number of entries than it was given,
    /// which means the bucket layout is corrupt.
    pub fn rebuild(
        &mut self,
        agent_positions: &[Vec2],
        target_positions: &[Vec2],
        cell_size: f32,
    ) -> Result<(), ScatterMismatch> {
        if cell_size != self.cell_size {
            self.resize(cell_size);
        }
        let num_cells = self.num_cells();
        let (cols, rows, inv) = (self.cols, self.rows, self.inv_cell_size);
        let cell_of = move |pos: Vec2| cell_index(pos, inv, cols, rows);

        let written = self.agents.scatter(agent_positions, num_cells, cell_of);
        if written != agent_positions.len() {
            return Err(ScatterMismatch { expected: agent_positions.len(), written });
        }
        let written = self.targets.scatter(target_positions, num_cells, cell_of);
        if written != target_positions.len() {
            return Err(ScatterMismatch { expected: target_positions.len(), written });
        }

        self.occupied_cells = self.agents.counts.iter().filter(|&&c| c > 0).count() as u32;
        Ok(())
    }

    /// Row-major index of the cell covering `pos`.
    #[inline(always)]
    pub fn cell_of(&self, pos: Vec2) -> u32 {
        cell_index(pos, self.inv_cell_size, self.cols, self.rows)
    }

    /// (column, row) of a cell index.
    #[inline(always)]
    pub fn cell_coords(&self, cell: u32) -> (u32, u32) {
        (cell % self.cols, cell / self.cols)
    }

    /// Cell index at (column, row), if inside the grid.
    #[inline(always)]
    pub fn cell_at(&self, col: i64, row: i64) -> Option<u32> {
        if col >= 0 && col < self.cols as i64 && row >= 0 && row < self.rows as i64 {
            Some((row * self.cols as i64 + col) as u32)
        } else {
            None
        }
    }

    /// The in-bounds cells of the 3x3 window centered on `cell`, row by row.
    pub fn window(&self, cell: u32) -> impl Iterator<Item = u32> {
        let (cols, rows) = (self.cols as i64, self.rows as i64);
        let valid = (cell as usize) < self.num_cells();
        let cx = (cell % self.cols) as i64;
        let cy = (cell / self.cols) as i64;
        (-1i64..=1).flat_map(move |dy| {
            (-1i64..=1).filter_map(move |dx| {
                let x = cx + dx;
                let y = cy + dy;
                if valid && x >= 0 && x < cols && y >= 0 && y < rows {
                    Some((y * cols + x) as u32)
                } else {
                    None
                }
            })
        })
    }

    /// Agent slots in the 3x3 window around `cell`. Single pass; call again for a fresh sequence.
    pub fn neighbors_of(&self, cell: u32) -> impl Iterator<Item = u32> + '_ {
        self.window(cell).flat_map(move |c| self.agents_in(c).iter().copied())
    }

    /// Agent slots inside `cell` only.
    pub fn agents_in(&self, cell: u32) -> &[u32] {
        self.agents.slice(cell)
    }

    /// Indices (into the rebuild's target slice) of the targets inside `cell`.
    pub fn targets_of(&self, cell: u32) -> &[u32] {
        self.targets.slice(cell)
    }

    /// Agent count in `cell`; zero for out-of-range cells.
    pub fn density_of(&self, cell: u32) -> u32 {
        self.agents.counts.get(cell as usize).copied().unwrap_or(0)
    }

    /// Per-cell agent counts, row-major.
    pub fn occupancy(&self) -> &[u32] {
        &self.agents.counts
    }

    /// Per-cell target counts, row-major.
    pub fn target_occupancy(&self) -> &[u32] {
        &self.targets.counts
    }

    /// Mean agents per occupied cell; zero when no cell holds an agent.
    pub fn mean_density(&self) -> f32 {
        if self.occupied_cells == 0 {
            return 0.0;
        }
        self.agents.indices.len() as f32 / self.occupied_cells as f32
    }

    pub fn dims(&self) -> GridDims {
        GridDims { cols: self.cols, rows: self.rows, cell_size: self.cell_size }
    }

    #[inline(always)]
    pub fn num_cells(&self) -> usize {
        self.cols as usize * self.rows as usize
    }
}

#[inline(always)]
fn cell_index(pos: Vec2, inv_cell_size: f32, cols: u32, rows: u32) -> u32 {
    // `as u32` saturates: negatives and NaN map to 0, overflow to u32::MAX before the clamp.
    let col = ((pos.x * inv_cell_size).floor() as u32).min(cols - 1);
    let row = ((pos.y * inv_cell_size).floor() as u32).min(rows - 1);
    row * cols + col
}
