use crate::engine::{Engine, TickMetrics};
use crate::sampler::BrightPixelSampler;
use anyhow::Result;
use flock_common::{SceneConfig, ShapeConfig, SimulationConfig, Snapshot, Vec2};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;
use log::{debug, info, warn};

const MAX_EXPECTED_NEIGHBORS: usize = 20; // Histogram size; the last bin collects the overflow
const BRIGHT: Rgba<u8> = Rgba([255, 255, 255, 255]);
const DARK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Headless driver: plays the configured scenes into an [`Engine`] at frame cadence and
/// records snapshots.
pub struct FlockSimulation {
    config: SimulationConfig,
    engine: Engine,
    sampler: BrightPixelSampler,
    /// Reused raster the active scene is drawn into before sampling.
    frame: RgbaImage,
    /// Ticks between two sampled frames.
    ticks_per_frame: u64,
    current_tick: u64,
    last_scene: Option<usize>,
    recorded_snapshots: Vec<Snapshot>,
}

impl FlockSimulation {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let mut engine = Engine::new(config.engine.clone(), config.controller.clone())?;
        engine.initialize(config.universe.pool_capacity as usize, config.universe.width, config.universe.height)?;
        let sampler = BrightPixelSampler::from_config(&config.sampler)?;
        let frame = RgbaImage::from_pixel(config.sampler.frame_width, config.sampler.frame_height, DARK);
        let ticks_per_frame = ((config.timing.tick_rate_hz / config.timing.frame_rate_hz).round() as u64).max(1);

        Ok(FlockSimulation {
            config,
            engine,
            sampler,
            frame,
            ticks_per_frame,
            current_tick: 0,
            last_scene: None,
            recorded_snapshots: Vec::new(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn time_secs(&self) -> f32 {
        self.current_tick as f32 / self.config.timing.tick_rate_hz
    }

    /// Total ticks needed to cover `timing.total_secs`.
    pub fn total_ticks(&self) -> u64 {
        (self.config.timing.total_secs * self.config.timing.tick_rate_hz).ceil() as u64
    }

    /// Advances one tick, first feeding a new frame when one is due.
    pub fn step(&mut self) -> Result<TickMetrics> {
        if self.current_tick % self.ticks_per_frame == 0 {
            let sample_time = self.time_secs() + self.config.timing.lookahead_secs;
            self.ingest_frame(sample_time)?;
        }
        let metrics = self.engine.tick()?;
        self.current_tick += 1;
        Ok(metrics)
    }

    /// Rasterizes and samples the scene visible at `sample_time`, then hands the points to the
    /// engine. Before the first scene starts there is nothing to show and no frame is sent.
    fn ingest_frame(&mut self, sample_time: f32) -> Result<()> {
        let Some((index, scene)) = self.config.scene_at(sample_time) else {
            return Ok(());
        };
        if self.last_scene != Some(index) {
            info!("Scene {} (from {:.2} s) now sampled at t+{:.2} s.", index, scene.start_secs, self.config.timing.lookahead_secs);
            self.last_scene = Some(index);
        }

        let (plane_w, plane_h) = (self.config.universe.width, self.config.universe.height);
        let mut points = render_scene(scene, &mut self.frame, plane_w, plane_h);
        points.extend(self.sampler.sample_image(&self.frame, plane_w, plane_h)?);

        let report = self.engine.set_targets(&points)?;
        if report.truncated > 0 || report.dropped_non_finite > 0 {
            warn!(
                "Frame at {:.2} s: kept {} targets, truncated {}, dropped {} non-finite.",
                sample_time, report.accepted, report.truncated, report.dropped_non_finite
            );
        } else {
            debug!("Frame at {:.2} s: {} targets ({} clamped).", sample_time, report.accepted, report.clamped);
        }
        Ok(())
    }

    /// Collects the engine's current state and metrics into a [`Snapshot`].
    pub fn record_snapshot(&mut self) -> Result<()> {
        let engine = &self.engine;
        let dims = engine.grid_dims()?;
        let metrics = engine.metrics()?;

        let mut crowding_distribution = vec![0u32; MAX_EXPECTED_NEIGHBORS];
        let mut max_neighbors = 0;
        for count in engine.crowding_counts()? {
            max_neighbors = max_neighbors.max(count);
            let bin = (count as usize).min(MAX_EXPECTED_NEIGHBORS - 1);
            crowding_distribution[bin] += 1;
        }
        if max_neighbors as usize >= MAX_EXPECTED_NEIGHBORS {
            debug!("Agent with {} close neighbors counted in the last histogram bin.", max_neighbors);
        }

        let positions = if self.config.output.save_positions_in_snapshot {
            Some(self.get_results()?)
        } else {
            None
        };

        let snapshot = Snapshot {
            tick: self.current_tick,
            time_secs: self.time_secs(),
            active_count: engine.active_count()? as u32,
            target_count: engine.target_count()? as u32,
            assigned_count: metrics.assigned as u32,
            tuning: engine.tuning()?,
            grid_cols: dims.cols,
            grid_rows: dims.rows,
            grid_cell_size: dims.cell_size,
            cell_occupancy: engine.cell_occupancy()?,
            crowding_distribution,
            positions,
        };
        debug!(
            "Recorded snapshot at {:.2} s: {} active, {} targets, {} assigned.",
            snapshot.time_secs, snapshot.active_count, snapshot.target_count, snapshot.assigned_count
        );
        self.recorded_snapshots.push(snapshot);
        Ok(())
    }

    pub fn get_recorded_snapshots(&self) -> &[Snapshot] {
        &self.recorded_snapshots
    }

    /// Current (x, y) of every active agent, in slot order.
    pub fn get_results(&self) -> Result<Vec<(f32, f32)>> {
        Ok(self.engine.positions()?.iter().map(|p| (p.x, p.y)).collect())
    }
}

/// Draws the scene's filled shapes white on black into `frame` (scaled from plane to frame
/// coordinates) and returns the scene's raw point shapes, which bypass the raster.
pub fn render_scene(scene: &SceneConfig, frame: &mut RgbaImage, plane_width: f32, plane_height: f32) -> Vec<Vec2> {
    for pixel in frame.pixels_mut() {
        *pixel = DARK;
    }
    let sx = frame.width() as f32 / plane_width;
    let sy = frame.height() as f32 / plane_height;

    let mut raw = Vec::new();
    for shape in &scene.shapes {
        match shape {
            ShapeConfig::Disc { x, y, radius } => {
                let center = ((x * sx).round() as i32, (y * sy).round() as i32);
                let r = (radius * sx.min(sy)).round() as i32;
                if r >= 0 {
                    draw_filled_circle_mut(frame, center, r, BRIGHT);
                }
            }
            ShapeConfig::Rect { x, y, width, height } => {
                let w = (width * sx).round();
                let h = (height * sy).round();
                if w >= 1.0 && h >= 1.0 {
                    let rect = Rect::at((x * sx).round() as i32, (y * sy).round() as i32).of_size(w as u32, h as u32);
                    draw_filled_rect_mut(frame, rect, BRIGHT);
                }
            }
            ShapeConfig::Points { points } => raw.extend(points.iter().map(|&p| Vec2::from(p))),
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        [universe]
        width = 400.0
        height = 300.0
        pool_capacity = 200

        [timing]
        tick_rate_hz = 30.0
        frame_rate_hz = 10.0
        total_secs = 1.0
        record_interval_secs = 0.5
        lookahead_secs = 0.35

        [controller]
        agents_per_target = 1.0
        max_active_step = 25

        [sampler]
        frame_width = 200
        frame_height = 150
        stride = 4

        [[scenes]]
        start_secs = 0.0
        shapes = [{ kind = "points", points = [[50.0, 50.0], [60.0, 50.0]] }]

        [[scenes]]
        start_secs = 0.5
        shapes = [{ kind = "disc", x = 200.0, y = 150.0, radius = 40.0 }]

        [output]
        base_filename = "test"
        save_positions = false
        save_stats = false
        save_positions_in_snapshot = true
    "#;

    #[test]
    fn rendered_disc_is_sampled_inside_its_bounds() {
        let scene = SceneConfig { start_secs: 0.0, shapes: vec![ShapeConfig::Disc { x: 200.0, y: 150.0, radius: 40.0 }] };
        let mut frame = RgbaImage::new(200, 150);
        let raw = render_scene(&scene, &mut frame, 400.0, 300.0);
        assert!(raw.is_empty());

        let points = BrightPixelSampler::new(128, 4).unwrap().sample_image(&frame, 400.0, 300.0).unwrap();
        assert!(!points.is_empty());
        assert!(points.iter().all(|p| p.distance(Vec2::new(200.0, 150.0)) <= 42.0));
    }

    #[test]
    fn rendering_clears_the_previous_scene() {
        let mut frame = RgbaImage::new(20, 20);
        let rect = SceneConfig { start_secs: 0.0, shapes: vec![ShapeConfig::Rect { x: 0.0, y: 0.0, width: 10.0, height: 10.0 }] };
        render_scene(&rect, &mut frame, 20.0, 20.0);
        assert_eq!(*frame.get_pixel(5, 5), BRIGHT);

        let empty = SceneConfig { start_secs: 0.0, shapes: Vec::new() };
        render_scene(&empty, &mut frame, 20.0, 20.0);
        assert!(frame.pixels().all(|p| *p == DARK));
    }

    #[test]
    fn driver_follows_scenes_with_lookahead() {
        let config = SimulationConfig::from_toml_str(CONFIG).unwrap();
        let mut sim = FlockSimulation::new(config).unwrap();
        assert_eq!(sim.total_ticks(), 30);

        sim.step().unwrap();
        assert_eq!(sim.engine().target_count().unwrap(), 2);

        // Lookahead 0.35 s: the disc scene (0.5 s) is first sampled at tick 6 (0.2 s).
        for _ in 1..7 {
            sim.step().unwrap();
        }
        assert!(sim.engine().target_count().unwrap() > 2);

        sim.record_snapshot().unwrap();
        let snapshot = &sim.get_recorded_snapshots()[0];
        assert_eq!(snapshot.tick, 7);
        assert_eq!(snapshot.positions.as_ref().map(Vec::len), Some(snapshot.active_count as usize));
        assert_eq!(snapshot.crowding_distribution.iter().sum::<u32>(), snapshot.active_count);
        assert_eq!(snapshot.cell_occupancy.iter().sum::<u32>(), snapshot.active_count);
    }
}
