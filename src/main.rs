use anyhow::{Context, Result};
use clap::Parser;
use flock_common::{SimulationConfig, Snapshot};
use flock_engine::FlockSimulation;
use log::{debug, error, info, trace, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless flocking engine driven by scripted bright-pixel scenes")]
struct Args {
    /// Path to the simulation config.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override `engine.seed` from the config.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting flocking engine...");

    // --- Load Configuration ---
    let mut config = SimulationConfig::load(&args.config)?;
    if let Some(seed) = args.seed {
        info!("Seed overridden from the command line: {}", seed);
        config.engine.seed = seed;
    }
    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize Simulation ---
    let mut sim = FlockSimulation::new(config)?;
    info!(
        "Engine ready: pool of {} agents on a {}x{} plane.",
        sim.config().universe.pool_capacity,
        sim.config().universe.width,
        sim.config().universe.height
    );
    debug!("Controller: {:#?}", sim.config().controller);

    // --- Simulation Loop ---
    let tick_rate = sim.config().timing.tick_rate_hz;
    let total_ticks = sim.total_ticks();
    let mut record_interval_ticks = (sim.config().timing.record_interval_secs * tick_rate).round() as u64;
    if record_interval_ticks == 0 {
        warn!(
            "Record interval ({:.3} s) is shorter than one tick. Recording every tick.",
            sim.config().timing.record_interval_secs
        );
        record_interval_ticks = 1;
    }
    info!("Recording snapshot every {} ticks ({:.2} s).", record_interval_ticks, record_interval_ticks as f32 / tick_rate);

    info!("Starting simulation loop for {} ticks...", total_ticks);
    let start_time = Instant::now();
    let mut previous_print_time = start_time;
    let print_interval_secs = 5.0;

    for tick in 0..total_ticks {
        let tick_start = Instant::now();
        let metrics = match sim.step() {
            Ok(metrics) => metrics,
            Err(e) => {
                error!("Error during tick {}: {}", tick + 1, e);
                anyhow::bail!("Simulation tick failed.");
            }
        };
        let tick_duration = tick_start.elapsed();

        let now = Instant::now();
        let should_print_status = now.duration_since(previous_print_time).as_secs_f64() >= print_interval_secs;
        let is_record_tick = (tick + 1) % record_interval_ticks == 0;
        let is_last_tick = tick + 1 == total_ticks;

        if should_print_status || is_record_tick || is_last_tick {
            info!(
                "Tick [{}/{}] ({:.2} s) | Active: {} | Targets: {} | Assigned: {} | Tick Time: {:6.2} ms | Elapsed: {:.2} s",
                tick + 1,
                total_ticks,
                sim.time_secs(),
                metrics.active_count,
                metrics.target_count,
                metrics.assigned,
                tick_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = now;

            if is_record_tick || is_last_tick {
                if let Err(e) = sim.record_snapshot() {
                    error!("Error recording snapshot at tick {}: {}", tick + 1, e);
                    anyhow::bail!("Failed to record snapshot.");
                }
            }
        } else {
            trace!("Tick [{}/{}] completed in {:.2} ms", tick + 1, total_ticks, tick_duration.as_secs_f64() * 1000.0);
        }
    }

    info!(
        "Simulation finished in {:.3} seconds ({} ticks, {:.2} s simulated).",
        start_time.elapsed().as_secs_f64(),
        sim.current_tick(),
        sim.time_secs()
    );
    match sim.engine().tuning() {
        Ok(tuning) => debug!("Final tuning: {:?}", tuning),
        Err(e) => warn!("Final tuning unavailable: {}", e),
    }

    // --- Save Recorded Data ---
    let output = sim.config().output.clone();
    if output.save_stats {
        let format = output.format.as_deref().unwrap_or("json");
        save_snapshots(sim.get_recorded_snapshots(), &output.base_filename, format)?;
    } else {
        info!("Skipping saving snapshots as per config (save_stats is false).");
    }

    if output.save_positions {
        let filename = format!("{}_final_positions.csv", output.base_filename);
        let mut writer = csv::Writer::from_path(&filename)
            .with_context(|| format!("Failed to create CSV file '{}'", filename))?;
        writer.write_record(["slot", "x", "y"])?;
        for (slot, (x, y)) in sim.get_results()?.into_iter().enumerate() {
            writer.write_record(&[slot.to_string(), format!("{:.4}", x), format!("{:.4}", y)])?;
        }
        writer.flush()?;
        info!("Final positions saved to {}", filename);
    } else {
        info!("Skipping saving final positions as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}

/// Writes every recorded snapshot in one of the supported formats.
fn save_snapshots(snapshots: &[Snapshot], base_filename: &str, format: &str) -> Result<()> {
    let format = match format {
        "json" | "bincode" | "messagepack" => format,
        other => {
            error!("Unknown output format: {}. Using JSON instead.", other);
            "json"
        }
    };
    let extension = match format {
        "bincode" => "bin",
        "messagepack" => "msgpack",
        _ => "json",
    };
    let filename = format!("{}_snapshots.{}", base_filename, extension);
    let file = File::create(&filename).with_context(|| format!("Failed to create snapshot file '{}'", filename))?;
    let mut writer = BufWriter::new(file);

    match format {
        "bincode" => bincode::serialize_into(&mut writer, snapshots).context("Failed to encode snapshots as bincode")?,
        "messagepack" => {
            rmp_serde::encode::write(&mut writer, snapshots).context("Failed to encode snapshots as MessagePack")?
        }
        _ => serde_json::to_writer(&mut writer, snapshots).context("Failed to encode snapshots as JSON")?,
    }
    writer.flush()?;
    info!("{} snapshots saved to {} ({} format)", snapshots.len(), filename, format);
    Ok(())
}
