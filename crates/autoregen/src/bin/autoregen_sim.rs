//! # AUTOREGEN Simulation
//!
//! Runs the regeneration service against a generated in-memory world:
//! terrain is captured, agents wander in, a claim is staked, the world is
//! mined at random, then regeneration restores everything unprotected.
//!
//! ## Usage
//!
//! ```bash
//! autoregen_sim --config autoregen.toml --seed 42 --agents 3 --mine 5000
//! RUST_LOG=debug autoregen_sim --interval-ticks 200 --warning-ticks 40 --duration 10
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use autoregen::{RegenService, ServiceOptions};
use autoregen_core::memory::{MemoryAgents, MemoryClaims, MemoryWorld, RecordingSink};
use autoregen_core::{
    Agent, CellAddress, CellRecord, Claim, CycleTiming, HostServices, RegenConfig, VolumeId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

/// Side of the generated world, in cells.
const WORLD_SIDE: i32 = 128;

struct Args {
    config: Option<PathBuf>,
    seed: u64,
    agents: u64,
    mine: u64,
    interval_ticks: Option<u64>,
    warning_ticks: Option<u64>,
    duration_secs: u64,
}

fn parse_args() -> Option<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config: None,
        seed: 42,
        agents: 3,
        mine: 5_000,
        interval_ticks: None,
        warning_ticks: None,
        duration_secs: 0,
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--config" | "-c" => {
                parsed.config = value.map(PathBuf::from);
                i += 1;
            }
            "--seed" | "-s" => {
                parsed.seed = value.and_then(|v| v.parse().ok()).unwrap_or(42);
                i += 1;
            }
            "--agents" | "-a" => {
                parsed.agents = value.and_then(|v| v.parse().ok()).unwrap_or(3);
                i += 1;
            }
            "--mine" | "-m" => {
                parsed.mine = value.and_then(|v| v.parse().ok()).unwrap_or(5_000);
                i += 1;
            }
            "--interval-ticks" => {
                parsed.interval_ticks = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "--warning-ticks" => {
                parsed.warning_ticks = value.and_then(|v| v.parse().ok());
                i += 1;
            }
            "--duration" | "-d" => {
                parsed.duration_secs = value.and_then(|v| v.parse().ok()).unwrap_or(0);
                i += 1;
            }
            "--help" | "-h" => {
                println!("Usage: autoregen_sim [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>        TOML configuration (default: built-in)");
                println!("  -s, --seed <SEED>          World seed (default: 42)");
                println!("  -a, --agents <NUM>         Agents placed per volume (default: 3)");
                println!("  -m, --mine <NUM>           Cells mined per volume (default: 5000)");
                println!("      --interval-ticks <N>   Override the cycle interval");
                println!("      --warning-ticks <N>    Override the warning lead");
                println!("  -d, --duration <SECS>      Keep the scheduler running N seconds");
                println!("  -h, --help                 Show this help");
                return None;
            }
            other => eprintln!("Ignoring unknown argument: {other}"),
        }
        i += 1;
    }
    Some(parsed)
}

/// Layered terrain: stone, dirt, grass, with ore veins carrying aux data.
fn generate_terrain(world: &MemoryWorld, volume: &VolumeId, rng: &mut StdRng) {
    for x in 0..WORLD_SIDE {
        for z in 0..WORLD_SIDE {
            let height = rng.gen_range(8..12);
            for y in 0..height {
                let record = if y == height - 1 {
                    CellRecord::new(2)
                } else if y >= height - 3 {
                    CellRecord::new(3)
                } else if rng.gen_bool(0.03) {
                    CellRecord::with_aux(15, rng.gen_range(1..4))
                } else {
                    CellRecord::new(1)
                };
                world.set(volume, CellAddress::new(x, y, z), record);
            }
        }
    }
}

fn random_column(rng: &mut StdRng) -> (i32, i32) {
    (rng.gen_range(0..WORLD_SIDE), rng.gen_range(0..WORLD_SIDE))
}

fn mine(world: &MemoryWorld, volume: &VolumeId, rng: &mut StdRng, cells: u64) {
    for _ in 0..cells {
        let (x, z) = random_column(rng);
        let y = rng.gen_range(0..12);
        world.set(volume, CellAddress::new(x, y, z), CellRecord::EMPTY);
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         AUTOREGEN SIMULATION                                     ║");
    println!("║         CAPTURE, MINE, REGENERATE                                ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let Some(args) = parse_args() else {
        return;
    };

    let config = args
        .config
        .as_ref()
        .map_or_else(RegenConfig::default, |path| RegenConfig::load_or_default(path));
    let mut options = ServiceOptions::from_config(&config);

    if args.interval_ticks.is_some() || args.warning_ticks.is_some() {
        let interval = args.interval_ticks.unwrap_or(options.settings.timing.interval_ticks());
        let warning = args.warning_ticks.unwrap_or(interval / 5);
        match CycleTiming::new(interval, warning) {
            Ok(timing) => options.settings.timing = timing,
            Err(e) => eprintln!("Ignoring timing override: {e}"),
        }
    }
    let snapshot_dir = std::env::temp_dir().join(format!("autoregen_sim_{}", args.seed));
    options.snapshot_dir = snapshot_dir.clone();

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Volumes:            {:?}", config.managed_volumes().iter().map(VolumeId::as_str).collect::<Vec<_>>());
    println!("│ Protected:          {:?}", config.protected_volumes);
    println!("│ Interval:           {} ticks", options.settings.timing.interval_ticks());
    println!("│ Warning:            {} ticks", options.settings.timing.warning_lead_ticks());
    println!("│ Buffer Radius:      {} regions", options.settings.buffer_radius);
    println!("│ Snapshots:          {}", snapshot_dir.display());
    println!("│ Seed:               {}", args.seed);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let mut rng = StdRng::seed_from_u64(args.seed);
    let world = Arc::new(MemoryWorld::new());
    let agents = Arc::new(MemoryAgents::new());
    let claims = Arc::new(MemoryClaims::new());

    for volume in &options.volumes {
        generate_terrain(&world, volume, &mut rng);
        println!("Generated {}: {} cells", volume, world.cell_count(volume));
    }

    let host = HostServices {
        volume: world.clone(),
        agents: agents.clone(),
        claims: Some(claims.clone()),
        notifier: Arc::new(RecordingSink::new()),
    };
    let volumes = options.volumes.clone();

    let service = match RegenService::start(options, host) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Cannot start: {e}");
            return;
        }
    };

    // Status waits for the baseline of each volume
    for status in service.status_all().await {
        println!("Baseline of {}: {:?} cells", status.volume, status.snapshot_cells);
    }

    let mut claim_id = 0;
    for volume in &volumes {
        for id in 0..args.agents {
            let (x, z) = random_column(&mut rng);
            agents.place(volume, Agent { id, position: CellAddress::new(x, 64, z) });
        }
        claim_id += 1;
        claims.add(Claim::new(
            claim_id,
            volume.clone(),
            CellAddress::new(0, 0, 0),
            CellAddress::new(31, 0, 31),
        ));
        mine(&world, volume, &mut rng, args.mine);
    }
    println!("Placed {} agent(s) and one claim per volume, mined {} cells each", args.agents, args.mine);
    println!();

    let start = Instant::now();
    for volume in &volumes {
        match service.force(volume).await {
            Ok(cycle) => println!("Forced cycle {cycle} of {volume}"),
            Err(e) => println!("Force of {volume} refused: {e}"),
        }
    }

    let deadline = start + Duration::from_secs(args.duration_secs.max(1));
    let give_up = deadline + Duration::from_secs(30);
    loop {
        let statuses = service.status_all().await;
        let settled = statuses.iter().all(|s| s.last_report.is_some());
        let now = Instant::now();
        if (settled && now >= deadline) || now >= give_up {
            for status in &statuses {
                println!("{status}");
                println!();
            }
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    println!("Restores issued: {}", world.restore_count());
    service.shutdown().await;
    if let Err(e) = std::fs::remove_dir_all(&snapshot_dir) {
        tracing::debug!("Could not remove {}: {}", snapshot_dir.display(), e);
    }
}
