//! hearthd: heating plant controller daemon.
//!
//! Loads a plant description, builds the plant against the I/O backend and
//! runs the fixed-period control loop. The simulated backend stands in for
//! the hardware board; every sensor and relay referenced by the project is
//! registered on it at startup.

use clap::{Parser, Subcommand};
use hearth_core::{Clock, Temp, Ticks};
use hearth_hal::{FileStore, Hal, JsonlSink, SimIo};
use hearth_plant::{Runtime, RuntimeConfig};
use hearth_project::{ProjectDef, schema};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "hearthd")]
#[command(about = "hearth - residential heating plant controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a plant description
    Validate {
        /// Path to the plant YAML file
        project_path: PathBuf,
    },
    /// Run the control loop against the simulated backend
    Run {
        /// Path to the plant YAML file
        project_path: PathBuf,
        /// Control tick period in milliseconds
        #[arg(long, default_value_t = 1000)]
        period_ms: u64,
        /// Stop after this many ticks (runs forever by default)
        #[arg(long)]
        ticks: Option<u64>,
        /// State directory (defaults to .hearth next to the project)
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { project_path } => cmd_validate(&project_path),
        Commands::Run {
            project_path,
            period_ms,
            ticks,
            state_dir,
        } => cmd_run(&project_path, period_ms, ticks, state_dir),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn cmd_validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let project = hearth_project::load(path)?;
    info!(
        project = %project.name,
        models = project.models.len(),
        pumps = project.pumps.len(),
        valves = project.valves.len(),
        hcircuits = project.hcircuits.len(),
        dhwts = project.dhwts.len(),
        heatsources = project.heatsources.len(),
        "project is valid"
    );
    Ok(())
}

fn cmd_run(
    path: &Path,
    period_ms: u64,
    ticks: Option<u64>,
    state_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let project = hearth_project::load(path)?;

    let io = Arc::new(SimIo::new());
    register_points(&io, &project);
    let hal = Hal::new(io.clone(), io.clone());

    let built = hearth_project::build(&project, &hal)?;

    let state_dir = state_dir.unwrap_or_else(|| {
        path.parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".hearth")
    });
    let storage = Arc::new(FileStore::new(state_dir.clone())?);
    let sink = Arc::new(JsonlSink::new(state_dir.join("log.jsonl")));

    let mut runtime = Runtime::new(
        RuntimeConfig {
            tick_period: Ticks::from_millis(period_ms),
            ..RuntimeConfig::default()
        },
        built.plant,
        hal,
        built.scheduler,
        built.models,
        storage,
    )
    .with_sink(sink);

    let clock = Clock::new();
    let failures = runtime.online(clock.now())?;
    if failures > 0 {
        warn!(failures, "some entities failed bring-up, continuing degraded");
    }
    info!(project = %project.name, period_ms, "control loop starting");

    let mut count = 0u64;
    loop {
        let started = clock.now();
        match runtime.tick(started) {
            Ok(alarms) => {
                for alarm in alarms {
                    warn!(alarm = %alarm.message, "active alarm");
                }
            }
            Err(err) => error!(%err, "control tick failed"),
        }

        count += 1;
        if ticks.is_some_and(|n| count >= n) {
            break;
        }
        let elapsed = clock.now().since(started);
        let period = runtime.tick_period();
        if elapsed < period {
            std::thread::sleep(std::time::Duration::from_millis(
                (period - elapsed).as_millis(),
            ));
        }
    }

    runtime.offline(clock.now());
    Ok(())
}

/// Register every sensor and relay the project references on the simulated
/// backend. Sensors start at 20 °C; a real hardware backend would discover
/// its points from its own configuration instead.
fn register_points(io: &SimIo, project: &ProjectDef) {
    let ambient = Temp::celsius(20.0);
    let add_sensor = |name: &str| {
        use hearth_hal::Inputs;
        if Inputs::resolve(io, name).is_none() {
            io.add_sensor(name, ambient);
        }
    };
    for model in &project.models {
        add_sensor(&model.outdoor_sensor);
    }
    for valve in &project.valves {
        if let schema::ValveKindDef::Mix {
            out_sensor,
            hot_sensor,
            cold_sensor,
            ..
        } = &valve.kind
        {
            add_sensor(out_sensor);
            for s in [hot_sensor, cold_sensor].into_iter().flatten() {
                add_sensor(s);
            }
        }
    }
    for circuit in &project.hcircuits {
        add_sensor(&circuit.outgoing_sensor);
        for s in [&circuit.return_sensor, &circuit.ambient_sensor]
            .into_iter()
            .flatten()
        {
            add_sensor(s);
        }
    }
    for dhwt in &project.dhwts {
        for s in [&dhwt.top_sensor, &dhwt.bottom_sensor, &dhwt.win_sensor]
            .into_iter()
            .flatten()
        {
            add_sensor(s);
        }
    }
    for hs in &project.heatsources {
        let schema::HeatBackendDef::Boiler {
            boiler_sensor,
            return_sensor,
            ..
        } = &hs.backend;
        add_sensor(boiler_sensor);
        if let Some(s) = return_sensor {
            add_sensor(s);
        }
    }

    let add_relay = |name: &str| {
        use hearth_hal::Outputs;
        if Outputs::resolve(io, name).is_none() {
            io.add_relay(name);
        }
    };
    for pump in &project.pumps {
        add_relay(&pump.relay);
    }
    for valve in &project.valves {
        match &valve.motor {
            schema::ValveMotorDef::ThreeWay {
                open_relay,
                close_relay,
            } => {
                add_relay(open_relay);
                add_relay(close_relay);
            }
            schema::ValveMotorDef::TwoWay { trigger_relay } => add_relay(trigger_relay),
        }
    }
    for dhwt in &project.dhwts {
        if let Some(r) = &dhwt.selfheater_relay {
            add_relay(r);
        }
    }
    for hs in &project.heatsources {
        let schema::HeatBackendDef::Boiler { burner_relay, .. } = &hs.backend;
        add_relay(burner_relay);
    }
}
