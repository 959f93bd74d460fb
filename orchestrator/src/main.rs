//! `qa`: run goal-driven QA sessions from the command line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use orchestrator::agents::planner::Planner;
use orchestrator::core::types::{ConfigError, Goal, GoalHints, SessionStatus};
use orchestrator::exit_codes;
use orchestrator::io::config::{QaConfig, load_config, render_config, write_config};
use orchestrator::io::device::DeviceSurface;
use orchestrator::io::driver::CommandDevice;
use orchestrator::io::session_log::write_session;
use orchestrator::io::simulated::{Scenario, SimulatedDevice};
use orchestrator::logging;
use orchestrator::session::{CancelFlag, run_session};

#[derive(Parser)]
#[command(name = "qa", version, about = "Goal-driven QA sessions for mobile apps")]
struct Cli {
    /// Config file; defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "qa.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a session and print the evaluation report as JSON.
    Run {
        #[command(flatten)]
        goal: GoalArgs,
        #[command(flatten)]
        device: DeviceArgs,
        /// Write report.json, plan.json and trace.jsonl to this directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the plan generated for a goal against the device's initial state.
    Plan {
        #[command(flatten)]
        goal: GoalArgs,
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Print the effective configuration as TOML.
    Config {
        /// Also save it to the `--config` path.
        #[arg(long)]
        write: bool,
    },
}

#[derive(Args)]
struct GoalArgs {
    #[arg(long)]
    goal: String,
    /// Domain hint (wifi, bluetooth, airplane, alarm, email).
    #[arg(long)]
    domain: Option<String>,
}

impl GoalArgs {
    fn hints(&self) -> GoalHints {
        GoalHints {
            domain: self.domain.clone(),
        }
    }
}

#[derive(Args)]
struct DeviceArgs {
    /// Simulated scenario (TOML or JSON). Defaults to the bundled phone.
    #[arg(long, conflicts_with = "driver")]
    scenario: Option<PathBuf>,
    /// Driver command; `reset`/`step` are appended per call.
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    driver: Vec<String>,
    /// Seed for simulated random faults.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            if err.downcast_ref::<ConfigError>().is_some() {
                eprintln!("{err}");
            } else {
                eprintln!("{err:#}");
            }
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Run { goal, device, out } => cmd_run(&config, &goal, &device, out.as_deref()),
        Command::Plan { goal, device } => cmd_plan(&config, &goal, &device),
        Command::Config { write } => {
            if write {
                write_config(&cli.config, &config)?;
            }
            print!("{}", render_config(&config)?);
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_run(
    config: &QaConfig,
    goal: &GoalArgs,
    device_args: &DeviceArgs,
    out: Option<&Path>,
) -> Result<i32> {
    let mut device = open_device(config, device_args)?;
    let outcome = run_session(
        &goal.goal,
        goal.hints(),
        &mut device,
        config,
        &CancelFlag::new(),
    )?;
    if let Some(dir) = out {
        let paths = write_session(dir, &outcome)?;
        debug!(dir = %paths.dir.display(), "session artifacts written");
    }
    print_json(&outcome.report)?;
    Ok(match outcome.report.status {
        SessionStatus::Completed => exit_codes::OK,
        SessionStatus::Failed => exit_codes::FAILED,
        SessionStatus::Cancelled => exit_codes::CANCELLED,
    })
}

fn cmd_plan(config: &QaConfig, goal: &GoalArgs, device_args: &DeviceArgs) -> Result<i32> {
    let goal = Goal::parse(&goal.goal, goal.hints())?;
    let mut device = open_device(config, device_args)?;
    let initial = device.reset().context("reset device")?;
    let plan = Planner::new(config.planner.retry_budget).generate_plan(&goal, &initial);
    print_json(&plan)?;
    Ok(exit_codes::OK)
}

fn open_device(config: &QaConfig, args: &DeviceArgs) -> Result<Box<dyn DeviceSurface>> {
    if !args.driver.is_empty() {
        let device = CommandDevice::new(
            args.driver.clone(),
            config.executor.driver_output_limit_bytes,
            config.step_timeout(),
        )?;
        return Ok(Box::new(device));
    }
    let scenario = match &args.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::phone()?,
    };
    let mut device = SimulatedDevice::new(scenario)?;
    if let Some(seed) = args.seed {
        device = device.with_seed(seed);
    }
    Ok(Box::new(device))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
