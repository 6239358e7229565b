mod enonode;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use enolearn::machine_learning::reinforcement_learning::rollout::ActionPolicy;
use enonode::{
    config::{EnvPreset, ExperimentConfig, StepPreset},
    env_error::{EnvError, EnvResult},
    harvester::DayOrder,
    DataSource, SimulationConfig,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about)]
pub struct EnonodeArgs {
    #[command(subcommand)]
    mode: EnonodeMode,
}

#[derive(Subcommand)]
pub enum EnonodeMode {
    /// Drive nodes through the solar data and fill their replay buffers
    Simulate {
        #[command(flatten)]
        simulation_args: SimulationArgs,
    },
    /// Print the configuration of a preset experiment as JSON
    Preset {
        #[arg(value_enum, default_value_t = EnvPreset::Eno)]
        env: EnvPreset,
        #[arg(value_enum, long, default_value_t = StepPreset::OneStep)]
        steps: StepPreset,
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Debug)]
pub enum PolicyArg {
    Random,
    Constant,
    Greedy,
}

#[derive(Parser, Debug)]
pub struct SimulationArgs {
    /// Experiment configuration, takes precedence over the presets
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(value_enum, long, default_value_t = EnvPreset::Eno)]
    env: EnvPreset,
    #[arg(value_enum, long, default_value_t = StepPreset::OneStep)]
    steps: StepPreset,

    /// Directory holding `<location>/<year>.csv`, synthetic clear sky days when missing
    #[arg(long)]
    solar_data: Option<PathBuf>,
    #[arg(long, default_value = "tokyo")]
    location: String,
    #[arg(long, default_value_t = 1995)]
    year: u32,
    /// Number of synthetic days
    #[arg(long, default_value_t = 30)]
    days: usize,
    /// Replay the days in random order
    #[arg(long)]
    random_days: bool,

    #[arg(value_enum, long, default_value_t = PolicyArg::Greedy)]
    policy: PolicyArg,
    /// Duty cycle level of the constant policy
    #[arg(long, default_value_t = 0)]
    level: u32,
    /// Maximum number of steps per node
    #[arg(long)]
    max_steps: Option<usize>,

    /// Number of nodes simulated in parallel
    #[arg(long, default_value_t = 1)]
    nodes: u64,
    /// Seed of the first node, the others count up from it
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Save the trajectory of the first node as JSON
    #[arg(long)]
    episode_log: Option<PathBuf>,
}

impl TryFrom<SimulationArgs> for SimulationConfig {
    type Error = EnvError;

    fn try_from(value: SimulationArgs) -> EnvResult<Self> {
        let mut experiment = match value.config {
            Some(path) => ExperimentConfig::load(path)?,
            None => ExperimentConfig::preset(value.env, value.steps),
        };
        if value.random_days {
            experiment.node.day_order = DayOrder::Random;
        }
        experiment.rollout.policy = match value.policy {
            PolicyArg::Random => ActionPolicy::Random,
            PolicyArg::Constant => ActionPolicy::Constant(value.level),
            PolicyArg::Greedy => ActionPolicy::Greedy,
        };
        if let Some(max_steps) = value.max_steps {
            experiment.rollout.max_steps = max_steps;
        }
        experiment.validate()?;

        let data = match value.solar_data {
            Some(root) => DataSource::Csv(root),
            None => DataSource::Synthetic { days: value.days },
        };
        Ok(SimulationConfig {
            experiment,
            data,
            location: value.location,
            year: value.year,
            seeds: (value.seed..value.seed + value.nodes).collect(),
            episode_log: value.episode_log,
        })
    }
}

fn main() -> EnvResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = EnonodeArgs::parse();
    enonode::run(args).inspect_err(|err| error!("{err}"))
}
