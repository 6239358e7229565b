pub mod battery;
pub mod config;
pub mod env_error;
pub mod episode_log;
pub mod harvester;
pub mod node_model;
pub mod reward;
pub mod solar_data;
pub mod utility;

use std::{path::PathBuf, sync::Arc};

use enolearn::machine_learning::reinforcement_learning::{
    nstep_buffer::NStepBuffer,
    rollout::{parallel_rollouts, Rollout, RolloutSummary},
};
use tracing::{info, warn};

use self::{
    config::ExperimentConfig,
    env_error::EnvResult,
    node_model::NodeEnvironment,
    solar_data::{CsvSolarArchive, InMemorySolarArchive, SolarArchive},
};
use crate::{EnonodeArgs, EnonodeMode};

/// Where the radiation readings come from.
#[derive(Clone, Debug, PartialEq)]
pub enum DataSource {
    Csv(PathBuf),
    Synthetic { days: usize },
}

#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub experiment: ExperimentConfig,
    pub data: DataSource,
    pub location: String,
    pub year: u32,
    /// One node per seed.
    pub seeds: Vec<u64>,
    pub episode_log: Option<PathBuf>,
}

pub fn run(args: EnonodeArgs) -> EnvResult<()> {
    match args.mode {
        EnonodeMode::Simulate { simulation_args } => {
            simulate(simulation_args.try_into()?)?;
        }
        EnonodeMode::Preset { env, steps, output } => {
            let config = ExperimentConfig::preset(env, steps);
            match output {
                Some(path) => config.save(path)?,
                None => println!("{}", serde_json::to_string_pretty(&config)?),
            }
        }
    };
    Ok(())
}

fn archive(config: &SimulationConfig) -> Arc<dyn SolarArchive> {
    match &config.data {
        DataSource::Csv(root) => Arc::new(CsvSolarArchive::new(root)),
        DataSource::Synthetic { days } => {
            let readings_per_day = config.experiment.node.harvester.readings_per_day;
            Arc::new(InMemorySolarArchive::new().with_series(
                &config.location,
                config.year,
                InMemorySolarArchive::synthetic_days(*days, readings_per_day),
            ))
        }
    }
}

/// Runs one node per seed side by side and returns their summaries in seed order.
pub fn simulate(config: SimulationConfig) -> EnvResult<Vec<RolloutSummary>> {
    let archive = archive(&config);
    let experiment = &config.experiment;
    let mut rollouts = config
        .seeds
        .iter()
        .map(|&seed| {
            let env = NodeEnvironment::new(
                experiment.node.clone(),
                archive.clone(),
                &config.location,
                config.year,
                seed,
            )?;
            let buffer = NStepBuffer::with_seed(experiment.buffer.clone(), seed)?;
            Ok(Rollout::with_seed(
                env,
                buffer,
                experiment.rollout.clone(),
                seed,
            )?)
        })
        .collect::<EnvResult<Vec<_>>>()?;

    let summaries = parallel_rollouts(&mut rollouts)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    for ((seed, summary), rollout) in config.seeds.iter().zip(&summaries).zip(&rollouts) {
        let episode = rollout.env().log().summary(3);
        if !summary.done {
            warn!(seed, steps = summary.steps, "node stopped before the end of the data");
        }
        info!(
            seed,
            steps = summary.steps,
            cumulative_reward = summary.cumulative_reward,
            recovery_steps = episode.recovery_steps,
            mean_battery = episode.mean_battery,
            records = rollout.buffer().len(),
            batches = summary.batches,
            mean_batch_return = summary.mean_batch_return,
            "node finished"
        );
    }

    if let (Some(path), Some(rollout)) = (&config.episode_log, rollouts.first()) {
        rollout.env().log().save(path)?;
        info!(path = %path.display(), "episode log saved");
    }
    Ok(summaries)
}
