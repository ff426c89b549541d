//! Tensor conversion for the learner side
//!
//! The learner samples one action tensor per agent (shape `[N]` or `[N, 1]`)
//! and consumes one observation tensor per agent (shape `[N, dim]`). This
//! module converts between that layout and the per-instance tuples a
//! [`VecEnv`] works with.

use anyhow::{bail, Result};
use tch::{Device, Kind, Tensor};

use crate::{
    config::VecEnvConfig,
    env::{registry::EnvRegistry, stats::StatisticsHistory, Info, MultiAgentEnv, Observation},
    vec_env::{make_vec_env, transpose, BatchedStep, ObservationBatch, VecEnv},
};

/// Convert per-agent action tensors into per-instance action tuples
///
/// Each tensor must hold N values (`[N]` or `[N, 1]`); the result is
/// indexed `[instance][agent]`.
pub fn actions_from_tensors(actions: &[Tensor]) -> Result<Vec<Vec<i64>>> {
    let per_agent = actions
        .iter()
        .enumerate()
        .map(|(agent, tensor)| {
            let size = tensor.size();
            let column = matches!(size.as_slice(), [_] | [_, 1]);
            if !column {
                bail!("action tensor of agent {} has shape {:?}, expected [N] or [N, 1]", agent, size);
            }
            let flat = tensor.to_device(Device::Cpu).to_kind(Kind::Int64).contiguous().view([-1]);
            Ok(Vec::<i64>::try_from(&flat)?)
        })
        .collect::<Result<Vec<_>>>()?;
    transpose(&per_agent)
}

/// Convert per-instance action tuples into one `[N]` tensor per agent
pub fn actions_to_tensors(actions: &[Vec<i64>], device: Device) -> Result<Vec<Tensor>> {
    Ok(transpose(actions)?
        .iter()
        .map(|column| Tensor::from_slice(column).to_device(device))
        .collect())
}

/// One `[N, dim]` float tensor per agent
pub fn observations_to_tensors(batch: &ObservationBatch, device: Device) -> Vec<Tensor> {
    let n = batch.num_envs() as i64;
    batch
        .dims()
        .iter()
        .enumerate()
        .map(|(agent, &dim)| Tensor::from_slice(batch.agent(agent)).view([n, dim as i64]).to_device(device))
        .collect()
}

/// Step results as device tensors
#[derive(Debug)]
pub struct TensorStep {
    /// One `[N, dim]` tensor per agent
    pub observations: Vec<Tensor>,

    /// `[N, A]` rewards
    pub rewards: Tensor,

    /// `[N]` instance-level done flags as 0.0 / 1.0
    pub dones: Tensor,

    /// `[N]` truncation flags as 0.0 / 1.0
    pub truncated: Tensor,

    /// Step metadata of each instance
    pub infos: Vec<Info>,
}

impl TensorStep {
    fn from_batch(batch: BatchedStep, num_agents: usize, device: Device) -> Self {
        let n = batch.num_envs() as i64;
        let truncated: Vec<f32> = batch.truncated.iter().map(|&t| if t { 1.0 } else { 0.0 }).collect();
        Self {
            observations: observations_to_tensors(&batch.observations, device),
            rewards: Tensor::from_slice(&batch.flat_rewards()).view([n, num_agents as i64]).to_device(device),
            dones: Tensor::from_slice(&batch.done_mask()).to_device(device),
            truncated: Tensor::from_slice(&truncated).to_device(device),
            infos: batch.infos,
        }
    }
}

/// Vectorized environment speaking tensors on a target device
pub struct TensorVecEnv {
    venv: Box<dyn VecEnv<i64>>,
    device: Device,
}

impl TensorVecEnv {
    /// Wrap an existing vectorized environment
    pub fn new(venv: Box<dyn VecEnv<i64>>, device: Device) -> Self {
        Self { venv, device }
    }

    /// Build the vectorized environment and device from a configuration
    pub fn from_config<E>(config: &VecEnvConfig, registry: &EnvRegistry<E>) -> Result<Self>
    where
        E: MultiAgentEnv<Observation = Observation, Action = i64> + Send + 'static,
    {
        let venv = make_vec_env(config, registry)?;
        let device = config.device.to_device();
        tracing::info!("Tensor vec env on {:?}", device);
        Ok(Self::new(venv, device))
    }

    /// Target device
    pub fn device(&self) -> Device {
        self.device
    }

    /// Number of instances
    pub fn num_envs(&self) -> usize {
        self.venv.num_envs()
    }

    /// Number of agents per instance
    pub fn num_agents(&self) -> usize {
        self.venv.num_agents()
    }

    /// Flat observation dimension of each agent
    pub fn observation_dims(&self) -> &[usize] {
        self.venv.observation_dims()
    }

    /// Reset every instance and return one `[N, dim]` tensor per agent
    pub fn reset(&mut self, seed: Option<u64>) -> Result<Vec<Tensor>> {
        let batch = self.venv.reset_all(seed)?;
        Ok(observations_to_tensors(&batch, self.device))
    }

    /// Dispatch one action tensor per agent
    pub fn step_async(&mut self, actions: &[Tensor]) -> Result<()> {
        let tuples = actions_from_tensors(actions)?;
        self.venv.step_async(tuples)
    }

    /// Wait for the in-flight step and convert its results
    pub fn step_wait(&mut self) -> Result<TensorStep> {
        let batch = self.venv.step_wait()?;
        Ok(TensorStep::from_batch(batch, self.venv.num_agents(), self.device))
    }

    /// Synchronous step
    pub fn step(&mut self, actions: &[Tensor]) -> Result<TensorStep> {
        self.step_async(actions)?;
        self.step_wait()
    }

    /// Completed-episode history of every instance
    pub fn episode_histories(&mut self) -> Result<Vec<StatisticsHistory>> {
        self.venv.episode_histories()
    }

    /// Close the underlying vectorized environment
    pub fn close(&mut self) -> Result<()> {
        self.venv.close()
    }
}
