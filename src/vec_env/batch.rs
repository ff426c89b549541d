//! Batched step results
//!
//! Per-instance results are merged into arrays indexed `[instance, agent,
//! ...]`. Observations are stored per agent, row-major over instances, since
//! agents may have different flat dimensions.

use anyhow::Result;

use crate::{
    env::{Info, InstanceStep},
    error::VecEnvError,
};

/// Flattened observations of every agent in every instance
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBatch {
    num_envs: usize,
    dims: Vec<usize>,
    /// `data[agent]` is a `[num_envs, dims[agent]]` row-major array
    data: Vec<Vec<f32>>,
}

impl ObservationBatch {
    /// Merge per-instance observations (`rows[instance][agent]`)
    pub fn from_instances(rows: Vec<Vec<Vec<f32>>>, dims: &[usize]) -> Result<Self> {
        let num_envs = rows.len();
        let mut data: Vec<Vec<f32>> = dims.iter().map(|d| Vec::with_capacity(d * num_envs)).collect();

        for (instance, agents) in rows.into_iter().enumerate() {
            if agents.len() != dims.len() {
                return Err(malformed(
                    instance,
                    format!("{} agent observations, expected {}", agents.len(), dims.len()),
                ));
            }
            for (agent, obs) in agents.into_iter().enumerate() {
                if obs.len() != dims[agent] {
                    return Err(malformed(
                        instance,
                        format!(
                            "agent {} observation has {} values, expected {}",
                            agent,
                            obs.len(),
                            dims[agent]
                        ),
                    ));
                }
                data[agent].extend(obs);
            }
        }

        Ok(Self { num_envs, dims: dims.to_vec(), data })
    }

    /// Number of instances
    pub fn num_envs(&self) -> usize {
        self.num_envs
    }

    /// Number of agents
    pub fn num_agents(&self) -> usize {
        self.dims.len()
    }

    /// Flat observation dimension of each agent
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// All instances' observations of one agent, `[num_envs, dim]` row-major
    pub fn agent(&self, agent: usize) -> &[f32] {
        &self.data[agent]
    }

    /// One agent's observation in one instance
    pub fn get(&self, instance: usize, agent: usize) -> &[f32] {
        let dim = self.dims[agent];
        &self.data[agent][instance * dim..(instance + 1) * dim]
    }

    /// Per-instance rows, `[instance][agent][..]`
    pub fn to_rows(&self) -> Vec<Vec<Vec<f32>>> {
        (0..self.num_envs)
            .map(|instance| (0..self.num_agents()).map(|agent| self.get(instance, agent).to_vec()).collect())
            .collect()
    }
}

/// Merged result of one vectorized step
#[derive(Debug, Clone)]
pub struct BatchedStep {
    /// Observations after the step (after auto-reset, if enabled)
    pub observations: ObservationBatch,

    /// Rewards, `[instance][agent]`
    pub rewards: Vec<Vec<f32>>,

    /// Instance-level done flags
    pub dones: Vec<bool>,

    /// Instance-level natural termination flags
    pub terminated: Vec<bool>,

    /// Instance-level truncation flags
    pub truncated: Vec<bool>,

    /// Per-agent done flags, `[instance][agent]`
    pub agent_dones: Vec<Vec<bool>>,

    /// Step metadata of each instance
    pub infos: Vec<Info>,
}

impl BatchedStep {
    /// Merge per-instance results, preserving instance order
    pub fn from_instances(steps: Vec<InstanceStep<Vec<f32>>>, dims: &[usize]) -> Result<Self> {
        let num_envs = steps.len();
        let num_agents = dims.len();

        let mut observations = Vec::with_capacity(num_envs);
        let mut rewards = Vec::with_capacity(num_envs);
        let mut dones = Vec::with_capacity(num_envs);
        let mut terminated = Vec::with_capacity(num_envs);
        let mut truncated = Vec::with_capacity(num_envs);
        let mut agent_dones = Vec::with_capacity(num_envs);
        let mut infos = Vec::with_capacity(num_envs);

        for (instance, step) in steps.into_iter().enumerate() {
            if step.rewards.len() != num_agents || step.agent_dones.len() != num_agents {
                return Err(malformed(
                    instance,
                    format!(
                        "{} rewards and {} dones, expected {} agents",
                        step.rewards.len(),
                        step.agent_dones.len(),
                        num_agents
                    ),
                ));
            }
            observations.push(step.observations);
            rewards.push(step.rewards);
            dones.push(step.done);
            terminated.push(step.terminated);
            truncated.push(step.truncated);
            agent_dones.push(step.agent_dones);
            infos.push(step.info);
        }

        Ok(Self {
            observations: ObservationBatch::from_instances(observations, dims)?,
            rewards,
            dones,
            terminated,
            truncated,
            agent_dones,
            infos,
        })
    }

    /// Number of instances
    pub fn num_envs(&self) -> usize {
        self.dones.len()
    }

    /// Rewards flattened row-major, `[num_envs * num_agents]`
    pub fn flat_rewards(&self) -> Vec<f32> {
        self.rewards.iter().flatten().copied().collect()
    }

    /// Done flags as 0.0 / 1.0
    pub fn done_mask(&self) -> Vec<f32> {
        self.dones.iter().map(|&d| if d { 1.0 } else { 0.0 }).collect()
    }
}

/// Swap the two outer axes of a rectangular nested vector
///
/// Converts per-agent action batches (`[agent][instance]`) into per-instance
/// action tuples (`[instance][agent]`) and back. Applying it twice returns
/// the original value.
pub fn transpose<T: Clone>(rows: &[Vec<T>]) -> Result<Vec<Vec<T>>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let width = first.len();
    if let Some((index, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != width) {
        return Err(VecEnvError::InvalidConfig(format!(
            "cannot transpose ragged batch: row {} has {} entries, row 0 has {}",
            index,
            row.len(),
            width
        ))
        .into());
    }
    Ok((0..width).map(|col| rows.iter().map(|row| row[col].clone()).collect()).collect())
}

fn malformed(instance: usize, reason: String) -> anyhow::Error {
    VecEnvError::WorkerFailed { worker: instance, reason: format!("malformed result: {}", reason) }.into()
}
