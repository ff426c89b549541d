//! Thread-pool execution using Rayon
//!
//! Every instance lives in the calling process and is stepped from Rayon's
//! global thread pool. For N instances with average step time T the batch
//! takes roughly `max(T)` instead of `N * T` when N is at most the number of
//! cores. Results are collected in instance order.

use anyhow::Result;
use rayon::prelude::*;

use super::{
    batch::{BatchedStep, ObservationBatch},
    protocol::{check_layouts, instance_layout, step_instance, StepProtocol},
    VecEnv,
};
use crate::env::{stats::StatisticsHistory, InstanceEnv};

/// Steps all instances in parallel on a shared thread pool
pub struct PooledVecEnv<E: InstanceEnv> {
    envs: Vec<E>,
    num_agents: usize,
    dims: Vec<usize>,
    protocol: StepProtocol,
    pending: Option<Vec<Vec<E::Action>>>,
}

impl<E> PooledVecEnv<E>
where
    E: InstanceEnv<Observation = Vec<f32>> + Send,
    E::Action: Sync,
{
    /// Take ownership of already wrapped instances
    pub fn new(envs: Vec<E>, auto_reset: bool) -> Result<Self> {
        let layouts: Vec<_> = envs.iter().map(instance_layout).collect();
        let (num_agents, dims) = check_layouts(&layouts)?;
        let protocol = StepProtocol::new(envs.len(), num_agents, auto_reset);
        tracing::info!("Created pooled vec env with {} instances", envs.len());
        Ok(Self { envs, num_agents, dims, protocol, pending: None })
    }

    fn run_pending(&mut self, actions: Vec<Vec<E::Action>>) -> Result<BatchedStep> {
        let auto_reset = self.protocol.auto_reset();
        let steps = self
            .envs
            .par_iter_mut()
            .zip(actions.par_iter())
            .map(|(env, tuple)| step_instance(env, tuple, auto_reset))
            .collect::<Result<Vec<_>>>()?;
        BatchedStep::from_instances(steps, &self.dims)
    }
}

impl<E> VecEnv<E::Action> for PooledVecEnv<E>
where
    E: InstanceEnv<Observation = Vec<f32>> + Send,
    E::Action: Sync,
{
    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn num_agents(&self) -> usize {
        self.num_agents
    }

    fn observation_dims(&self) -> &[usize] {
        &self.dims
    }

    fn reset_all(&mut self, seed: Option<u64>) -> Result<ObservationBatch> {
        self.protocol.begin_reset()?;
        let rows = self
            .envs
            .par_iter_mut()
            .enumerate()
            .map(|(rank, env)| env.reset(seed.map(|s| s.wrapping_add(rank as u64))))
            .collect::<Result<Vec<_>>>();
        match rows.and_then(|rows| ObservationBatch::from_instances(rows, &self.dims)) {
            Ok(batch) => {
                self.protocol.end_reset();
                Ok(batch)
            }
            Err(err) => Err(self.protocol.poison(err)),
        }
    }

    fn step_async(&mut self, actions: Vec<Vec<E::Action>>) -> Result<()> {
        self.protocol.begin_step(&actions)?;
        self.pending = Some(actions);
        Ok(())
    }

    fn step_wait(&mut self) -> Result<BatchedStep> {
        self.protocol.begin_wait()?;
        let Some(actions) = self.pending.take() else {
            return Err(self.protocol.poison(anyhow::anyhow!("pending actions were lost")));
        };
        match self.run_pending(actions) {
            Ok(batch) => {
                self.protocol.end_step(&batch.dones);
                Ok(batch)
            }
            Err(err) => Err(self.protocol.poison(err)),
        }
    }

    fn episode_histories(&mut self) -> Result<Vec<StatisticsHistory>> {
        self.protocol.check_idle()?;
        Ok(self.envs.iter().map(|env| env.episode_history().cloned().unwrap_or_default()).collect())
    }

    fn close(&mut self) -> Result<()> {
        self.protocol.close();
        self.pending = None;
        Ok(())
    }
}
