//! Observation flattening wrapper

use anyhow::Result;

use crate::{
    env::{InstanceEnv, InstanceStep, Observation, Space},
    error::VecEnvError,
};

/// Flattens every agent's structured observation into a `Vec<f32>`
///
/// Agent `i`'s observation is flattened against agent `i`'s declared space,
/// so agents may have different flat dimensions.
#[derive(Debug)]
pub struct FlattenObservation<E> {
    env: E,
    spaces: Vec<Space>,
    dims: Vec<usize>,
}

impl<E: InstanceEnv<Observation = Observation>> FlattenObservation<E> {
    /// Wrap `env`, validating its observation spaces
    pub fn new(env: E) -> Result<Self> {
        let spaces = env.observation_spaces();
        if spaces.len() != env.num_agents() {
            return Err(VecEnvError::AgentCountMismatch {
                expected: env.num_agents(),
                actual: spaces.len(),
                what: "observation spaces".to_string(),
            }
            .into());
        }
        for space in &spaces {
            space.validate()?;
        }
        let dims = spaces.iter().map(Space::flatdim).collect();
        Ok(Self { env, spaces, dims })
    }

    /// Flat dimension of each agent's observation
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    fn flatten_all(&self, observations: &[Observation]) -> Result<Vec<Vec<f32>>> {
        self.spaces.iter().zip(observations).map(|(space, obs)| space.flatten(obs)).collect()
    }
}

impl<E: InstanceEnv<Observation = Observation>> InstanceEnv for FlattenObservation<E> {
    type Observation = Vec<f32>;
    type Action = E::Action;

    fn num_agents(&self) -> usize {
        self.env.num_agents()
    }

    fn observation_spaces(&self) -> Vec<Space> {
        self.spaces.iter().map(Space::flattened).collect()
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<Vec<Vec<f32>>> {
        let observations = self.env.reset(seed)?;
        self.flatten_all(&observations)
    }

    fn step(&mut self, actions: &[Self::Action]) -> Result<InstanceStep<Vec<f32>>> {
        let step = self.env.step(actions)?;
        let observations = self.flatten_all(&step.observations)?;
        Ok(InstanceStep {
            observations,
            rewards: step.rewards,
            agent_dones: step.agent_dones,
            done: step.done,
            terminated: step.terminated,
            truncated: step.truncated,
            info: step.info,
        })
    }

    fn episode_history(&self) -> Option<&crate::env::stats::StatisticsHistory> {
        self.env.episode_history()
    }
}
