//! Team reward shaping

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::env::{AgentStep, MultiAgentEnv, Space};

/// How rewards are distributed across agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardMode {
    /// Each agent keeps its own reward
    #[default]
    Individual,

    /// Every agent receives the sum of all agents' rewards
    Shared,
}

/// Applies a [`RewardMode`] to every step
#[derive(Debug)]
pub struct TeamReward<E> {
    env: E,
    mode: RewardMode,
}

impl<E: MultiAgentEnv> TeamReward<E> {
    /// Wrap `env`
    pub fn new(env: E, mode: RewardMode) -> Self {
        Self { env, mode }
    }

    /// The configured mode
    pub fn mode(&self) -> RewardMode {
        self.mode
    }
}

impl<E: MultiAgentEnv> MultiAgentEnv for TeamReward<E> {
    type Observation = E::Observation;
    type Action = E::Action;

    fn num_agents(&self) -> usize {
        self.env.num_agents()
    }

    fn observation_spaces(&self) -> Vec<Space> {
        self.env.observation_spaces()
    }

    fn max_episode_steps(&self) -> Option<usize> {
        self.env.max_episode_steps()
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<Vec<Self::Observation>> {
        self.env.reset(seed)
    }

    fn step(&mut self, actions: &[Self::Action]) -> Result<AgentStep<Self::Observation>> {
        let mut step = self.env.step(actions)?;
        if self.mode == RewardMode::Shared {
            let total: f32 = step.rewards.iter().sum();
            step.rewards.iter_mut().for_each(|r| *r = total);
        }
        Ok(step)
    }
}
