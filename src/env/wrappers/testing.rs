//! Scripted environment for wrapper and adapter unit tests

use anyhow::{bail, Result};

use crate::env::{AgentStep, MultiAgentEnv, Observation, Space};

/// Multi-agent environment whose rewards and terminations follow a script
///
/// Each agent observes `[step, agent_id, last_action]`. Right after a
/// reset the last slot holds the reset seed, or -1 without one.
#[derive(Debug, Clone)]
pub struct ScriptedEnv {
    num_agents: usize,
    step: usize,
    rewards: Vec<Vec<f32>>,
    terminations: Vec<(usize, Vec<bool>)>,
    default_horizon: Option<usize>,
    fail_at: Option<usize>,
    last_seed: Option<u64>,
}

impl ScriptedEnv {
    pub fn new(num_agents: usize) -> Self {
        Self {
            num_agents,
            step: 0,
            rewards: Vec::new(),
            terminations: Vec::new(),
            default_horizon: None,
            fail_at: None,
            last_seed: None,
        }
    }

    /// Rewards returned on steps 1, 2, ... (zero afterwards)
    pub fn with_rewards(mut self, rewards: Vec<Vec<f32>>) -> Self {
        self.rewards = rewards;
        self
    }

    /// Per-agent termination flags reported on `step`
    pub fn terminate_at(mut self, step: usize, flags: Vec<bool>) -> Self {
        self.terminations.push((step, flags));
        self
    }

    pub fn with_default_horizon(mut self, horizon: usize) -> Self {
        self.default_horizon = Some(horizon);
        self
    }

    /// Return an error from `step` number `step`
    pub fn fail_at(mut self, step: usize) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub fn last_seed(&self) -> Option<u64> {
        self.last_seed
    }

    fn observe(&self, last: impl Fn(usize) -> f32) -> Vec<Observation> {
        (0..self.num_agents)
            .map(|agent| Observation::Box(vec![self.step as f32, agent as f32, last(agent)]))
            .collect()
    }
}

impl MultiAgentEnv for ScriptedEnv {
    type Observation = Observation;
    type Action = i64;

    fn num_agents(&self) -> usize {
        self.num_agents
    }

    fn observation_spaces(&self) -> Vec<Space> {
        vec![Space::boxed(vec![3]); self.num_agents]
    }

    fn max_episode_steps(&self) -> Option<usize> {
        self.default_horizon
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<Vec<Observation>> {
        self.step = 0;
        self.last_seed = seed;
        let marker = seed.map(|s| s as f32).unwrap_or(-1.0);
        Ok(self.observe(|_| marker))
    }

    fn step(&mut self, actions: &[i64]) -> Result<AgentStep<Observation>> {
        self.step += 1;
        if self.fail_at == Some(self.step) {
            bail!("scripted failure at step {}", self.step);
        }

        let rewards =
            self.rewards.get(self.step - 1).cloned().unwrap_or_else(|| vec![0.0; self.num_agents]);
        let terminated = self
            .terminations
            .iter()
            .find(|(step, _)| *step == self.step)
            .map(|(_, flags)| flags.clone())
            .unwrap_or_else(|| vec![false; self.num_agents]);

        Ok(AgentStep::new(
            self.observe(|agent| actions.get(agent).map(|&a| a as f32).unwrap_or(-1.0)),
            rewards,
            terminated,
            vec![false; self.num_agents],
        ))
    }
}
