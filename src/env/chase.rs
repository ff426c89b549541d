//! TargetChase demonstration environment
//!
//! Several agents live on a one-dimensional track of `width` cells. Each
//! agent is assigned its own target cell and must walk onto it.
//!
//! - Actions: 0 (move left), 1 (stay), 2 (move right)
//! - Reward: +1.0 on reaching the target, -0.01 per step otherwise
//! - Termination: per agent, once its target is reached
//! - Observation (`Dict`): `position` and `target` as `Discrete(width)`,
//!   `offset` as a `Box[1]` holding `(target - position) / width`
//!
//! The episode only ends once every agent has reached its target, or when
//! the horizon cuts it off.

use anyhow::{bail, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    env::{registry::EnvRegistry, AgentStep, MultiAgentEnv, Observation, Space},
    error::VecEnvError,
};

/// Registry id of the default configuration
pub const TARGET_CHASE_ID: &str = "TargetChase-v0";

/// Default horizon
pub const DEFAULT_MAX_STEPS: usize = 50;

const STEP_PENALTY: f32 = -0.01;
const TARGET_REWARD: f32 = 1.0;

/// Multi-agent target chase on a line
#[derive(Debug, Clone)]
pub struct TargetChase {
    width: usize,
    num_agents: usize,
    positions: Vec<usize>,
    targets: Vec<usize>,
    reached: Vec<bool>,
    rng: StdRng,
}

impl TargetChase {
    /// Create a track of `width` cells with `num_agents` agents
    ///
    /// Fails if `width < 2` (no cell could differ from the start) or
    /// `num_agents == 0`.
    pub fn new(width: usize, num_agents: usize) -> Result<Self> {
        if width < 2 {
            let reason = format!("track needs at least two cells, got {}", width);
            return Err(VecEnvError::InvalidConfig(reason).into());
        }
        if num_agents == 0 {
            return Err(VecEnvError::InvalidConfig("at least one agent is required".into()).into());
        }
        Ok(Self::build(width, num_agents))
    }

    fn build(width: usize, num_agents: usize) -> Self {
        Self {
            width,
            num_agents,
            positions: vec![0; num_agents],
            targets: vec![0; num_agents],
            reached: vec![false; num_agents],
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Current cell of every agent
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Target cell of every agent
    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    fn observe(&self, agent: usize) -> Observation {
        let offset = (self.targets[agent] as f32 - self.positions[agent] as f32) / self.width as f32;
        Observation::Dict(
            [
                ("offset".to_string(), Observation::Box(vec![offset])),
                ("position".to_string(), Observation::Discrete(self.positions[agent])),
                ("target".to_string(), Observation::Discrete(self.targets[agent])),
            ]
            .into_iter()
            .collect(),
        )
    }

    fn observations(&self) -> Vec<Observation> {
        (0..self.num_agents).map(|agent| self.observe(agent)).collect()
    }
}

/// Registry holding the default configuration under [`TARGET_CHASE_ID`]
pub fn registry() -> EnvRegistry<TargetChase> {
    let mut registry = EnvRegistry::new();
    registry.register(TARGET_CHASE_ID, Some(DEFAULT_MAX_STEPS), || Ok(TargetChase::default()));
    registry
}

impl Default for TargetChase {
    fn default() -> Self {
        Self::build(8, 2)
    }
}

impl MultiAgentEnv for TargetChase {
    type Observation = Observation;
    type Action = i64;

    fn num_agents(&self) -> usize {
        self.num_agents
    }

    fn observation_spaces(&self) -> Vec<Space> {
        let space = Space::dict([
            ("offset", Space::boxed(vec![1])),
            ("position", Space::Discrete(self.width)),
            ("target", Space::Discrete(self.width)),
        ]);
        vec![space; self.num_agents]
    }

    fn max_episode_steps(&self) -> Option<usize> {
        Some(DEFAULT_MAX_STEPS)
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<Vec<Observation>> {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }

        for agent in 0..self.num_agents {
            let position = self.rng.gen_range(0..self.width);
            // Target is never the starting cell
            let mut target = self.rng.gen_range(0..self.width - 1);
            if target >= position {
                target += 1;
            }
            self.positions[agent] = position;
            self.targets[agent] = target;
            self.reached[agent] = false;
        }

        Ok(self.observations())
    }

    fn step(&mut self, actions: &[i64]) -> Result<AgentStep<Observation>> {
        if actions.len() != self.num_agents {
            bail!("expected {} actions, got {}", self.num_agents, actions.len());
        }

        let mut rewards = vec![0.0; self.num_agents];
        for (agent, &action) in actions.iter().enumerate() {
            if self.reached[agent] {
                continue;
            }

            let position = self.positions[agent];
            self.positions[agent] = match action {
                0 => position.saturating_sub(1),
                1 => position,
                2 => (position + 1).min(self.width - 1),
                other => bail!("invalid action {} for agent {}", other, agent),
            };

            if self.positions[agent] == self.targets[agent] {
                self.reached[agent] = true;
                rewards[agent] = TARGET_REWARD;
            } else {
                rewards[agent] = STEP_PENALTY;
            }
        }

        Ok(AgentStep::new(
            self.observations(),
            rewards,
            self.reached.clone(),
            vec![false; self.num_agents],
        ))
    }
}
