//! Environment traits and per-instance wrappers
//!
//! Two contracts live here:
//!
//! - [`MultiAgentEnv`]: what an externally supplied simulation provides,
//!   with per-agent termination and truncation flags.
//! - [`InstanceEnv`]: the same environment after its per-agent flags were
//!   squashed into one instance-level episode boundary.
//!
//! The wrapper chain applied to every instance is
//! `TimeLimit → SquashDones → FlattenObservation → EpisodeStatistics`,
//! each layer a generic decorator so the composition is checked at compile
//! time (see [`wrappers::wrap_env`]).

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod chase;
pub mod registry;
pub mod space;
pub mod stats;
pub mod wrappers;

pub use space::{Observation, Space};

/// Core trait for a multi-agent simulation
///
/// All per-agent sequences are indexed by agent id and have length
/// [`num_agents`](MultiAgentEnv::num_agents).
pub trait MultiAgentEnv {
    /// Observation type of a single agent
    type Observation;

    /// Action type of a single agent
    type Action;

    /// Number of agents, fixed for the lifetime of the environment
    fn num_agents(&self) -> usize;

    /// Observation space of every agent, in agent order
    fn observation_spaces(&self) -> Vec<Space>;

    /// Default episode horizon, if the environment defines one
    fn max_episode_steps(&self) -> Option<usize> {
        None
    }

    /// Start a new episode and return the initial observation of each agent
    fn reset(&mut self, seed: Option<u64>) -> Result<Vec<Self::Observation>>;

    /// Advance the simulation with one action per agent
    fn step(&mut self, actions: &[Self::Action]) -> Result<AgentStep<Self::Observation>>;
}

/// Result of a multi-agent step, before done squashing
#[derive(Debug, Clone)]
pub struct AgentStep<O> {
    /// Observation for each agent
    pub observations: Vec<O>,

    /// Reward for each agent
    pub rewards: Vec<f32>,

    /// Natural termination flag for each agent
    pub terminated: Vec<bool>,

    /// Truncation flag for each agent
    pub truncated: Vec<bool>,

    /// Additional info (shared across all agents)
    pub info: Info,
}

impl<O> AgentStep<O> {
    /// Create a step result with an empty info map
    pub fn new(
        observations: Vec<O>,
        rewards: Vec<f32>,
        terminated: Vec<bool>,
        truncated: Vec<bool>,
    ) -> Self {
        Self { observations, rewards, terminated, truncated, info: Info::new() }
    }

    /// Per-agent done flags (`terminated || truncated`)
    pub fn agent_dones(&self) -> Vec<bool> {
        self.terminated.iter().zip(&self.truncated).map(|(term, trunc)| *term || *trunc).collect()
    }

    /// Check if all agents are done
    pub fn all_done(&self) -> bool {
        self.terminated.iter().zip(&self.truncated).all(|(term, trunc)| *term || *trunc)
    }
}

/// Instance-level contract, after per-agent dones were squashed
pub trait InstanceEnv {
    /// Observation type of a single agent
    type Observation;

    /// Action type of a single agent
    type Action;

    /// Number of agents
    fn num_agents(&self) -> usize;

    /// Observation space of every agent, in agent order
    fn observation_spaces(&self) -> Vec<Space>;

    /// Start a new episode
    fn reset(&mut self, seed: Option<u64>) -> Result<Vec<Self::Observation>>;

    /// Advance the instance with one action per agent
    fn step(&mut self, actions: &[Self::Action]) -> Result<InstanceStep<Self::Observation>>;

    /// Completed-episode history, if some layer of the chain records one
    fn episode_history(&self) -> Option<&stats::StatisticsHistory> {
        None
    }
}

/// Result of an instance step
#[derive(Debug, Clone)]
pub struct InstanceStep<O> {
    /// Observation for each agent
    pub observations: Vec<O>,

    /// Reward for each agent
    pub rewards: Vec<f32>,

    /// Per-agent done flags (`terminated || truncated`)
    pub agent_dones: Vec<bool>,

    /// Episode ended: every agent is done
    pub done: bool,

    /// Episode ended and every agent terminated naturally
    pub terminated: bool,

    /// Episode ended and at least one agent was cut off
    pub truncated: bool,

    /// Step metadata
    pub info: Info,
}

/// Step metadata, keyed by name
pub type Info = BTreeMap<String, InfoValue>;

/// A single metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InfoValue {
    /// Flag
    Bool(bool),

    /// Count
    Int(i64),

    /// Scalar
    Float(f64),

    /// One value per agent
    Floats(Vec<f64>),

    /// One row per agent
    Rows(Vec<Vec<f32>>),
}

impl InfoValue {
    /// Read a flag
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            InfoValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Read a count
    pub fn as_int(&self) -> Option<i64> {
        match self {
            InfoValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Read a scalar
    pub fn as_float(&self) -> Option<f64> {
        match self {
            InfoValue::Float(f) => Some(*f),
            InfoValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Read per-agent values
    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            InfoValue::Floats(v) => Some(v),
            _ => None,
        }
    }

    /// Read per-agent rows
    pub fn as_rows(&self) -> Option<&[Vec<f32>]> {
        match self {
            InfoValue::Rows(v) => Some(v),
            _ => None,
        }
    }
}
