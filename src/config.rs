//! Vectorized environment configuration
//!
//! A [`VecEnvConfig`] is built once, validated, and then handed to
//! [`make_vec_env`](crate::vec_env::make_vec_env). It can also be loaded
//! from JSON:
//!
//! ```json
//! {
//!   "env_id": "TargetChase-v0",
//!   "num_envs": 8,
//!   "strategy": "worker",
//!   "max_episode_steps": 100,
//!   "device": { "cuda": 0 }
//! }
//! ```
//!
//! Omitted fields take their default values.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    env::{
        stats::DEFAULT_HISTORY_CAPACITY,
        wrappers::{RewardMode, WrapConfig},
    },
    error::VecEnvError,
};

/// How instances are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One after another in the calling thread
    #[default]
    Sequential,

    /// One dedicated worker thread per instance
    Worker,

    /// Rayon thread pool shared by all instances
    Pooled,
}

/// Where tensors produced by the tensor layer live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSpec {
    /// Host memory
    #[default]
    Cpu,

    /// CUDA device by ordinal
    Cuda(usize),

    /// First CUDA device if available, otherwise CPU
    Auto,
}

#[cfg(feature = "training")]
impl DeviceSpec {
    /// Resolve to a `tch` device
    pub fn to_device(self) -> tch::Device {
        match self {
            DeviceSpec::Cpu => tch::Device::Cpu,
            DeviceSpec::Cuda(ordinal) => tch::Device::Cuda(ordinal),
            DeviceSpec::Auto => tch::Device::cuda_if_available(),
        }
    }
}

/// Configuration of a vectorized environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VecEnvConfig {
    /// Registered environment id
    pub env_id: String,

    /// Number of parallel instances
    pub num_envs: usize,

    /// Execution strategy
    pub strategy: ExecutionStrategy,

    /// Episode horizon; overrides the registry and environment defaults
    pub max_episode_steps: Option<usize>,

    /// Target device for tensors
    pub device: DeviceSpec,

    /// Completed episodes kept per instance
    pub history_capacity: usize,

    /// Base seed; instance `i` is seeded with `seed + i`
    pub seed: u64,

    /// Reset finished instances inside `step_wait`
    pub auto_reset: bool,

    /// Reward distribution across agents
    pub reward_mode: RewardMode,
}

impl Default for VecEnvConfig {
    fn default() -> Self {
        Self {
            env_id: String::new(),
            num_envs: 1,
            strategy: ExecutionStrategy::Sequential,
            max_episode_steps: None,
            device: DeviceSpec::Cpu,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            seed: 0,
            auto_reset: true,
            reward_mode: RewardMode::Individual,
        }
    }
}

impl VecEnvConfig {
    /// Create a default configuration for `env_id`
    pub fn new(env_id: impl Into<String>) -> Self {
        Self { env_id: env_id.into(), ..Self::default() }
    }

    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("failed to parse vec env config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.env_id.is_empty() {
            return Err(invalid("env_id must not be empty"));
        }
        if self.num_envs == 0 {
            return Err(invalid("num_envs must be positive"));
        }
        if self.max_episode_steps == Some(0) {
            return Err(invalid("max_episode_steps must be positive"));
        }
        Ok(())
    }

    /// Strategy actually used: a single instance always runs sequentially
    pub fn effective_strategy(&self) -> ExecutionStrategy {
        if self.num_envs == 1 {
            ExecutionStrategy::Sequential
        } else {
            self.strategy
        }
    }

    /// Per-instance wrapper settings, using `default_horizon` if no horizon is set
    pub fn wrap_config(&self, default_horizon: Option<usize>) -> WrapConfig {
        WrapConfig {
            max_episode_steps: self.max_episode_steps.or(default_horizon),
            history_capacity: self.history_capacity,
            reward_mode: self.reward_mode,
        }
    }

    /// Set environment id
    pub fn env_id(mut self, id: impl Into<String>) -> Self {
        self.env_id = id.into();
        self
    }

    /// Set number of instances
    pub fn num_envs(mut self, n: usize) -> Self {
        self.num_envs = n;
        self
    }

    /// Set execution strategy
    pub fn strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set episode horizon
    pub fn max_episode_steps(mut self, steps: usize) -> Self {
        self.max_episode_steps = Some(steps);
        self
    }

    /// Set target device
    pub fn device(mut self, device: DeviceSpec) -> Self {
        self.device = device;
        self
    }

    /// Set statistics history capacity
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Set base seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Enable or disable auto-reset
    pub fn auto_reset(mut self, enabled: bool) -> Self {
        self.auto_reset = enabled;
        self
    }

    /// Set reward mode
    pub fn reward_mode(mut self, mode: RewardMode) -> Self {
        self.reward_mode = mode;
        self
    }
}

fn invalid(message: &str) -> anyhow::Error {
    VecEnvError::InvalidConfig(message.to_string()).into()
}
