//! # Thrust MARL
//!
//! Batched, parallel multi-agent environment runtime for reinforcement
//! learning.
//!
//! Every environment instance runs behind a per-instance wrapper chain
//! (team reward, time limit, done squashing, observation flattening and
//! episode statistics), and N instances are driven in lockstep by a
//! [`VecEnv`](vec_env::VecEnv) using one of three execution strategies.
//! With the `training` feature, [`tensor::TensorVecEnv`] speaks `tch`
//! tensors on a target device.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use thrust_marl::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let registry = thrust_marl::env::chase::registry();
//! let config = VecEnvConfig::new(TARGET_CHASE_ID)
//!     .num_envs(8)
//!     .strategy(ExecutionStrategy::Worker);
//!
//! let mut venv = make_vec_env(&config, &registry)?;
//! venv.reset_all(Some(config.seed))?;
//! let batch = venv.step(vec![vec![1, 1]; 8])?;
//! assert_eq!(batch.rewards.len(), 8);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Vectorized environment configuration
pub mod config;

/// Environment traits, spaces and per-instance wrappers
pub mod env;

/// Runtime error taxonomy
pub mod error;

/// Batched execution strategies
pub mod vec_env;

/// Device tensor conversion (requires training feature)
#[cfg(feature = "training")]
pub mod tensor;

/// Prelude module for convenient imports
///
/// This module re-exports commonly used types and traits for convenience.
pub mod prelude {
    pub use crate::{
        config::{DeviceSpec, ExecutionStrategy, VecEnvConfig},
        env::{
            chase::{TargetChase, TARGET_CHASE_ID},
            registry::EnvRegistry,
            wrappers::{wrap_env, RewardMode, WrapConfig},
            InstanceEnv, MultiAgentEnv, Observation, Space,
        },
        error::VecEnvError,
        vec_env::{make_vec_env, BatchedStep, ObservationBatch, VecEnv},
    };

    #[cfg(feature = "training")]
    pub use crate::tensor::{TensorStep, TensorVecEnv};
}

/// Current version of thrust-marl
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }
}
