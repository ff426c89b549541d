//! Per-instance wrapper chain
//!
//! ```text
//! MultiAgentEnv ─ TeamReward ─ TimeLimit ─┐
//!                                          SquashDones ─ FlattenObservation ─ EpisodeStatistics
//! (per-agent flags)                        (instance-level done)
//! ```

use anyhow::Result;

use crate::env::{MultiAgentEnv, Observation};

mod episode_stats;
mod flatten;
mod reward;
mod squash;
mod time_limit;

#[cfg(test)]
pub(crate) mod testing;

pub use episode_stats::{
    agent_reward_key, EpisodeStatistics, EPISODE_LENGTH, EPISODE_REWARD, EPISODE_TIME,
    EPISODE_TRUNCATED,
};
pub use flatten::FlattenObservation;
pub use reward::{RewardMode, TeamReward};
pub use squash::{squash_dones, EpisodePhase, SquashDones, SquashedDones};
pub use time_limit::{TimeLimit, TIME_LIMIT_TRUNCATED};

/// The full chain applied to every instance
pub type WrappedEnv<E> = EpisodeStatistics<FlattenObservation<SquashDones<TimeLimit<TeamReward<E>>>>>;

/// Settings for [`wrap_env`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapConfig {
    /// Episode horizon; `None` falls back to the environment default
    pub max_episode_steps: Option<usize>,

    /// Completed episodes kept by the statistics tracker
    pub history_capacity: usize,

    /// Reward distribution across agents
    pub reward_mode: RewardMode,
}

/// Apply the standard wrapper chain to one environment instance
pub fn wrap_env<E>(env: E, config: &WrapConfig) -> Result<WrappedEnv<E>>
where
    E: MultiAgentEnv<Observation = Observation>,
{
    let env = TeamReward::new(env, config.reward_mode);
    let env = TimeLimit::new(env, config.max_episode_steps)?;
    let env = SquashDones::new(env)?;
    let env = FlattenObservation::new(env)?;
    Ok(EpisodeStatistics::new(env, config.history_capacity))
}
