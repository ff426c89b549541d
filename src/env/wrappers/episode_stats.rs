//! Episode statistics recording

use anyhow::Result;

use crate::env::{
    stats::{EpisodeAccumulator, StatisticsHistory},
    InfoValue, InstanceEnv, InstanceStep, Space,
};

/// Info key holding the per-agent cumulative reward
pub const EPISODE_REWARD: &str = "episode_reward";
/// Info key holding the episode length
pub const EPISODE_LENGTH: &str = "episode_length";
/// Info key holding the episode wall-clock time in seconds
pub const EPISODE_TIME: &str = "episode_time";
/// Info key set when the finished episode was truncated
pub const EPISODE_TRUNCATED: &str = "episode_truncated";

/// Info key holding one agent's cumulative reward
pub fn agent_reward_key(agent: usize) -> String {
    format!("agent{}/episode_reward", agent)
}

/// Records per-agent episode returns, lengths and durations
///
/// Rewards and dones pass through untouched. On the step that ends an
/// episode, the totals are written into the step info and appended to the
/// bounded history, and the accumulator is zeroed.
#[derive(Debug)]
pub struct EpisodeStatistics<E> {
    env: E,
    accumulator: EpisodeAccumulator,
    history: StatisticsHistory,
}

impl<E: InstanceEnv> EpisodeStatistics<E> {
    /// Wrap `env`, keeping at most `history_capacity` finished episodes
    pub fn new(env: E, history_capacity: usize) -> Self {
        let accumulator = EpisodeAccumulator::new(env.num_agents());
        Self { env, accumulator, history: StatisticsHistory::new(history_capacity) }
    }

    /// Totals of the running episode
    pub fn accumulator(&self) -> &EpisodeAccumulator {
        &self.accumulator
    }

    /// Finished episodes
    pub fn history(&self) -> &StatisticsHistory {
        &self.history
    }
}

impl<E: InstanceEnv> InstanceEnv for EpisodeStatistics<E> {
    type Observation = E::Observation;
    type Action = E::Action;

    fn num_agents(&self) -> usize {
        self.env.num_agents()
    }

    fn observation_spaces(&self) -> Vec<Space> {
        self.env.observation_spaces()
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<Vec<Self::Observation>> {
        let observations = self.env.reset(seed)?;
        self.accumulator.clear();
        Ok(observations)
    }

    fn step(&mut self, actions: &[Self::Action]) -> Result<InstanceStep<Self::Observation>> {
        let mut step = self.env.step(actions)?;
        self.accumulator.record(&step.rewards);

        if step.done {
            let record = self.accumulator.finish(step.truncated);
            tracing::debug!(
                length = record.length,
                total_reward = record.total_reward(),
                truncated = record.truncated,
                "episode finished"
            );

            for (agent, &reward) in record.rewards.iter().enumerate() {
                step.info.insert(agent_reward_key(agent), InfoValue::Float(reward));
            }
            step.info.insert(EPISODE_REWARD.to_string(), InfoValue::Floats(record.rewards.clone()));
            step.info.insert(EPISODE_LENGTH.to_string(), InfoValue::Int(record.length as i64));
            step.info
                .insert(EPISODE_TIME.to_string(), InfoValue::Float(record.duration.as_secs_f64()));
            step.info.insert(EPISODE_TRUNCATED.to_string(), InfoValue::Bool(record.truncated));

            self.history.push(record);
            self.accumulator.clear();
        }

        Ok(step)
    }

    fn episode_history(&self) -> Option<&StatisticsHistory> {
        Some(&self.history)
    }
}
