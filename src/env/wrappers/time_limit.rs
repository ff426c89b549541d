//! Episode horizon enforcement

use anyhow::Result;

use crate::{
    env::{AgentStep, InfoValue, MultiAgentEnv, Space},
    error::VecEnvError,
};

/// Info key set on the step that reaches the horizon
pub const TIME_LIMIT_TRUNCATED: &str = "TimeLimit.truncated";

/// Truncates every episode after a fixed number of steps
///
/// When the horizon is reached, every agent that did not terminate naturally
/// is marked truncated, so the instance always ends on that step. The info
/// entry [`TIME_LIMIT_TRUNCATED`] records whether the horizon, rather than
/// the environment itself, ended the episode.
#[derive(Debug)]
pub struct TimeLimit<E> {
    env: E,
    max_episode_steps: usize,
    elapsed_steps: Option<usize>,
}

impl<E: MultiAgentEnv> TimeLimit<E> {
    /// Wrap `env` with the given horizon
    ///
    /// When `max_episode_steps` is `None`, the environment's own default is
    /// used. Having no horizon at all is a configuration error.
    pub fn new(env: E, max_episode_steps: Option<usize>) -> Result<Self> {
        let max_episode_steps = max_episode_steps.or_else(|| env.max_episode_steps()).ok_or_else(|| {
            VecEnvError::InvalidConfig(
                "max_episode_steps is not configured and the environment has no default".into(),
            )
        })?;
        if max_episode_steps == 0 {
            return Err(VecEnvError::InvalidConfig("max_episode_steps must be positive".into()).into());
        }
        Ok(Self { env, max_episode_steps, elapsed_steps: None })
    }

    /// The configured horizon
    pub fn max_episode_steps(&self) -> usize {
        self.max_episode_steps
    }

    /// Steps taken since the last reset, `None` before the first reset
    pub fn elapsed_steps(&self) -> Option<usize> {
        self.elapsed_steps
    }

    /// The wrapped environment
    pub fn inner(&self) -> &E {
        &self.env
    }
}

impl<E: MultiAgentEnv> MultiAgentEnv for TimeLimit<E> {
    type Observation = E::Observation;
    type Action = E::Action;

    fn num_agents(&self) -> usize {
        self.env.num_agents()
    }

    fn observation_spaces(&self) -> Vec<Space> {
        self.env.observation_spaces()
    }

    fn max_episode_steps(&self) -> Option<usize> {
        Some(self.max_episode_steps)
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<Vec<Self::Observation>> {
        let observations = self.env.reset(seed)?;
        self.elapsed_steps = Some(0);
        Ok(observations)
    }

    fn step(&mut self, actions: &[Self::Action]) -> Result<AgentStep<Self::Observation>> {
        let elapsed = self.elapsed_steps.ok_or(VecEnvError::StepBeforeReset)?;

        let mut step = self.env.step(actions)?;
        let elapsed = elapsed + 1;
        self.elapsed_steps = Some(elapsed);

        if elapsed >= self.max_episode_steps {
            let cut_off = !step.all_done();
            for (trunc, term) in step.truncated.iter_mut().zip(&step.terminated) {
                if !*term {
                    *trunc = true;
                }
            }
            step.info.insert(TIME_LIMIT_TRUNCATED.to_string(), InfoValue::Bool(cut_off));
        }

        Ok(step)
    }
}
