//! Per-agent done squashing
//!
//! Episodes end per instance, not per agent: an instance is done only once
//! every one of its agents is done.

use anyhow::Result;

use crate::{
    env::{InstanceEnv, InstanceStep, MultiAgentEnv, Space},
    error::VecEnvError,
};

/// Lifecycle of an instance's episode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodePhase {
    /// Never reset
    NotStarted,

    /// At least one agent is still active
    Active,

    /// Every agent is done; only `reset` leaves this phase
    EpisodeEnd,
}

/// Instance-level flags derived from per-agent ones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquashedDones {
    /// `terminated || truncated` for each agent
    pub agent_dones: Vec<bool>,

    /// Every agent is done
    pub done: bool,

    /// Done, and every agent terminated naturally
    pub terminated: bool,

    /// Done, but at least one agent was cut off
    pub truncated: bool,
}

/// Squash per-agent flags into instance-level flags
pub fn squash_dones(terminated: &[bool], truncated: &[bool]) -> SquashedDones {
    let agent_dones: Vec<bool> =
        terminated.iter().zip(truncated).map(|(term, trunc)| *term || *trunc).collect();
    let done = !agent_dones.is_empty() && agent_dones.iter().all(|&d| d);
    let all_terminated = terminated.iter().all(|&t| t);

    SquashedDones {
        agent_dones,
        done,
        terminated: done && all_terminated,
        truncated: done && !all_terminated,
    }
}

/// Turns a [`MultiAgentEnv`] into an [`InstanceEnv`]
#[derive(Debug)]
pub struct SquashDones<E> {
    env: E,
    num_agents: usize,
    phase: EpisodePhase,
}

impl<E: MultiAgentEnv> SquashDones<E> {
    /// Wrap `env`
    pub fn new(env: E) -> Result<Self> {
        let num_agents = env.num_agents();
        if num_agents == 0 {
            return Err(VecEnvError::InvalidConfig("environment has no agents".into()).into());
        }
        Ok(Self { env, num_agents, phase: EpisodePhase::NotStarted })
    }

    /// Current episode phase
    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    /// The wrapped environment
    pub fn inner(&self) -> &E {
        &self.env
    }

    fn check_len(&self, actual: usize, what: &str) -> Result<()> {
        if actual != self.num_agents {
            return Err(VecEnvError::AgentCountMismatch {
                expected: self.num_agents,
                actual,
                what: what.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl<E: MultiAgentEnv> InstanceEnv for SquashDones<E> {
    type Observation = E::Observation;
    type Action = E::Action;

    fn num_agents(&self) -> usize {
        self.num_agents
    }

    fn observation_spaces(&self) -> Vec<Space> {
        self.env.observation_spaces()
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<Vec<Self::Observation>> {
        let observations = self.env.reset(seed)?;
        self.check_len(observations.len(), "reset observations")?;
        self.phase = EpisodePhase::Active;
        Ok(observations)
    }

    fn step(&mut self, actions: &[Self::Action]) -> Result<InstanceStep<Self::Observation>> {
        match self.phase {
            EpisodePhase::NotStarted => return Err(VecEnvError::StepBeforeReset.into()),
            EpisodePhase::EpisodeEnd => return Err(VecEnvError::StepAfterEpisodeEnd.into()),
            EpisodePhase::Active => {}
        }
        self.check_len(actions.len(), "actions")?;

        let step = self.env.step(actions)?;
        self.check_len(step.observations.len(), "observations")?;
        self.check_len(step.rewards.len(), "rewards")?;
        self.check_len(step.terminated.len(), "terminated")?;
        self.check_len(step.truncated.len(), "truncated")?;

        let squashed = squash_dones(&step.terminated, &step.truncated);
        if squashed.done {
            self.phase = EpisodePhase::EpisodeEnd;
        }

        Ok(InstanceStep {
            observations: step.observations,
            rewards: step.rewards,
            agent_dones: squashed.agent_dones,
            done: squashed.done,
            terminated: squashed.terminated,
            truncated: squashed.truncated,
            info: step.info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::wrappers::{testing::ScriptedEnv, TimeLimit};

    #[test]
    fn test_squash_requires_every_agent() {
        let squashed = squash_dones(&[true, true, false], &[false, false, false]);
        assert!(!squashed.done);
        assert!(!squashed.terminated);
        assert!(!squashed.truncated);
        assert_eq!(squashed.agent_dones, vec![true, true, false]);
    }

    #[test]
    fn test_squash_mixed_termination_is_truncation() {
        let squashed = squash_dones(&[true, false], &[false, true]);
        assert!(squashed.done);
        assert!(!squashed.terminated);
        assert!(squashed.truncated);
    }

    #[test]
    fn test_squash_all_terminated() {
        let squashed = squash_dones(&[true, true], &[false, false]);
        assert!(squashed.done && squashed.terminated && !squashed.truncated);
    }

    #[test]
    fn test_phase_transitions() {
        let env = ScriptedEnv::new(2).terminate_at(2, vec![true, true]);
        let mut env = SquashDones::new(env).unwrap();
        assert_eq!(env.phase(), EpisodePhase::NotStarted);
        assert_eq!(
            env.step(&[0, 0]).unwrap_err().downcast_ref::<VecEnvError>(),
            Some(&VecEnvError::StepBeforeReset)
        );

        env.reset(None).unwrap();
        assert_eq!(env.phase(), EpisodePhase::Active);
        assert!(!env.step(&[0, 0]).unwrap().done);
        assert!(env.step(&[0, 0]).unwrap().done);
        assert_eq!(env.phase(), EpisodePhase::EpisodeEnd);

        let err = env.step(&[0, 0]).unwrap_err();
        assert_eq!(err.downcast_ref::<VecEnvError>(), Some(&VecEnvError::StepAfterEpisodeEnd));

        env.reset(Some(8)).unwrap();
        assert_eq!(env.phase(), EpisodePhase::Active);
        assert_eq!(env.inner().last_seed(), Some(8));
    }

    #[test]
    fn test_time_limit_law() {
        let env = TimeLimit::new(ScriptedEnv::new(3), Some(5)).unwrap();
        let mut env = SquashDones::new(env).unwrap();
        env.reset(None).unwrap();

        for _ in 0..4 {
            assert!(!env.step(&[0, 0, 0]).unwrap().done);
        }
        let step = env.step(&[0, 0, 0]).unwrap();
        assert!(step.done);
        assert!(step.truncated);
        assert!(!step.terminated);
    }

    #[test]
    fn test_action_count_checked() {
        let mut env = SquashDones::new(ScriptedEnv::new(2)).unwrap();
        env.reset(None).unwrap();
        let err = env.step(&[0]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VecEnvError>(),
            Some(VecEnvError::AgentCountMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_inner_failure_propagates() {
        let mut env = SquashDones::new(ScriptedEnv::new(1).fail_at(1)).unwrap();
        env.reset(None).unwrap();
        let err = env.step(&[0]).unwrap_err();
        assert!(err.to_string().contains("scripted failure"));
    }
}
