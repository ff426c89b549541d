//! Vectorized environments
//!
//! A [`VecEnv`] drives N identically configured instances in lockstep and
//! returns their results as arrays indexed `[instance, agent, ...]`. Every
//! instance runs the [`wrap_env`] chain, so each one reports a single
//! instance-level done flag and flat observations.
//!
//! Stepping is split in two phases: [`VecEnv::step_async`] dispatches one
//! action tuple per instance and [`VecEnv::step_wait`] blocks until every
//! instance has finished. Only one batch may be in flight at a time.
//!
//! Three execution strategies share this interface:
//!
//! - [`SequentialVecEnv`]: instances step one after another in the caller
//! - [`WorkerVecEnv`]: each instance owns a dedicated worker thread
//! - [`PooledVecEnv`]: instances are stepped on Rayon's thread pool
//!
//! [`make_vec_env`] picks one from a [`VecEnvConfig`].

use anyhow::Result;

use crate::{
    config::{ExecutionStrategy, VecEnvConfig},
    env::{
        registry::EnvRegistry,
        stats::StatisticsHistory,
        wrappers::{wrap_env, WrappedEnv},
        MultiAgentEnv, Observation,
    },
};

mod batch;
mod pooled;
mod protocol;
mod sequential;
mod worker;

pub use batch::{transpose, BatchedStep, ObservationBatch};
pub use pooled::PooledVecEnv;
pub use protocol::TERMINAL_OBSERVATION;
pub use sequential::SequentialVecEnv;
pub use worker::WorkerVecEnv;

/// Batched interface over N environment instances
///
/// `A` is the action type of a single agent.
///
/// Sequencing and shape errors (`StepInFlight`, `NoStepInFlight`,
/// `ResetWhileStepping`, `StepBeforeReset`, `StepAfterEpisodeEnd`,
/// `ActionCountMismatch`, `AgentCountMismatch`) reject the call and leave
/// the adapter as it was. An environment error, a worker failure or a
/// malformed result poisons the adapter; every later call returns
/// [`VecEnvError::Closed`](crate::error::VecEnvError::Closed), as does any
/// call after [`close`](VecEnv::close).
pub trait VecEnv<A> {
    /// Number of instances
    fn num_envs(&self) -> usize;

    /// Number of agents per instance
    fn num_agents(&self) -> usize;

    /// Flat observation dimension of each agent
    fn observation_dims(&self) -> &[usize];

    /// Reset every instance; instance `i` is seeded with `seed + i`
    fn reset_all(&mut self, seed: Option<u64>) -> Result<ObservationBatch>;

    /// Dispatch one action tuple per instance (`actions[instance][agent]`)
    fn step_async(&mut self, actions: Vec<Vec<A>>) -> Result<()>;

    /// Block until the in-flight batch completes
    fn step_wait(&mut self) -> Result<BatchedStep>;

    /// Synchronous step
    fn step(&mut self, actions: Vec<Vec<A>>) -> Result<BatchedStep> {
        self.step_async(actions)?;
        self.step_wait()
    }

    /// Completed-episode history of every instance, in instance order
    ///
    /// Fails with `StepInFlight` while a batch is in flight.
    fn episode_histories(&mut self) -> Result<Vec<StatisticsHistory>>;

    /// Release workers; later calls fail
    fn close(&mut self) -> Result<()>;
}

/// Build a vectorized environment for `config.env_id`
///
/// The horizon is taken from the configuration, then from the registry
/// entry, then from the environment itself.
pub fn make_vec_env<E>(config: &VecEnvConfig, registry: &EnvRegistry<E>) -> Result<Box<dyn VecEnv<E::Action>>>
where
    E: MultiAgentEnv<Observation = Observation> + Send + 'static,
    E::Action: Send + Sync + 'static,
{
    config.validate()?;
    let spec = registry.spec(&config.env_id)?.clone();
    let wrap = config.wrap_config(spec.max_episode_steps);
    let strategy = config.effective_strategy();

    tracing::info!(
        "Creating {} instance(s) of '{}' with {:?} execution",
        config.num_envs,
        spec.id,
        strategy
    );

    let build_all = || -> Result<Vec<WrappedEnv<E>>> {
        (0..config.num_envs).map(|_| wrap_env(spec.make()?, &wrap)).collect()
    };

    let venv: Box<dyn VecEnv<E::Action>> = match strategy {
        ExecutionStrategy::Sequential => Box::new(SequentialVecEnv::new(build_all()?, config.auto_reset)?),
        ExecutionStrategy::Pooled => Box::new(PooledVecEnv::new(build_all()?, config.auto_reset)?),
        ExecutionStrategy::Worker => {
            let spec = spec.clone();
            Box::new(WorkerVecEnv::spawn(
                config.num_envs,
                move |_rank| wrap_env(spec.make()?, &wrap),
                config.auto_reset,
            )?)
        }
    };
    Ok(venv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::{
            chase::{TargetChase, TARGET_CHASE_ID},
            wrappers::testing::ScriptedEnv,
        },
        error::VecEnvError,
    };

    fn scripted_registry() -> EnvRegistry<ScriptedEnv> {
        let mut registry = EnvRegistry::new();
        registry.register("scripted", Some(3), || Ok(ScriptedEnv::new(2)));
        registry.register("scripted-no-horizon", None, || Ok(ScriptedEnv::new(2)));
        registry
    }

    #[test]
    fn test_make_each_strategy() {
        let registry = scripted_registry();
        for strategy in [ExecutionStrategy::Sequential, ExecutionStrategy::Worker, ExecutionStrategy::Pooled] {
            let config = VecEnvConfig::new("scripted").num_envs(3).strategy(strategy);
            let mut venv = make_vec_env(&config, &registry).unwrap();
            assert_eq!(venv.num_envs(), 3);
            assert_eq!(venv.num_agents(), 2);

            venv.reset_all(Some(config.seed)).unwrap();
            let mut dones = Vec::new();
            for _ in 0..3 {
                dones = venv.step(vec![vec![0, 0]; 3]).unwrap().dones;
            }
            // Registry horizon applies
            assert_eq!(dones, vec![true; 3], "{:?}", strategy);
            venv.close().unwrap();
        }
    }

    #[test]
    fn test_histories_rejected_while_in_flight() {
        let registry = scripted_registry();
        for strategy in [ExecutionStrategy::Sequential, ExecutionStrategy::Worker, ExecutionStrategy::Pooled] {
            let config = VecEnvConfig::new("scripted").num_envs(2).strategy(strategy);
            let mut venv = make_vec_env(&config, &registry).unwrap();
            venv.reset_all(None).unwrap();
            venv.step_async(vec![vec![0, 0]; 2]).unwrap();

            let err = venv.episode_histories().unwrap_err();
            assert_eq!(err.downcast_ref::<VecEnvError>(), Some(&VecEnvError::StepInFlight), "{:?}", strategy);

            // The rejected query leaves the batch in flight
            venv.step_wait().unwrap();
            assert_eq!(venv.episode_histories().unwrap().len(), 2, "{:?}", strategy);
        }
    }

    #[test]
    fn test_config_horizon_overrides_registry() {
        let registry = scripted_registry();
        let config = VecEnvConfig::new("scripted").num_envs(2).max_episode_steps(1);
        let mut venv = make_vec_env(&config, &registry).unwrap();
        venv.reset_all(None).unwrap();
        assert_eq!(venv.step(vec![vec![0, 0]; 2]).unwrap().dones, vec![true, true]);
    }

    #[test]
    fn test_missing_horizon_rejected() {
        let registry = scripted_registry();
        let config = VecEnvConfig::new("scripted-no-horizon").num_envs(2);
        let err = make_vec_env(&config, &registry).err().unwrap();
        assert!(matches!(err.downcast_ref::<VecEnvError>(), Some(VecEnvError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_env_rejected() {
        let registry = scripted_registry();
        let err = make_vec_env(&VecEnvConfig::new("nope"), &registry).err().unwrap();
        assert_eq!(err.downcast_ref::<VecEnvError>(), Some(&VecEnvError::UnknownEnv("nope".into())));
    }

    #[test]
    fn test_environment_default_horizon() {
        let mut registry = EnvRegistry::new();
        registry.register(TARGET_CHASE_ID, None, || TargetChase::new(4, 1));
        let config = VecEnvConfig::new(TARGET_CHASE_ID).num_envs(2).strategy(ExecutionStrategy::Pooled);
        let mut venv = make_vec_env(&config, &registry).unwrap();
        assert_eq!(venv.observation_dims(), &[9]);

        venv.reset_all(Some(1)).unwrap();
        // Standing still never reaches the target, so only the horizon ends the episode
        let mut steps = 0;
        loop {
            steps += 1;
            let batch = venv.step(vec![vec![1]; 2]).unwrap();
            if batch.dones[0] {
                assert!(batch.truncated[0]);
                break;
            }
        }
        assert_eq!(steps, crate::env::chase::DEFAULT_MAX_STEPS);
    }
}
