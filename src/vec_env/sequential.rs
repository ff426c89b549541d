//! Sequential execution in the calling thread

use anyhow::Result;

use super::{
    batch::{BatchedStep, ObservationBatch},
    protocol::{check_layouts, instance_layout, step_instance, StepProtocol},
    VecEnv,
};
use crate::env::{stats::StatisticsHistory, InstanceEnv};

/// Runs every instance one after another in the calling thread
///
/// `step_async` only buffers the actions; all the work happens in
/// `step_wait`.
pub struct SequentialVecEnv<E: InstanceEnv> {
    envs: Vec<E>,
    num_agents: usize,
    dims: Vec<usize>,
    protocol: StepProtocol,
    pending: Option<Vec<Vec<E::Action>>>,
}

impl<E: InstanceEnv<Observation = Vec<f32>>> SequentialVecEnv<E> {
    /// Take ownership of already wrapped instances
    pub fn new(envs: Vec<E>, auto_reset: bool) -> Result<Self> {
        let layouts: Vec<_> = envs.iter().map(instance_layout).collect();
        let (num_agents, dims) = check_layouts(&layouts)?;
        let protocol = StepProtocol::new(envs.len(), num_agents, auto_reset);
        Ok(Self { envs, num_agents, dims, protocol, pending: None })
    }

    /// The wrapped instances
    pub fn envs(&self) -> &[E] {
        &self.envs
    }

    fn run_pending(&mut self, actions: Vec<Vec<E::Action>>) -> Result<BatchedStep> {
        let auto_reset = self.protocol.auto_reset();
        let steps = self
            .envs
            .iter_mut()
            .zip(&actions)
            .map(|(env, tuple)| step_instance(env, tuple, auto_reset))
            .collect::<Result<Vec<_>>>()?;
        BatchedStep::from_instances(steps, &self.dims)
    }
}

impl<E: InstanceEnv<Observation = Vec<f32>>> VecEnv<E::Action> for SequentialVecEnv<E> {
    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn num_agents(&self) -> usize {
        self.num_agents
    }

    fn observation_dims(&self) -> &[usize] {
        &self.dims
    }

    fn reset_all(&mut self, seed: Option<u64>) -> Result<ObservationBatch> {
        self.protocol.begin_reset()?;
        let rows = self
            .envs
            .iter_mut()
            .enumerate()
            .map(|(rank, env)| env.reset(seed.map(|s| s.wrapping_add(rank as u64))))
            .collect::<Result<Vec<_>>>();
        let batch = rows.and_then(|rows| ObservationBatch::from_instances(rows, &self.dims));
        match batch {
            Ok(batch) => {
                self.protocol.end_reset();
                Ok(batch)
            }
            Err(err) => Err(self.protocol.poison(err)),
        }
    }

    fn step_async(&mut self, actions: Vec<Vec<E::Action>>) -> Result<()> {
        self.protocol.begin_step(&actions)?;
        self.pending = Some(actions);
        Ok(())
    }

    fn step_wait(&mut self) -> Result<BatchedStep> {
        self.protocol.begin_wait()?;
        let Some(actions) = self.pending.take() else {
            return Err(self.protocol.poison(anyhow::anyhow!("pending actions were lost")));
        };
        match self.run_pending(actions) {
            Ok(batch) => {
                self.protocol.end_step(&batch.dones);
                Ok(batch)
            }
            Err(err) => Err(self.protocol.poison(err)),
        }
    }

    fn episode_histories(&mut self) -> Result<Vec<StatisticsHistory>> {
        self.protocol.check_idle()?;
        Ok(self.envs.iter().map(|env| env.episode_history().cloned().unwrap_or_default()).collect())
    }

    fn close(&mut self) -> Result<()> {
        self.protocol.close();
        self.pending = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::wrappers::{testing::ScriptedEnv, wrap_env, RewardMode, WrapConfig, EPISODE_REWARD},
        error::VecEnvError,
        vec_env::TERMINAL_OBSERVATION,
    };

    fn config(horizon: usize) -> WrapConfig {
        WrapConfig {
            max_episode_steps: Some(horizon),
            history_capacity: 10,
            reward_mode: RewardMode::Individual,
        }
    }

    fn make(
        n: usize,
        agents: usize,
        horizon: usize,
        auto_reset: bool,
    ) -> SequentialVecEnv<impl InstanceEnv<Observation = Vec<f32>, Action = i64>> {
        let envs = (0..n)
            .map(|i| {
                let env = ScriptedEnv::new(agents).with_rewards(vec![vec![i as f32 + 1.0; agents]; horizon]);
                wrap_env(env, &config(horizon)).unwrap()
            })
            .collect();
        SequentialVecEnv::new(envs, auto_reset).unwrap()
    }

    #[test]
    fn test_shapes_and_order() {
        let mut venv = make(3, 2, 10, true);
        let obs = venv.reset_all(Some(0)).unwrap();
        assert_eq!(obs.num_envs(), 3);
        assert_eq!(obs.num_agents(), 2);

        let actions = vec![vec![10, 11], vec![20, 21], vec![30, 31]];
        let batch = venv.step(actions).unwrap();
        assert_eq!(batch.rewards, vec![vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]]);
        // ScriptedEnv echoes the action as the last observation element
        assert_eq!(batch.observations.get(2, 1), &[1.0, 1.0, 31.0]);
    }

    #[test]
    fn test_reset_seeds_each_rank() {
        let mut venv = make(3, 2, 10, true);
        let obs = venv.reset_all(Some(10)).unwrap();
        for rank in 0..3 {
            // ScriptedEnv reports the reset seed in the last slot
            assert_eq!(obs.get(rank, 1)[2], 10.0 + rank as f32);
        }

        let obs = venv.reset_all(None).unwrap();
        assert!((0..3).all(|rank| obs.get(rank, 0)[2] == -1.0));
    }

    #[test]
    fn test_auto_reset_reports_terminal_observation() {
        let mut venv = make(2, 2, 2, true);
        venv.reset_all(None).unwrap();
        venv.step(vec![vec![0, 0]; 2]).unwrap();

        let batch = venv.step(vec![vec![0, 0]; 2]).unwrap();
        assert_eq!(batch.dones, vec![true, true]);
        assert!(batch.truncated.iter().all(|&t| t));

        let terminal = batch.infos[0][TERMINAL_OBSERVATION].as_rows().unwrap();
        assert_eq!(terminal[0][0], 2.0);
        // Fresh observations after the reset
        assert_eq!(batch.observations.get(0, 0)[0], 0.0);
        assert_eq!(batch.infos[1][EPISODE_REWARD].as_floats().unwrap(), &[4.0, 4.0]);

        // Stepping continues without an explicit reset
        let batch = venv.step(vec![vec![0, 0]; 2]).unwrap();
        assert_eq!(batch.dones, vec![false, false]);

        let histories = venv.episode_histories().unwrap();
        assert_eq!(histories.len(), 2);
        assert_eq!(histories[0].len(), 1);
        assert_eq!(venv.envs()[1].episode_history().map(|h| h.len()), Some(1));
    }

    #[test]
    fn test_done_without_auto_reset_requires_reset() {
        let mut venv = make(1, 1, 1, false);
        venv.reset_all(None).unwrap();
        assert!(venv.step(vec![vec![0]]).unwrap().dones[0]);

        let err = venv.step_async(vec![vec![0]]).unwrap_err();
        assert_eq!(err.downcast_ref::<VecEnvError>(), Some(&VecEnvError::StepAfterEpisodeEnd));

        venv.reset_all(None).unwrap();
        assert!(venv.step(vec![vec![0]]).is_ok());
    }

    #[test]
    fn test_env_failure_poisons() {
        let envs = vec![
            wrap_env(ScriptedEnv::new(1), &config(10)).unwrap(),
            wrap_env(ScriptedEnv::new(1).fail_at(1), &config(10)).unwrap(),
        ];
        let mut venv = SequentialVecEnv::new(envs, true).unwrap();
        venv.reset_all(None).unwrap();

        assert!(venv.step(vec![vec![0], vec![0]]).is_err());
        let err = venv.reset_all(None).unwrap_err();
        assert!(matches!(err.downcast_ref::<VecEnvError>(), Some(VecEnvError::Closed(_))));
    }

    #[test]
    fn test_agent_count_mismatch_rejected() {
        let envs = vec![
            wrap_env(ScriptedEnv::new(2), &config(10)).unwrap(),
            wrap_env(ScriptedEnv::new(3), &config(10)).unwrap(),
        ];
        assert!(SequentialVecEnv::new(envs, true).is_err());
    }
}
