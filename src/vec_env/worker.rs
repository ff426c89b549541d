//! Worker-thread execution
//!
//! Each instance is built and owned by its own OS thread. The adapter talks
//! to a worker only through channels: commands go in, replies come out. The
//! only state the workers share is the immutable constructor.
//!
//! A worker that reports an error, panics or hangs up poisons the whole
//! adapter; partial batches are never returned.

use std::{sync::Arc, thread::JoinHandle};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};

use super::{
    batch::{BatchedStep, ObservationBatch},
    protocol::{check_layouts, instance_layout, step_instance, StepProtocol},
    VecEnv,
};
use crate::{
    env::{stats::StatisticsHistory, InstanceEnv, InstanceStep},
    error::VecEnvError,
};

/// Command sent to a worker
#[derive(Debug)]
enum Command<A> {
    Reset(Option<u64>),
    Step(Vec<A>),
    History,
    Close,
}

/// Reply sent back by a worker
#[derive(Debug)]
enum Reply {
    Ready { num_agents: usize, dims: Vec<usize> },
    Reset(Vec<Vec<f32>>),
    Step(InstanceStep<Vec<f32>>),
    History(StatisticsHistory),
    Failed(String),
}

struct WorkerHandle<A> {
    rank: usize,
    commands: Sender<Command<A>>,
    replies: Receiver<Reply>,
    thread: Option<JoinHandle<()>>,
}

impl<A> WorkerHandle<A> {
    fn send(&self, command: Command<A>) -> Result<()> {
        self.commands.send(command).map_err(|_| self.failure("command channel closed"))
    }

    fn recv(&self) -> Result<Reply> {
        match self.replies.recv() {
            Ok(Reply::Failed(reason)) => Err(self.failure(&reason)),
            Ok(reply) => Ok(reply),
            Err(_) => Err(self.failure("worker exited without replying")),
        }
    }

    fn failure(&self, reason: &str) -> anyhow::Error {
        VecEnvError::WorkerFailed { worker: self.rank, reason: reason.to_string() }.into()
    }

    fn unexpected(&self, reply: Reply) -> anyhow::Error {
        self.failure(&format!("unexpected reply {:?}", reply))
    }
}

/// Runs each instance in a dedicated worker thread
pub struct WorkerVecEnv<A> {
    workers: Vec<WorkerHandle<A>>,
    num_agents: usize,
    dims: Vec<usize>,
    protocol: StepProtocol,
}

impl<A: Send + 'static> WorkerVecEnv<A> {
    /// Spawn `num_envs` workers, each building its instance with `make_env(rank)`
    ///
    /// Blocks until every worker has built its instance and reported its
    /// layout. Fails if any instance cannot be built or the layouts differ.
    pub fn spawn<E, F>(num_envs: usize, make_env: F, auto_reset: bool) -> Result<Self>
    where
        E: InstanceEnv<Observation = Vec<f32>, Action = A> + 'static,
        F: Fn(usize) -> Result<E> + Send + Sync + 'static,
    {
        if num_envs == 0 {
            return Err(VecEnvError::InvalidConfig("at least one environment is required".into()).into());
        }

        let make_env = Arc::new(make_env);
        let mut workers = Vec::with_capacity(num_envs);
        for rank in 0..num_envs {
            let (command_tx, command_rx) = crossbeam_channel::unbounded();
            let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
            let make_env = Arc::clone(&make_env);

            let thread = std::thread::Builder::new()
                .name(format!("vec-env-worker-{}", rank))
                .spawn(move || run_worker(rank, make_env.as_ref(), command_rx, reply_tx, auto_reset))?;

            workers.push(WorkerHandle {
                rank,
                commands: command_tx,
                replies: reply_rx,
                thread: Some(thread),
            });
        }

        // Dropping `venv` on an early return closes the workers that did start
        let mut venv = Self {
            workers,
            num_agents: 0,
            dims: Vec::new(),
            protocol: StepProtocol::new(0, 0, auto_reset),
        };
        let layouts = venv
            .workers
            .iter()
            .map(|worker| match worker.recv()? {
                Reply::Ready { num_agents, dims } => Ok((num_agents, dims)),
                other => Err(worker.unexpected(other)),
            })
            .collect::<Result<Vec<_>>>()?;
        let (num_agents, dims) = check_layouts(&layouts)?;

        tracing::info!("Spawned {} environment workers ({} agents each)", num_envs, num_agents);
        venv.num_agents = num_agents;
        venv.dims = dims;
        venv.protocol = StepProtocol::new(num_envs, num_agents, auto_reset);
        Ok(venv)
    }

    /// Send `command(rank)` to every worker, then collect one reply from each
    fn round_trip(&self, command: impl Fn(usize) -> Command<A>) -> Result<Vec<Reply>> {
        for worker in &self.workers {
            worker.send(command(worker.rank))?;
        }
        self.workers.iter().map(WorkerHandle::recv).collect()
    }
}

impl<A> WorkerVecEnv<A> {
    fn shutdown(&mut self) {
        for worker in &self.workers {
            let _ = worker.commands.send(Command::Close);
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    tracing::warn!("Environment worker {} panicked", worker.rank);
                }
            }
        }
    }
}

impl<A: Send + 'static> VecEnv<A> for WorkerVecEnv<A> {
    fn num_envs(&self) -> usize {
        self.workers.len()
    }

    fn num_agents(&self) -> usize {
        self.num_agents
    }

    fn observation_dims(&self) -> &[usize] {
        &self.dims
    }

    fn reset_all(&mut self, seed: Option<u64>) -> Result<ObservationBatch> {
        self.protocol.begin_reset()?;
        let result = self
            .round_trip(|rank| Command::Reset(seed.map(|s| s.wrapping_add(rank as u64))))
            .and_then(|replies| {
                let rows = replies
                    .into_iter()
                    .zip(&self.workers)
                    .map(|(reply, worker)| match reply {
                        Reply::Reset(obs) => Ok(obs),
                        other => Err(worker.unexpected(other)),
                    })
                    .collect::<Result<Vec<_>>>()?;
                ObservationBatch::from_instances(rows, &self.dims)
            });

        match result {
            Ok(batch) => {
                self.protocol.end_reset();
                Ok(batch)
            }
            Err(err) => Err(self.protocol.poison(err)),
        }
    }

    fn step_async(&mut self, actions: Vec<Vec<A>>) -> Result<()> {
        self.protocol.begin_step(&actions)?;
        for (worker, tuple) in self.workers.iter().zip(actions) {
            if let Err(err) = worker.send(Command::Step(tuple)) {
                return Err(self.protocol.poison(err));
            }
        }
        Ok(())
    }

    fn step_wait(&mut self) -> Result<BatchedStep> {
        self.protocol.begin_wait()?;
        let result = self
            .workers
            .iter()
            .map(|worker| match worker.recv()? {
                Reply::Step(step) => Ok(step),
                other => Err(worker.unexpected(other)),
            })
            .collect::<Result<Vec<_>>>()
            .and_then(|steps| BatchedStep::from_instances(steps, &self.dims));

        match result {
            Ok(batch) => {
                self.protocol.end_step(&batch.dones);
                Ok(batch)
            }
            Err(err) => Err(self.protocol.poison(err)),
        }
    }

    fn episode_histories(&mut self) -> Result<Vec<StatisticsHistory>> {
        self.protocol.check_idle()?;
        let result = self.round_trip(|_| Command::History).and_then(|replies| {
            replies
                .into_iter()
                .zip(&self.workers)
                .map(|(reply, worker)| match reply {
                    Reply::History(history) => Ok(history),
                    other => Err(worker.unexpected(other)),
                })
                .collect::<Result<Vec<_>>>()
        });
        result.map_err(|err| self.protocol.poison(err))
    }

    fn close(&mut self) -> Result<()> {
        self.protocol.close();
        self.shutdown();
        Ok(())
    }
}

impl<A> Drop for WorkerVecEnv<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker thread body: build the instance, then serve commands until closed
fn run_worker<E, F>(
    rank: usize,
    make_env: &F,
    commands: Receiver<Command<E::Action>>,
    replies: Sender<Reply>,
    auto_reset: bool,
) where
    E: InstanceEnv<Observation = Vec<f32>>,
    F: Fn(usize) -> Result<E>,
{
    let mut env = match make_env(rank) {
        Ok(env) => env,
        Err(err) => {
            let _ = replies.send(Reply::Failed(format!("failed to build environment: {:#}", err)));
            return;
        }
    };

    let (num_agents, dims) = instance_layout(&env);
    if replies.send(Reply::Ready { num_agents, dims }).is_err() {
        return;
    }

    while let Ok(command) = commands.recv() {
        let reply = match command {
            Command::Reset(seed) => env.reset(seed).map(Reply::Reset),
            Command::Step(actions) => step_instance(&mut env, &actions, auto_reset).map(Reply::Step),
            Command::History => Ok(Reply::History(env.episode_history().cloned().unwrap_or_default())),
            Command::Close => break,
        };
        let reply = reply.unwrap_or_else(|err| {
            tracing::warn!("Environment worker {} failed: {:#}", rank, err);
            Reply::Failed(format!("{:#}", err))
        });
        if replies.send(reply).is_err() {
            break;
        }
    }
    tracing::debug!("Environment worker {} shutting down", rank);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::wrappers::{testing::ScriptedEnv, wrap_env, RewardMode, WrapConfig, EPISODE_LENGTH},
        vec_env::SequentialVecEnv,
    };

    fn config() -> WrapConfig {
        WrapConfig { max_episode_steps: Some(4), history_capacity: 10, reward_mode: RewardMode::Individual }
    }

    fn spawn(num_envs: usize) -> WorkerVecEnv<i64> {
        WorkerVecEnv::spawn(
            num_envs,
            |rank| wrap_env(ScriptedEnv::new(2).with_rewards(vec![vec![rank as f32, 0.5]; 4]), &config()),
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_results_in_submission_order() {
        let mut venv = spawn(6);
        assert_eq!(venv.num_envs(), 6);
        assert_eq!(venv.observation_dims(), &[3, 3]);

        venv.reset_all(Some(0)).unwrap();
        let actions: Vec<Vec<i64>> = (0..6).map(|i| vec![i, 100 + i]).collect();
        let batch = venv.step(actions).unwrap();

        for rank in 0..6 {
            assert_eq!(batch.rewards[rank], vec![rank as f32, 0.5]);
            assert_eq!(batch.observations.get(rank, 1)[2], 100.0 + rank as f32);
        }
        venv.close().unwrap();
    }

    #[test]
    fn test_reset_seeds_each_rank() {
        let mut venv = spawn(3);
        let obs = venv.reset_all(Some(10)).unwrap();
        for rank in 0..3 {
            assert_eq!(obs.get(rank, 0)[2], 10.0 + rank as f32);
            assert_eq!(obs.get(rank, 1)[2], 10.0 + rank as f32);
        }
        let obs = venv.reset_all(None).unwrap();
        assert!((0..3).all(|rank| obs.get(rank, 0)[2] == -1.0));
    }

    #[test]
    fn test_matches_sequential() {
        let mut workers = spawn(3);
        let envs = (0..3)
            .map(|rank| {
                wrap_env(ScriptedEnv::new(2).with_rewards(vec![vec![rank as f32, 0.5]; 4]), &config()).unwrap()
            })
            .collect();
        let mut sequential = SequentialVecEnv::new(envs, true).unwrap();

        assert_eq!(workers.reset_all(Some(9)).unwrap(), sequential.reset_all(Some(9)).unwrap());
        for t in 0..10 {
            let actions: Vec<Vec<i64>> = (0..3).map(|i| vec![t, i]).collect();
            let a = workers.step(actions.clone()).unwrap();
            let b = sequential.step(actions).unwrap();
            assert_eq!(a.observations, b.observations);
            assert_eq!(a.rewards, b.rewards);
            assert_eq!(a.dones, b.dones);
            assert_eq!(a.truncated, b.truncated);
        }
    }

    #[test]
    fn test_histories_fetched_from_workers() {
        let mut venv = spawn(2);
        venv.reset_all(None).unwrap();
        for _ in 0..4 {
            venv.step(vec![vec![0, 0]; 2]).unwrap();
        }

        let histories = venv.episode_histories().unwrap();
        assert_eq!(histories.len(), 2);
        assert_eq!(histories[1].latest().unwrap().rewards, vec![4.0, 2.0]);
        assert_eq!(histories[1].latest().unwrap().length, 4);
    }

    #[test]
    fn test_episode_info_crosses_threads() {
        let mut venv = spawn(2);
        venv.reset_all(None).unwrap();
        let mut last = None;
        for _ in 0..4 {
            last = Some(venv.step(vec![vec![0, 0]; 2]).unwrap());
        }
        let batch = last.unwrap();
        assert_eq!(batch.dones, vec![true, true]);
        assert_eq!(batch.infos[0][EPISODE_LENGTH].as_int(), Some(4));
    }

    #[test]
    fn test_worker_failure_poisons_batch() {
        let mut venv = WorkerVecEnv::spawn(
            3,
            |rank| {
                let env = if rank == 1 { ScriptedEnv::new(1).fail_at(2) } else { ScriptedEnv::new(1) };
                wrap_env(env, &config())
            },
            true,
        )
        .unwrap();
        venv.reset_all(None).unwrap();
        venv.step(vec![vec![0]; 3]).unwrap();

        let err = venv.step(vec![vec![0]; 3]).unwrap_err();
        assert!(matches!(err.downcast_ref::<VecEnvError>(), Some(VecEnvError::WorkerFailed { worker: 1, .. })));

        let err = venv.step_async(vec![vec![0]; 3]).unwrap_err();
        assert!(matches!(err.downcast_ref::<VecEnvError>(), Some(VecEnvError::Closed(_))));
    }

    #[test]
    fn test_worker_panic_is_detected() {
        struct Panicking;
        impl InstanceEnv for Panicking {
            type Observation = Vec<f32>;
            type Action = i64;
            fn num_agents(&self) -> usize {
                1
            }
            fn observation_spaces(&self) -> Vec<crate::env::Space> {
                vec![crate::env::Space::boxed(vec![1])]
            }
            fn reset(&mut self, _seed: Option<u64>) -> Result<Vec<Vec<f32>>> {
                Ok(vec![vec![0.0]])
            }
            fn step(&mut self, _actions: &[i64]) -> Result<InstanceStep<Vec<f32>>> {
                panic!("simulated crash");
            }
        }

        let mut venv = WorkerVecEnv::spawn(2, |_| Ok(Panicking), true).unwrap();
        venv.reset_all(None).unwrap();
        let err = venv.step(vec![vec![0]; 2]).unwrap_err();
        assert!(matches!(err.downcast_ref::<VecEnvError>(), Some(VecEnvError::WorkerFailed { worker: 0, .. })));
    }

    #[test]
    fn test_build_failure_reported() {
        let result = WorkerVecEnv::<i64>::spawn(
            2,
            |rank| {
                if rank == 1 {
                    anyhow::bail!("no such map");
                }
                wrap_env(ScriptedEnv::new(1), &config())
            },
            true,
        );
        let err = result.err().unwrap();
        assert!(err.to_string().contains("worker 1"));
    }

    #[test]
    fn test_layout_mismatch_rejected() {
        let result = WorkerVecEnv::<i64>::spawn(
            2,
            |rank| wrap_env(ScriptedEnv::new(1 + rank), &config()),
            true,
        );
        assert!(result.is_err());
    }
}
