//! Two-phase step bookkeeping shared by every execution strategy

use anyhow::Result;

use crate::{
    env::{InfoValue, InstanceEnv, InstanceStep},
    error::VecEnvError,
};

/// Info key holding the last observations of an auto-reset instance
pub const TERMINAL_OBSERVATION: &str = "terminal_observation";

/// Tracks what the caller is allowed to do next
///
/// At most one batch may be in flight. A fatal error poisons the adapter;
/// every later call fails with [`VecEnvError::Closed`].
#[derive(Debug)]
pub(crate) struct StepProtocol {
    num_envs: usize,
    num_agents: usize,
    auto_reset: bool,
    started: bool,
    in_flight: bool,
    finished: Vec<bool>,
    poisoned: Option<String>,
}

impl StepProtocol {
    pub(crate) fn new(num_envs: usize, num_agents: usize, auto_reset: bool) -> Self {
        Self {
            num_envs,
            num_agents,
            auto_reset,
            started: false,
            in_flight: false,
            finished: vec![false; num_envs],
            poisoned: None,
        }
    }

    pub(crate) fn auto_reset(&self) -> bool {
        self.auto_reset
    }

    pub(crate) fn check_usable(&self) -> Result<()> {
        match &self.poisoned {
            Some(reason) => Err(VecEnvError::Closed(reason.clone()).into()),
            None => Ok(()),
        }
    }

    /// Check that no batch is in flight, for queries that do not step
    pub(crate) fn check_idle(&self) -> Result<()> {
        self.check_usable()?;
        if self.in_flight {
            return Err(VecEnvError::StepInFlight.into());
        }
        Ok(())
    }

    pub(crate) fn begin_reset(&self) -> Result<()> {
        self.check_usable()?;
        if self.in_flight {
            return Err(VecEnvError::ResetWhileStepping.into());
        }
        Ok(())
    }

    pub(crate) fn end_reset(&mut self) {
        self.started = true;
        self.finished.iter_mut().for_each(|f| *f = false);
    }

    /// Validate an action batch and mark it in flight
    pub(crate) fn begin_step<A>(&mut self, actions: &[Vec<A>]) -> Result<()> {
        self.check_usable()?;
        if self.in_flight {
            return Err(VecEnvError::StepInFlight.into());
        }
        if !self.started {
            return Err(VecEnvError::StepBeforeReset.into());
        }
        if actions.len() != self.num_envs {
            return Err(VecEnvError::ActionCountMismatch {
                expected: self.num_envs,
                actual: actions.len(),
            }
            .into());
        }
        if let Some((instance, tuple)) =
            actions.iter().enumerate().find(|(_, tuple)| tuple.len() != self.num_agents)
        {
            return Err(VecEnvError::AgentCountMismatch {
                expected: self.num_agents,
                actual: tuple.len(),
                what: format!("action tuple of instance {}", instance),
            }
            .into());
        }
        if self.finished.iter().any(|&f| f) {
            return Err(VecEnvError::StepAfterEpisodeEnd.into());
        }
        self.in_flight = true;
        Ok(())
    }

    /// Check that a batch is in flight before waiting on it
    pub(crate) fn begin_wait(&self) -> Result<()> {
        self.check_usable()?;
        if !self.in_flight {
            return Err(VecEnvError::NoStepInFlight.into());
        }
        Ok(())
    }

    pub(crate) fn end_step(&mut self, dones: &[bool]) {
        self.in_flight = false;
        if !self.auto_reset {
            self.finished.copy_from_slice(dones);
        }
    }

    /// Record a fatal error and return it
    pub(crate) fn poison(&mut self, err: anyhow::Error) -> anyhow::Error {
        tracing::error!("Vectorized environment failed: {:#}", err);
        self.in_flight = false;
        self.poisoned = Some(format!("{:#}", err));
        err
    }

    pub(crate) fn close(&mut self) {
        if self.poisoned.is_none() {
            self.poisoned = Some("closed".to_string());
        }
    }
}

/// Step one instance, resetting it right away if its episode ended
pub(crate) fn step_instance<E>(
    env: &mut E,
    actions: &[E::Action],
    auto_reset: bool,
) -> Result<InstanceStep<Vec<f32>>>
where
    E: InstanceEnv<Observation = Vec<f32>>,
{
    let mut step = env.step(actions)?;
    if step.done && auto_reset {
        let terminal = std::mem::replace(&mut step.observations, env.reset(None)?);
        step.info.insert(TERMINAL_OBSERVATION.to_string(), InfoValue::Rows(terminal));
    }
    Ok(step)
}

/// Agent count and per-agent flat dimensions of an instance
pub(crate) fn instance_layout<E: InstanceEnv>(env: &E) -> (usize, Vec<usize>) {
    let dims = env.observation_spaces().iter().map(|s| s.flatdim()).collect();
    (env.num_agents(), dims)
}

/// Ensure every instance has the same layout as the first one
pub(crate) fn check_layouts(layouts: &[(usize, Vec<usize>)]) -> Result<(usize, Vec<usize>)> {
    let Some((num_agents, dims)) = layouts.first().cloned() else {
        return Err(VecEnvError::InvalidConfig("at least one environment is required".into()).into());
    };
    for (instance, (agents, instance_dims)) in layouts.iter().enumerate().skip(1) {
        if *agents != num_agents {
            return Err(VecEnvError::AgentCountMismatch {
                expected: num_agents,
                actual: *agents,
                what: format!("agents in instance {}", instance),
            }
            .into());
        }
        if *instance_dims != dims {
            return Err(VecEnvError::InvalidConfig(format!(
                "instance {} has observation dims {:?}, instance 0 has {:?}",
                instance, instance_dims, dims
            ))
            .into());
        }
    }
    Ok((num_agents, dims))
}
