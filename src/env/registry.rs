//! Environment registry
//!
//! Maps environment ids to constructors so a configuration can name the
//! environment it wants. Constructors are shared with worker threads, which
//! build their own instance, so they must be `Send + Sync`.

use std::{collections::BTreeMap, fmt, sync::Arc};

use anyhow::Result;

use crate::{env::MultiAgentEnv, error::VecEnvError};

/// Thread-safe environment constructor
pub type EnvConstructor<E> = Arc<dyn Fn() -> Result<E> + Send + Sync>;

/// A registered environment
pub struct EnvSpec<E> {
    /// Registered id
    pub id: String,

    /// Builds a fresh instance
    pub constructor: EnvConstructor<E>,

    /// Horizon used when the configuration does not set one
    pub max_episode_steps: Option<usize>,
}

impl<E> Clone for EnvSpec<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            constructor: Arc::clone(&self.constructor),
            max_episode_steps: self.max_episode_steps,
        }
    }
}

impl<E> fmt::Debug for EnvSpec<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSpec")
            .field("id", &self.id)
            .field("max_episode_steps", &self.max_episode_steps)
            .finish_non_exhaustive()
    }
}

impl<E> EnvSpec<E> {
    /// Build a new instance
    pub fn make(&self) -> Result<E> {
        (self.constructor)()
    }
}

/// Registry of environments sharing one concrete type
pub struct EnvRegistry<E> {
    specs: BTreeMap<String, EnvSpec<E>>,
}

impl<E: MultiAgentEnv> EnvRegistry<E> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { specs: BTreeMap::new() }
    }

    /// Register `constructor` under `id`, replacing any previous entry
    pub fn register<F>(&mut self, id: impl Into<String>, max_episode_steps: Option<usize>, constructor: F)
    where
        F: Fn() -> Result<E> + Send + Sync + 'static,
    {
        let id = id.into();
        if self.specs.contains_key(&id) {
            tracing::warn!("Replacing registered environment '{}'", id);
        }
        self.specs.insert(
            id.clone(),
            EnvSpec { id, constructor: Arc::new(constructor), max_episode_steps },
        );
    }

    /// Look up an environment
    pub fn spec(&self, id: &str) -> Result<&EnvSpec<E>> {
        self.specs.get(id).ok_or_else(|| VecEnvError::UnknownEnv(id.to_string()).into())
    }

    /// Build an instance of a registered environment
    pub fn make(&self, id: &str) -> Result<E> {
        self.spec(id)?.make()
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }
}

impl<E: MultiAgentEnv> Default for EnvRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
