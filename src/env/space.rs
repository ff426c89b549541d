//! Observation spaces and flattening
//!
//! A [`Space`] describes the structure of one agent's observation. The
//! flattening rules only depend on the space, so the element order of a
//! flattened vector can always be reconstructed from the space description.
//!
//! | Space            | Flat length     | Encoding               |
//! |------------------|-----------------|------------------------|
//! | `Box`            | product(shape)  | row-major copy         |
//! | `Discrete(n)`    | n               | one-hot                |
//! | `MultiDiscrete`  | sum(nvec)       | concatenated one-hots  |
//! | `MultiBinary(n)` | n               | 0.0 / 1.0              |
//! | `Tuple`          | sum of children | concatenated in order  |
//! | `Dict`           | sum of children | concatenated by key    |

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::VecEnvError;

/// Structure of a single agent's observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Space {
    /// Dense real-valued tensor
    Box {
        /// Tensor shape (empty for a scalar)
        shape: Vec<usize>,
    },

    /// One of `n` categories
    Discrete(usize),

    /// Several independent categorical values
    MultiDiscrete(Vec<usize>),

    /// Fixed number of binary flags
    MultiBinary(usize),

    /// Ordered composite
    Tuple(Vec<Space>),

    /// Keyed composite, always iterated in key order
    Dict(BTreeMap<String, Space>),
}

/// A structured observation matching some [`Space`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Observation {
    /// Values for a `Box` space, row-major
    Box(Vec<f32>),

    /// Category index for a `Discrete` space
    Discrete(usize),

    /// Category indices for a `MultiDiscrete` space
    MultiDiscrete(Vec<usize>),

    /// Flags for a `MultiBinary` space
    MultiBinary(Vec<bool>),

    /// Children of a `Tuple` space
    Tuple(Vec<Observation>),

    /// Children of a `Dict` space
    Dict(BTreeMap<String, Observation>),
}

impl Space {
    /// Build a `Box` space from its shape
    pub fn boxed(shape: Vec<usize>) -> Self {
        Space::Box { shape }
    }

    /// Build a `Dict` space from key/space pairs
    pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Space)>) -> Self {
        Space::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Number of elements in the flattened representation
    pub fn flatdim(&self) -> usize {
        match self {
            Space::Box { shape } => shape.iter().product(),
            Space::Discrete(n) => *n,
            Space::MultiDiscrete(nvec) => nvec.iter().sum(),
            Space::MultiBinary(n) => *n,
            Space::Tuple(spaces) => spaces.iter().map(Space::flatdim).sum(),
            Space::Dict(spaces) => spaces.values().map(Space::flatdim).sum(),
        }
    }

    /// The space of the flattened observation
    pub fn flattened(&self) -> Space {
        Space::boxed(vec![self.flatdim()])
    }

    /// Check that the space can describe a usable observation
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> anyhow::Error { VecEnvError::InvalidConfig(msg).into() };
        match self {
            Space::Discrete(0) => Err(invalid("Discrete space must have at least one category".into())),
            Space::MultiDiscrete(nvec) if nvec.contains(&0) => {
                Err(invalid(format!("MultiDiscrete space has an empty category: {:?}", nvec)))
            }
            Space::Tuple(spaces) => {
                spaces.iter().try_for_each(Space::validate)?;
                self.check_nonempty()
            }
            Space::Dict(spaces) => {
                spaces.values().try_for_each(Space::validate)?;
                self.check_nonempty()
            }
            _ => self.check_nonempty(),
        }
    }

    fn check_nonempty(&self) -> Result<()> {
        if self.flatdim() == 0 {
            return Err(VecEnvError::InvalidConfig(format!("space {:?} has no elements", self)).into());
        }
        Ok(())
    }

    /// Flatten an observation of this space into a new vector
    pub fn flatten(&self, observation: &Observation) -> Result<Vec<f32>> {
        let mut out = Vec::with_capacity(self.flatdim());
        self.flatten_into(observation, &mut out)?;
        Ok(out)
    }

    /// Append the flattened observation to `out`
    pub fn flatten_into(&self, observation: &Observation, out: &mut Vec<f32>) -> Result<()> {
        match (self, observation) {
            (Space::Box { .. }, Observation::Box(values)) => {
                let expected = self.flatdim();
                if values.len() != expected {
                    return Err(malformed(format!(
                        "Box expects {} values, got {}",
                        expected,
                        values.len()
                    )));
                }
                out.extend_from_slice(values);
            }
            (Space::Discrete(n), Observation::Discrete(index)) => {
                push_one_hot(*n, *index, out)?;
            }
            (Space::MultiDiscrete(nvec), Observation::MultiDiscrete(indices)) => {
                if nvec.len() != indices.len() {
                    return Err(malformed(format!(
                        "MultiDiscrete expects {} entries, got {}",
                        nvec.len(),
                        indices.len()
                    )));
                }
                for (&n, &index) in nvec.iter().zip(indices) {
                    push_one_hot(n, index, out)?;
                }
            }
            (Space::MultiBinary(n), Observation::MultiBinary(flags)) => {
                if flags.len() != *n {
                    return Err(malformed(format!(
                        "MultiBinary expects {} flags, got {}",
                        n,
                        flags.len()
                    )));
                }
                out.extend(flags.iter().map(|&f| if f { 1.0 } else { 0.0 }));
            }
            (Space::Tuple(spaces), Observation::Tuple(children)) => {
                if spaces.len() != children.len() {
                    return Err(malformed(format!(
                        "Tuple expects {} children, got {}",
                        spaces.len(),
                        children.len()
                    )));
                }
                for (space, child) in spaces.iter().zip(children) {
                    space.flatten_into(child, out)?;
                }
            }
            (Space::Dict(spaces), Observation::Dict(children)) => {
                if spaces.len() != children.len() {
                    return Err(malformed(format!(
                        "Dict expects keys {:?}, got {:?}",
                        spaces.keys().collect::<Vec<_>>(),
                        children.keys().collect::<Vec<_>>()
                    )));
                }
                for (key, space) in spaces {
                    let child = children
                        .get(key)
                        .ok_or_else(|| malformed(format!("Dict observation is missing key '{}'", key)))?;
                    space.flatten_into(child, out)?;
                }
            }
            (space, observation) => {
                return Err(malformed(format!(
                    "observation {:?} does not match space {:?}",
                    variant_name(observation),
                    space
                )));
            }
        }
        Ok(())
    }
}

fn push_one_hot(n: usize, index: usize, out: &mut Vec<f32>) -> Result<()> {
    if index >= n {
        return Err(malformed(format!("category {} out of range for {} options", index, n)));
    }
    let start = out.len();
    out.resize(start + n, 0.0);
    out[start + index] = 1.0;
    Ok(())
}

fn malformed(msg: String) -> anyhow::Error {
    VecEnvError::MalformedObservation(msg).into()
}

fn variant_name(observation: &Observation) -> &'static str {
    match observation {
        Observation::Box(_) => "Box",
        Observation::Discrete(_) => "Discrete",
        Observation::MultiDiscrete(_) => "MultiDiscrete",
        Observation::MultiBinary(_) => "MultiBinary",
        Observation::Tuple(_) => "Tuple",
        Observation::Dict(_) => "Dict",
    }
}
