//! # Workload generator
//!
//! Turns sampled rectangles into table operations. Each call flips a
//! weighted coin (`insert_probability`, 0.5 by default):
//!
//! - **Insert**: a fresh rectangle, a point count drawn from
//!   `[0, max_points)`, and a per-insert seed so the engine generates the
//!   same points when the run is replayed.
//! - **Delete**: a fresh rectangle whose envelope bounds the rows removed.

#[cfg(test)]
mod tests;

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::engine::Statement;
use crate::sampler::{GenerationError, Rectangle, RectangleSampler};

/// One table operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Insert `point_count` points strictly inside `rect`.
    Insert {
        rect: Rectangle,
        point_count: u32,
        seed: i64,
    },
    /// Delete all rows within `rect`'s envelope.
    Delete { rect: Rectangle },
}

impl Operation {
    pub fn rect(&self) -> Rectangle {
        match self {
            Operation::Insert { rect, .. } | Operation::Delete { rect } => *rect,
        }
    }

    /// The statement that performs this operation.
    pub fn statement(&self) -> Statement {
        match *self {
            Operation::Insert {
                rect,
                point_count,
                seed,
            } => Statement::InsertPoints {
                rect,
                count: point_count,
                seed,
            },
            Operation::Delete { rect } => Statement::DeleteWithin { rect },
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert {
                rect, point_count, ..
            } => write!(f, "insert {point_count} points into {rect}"),
            Operation::Delete { rect } => write!(f, "delete within {rect}"),
        }
    }
}

/// Produces random [`Operation`]s.
#[derive(Debug, Clone)]
pub struct WorkloadGenerator {
    sampler: RectangleSampler,
    insert_probability: f64,
    max_points: u32,
}

impl WorkloadGenerator {
    /// Creates a generator. `insert_probability` must lie in `[0, 1]` and
    /// `max_points` must be at least 1.
    pub fn new(
        sampler: RectangleSampler,
        insert_probability: f64,
        max_points: u32,
    ) -> Result<Self, GenerationError> {
        if !(0.0..=1.0).contains(&insert_probability) {
            return Err(GenerationError::Probability(insert_probability));
        }
        if max_points == 0 {
            return Err(GenerationError::Bounds {
                width: sampler.max_width(),
                height: sampler.max_height(),
            });
        }
        Ok(Self {
            sampler,
            insert_probability,
            max_points,
        })
    }

    pub fn sampler(&self) -> &RectangleSampler {
        &self.sampler
    }

    /// Draws the next operation.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Operation, GenerationError> {
        if rng.random_bool(self.insert_probability) {
            let rect = self.sampler.sample(rng)?;
            let point_count = rng.random_range(0..self.max_points);
            let seed = rng.random_range(0..i64::MAX);
            Ok(Operation::Insert {
                rect,
                point_count,
                seed,
            })
        } else {
            let rect = self.sampler.sample(rng)?;
            Ok(Operation::Delete { rect })
        }
    }
}
