//! # Rectangle sampler
//!
//! Produces random, well-formed 2D extents inside fixed bounds. Every
//! [`Rectangle`] handed out satisfies `0 <= x1 < x2 < max_width` and
//! `0 <= y1 < y2 < max_height`.
//!
//! Each axis is drawn independently: two coordinates are sampled uniformly
//! from `[0, max)`, equal draws are **rejected and redrawn** (never clamped),
//! and the pair is ordered. This keeps the invariant unconditional, including
//! the edge case where the first draw lands on `max - 1`.

#[cfg(test)]
mod tests;

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a rectangle or its bounds are malformed.
///
/// The sampler never produces these for validated bounds; seeing one means
/// an internal invariant was broken.
#[derive(Debug, Error, PartialEq)]
pub enum GenerationError {
    /// `x1 < x2 && y1 < y2` does not hold.
    #[error("degenerate rectangle ({x1}, {y1}, {x2}, {y2})")]
    Degenerate { x1: u32, y1: u32, x2: u32, y2: u32 },

    /// Bounds too small to fit a rectangle with positive area.
    #[error("bounds {width}x{height} cannot hold a non-degenerate rectangle")]
    Bounds { width: u32, height: u32 },

    /// A choice weight outside `[0, 1]`.
    #[error("probability {0} outside [0, 1]")]
    Probability(f64),
}

// ------------------------------------------------------------------------------------------------
// Rectangle
// ------------------------------------------------------------------------------------------------

/// An axis-aligned rectangle with integer corners.
///
/// Construct through [`Rectangle::new`], which enforces `x1 < x2` and
/// `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRectangle")]
pub struct Rectangle {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

#[derive(Deserialize)]
struct RawRectangle {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

impl TryFrom<RawRectangle> for Rectangle {
    type Error = GenerationError;

    fn try_from(raw: RawRectangle) -> Result<Self, Self::Error> {
        Rectangle::new(raw.x1, raw.y1, raw.x2, raw.y2)
    }
}

impl Rectangle {
    /// Creates a rectangle, rejecting zero-area or inverted extents.
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Result<Self, GenerationError> {
        if x1 >= x2 || y1 >= y2 {
            return Err(GenerationError::Degenerate { x1, y1, x2, y2 });
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }

    pub fn y1(&self) -> u32 {
        self.y1
    }

    pub fn x2(&self) -> u32 {
        self.x2
    }

    pub fn y2(&self) -> u32 {
        self.y2
    }

    /// Returns `true` if `(x, y)` lies strictly inside the rectangle.
    ///
    /// Points on the boundary are outside, matching `ST_Within` against the
    /// rectangle's envelope.
    pub fn contains_strictly(&self, x: f64, y: f64) -> bool {
        x > f64::from(self.x1)
            && x < f64::from(self.x2)
            && y > f64::from(self.y1)
            && y < f64::from(self.y2)
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

// ------------------------------------------------------------------------------------------------
// Sampler
// ------------------------------------------------------------------------------------------------

/// Draws rectangles inside `[0, max_width) x [0, max_height)`.
#[derive(Debug, Clone, Copy)]
pub struct RectangleSampler {
    max_width: u32,
    max_height: u32,
}

impl RectangleSampler {
    /// Creates a sampler. Both bounds must be at least 2, otherwise no
    /// rectangle with `x1 < x2 < max` exists.
    pub fn new(max_width: u32, max_height: u32) -> Result<Self, GenerationError> {
        if max_width < 2 || max_height < 2 {
            return Err(GenerationError::Bounds {
                width: max_width,
                height: max_height,
            });
        }
        Ok(Self {
            max_width,
            max_height,
        })
    }

    pub fn max_width(&self) -> u32 {
        self.max_width
    }

    pub fn max_height(&self) -> u32 {
        self.max_height
    }

    /// Samples one rectangle.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Rectangle, GenerationError> {
        let (x1, x2) = sample_span(rng, self.max_width);
        let (y1, y2) = sample_span(rng, self.max_height);
        Rectangle::new(x1, y1, x2, y2)
    }

    /// The rectangle covering the whole sampling area, used for full-extent
    /// probes. Every sampled rectangle lies inside it.
    pub fn full_extent(&self) -> Rectangle {
        Rectangle {
            x1: 0,
            y1: 0,
            x2: self.max_width,
            y2: self.max_height,
        }
    }
}

/// Draws `lo < hi` from `[0, max)`, redrawing on ties.
fn sample_span<R: Rng + ?Sized>(rng: &mut R, max: u32) -> (u32, u32) {
    loop {
        let a = rng.random_range(0..max);
        let b = rng.random_range(0..max);
        if a != b {
            return (a.min(b), a.max(b));
        }
    }
}
