//! Score vectors and weights.
//!
//! All scores live in the log domain: combining two derivations adds their
//! breakdowns, and higher is better. A breakdown is a dense vector laid out by
//! [`crate::feature::FeatureSet`]: the rule's own scores first, then one
//! contiguous range per feature function.

use std::fmt;
use std::ops::{Add, AddAssign, Index, IndexMut, Sub, SubAssign};

/// Tolerance used when comparing rolled-up scores.
pub const SCORE_EPSILON: f64 = 1e-9;

/// Per-component scores of a hypothesis or derivation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScoreBreakdown(Vec<f64>);

impl ScoreBreakdown {
    /// A breakdown of `len` zero components.
    pub fn zeros(len: usize) -> Self {
        ScoreBreakdown(vec![0.0; len])
    }

    pub fn from_vec(values: Vec<f64>) -> Self {
        ScoreBreakdown(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.0
    }

    /// Add `other` component-wise.
    pub fn plus_equals(&mut self, other: &ScoreBreakdown) {
        debug_assert_eq!(self.len(), other.len(), "breakdown layouts differ");
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a += b;
        }
    }

    /// Subtract `other` component-wise.
    pub fn minus_equals(&mut self, other: &ScoreBreakdown) {
        debug_assert_eq!(self.len(), other.len(), "breakdown layouts differ");
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a -= b;
        }
    }

    /// Dot product with a weight vector.
    pub fn weighted(&self, weights: &Weights) -> f64 {
        debug_assert_eq!(self.len(), weights.len(), "weights do not match layout");
        self.0.iter().zip(&weights.0).map(|(s, w)| s * w).sum()
    }

    /// Check if two breakdowns are approximately equal.
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|(a, b)| a == b || (a - b).abs() < SCORE_EPSILON)
    }
}

impl Index<usize> for ScoreBreakdown {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl IndexMut<usize> for ScoreBreakdown {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.0[index]
    }
}

impl AddAssign<&ScoreBreakdown> for ScoreBreakdown {
    fn add_assign(&mut self, other: &ScoreBreakdown) {
        self.plus_equals(other);
    }
}

impl SubAssign<&ScoreBreakdown> for ScoreBreakdown {
    fn sub_assign(&mut self, other: &ScoreBreakdown) {
        self.minus_equals(other);
    }
}

impl Add for ScoreBreakdown {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self.plus_equals(&other);
        self
    }
}

impl Sub for ScoreBreakdown {
    type Output = Self;

    fn sub(mut self, other: Self) -> Self {
        self.minus_equals(&other);
        self
    }
}

impl fmt::Display for ScoreBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}

/// Feature weights, in the same layout as [`ScoreBreakdown`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Weights(Vec<f64>);

impl Weights {
    pub fn new(values: Vec<f64>) -> Self {
        Weights(values)
    }

    /// All weights equal to one, so the total score is the plain sum.
    pub fn uniform(len: usize) -> Self {
        Weights(vec![1.0; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plus_minus() {
        let mut a = ScoreBreakdown::from_vec(vec![1.0, 2.0]);
        let b = ScoreBreakdown::from_vec(vec![0.5, -1.0]);

        a += &b;
        assert_eq!(a, ScoreBreakdown::from_vec(vec![1.5, 1.0]));

        a -= &b;
        assert!(a.approx_eq(&ScoreBreakdown::from_vec(vec![1.0, 2.0])));
    }

    #[test]
    fn test_weighted() {
        let s = ScoreBreakdown::from_vec(vec![2.0, 3.0, -1.0]);
        let w = Weights::new(vec![0.5, 1.0, 2.0]);
        assert!((s.weighted(&w) - 2.0).abs() < SCORE_EPSILON);
        assert!((s.weighted(&Weights::uniform(3)) - 4.0).abs() < SCORE_EPSILON);
    }

    #[test]
    fn test_weighted_infinite_component() {
        let s = ScoreBreakdown::from_vec(vec![1.0, f64::NEG_INFINITY]);
        assert_eq!(s.weighted(&Weights::uniform(2)), f64::NEG_INFINITY);
    }

    #[test]
    fn test_display() {
        let s = ScoreBreakdown::from_vec(vec![1.0, -0.5]);
        assert_eq!(s.to_string(), "1 -0.5");
    }
}
