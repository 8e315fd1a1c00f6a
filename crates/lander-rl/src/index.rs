//! Mixed-radix flattening of (state, action) buckets
//!
//! Every indexed field contributes one digit with base `max - min + 1`. State
//! fields come first, then action fields, each in declaration order, so the
//! last action field is the least significant digit.

use serde::{Deserialize, Serialize};

use lander_core::{LanderError, Result};

/// How a value table is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backing {
    /// One slot per index, allocated up front.
    Dense,
    /// Only visited indices are stored.
    Sparse,
}

impl std::fmt::Display for Backing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backing::Dense => write!(f, "dense"),
            Backing::Sparse => write!(f, "sparse"),
        }
    }
}

/// Inclusive bucket range of one indexed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRange {
    pub name: String,
    pub min: i64,
    pub max: i64,
}

impl FieldRange {
    pub fn new(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    /// Number of distinct buckets, i.e. the digit's base.
    pub fn digits(&self) -> u64 {
        u64::try_from(i128::from(self.max) - i128::from(self.min) + 1).unwrap_or(u64::MAX)
    }

    /// Zero-based digit of a bucket after clamping.
    fn digit(&self, bucket: i64) -> u64 {
        (i128::from(self.clamp(bucket)) - i128::from(self.min)) as u64
    }

    /// Saturate a bucket into the declared range.
    pub fn clamp(&self, bucket: i64) -> i64 {
        bucket.clamp(self.min, self.max)
    }

    pub fn buckets(&self) -> impl Iterator<Item = i64> {
        self.min..=self.max
    }
}

/// Precomputed digit layout for one definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLayout {
    state: Vec<FieldRange>,
    action: Vec<FieldRange>,
    strides: Vec<u64>,
    total: u64,
    backing: Backing,
}

impl IndexLayout {
    /// Build the layout, choosing dense backing when `total <= dense_table_cap`.
    pub fn new(state: Vec<FieldRange>, action: Vec<FieldRange>, dense_table_cap: u64) -> Result<Self> {
        let mut strides = vec![0u64; state.len() + action.len()];
        let mut total: u64 = 1;

        let fields: Vec<&FieldRange> = state.iter().chain(&action).collect();
        for (position, range) in fields.into_iter().enumerate().rev() {
            if range.min > range.max {
                return Err(LanderError::Definition(format!(
                    "field '{}' has an empty bucket range [{}, {}]",
                    range.name, range.min, range.max
                )));
            }
            strides[position] = total;
            total = total.checked_mul(range.digits()).ok_or_else(|| {
                LanderError::Definition(format!(
                    "table size overflows u64 at field '{}'",
                    range.name
                ))
            })?;
        }

        let backing = if total <= dense_table_cap {
            Backing::Dense
        } else {
            Backing::Sparse
        };

        Ok(Self {
            state,
            action,
            strides,
            total,
            backing,
        })
    }

    pub fn state_ranges(&self) -> &[FieldRange] {
        &self.state
    }

    pub fn action_ranges(&self) -> &[FieldRange] {
        &self.action
    }

    pub fn ranges(&self) -> impl Iterator<Item = &FieldRange> {
        self.state.iter().chain(self.action.iter())
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn backing(&self) -> Backing {
        self.backing
    }

    /// Flatten buckets given in layout order. Out-of-range buckets are clamped.
    pub fn index(&self, state: &[i64], action: &[i64]) -> u64 {
        debug_assert_eq!(state.len(), self.state.len());
        debug_assert_eq!(action.len(), self.action.len());

        self.ranges()
            .zip(state.iter().chain(action.iter()))
            .zip(self.strides.iter())
            .map(|((range, &bucket), &stride)| range.digit(bucket) * stride)
            .sum()
    }

    /// Inverse of [`IndexLayout::index`]: the buckets addressed by `index`.
    pub fn decode(&self, index: u64) -> Option<(Vec<i64>, Vec<i64>)> {
        if index >= self.total {
            return None;
        }
        let mut remainder = index;
        let mut buckets = Vec::with_capacity(self.strides.len());
        for (range, &stride) in self.ranges().zip(self.strides.iter()) {
            let digit = remainder / stride;
            remainder %= stride;
            buckets.push(range.min + digit as i64);
        }
        let action = buckets.split_off(self.state.len());
        Some((buckets, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> IndexLayout {
        IndexLayout::new(
            vec![FieldRange::new("a", 0, 1), FieldRange::new("b", -1, 0)],
            vec![FieldRange::new("c", 0, 2)],
            100,
        )
        .unwrap()
    }

    #[test]
    fn test_total_and_backing() {
        let layout = layout();
        assert_eq!(layout.total(), 12);
        assert_eq!(layout.backing(), Backing::Dense);

        let sparse = IndexLayout::new(vec![FieldRange::new("a", 0, 99)], vec![], 50).unwrap();
        assert_eq!(sparse.backing(), Backing::Sparse);
    }

    #[test]
    fn test_last_action_field_is_least_significant() {
        let layout = layout();
        assert_eq!(layout.index(&[0, -1], &[0]), 0);
        assert_eq!(layout.index(&[0, -1], &[1]), 1);
        assert_eq!(layout.index(&[0, 0], &[0]), 3);
        assert_eq!(layout.index(&[1, 0], &[2]), 11);
    }

    #[test]
    fn test_out_of_range_buckets_clamp() {
        let layout = layout();
        assert_eq!(layout.index(&[7, -9], &[40]), layout.index(&[1, -1], &[2]));
    }

    #[test]
    fn test_decode_inverts_index() {
        let layout = layout();
        for index in 0..layout.total() {
            let (state, action) = layout.decode(index).unwrap();
            assert_eq!(layout.index(&state, &action), index);
        }
        assert!(layout.decode(12).is_none());
    }

    #[test]
    fn test_no_fields_is_single_entry() {
        let layout = IndexLayout::new(vec![], vec![], 10).unwrap();
        assert_eq!(layout.total(), 1);
        assert_eq!(layout.index(&[], &[]), 0);
    }

    #[test]
    fn test_overflow_rejected() {
        let huge = FieldRange::new("huge", 0, i64::MAX / 2);
        let result = IndexLayout::new(vec![huge.clone(), huge.clone()], vec![huge], 10);
        assert!(matches!(result, Err(LanderError::Definition(_))));
    }

    #[test]
    fn test_empty_range_rejected() {
        let result = IndexLayout::new(vec![FieldRange::new("a", 3, 1)], vec![], 10);
        assert!(result.is_err());
    }
}
