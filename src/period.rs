// 📅 Period Sequence - the declared, ordered analysis window
//
// Transitions only exist between neighbours in this sequence, so the order
// in which periods are declared is the order in which flows are drawn.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FlowError, FlowResult};

/// One discrete time slice (a year)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Period(pub i32);

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<i32> for Period {
    fn from(year: i32) -> Self {
        Period(year)
    }
}

/// Ordered, duplicate-free list of periods
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeriodSequence {
    periods: Vec<Period>,
}

impl PeriodSequence {
    /// Build a sequence in declaration order. An empty sequence is allowed.
    pub fn new(periods: Vec<Period>) -> FlowResult<Self> {
        for (i, period) in periods.iter().enumerate() {
            if periods[..i].contains(period) {
                return Err(FlowError::DuplicatePeriod { period: *period });
            }
        }
        Ok(PeriodSequence { periods })
    }

    /// Position of a period in the sequence
    pub fn position(&self, period: Period) -> Option<usize> {
        self.periods.iter().position(|p| *p == period)
    }

    pub fn get(&self, index: usize) -> Option<Period> {
        self.periods.get(index).copied()
    }

    /// Adjacent (earlier, later) index pairs in sequence order
    pub fn adjacent_pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (1..self.periods.len()).map(|i| (i - 1, i))
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Period> + '_ {
        self.periods.iter().copied()
    }

    pub fn as_slice(&self) -> &[Period] {
        &self.periods
    }
}
