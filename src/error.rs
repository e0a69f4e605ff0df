// Error types for the flow engine
//
// Dirty data never shows up here: unknown categories collapse to the
// sentinel and duplicate records are dropped. Only structural mismatches
// between the declared configuration and the input are reported.

use thiserror::Error;

use crate::period::Period;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// A batch of records cites a period that is not in the declared sequence
    #[error("Records cite period {period}, which is not in the declared sequence {declared:?}")]
    UndeclaredPeriod { period: Period, declared: Vec<Period> },

    #[error("Period {period} is declared more than once")]
    DuplicatePeriod { period: Period },

    #[error("Category '{label}' is declared more than once (normalized key '{key}')")]
    DuplicateCategory { label: String, key: String },

    #[error("Category labels cannot be empty")]
    EmptyCategoryLabel,

    /// The sentinel label would normalize onto one of the closed categories
    #[error("Sentinel label '{sentinel}' collides with closed category '{closed}'")]
    SentinelCollision { sentinel: String, closed: String },

    #[error("No data source configured for period {period}")]
    MissingSource { period: Period },
}

pub type FlowResult<T> = std::result::Result<T, FlowError>;
