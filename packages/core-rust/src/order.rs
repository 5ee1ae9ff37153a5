//! Execution order: the closed set of dispatch priority classes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Priority class of a service implementation.
///
/// Variants are declared from most to least urgent, so the derived `Ord`
/// sorts implementations into dispatch order: `First < Sooner < ... < Last`.
/// The default implementation of a service type is always dispatched after
/// every implementation in this set, including `Last`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOrder {
    /// Run before most others.
    First,
    /// Run early, right behind `First`.
    Sooner,
    /// Run early but not first. Default for implementations that declare nothing.
    #[default]
    Soon,
    /// Run late but not last.
    Late,
    /// Run later than `Late`.
    Later,
    /// Run last among non-default implementations.
    Last,
}

impl ExecutionOrder {
    /// All priority classes in dispatch order.
    pub const ALL: [ExecutionOrder; 6] = [
        ExecutionOrder::First,
        ExecutionOrder::Sooner,
        ExecutionOrder::Soon,
        ExecutionOrder::Late,
        ExecutionOrder::Later,
        ExecutionOrder::Last,
    ];

    /// Lowercase name, matching the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Sooner => "sooner",
            Self::Soon => "soon",
            Self::Late => "late",
            Self::Later => "later",
            Self::Last => "last",
        }
    }
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown execution order name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown execution order: {input}")]
pub struct ParseExecutionOrderError {
    input: String,
}

impl FromStr for ExecutionOrder {
    type Err = ParseExecutionOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|order| order.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseExecutionOrderError {
                input: s.to_string(),
            })
    }
}
