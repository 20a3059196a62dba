use std::fmt;
use std::num::NonZero;
use std::str::FromStr;

use serde::Deserialize;

/// Concurrency ceiling for an [`OperationQueue`](crate::exec::OperationQueue).
///
/// In TOML this is either a positive integer, `"default"` or `"unbounded"`.
/// `0` is read as unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "LimitRepr")]
pub enum Limit {
    /// No ceiling.
    Unbounded,

    /// At most this many operations execute at once.
    Max(NonZero<usize>),

    /// One slot per available CPU.
    #[default]
    Default,
}

impl Limit {
    /// Resolve to a concrete ceiling, `None` meaning unbounded.
    pub fn resolve(self) -> Option<usize> {
        match self {
            Limit::Unbounded => None,
            Limit::Max(max) => Some(max.get()),
            Limit::Default => Some(
                std::thread::available_parallelism()
                    .map(NonZero::get)
                    .unwrap_or(1),
            ),
        }
    }
}

impl From<usize> for Limit {
    fn from(value: usize) -> Self {
        NonZero::new(value).map(Limit::Max).unwrap_or(Limit::Unbounded)
    }
}

impl FromStr for Limit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(Limit::Default),
            "unbounded" | "none" => Ok(Limit::Unbounded),
            other => other.parse::<usize>().map(Limit::from).map_err(|_| {
                format!(
                    "invalid concurrency limit: {other} (expected a number, \"default\" or \"unbounded\")"
                )
            }),
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Unbounded => f.write_str("unbounded"),
            Limit::Max(max) => write!(f, "{max}"),
            Limit::Default => f.write_str("default"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Count(usize),
    Keyword(String),
}

impl TryFrom<LimitRepr> for Limit {
    type Error = String;

    fn try_from(repr: LimitRepr) -> Result<Self, Self::Error> {
        match repr {
            LimitRepr::Count(n) => Ok(Limit::from(n)),
            LimitRepr::Keyword(s) => s.parse(),
        }
    }
}
