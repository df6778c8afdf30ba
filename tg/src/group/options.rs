//! Task group construction options

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::duration::parse_duration;
use crate::error::GroupError;
use crate::limiter::{Limit, RateLimiter};
use crate::value::{Args, Value};

/// Parameter names accepted by [`GroupOptions::from_args`], in positional order
const PARAMS: [&str; 3] = ["n", "every", "burst"];

/// Concurrency and rate limit of a task group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupOptions {
    /// Max concurrent workers; zero or negative means uncapped
    pub n: i64,

    /// Minimum interval between admissions (e.g. "10ms"); empty means no limit
    pub every: String,

    /// Token bucket capacity
    pub burst: u32,
}

impl GroupOptions {
    /// Worker cap, with zero meaning uncapped
    pub fn cap(&self) -> usize {
        usize::try_from(self.n).unwrap_or(0)
    }

    /// Parse `every` into a rate limit
    pub fn limit(&self) -> Result<Limit, GroupError> {
        if self.every.is_empty() {
            return Ok(Limit::Inf);
        }
        let interval = parse_duration(&self.every)?;
        if interval.is_zero() {
            return Err(GroupError::NonPositiveInterval {
                every: self.every.clone(),
            });
        }
        Ok(Limit::Every(interval))
    }

    /// Build the limiter these options describe
    pub fn limiter(&self) -> Result<RateLimiter, GroupError> {
        Ok(RateLimiter::new(self.limit()?, self.burst))
    }

    /// Check the options without building anything
    pub fn validate(&self) -> Result<(), GroupError> {
        self.limit().map(|_| ())
    }

    /// Unpack `n`, `every` and `burst` from call arguments
    ///
    /// Each may be given positionally in that order or by name. A `None` value
    /// is treated as not given.
    pub fn from_args(args: &Args) -> Result<Self, GroupError> {
        debug!(?args, "GroupOptions::from_args: called");
        if args.positional().len() > PARAMS.len() {
            return Err(GroupError::InvalidArgument(format!(
                "got {} arguments, want at most {}",
                args.positional().len(),
                PARAMS.len()
            )));
        }

        let mut slots: [Option<&Value>; 3] = [None; 3];
        for (slot, value) in slots.iter_mut().zip(args.positional()) {
            *slot = Some(value);
        }
        for (name, value) in args.named() {
            let index = PARAMS
                .iter()
                .position(|p| p == name)
                .ok_or_else(|| GroupError::InvalidArgument(format!("unexpected keyword argument {:?}", name)))?;
            if slots[index].is_some() {
                return Err(GroupError::InvalidArgument(format!(
                    "got multiple values for parameter {:?}",
                    name
                )));
            }
            slots[index] = Some(value);
        }

        let mut options = Self::default();
        if let Some(value) = given(slots[0]) {
            options.n = value.as_int().ok_or_else(|| wrong_type("n", "int", value))?;
        }
        if let Some(value) = given(slots[1]) {
            options.every = value.as_str().ok_or_else(|| wrong_type("every", "string", value))?.to_string();
        }
        if let Some(value) = given(slots[2]) {
            let burst = value.as_int().ok_or_else(|| wrong_type("burst", "int", value))?;
            options.burst = u32::try_from(burst).map_err(|_| {
                GroupError::InvalidArgument(format!("burst must be between 0 and {}, got {}", u32::MAX, burst))
            })?;
        }
        Ok(options)
    }

    /// Overlay any values set in `overrides` onto these options
    pub fn merge(mut self, overrides: &GroupOverrides) -> Self {
        if let Some(n) = overrides.n {
            self.n = n;
        }
        if let Some(every) = &overrides.every {
            self.every = every.clone();
        }
        if let Some(burst) = overrides.burst {
            self.burst = burst;
        }
        self
    }
}

/// Partially specified options, layered over a base [`GroupOptions`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupOverrides {
    pub n: Option<i64>,
    pub every: Option<String>,
    pub burst: Option<u32>,
}

fn given(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !matches!(v, Value::None))
}

fn wrong_type(param: &str, want: &str, got: &Value) -> GroupError {
    GroupError::InvalidArgument(format!("for parameter {}: got {}, want {}", param, got.type_name(), want))
}
