//! TaskGroup - bounded, rate-limited task groups
//!
//! A [`TaskGroup`] collects calls with [`TaskGroup::go`] and runs them all at
//! [`TaskGroup::wait`], at most `n` at a time and no faster than one admission
//! per `every` interval (with up to `burst` admitted back to back). Results
//! come back in the order the calls were registered. The first failure
//! cancels the rest of the group.
//!
//! # Modules
//!
//! - [`group`] - The task group orchestrator and its options
//! - [`limiter`] - Token-bucket rate limiter
//! - [`pool`] - Bounded worker pool
//! - [`join`] - First-error join group
//! - [`value`] - Values, callables and freezing
//! - [`job`] - Shell-command job files run through a group
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod duration;
pub mod error;
pub mod group;
pub mod job;
pub mod join;
pub mod limiter;
pub mod pool;
pub mod value;

pub use duration::{DurationError, parse_duration};
pub use error::{Cancelled, GroupError};
pub use group::{GroupOptions, GroupOverrides, TaskGroup};
pub use join::ErrorJoinGroup;
pub use limiter::{Admission, Limit, RateLimiter};
pub use pool::WorkerPool;
pub use value::{Args, CallError, Callable, Dict, Freeze, Function, List, Thread, Tuple, Value, ValueError};
