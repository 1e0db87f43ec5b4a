//! Error types for pipefold.
//!
//! Errors produced by caller-supplied functions are never wrapped on their way
//! through map and filter stages: they arrive on the error stream as-is. The
//! types here cover pipeline configuration and the outcome of reductions.

use std::fmt;

use thiserror::Error;

/// Result type alias using pipefold's [Error].
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors raised before any worker is spawned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A worker pool was asked to run with no workers.
    #[error("concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),
}

/// Why a reduction did not produce a value.
#[derive(Error, Debug)]
pub enum ReduceError<T, E> {
    /// The reduction was misconfigured.
    #[error(transparent)]
    Config(#[from] Error),

    /// The combine function failed. `accumulator` holds the value as of the
    /// last successful combine.
    #[error("combine failed: {source}")]
    Combine {
        accumulator: T,
        #[source]
        source: E,
    },

    /// One or more parallel reduce workers failed.
    #[error("{0}")]
    Workers(WorkerErrors<E>),
}

impl<T, E> ReduceError<T, E> {
    /// The accumulator that was current when combining failed, if any.
    pub fn accumulator(&self) -> Option<&T> {
        match self {
            ReduceError::Combine { accumulator, .. } => Some(accumulator),
            _ => None,
        }
    }
}

/// Every error recorded by the workers of a parallel reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerErrors<E>(pub Vec<E>);

impl<E> WorkerErrors<E> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<E> {
        self.0
    }
}

impl<E: fmt::Display> fmt::Display for WorkerErrors<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} reduce worker(s) failed", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}

impl<E> std::error::Error for WorkerErrors<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.first().map(|err| err as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_errors_join_messages() {
        let errors = WorkerErrors(vec!["bad input", "overflow"]);
        assert_eq!(errors.to_string(), "2 reduce worker(s) failed: bad input; overflow");
    }

    #[test]
    fn config_error_is_transparent() {
        let err: ReduceError<i32, String> = Error::InvalidConcurrency(0).into();
        assert_eq!(err.to_string(), "concurrency must be at least 1, got 0");
        assert!(err.accumulator().is_none());
    }
}
