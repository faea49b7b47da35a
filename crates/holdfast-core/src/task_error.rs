//! Intent processing error types
//!
//! A worker handling a queued intent reports whether a failure is worth
//! redelivering (recoverable) or should be dead-lettered immediately.

use std::fmt;

use crate::error::{ErrorMetadata, PinError};

/// Task execution error that can be either recoverable or unrecoverable
#[derive(Debug)]
pub struct TaskError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl TaskError {
    /// Unrecoverable errors are dead-lettered without another delivery attempt.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// Recoverable errors are redelivered after a back-off.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

impl From<PinError> for TaskError {
    /// Classification follows [`ErrorMetadata::is_recoverable`].
    fn from(err: PinError) -> Self {
        let recoverable = err.is_recoverable();
        Self {
            inner: err.into(),
            recoverable,
        }
    }
}
