//! Cooperative cancellation and timeouts for one query execution.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{OlapError, OlapResult};

#[derive(Debug, Default)]
struct HandleState {
    cancelled: AtomicBool,
    deadline: Mutex<Option<(Instant, u64)>>,
}

/// Shared between the thread running a query and whoever may cancel it. Clones observe the
/// same state.
#[derive(Clone, Debug, Default)]
pub struct ExecutionHandle {
    state: Arc<HandleState>,
}

impl ExecutionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Fail the query once `millis` have elapsed from now.
    pub fn set_timeout(&self, millis: u64) {
        let deadline = Instant::now() + Duration::from_millis(millis);
        *self
            .state
            .deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((deadline, millis));
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.state
            .deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|(deadline, _)| deadline.saturating_duration_since(Instant::now()))
    }

    /// `Err` once the query has been cancelled or has run past its deadline.
    pub fn check(&self) -> OlapResult<()> {
        if self.is_cancelled() {
            return Err(OlapError::QueryCancelled);
        }
        let deadline = *self
            .state
            .deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match deadline {
            Some((deadline, millis)) if Instant::now() >= deadline => {
                Err(OlapError::QueryTimeout { millis })
            }
            _ => Ok(()),
        }
    }
}
