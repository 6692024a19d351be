//! Cooperative request deadlines.
//!
//! Ledger mutations run inside a caller's request. If the caller has already
//! timed out there is no point finishing the work, so every long-running
//! engine operation takes a [`Deadline`] and checks it at each await
//! boundary before doing more work. The transaction either commits in full
//! or aborts; the deadline never interrupts a half-applied mutation.
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("The caller's deadline has passed; aborting before further work")]
pub struct DeadlineExpired;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn within(timeout: Duration) -> Self {
        Self { expires_at: Some(Instant::now() + timeout) }
    }

    /// No deadline. Used by background jobs that pace themselves.
    pub fn unbounded() -> Self {
        Self { expires_at: None }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }

    /// Call at every suspension point inside a mutation.
    pub fn check(&self) -> Result<(), DeadlineExpired> {
        if self.is_expired() {
            Err(DeadlineExpired)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unbounded_never_expires() {
        let deadline = Deadline::unbounded();
        assert!(!deadline.is_expired());
        assert!(deadline.check().is_ok());
    }

    #[test]
    fn expires_after_the_timeout() {
        let deadline = Deadline::within(Duration::from_millis(5));
        assert!(deadline.check().is_ok());
        std::thread::sleep(Duration::from_millis(10));
        assert!(deadline.is_expired());
        assert_eq!(deadline.check(), Err(DeadlineExpired));
    }
}
