use chrono::{DateTime, Utc};

/// The scheduler's notion of "now", injected so tests can substitute a
/// manual clock instead of waiting out real expiration windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
