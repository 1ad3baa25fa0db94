//! Wall-clock access behind a trait so rotation policy is testable without
//! sleeping. Sessions receive the clock through `SessionDeps`.

use chrono::{DateTime, Utc};
use std::time::Instant;

/// Source of both monotonic time (rotation intervals) and UTC time
/// (segment filenames).
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn utc(&self) -> DateTime<Utc>;
}

/// The production clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
