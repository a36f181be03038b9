//! Injected clock capability.
//!
//! Discovery pauses on a wall-clock deadline and the search debounce both
//! read time through this trait so tests can drive it manually.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// A reference-counted clock handle.
pub type ClockRef = Arc<dyn Clock>;

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
