//! Clock seam for the orchestration loop
//!
//! The driver never reads the system clock directly; it goes through
//! [`Clock`] so tests can run the scheduling policy against a scripted
//! timeline, and so resynchronization stays a replaceable operation.

use crate::error::Result;
use chrono::Utc;

/// Wall-clock access plus explicit resynchronization
pub trait Clock {
    /// Current epoch seconds
    fn now_epoch(&self) -> i64;

    /// Force a resynchronization against the time source, returning the
    /// corrected epoch. Errors mean the source was unreachable.
    fn resync(&mut self) -> impl std::future::Future<Output = Result<i64>> + Send;
}

/// System clock. The OS keeps it NTP-disciplined, so resync just
/// re-reads it.
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> i64 {
        Utc::now().timestamp()
    }

    async fn resync(&mut self) -> Result<i64> {
        Ok(self.now_epoch())
    }
}
