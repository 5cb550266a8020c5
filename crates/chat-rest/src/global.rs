//! Platform-wide rate-limit block

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Shared deadline set by a global 429; authenticated requests wait it out
#[derive(Debug, Default)]
pub(crate) struct GlobalBlock {
    until: Mutex<Option<Instant>>,
}

impl GlobalBlock {
    /// Block every authenticated request for `duration` (at least 1ms)
    pub(crate) fn block(&self, duration: Duration) {
        let deadline = Instant::now() + duration.max(Duration::from_millis(1));
        let mut until = self.until.lock();
        if until.map_or(true, |current| current < deadline) {
            *until = Some(deadline);
        }
    }

    pub(crate) fn is_blocked(&self) -> bool {
        let mut until = self.until.lock();
        match *until {
            Some(deadline) if deadline > Instant::now() => true,
            Some(_) => {
                *until = None;
                false
            }
            None => false,
        }
    }

    /// Resolve once no block is in effect
    pub(crate) async fn wait(&self) {
        loop {
            let deadline = *self.until.lock();
            match deadline {
                Some(deadline) if deadline > Instant::now() => {
                    tokio::time::sleep_until(deadline).await;
                }
                _ => return,
            }
        }
    }
}
