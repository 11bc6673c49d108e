//! Wake-up channel between job producers and the acquisition loop.

use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct AcquisitionSignal {
    job_added: AtomicBool,
    interrupted: AtomicBool,
    wake: Notify,
}

impl AcquisitionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new job is ready for acquisition; cut the current sleep short
    pub fn job_was_added(&self) {
        self.job_added.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Ask the loop to stop after its current cycle. Idempotent.
    pub fn stop(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_job_added(&self) -> bool {
        self.job_added.load(Ordering::SeqCst)
    }

    /// Consume the job-added flag along with any wake-up permit left behind by it
    pub fn clear_job_added(&self) -> bool {
        let was_added = self.job_added.swap(false, Ordering::SeqCst);
        if was_added && !self.is_interrupted() {
            let _ = self.wake.notified().now_or_never();
        }
        was_added
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub async fn notified(&self) {
        self.wake.notified().await;
    }
}
