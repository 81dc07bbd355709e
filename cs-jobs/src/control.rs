//! Per-job stop signal
//!
//! User cancellation, an external deadline and an `abort-job` failure all stop
//! a job the same way: they trip one [`CancellationToken`] that the scheduler
//! checks before admitting a segment and the runner checks before each stage.
//! An abort additionally records why, so the job ends `failed` instead of
//! `cancelled`.

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct JobControl {
    token: CancellationToken,
    abort_reason: Mutex<Option<String>>,
}

impl JobControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Control that also stops when `parent` is cancelled
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            abort_reason: Mutex::new(None),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        let _slot = self.abort_reason.lock();
        self.token.cancel();
    }

    /// Stop the job because of a failure; the first reason wins
    ///
    /// A job that was already cancelled stays cancelled: a failure observed
    /// after the stop records no reason.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut slot = self.abort_reason.lock();
        if slot.is_none() && !self.token.is_cancelled() {
            *slot = Some(reason.into());
        }
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.abort_reason.lock().clone()
    }
}
