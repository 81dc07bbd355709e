//! In-memory job registry
//!
//! An injected store rather than a process-wide global: each [`JobManager`]
//! owns an `Arc<JobStore>`, and tests can build as many as they like. Every
//! job lives behind its own [`JobHandle`], whose mutex is the single mutable
//! record that serializes progress updates from concurrent workers.
//!
//! [`JobManager`]: crate::manager::JobManager

use crate::control::JobControl;
use crate::models::{Job, JobId, JobSummary};
use crate::progress::{JobProgressSnapshot, ProgressAggregator};
use chrono::Utc;
use cs_common::events::JobStatus;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Mutable state of one job
#[derive(Debug)]
pub struct JobState {
    pub job: Job,
    pub aggregator: ProgressAggregator,
}

impl JobState {
    /// Copy aggregator output onto the job record
    pub fn apply_snapshot(&mut self, snapshot: &JobProgressSnapshot) {
        let job = &mut self.job;
        job.progress = snapshot.progress;
        job.current_stage = snapshot.current_stage.clone();
        job.message = snapshot.message.clone();
        job.degraded = snapshot.degraded;
        job.updated_at = Utc::now();
    }
}

/// Shared handle to one registered job
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    state: Mutex<JobState>,
    control: Arc<JobControl>,
    status_tx: watch::Sender<JobStatus>,
}

impl JobHandle {
    pub fn new(job: Job, aggregator: ProgressAggregator, control: Arc<JobControl>) -> Self {
        let (status_tx, _) = watch::channel(job.status);
        Self {
            id: job.id,
            state: Mutex::new(JobState { job, aggregator }),
            control,
            status_tx,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn control(&self) -> &Arc<JobControl> {
        &self.control
    }

    /// Read under the job lock
    pub fn read<R>(&self, f: impl FnOnce(&JobState) -> R) -> R {
        f(&self.state.lock())
    }

    /// Mutate under the job lock; status watchers are notified afterwards if
    /// the job status changed
    pub fn update<R>(&self, f: impl FnOnce(&mut JobState) -> R) -> R {
        let (result, status) = {
            let mut state = self.state.lock();
            let result = f(&mut state);
            (result, state.job.status)
        };
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
        result
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().job.status
    }

    pub fn watch_status(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }
}

/// Registry of jobs keyed by ID
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Arc<JobHandle>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<JobHandle>) {
        self.jobs.write().insert(handle.id(), handle);
    }

    pub fn get(&self, id: JobId) -> Option<Arc<JobHandle>> {
        self.jobs.read().get(&id).cloned()
    }

    pub fn remove(&self, id: JobId) -> Option<Arc<JobHandle>> {
        self.jobs.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Summaries of every job, newest first
    pub fn summaries(&self) -> Vec<JobSummary> {
        let handles: Vec<_> = self.jobs.read().values().cloned().collect();
        let mut summaries: Vec<_> = handles
            .iter()
            .map(|h| h.read(|state| state.job.summary()))
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        summaries
    }
}
