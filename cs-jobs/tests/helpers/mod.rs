//! Shared fixtures for cs-jobs integration tests

#![allow(dead_code)]

use cs_jobs::audio::{AudioBuffer, AudioSource, MemorySource};
use cs_jobs::models::{JobConfig, SegmentSpec};
use cs_jobs::stages::{StageContext, StageExecutor, StageRegistry};
use cs_jobs::{JobEvent, JobStatus, StageError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const SAMPLE_RATE: u32 = 100;
pub const SEGMENT_LENGTH: f64 = 4.0;
pub const OVERLAP: f64 = 0.5;
pub const DEFAULT_STAGES: [&str; 4] = ["pitch", "voice", "instrumental", "mixing"];

/// Shared observation point for every recorder stage of a registry
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<(usize, String)>>,
    failures: Mutex<HashSet<(usize, String)>>,
    releases: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    delay_ms: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let recorder = Self::default();
        recorder.delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
        Arc::new(recorder)
    }

    /// Make `stage` fail on `segment_index`
    pub fn fail_on(&self, segment_index: usize, stage: &str) {
        self.failures.lock().insert((segment_index, stage.to_string()));
    }

    /// Registry with a recorder stage for every name
    pub fn registry(self: &Arc<Self>, stages: &[&str]) -> StageRegistry {
        let mut registry = StageRegistry::new();
        for name in stages {
            registry.register(Arc::new(RecordingStage {
                name: name.to_string(),
                recorder: self.clone(),
            }));
        }
        registry
    }

    pub fn default_registry(self: &Arc<Self>) -> StageRegistry {
        self.registry(&DEFAULT_STAGES)
    }

    pub fn calls(&self) -> Vec<(usize, String)> {
        self.calls.lock().clone()
    }

    /// Distinct segments that ran at least one stage
    pub fn segments_run(&self) -> HashSet<usize> {
        self.calls.lock().iter().map(|(i, _)| *i).collect()
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct RecordingStage {
    name: String,
    recorder: Arc<Recorder>,
}

impl StageExecutor for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: AudioBuffer, ctx: &StageContext) -> Result<AudioBuffer, StageError> {
        let recorder = &self.recorder;
        recorder
            .calls
            .lock()
            .push((ctx.segment_index, self.name.clone()));
        let now = recorder.running.fetch_add(1, Ordering::SeqCst) + 1;
        recorder.peak.fetch_max(now, Ordering::SeqCst);

        ctx.report_progress(0.5);
        let delay = recorder.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay as u64));
        }
        recorder.running.fetch_sub(1, Ordering::SeqCst);

        if recorder
            .failures
            .lock()
            .contains(&(ctx.segment_index, self.name.clone()))
        {
            return Err(StageError::failed("injected failure"));
        }
        Ok(input)
    }

    fn release(&self) {
        self.recorder.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Job config matching [`segments`]
pub fn config(max_concurrent: usize) -> JobConfig {
    JobConfig {
        segment_length: SEGMENT_LENGTH,
        overlap: OVERLAP,
        max_concurrent_segments: max_concurrent,
        ..Default::default()
    }
}

/// `n` contiguous segments of `SEGMENT_LENGTH` overlapping by `OVERLAP`
pub fn segments(n: usize) -> Vec<SegmentSpec> {
    let step = SEGMENT_LENGTH - OVERLAP;
    (0..n)
        .map(|i| SegmentSpec::new(i as f64 * step, i as f64 * step + SEGMENT_LENGTH))
        .collect()
}

/// Source exactly covering `segments(n)`
pub fn source(n: usize) -> Arc<dyn AudioSource> {
    let seconds = (n as f64 - 1.0) * (SEGMENT_LENGTH - OVERLAP) + SEGMENT_LENGTH;
    let frames = (seconds * SAMPLE_RATE as f64).round() as usize;
    let samples = (0..frames)
        .map(|i| ((i as f32) * 0.05).sin() * 0.5)
        .collect();
    Arc::new(MemorySource::new(AudioBuffer::new(samples, SAMPLE_RATE, 1)))
}

/// Wait for the first event matching `pred` for `job_id`
pub async fn next_event(
    rx: &mut broadcast::Receiver<JobEvent>,
    job_id: Uuid,
    pred: impl Fn(&JobEvent) -> bool,
) -> JobEvent {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if event.job_id() == job_id && pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for event")
}

/// Collect every event for `job_id` until it finishes
pub async fn collect_until_finished(
    rx: &mut broadcast::Receiver<JobEvent>,
    job_id: Uuid,
) -> Vec<JobEvent> {
    let mut events = Vec::new();
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if event.job_id() == job_id => {
                    let done = matches!(event, JobEvent::JobFinished { .. });
                    events.push(event);
                    if done {
                        return;
                    }
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => panic!("lagged {} events", n),
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for job to finish");
    events
}

pub fn finished_status(events: &[JobEvent]) -> Option<JobStatus> {
    events.iter().find_map(|e| match e {
        JobEvent::JobFinished { status, .. } => Some(*status),
        _ => None,
    })
}
