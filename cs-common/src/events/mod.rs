//! Event system for Cover Studio
//!
//! Provides the job event definitions and the EventBus that carries them.
//! Progress is normally polled through the job core, but every state change is
//! also published here so a push-based subscriber (SSE, websocket, CLI) can
//! follow a job without polling.

mod job_types;

pub use job_types::{JobStatus, SegmentOutcomeData};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Job lifecycle events
///
/// Events are broadcast via EventBus and can be serialized for transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// Job accepted and recorded in `queued`
    JobQueued {
        job_id: Uuid,
        segments_total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Job dispatched; segments are being admitted to workers
    JobStarted {
        job_id: Uuid,
        max_concurrent_segments: usize,
        timestamp: DateTime<Utc>,
    },

    /// A worker acquired an accelerator token and began a segment
    SegmentStarted {
        job_id: Uuid,
        segment_index: usize,
        timestamp: DateTime<Utc>,
    },

    /// Job-level progress changed
    ProgressUpdated {
        job_id: Uuid,
        /// Percentage complete (0.0 - 100.0), non-decreasing while running
        progress: f64,
        /// Most recently reported stage across in-flight segments
        current_stage: String,
        /// Human readable status line
        message: String,
        segments_completed: usize,
        segments_total: usize,
    },

    /// A segment reached a terminal state
    SegmentFinished {
        job_id: Uuid,
        segment_index: usize,
        outcome: SegmentOutcomeData,
        timestamp: DateTime<Utc>,
    },

    /// Job reached a terminal state
    JobFinished {
        job_id: Uuid,
        status: JobStatus,
        /// True when some segments failed but the job still completed
        degraded: bool,
        result_path: Option<String>,
        error_message: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Job this event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::JobQueued { job_id, .. }
            | JobEvent::JobStarted { job_id, .. }
            | JobEvent::SegmentStarted { job_id, .. }
            | JobEvent::ProgressUpdated { job_id, .. }
            | JobEvent::SegmentFinished { job_id, .. }
            | JobEvent::JobFinished { job_id, .. } => *job_id,
        }
    }
}

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use cs_common::events::{EventBus, JobEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(JobEvent::JobQueued {
///     job_id: uuid::Uuid::new_v4(),
///     segments_total: 3,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(JobEvent::JobQueued { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: JobEvent) -> Result<usize, broadcast::error::SendError<JobEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: JobEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
