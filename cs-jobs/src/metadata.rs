//! Per-job metadata file
//!
//! Every job keeps a JSON copy of its record at `<work_dir>/<job_id>/job.json`,
//! rewritten on each lifecycle transition (queued, running, terminal). The
//! file outlives the process so a failed job's segments and error stay
//! inspectable; `JobManager::delete` removes it with the rest of the
//! working directory.

use crate::error::{JobError, JobResult};
use crate::models::{Job, JobId};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const METADATA_FILE_NAME: &str = "job.json";

/// Metadata path for a job under `work_dir`
pub fn metadata_path(work_dir: &Path, id: JobId) -> PathBuf {
    work_dir.join(id.to_string()).join(METADATA_FILE_NAME)
}

/// Write `job` to its metadata file, creating the job directory
pub fn save_job_metadata(work_dir: &Path, job: &Job) -> JobResult<()> {
    let path = metadata_path(work_dir, job.id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(job)?;

    // Write then rename, so a reader never sees a half-written file
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// Like [`save_job_metadata`], but only logs a failure
///
/// A job is never failed because its metadata could not be written.
pub(crate) fn persist(work_dir: &Path, job: &Job) {
    if let Err(e) = save_job_metadata(work_dir, job) {
        warn!(job_id = %job.id, error = %e, "Failed to write job metadata");
    }
}

/// Read a job record back from its metadata file
///
/// # Errors
/// `NotFound` when no metadata file exists for `id`.
pub fn load_job_metadata(work_dir: &Path, id: JobId) -> JobResult<Job> {
    let path = metadata_path(work_dir, id);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(JobError::NotFound(id)),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobConfig, SegmentSpec};
    use cs_common::events::JobStatus;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let mut job = Job::new(
            id,
            JobConfig::default(),
            &[SegmentSpec::new(0.0, 30.0), SegmentSpec::new(29.5, 40.0)],
        );
        save_job_metadata(dir.path(), &job).unwrap();

        job.transition_to(JobStatus::Running);
        job.error_message = Some("boom".to_string());
        save_job_metadata(dir.path(), &job).unwrap();

        let loaded = load_job_metadata(dir.path(), id).unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.segments.len(), 2);
        assert_eq!(loaded.error_message.as_deref(), Some("boom"));
        assert!(!metadata_path(dir.path(), id)
            .with_extension("json.tmp")
            .exists());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            load_job_metadata(dir.path(), id),
            Err(JobError::NotFound(found)) if found == id
        ));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let path = metadata_path(dir.path(), id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_job_metadata(dir.path(), id),
            Err(JobError::Metadata(_))
        ));
    }
}
