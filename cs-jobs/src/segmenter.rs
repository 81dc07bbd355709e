//! Fixed-length overlapping segmentation
//!
//! Splits a source duration into `ceil((total - overlap) / (length - overlap))`
//! segments stepping by `length - overlap`. Every segment is `length` long
//! except the last, whose end is clamped to the total duration.

use crate::error::{JobError, JobResult};
use crate::models::SegmentSpec;

/// Tolerance for floating point noise in the segment count
const COUNT_EPSILON: f64 = 1e-9;

/// Split `total_duration` seconds into ordered, overlapping segments
///
/// # Errors
/// `InvalidConfiguration` when `segment_length <= 0`, `overlap < 0`,
/// `overlap >= segment_length`, or the duration is not positive.
pub fn segment(
    total_duration: f64,
    segment_length: f64,
    overlap: f64,
) -> JobResult<Vec<SegmentSpec>> {
    if !segment_length.is_finite() || segment_length <= 0.0 {
        return Err(JobError::InvalidConfiguration(format!(
            "segment length must be > 0, got {}",
            segment_length
        )));
    }
    if !overlap.is_finite() || overlap < 0.0 || overlap >= segment_length {
        return Err(JobError::InvalidConfiguration(format!(
            "overlap must be in [0, {}), got {}",
            segment_length, overlap
        )));
    }
    if !total_duration.is_finite() || total_duration <= 0.0 {
        return Err(JobError::InvalidConfiguration(format!(
            "source duration must be > 0, got {}",
            total_duration
        )));
    }

    let step = segment_length - overlap;
    let count = (((total_duration - overlap) / step) - COUNT_EPSILON).ceil().max(1.0) as usize;

    let segments = (0..count)
        .map(|i| {
            let start = i as f64 * step;
            let end = if i + 1 == count {
                total_duration
            } else {
                (start + segment_length).min(total_duration)
            };
            SegmentSpec::new(start, end)
        })
        .collect();

    Ok(segments)
}
