//! Segment stitching
//!
//! Concatenates segment outputs in index order. At each boundary between
//! adjacent segments, the overlap region is blended with a crossfade so the
//! tail of segment *i* fades into the head of segment *i+1*. The result is
//! `Σ frames - (n-1) × overlap_frames` long and a pure function of its inputs.

use crate::audio::{read_wav, write_wav, AudioBuffer};
use crate::error::{JobError, JobResult};
use crate::models::{Segment, SegmentStatus};
use cs_common::FadeCurve;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Decoded segment output tagged with its index
#[derive(Debug, Clone)]
pub struct IndexedBuffer {
    pub index: usize,
    pub buffer: AudioBuffer,
}

/// Stitch buffers in index order
///
/// Adjacent indices are crossfaded over `overlap_secs`, clamped to the shorter
/// of the two buffers. Non-adjacent indices (a gap left by a failed segment)
/// are joined without blending.
pub fn stitch(
    mut parts: Vec<IndexedBuffer>,
    overlap_secs: f64,
    curve: FadeCurve,
) -> JobResult<AudioBuffer> {
    parts.sort_by_key(|p| p.index);
    let mut iter = parts.into_iter();
    let Some(first) = iter.next() else {
        return Err(JobError::IncompleteInput("no segment outputs to assemble".to_string()));
    };

    let sample_rate = first.buffer.sample_rate;
    let channels = first.buffer.channels as usize;
    let overlap_frames = (overlap_secs.max(0.0) * sample_rate as f64).round() as usize;

    let mut prev_index = first.index;
    let mut prev_frames = first.buffer.frames();
    let mut out = first.buffer;

    for part in iter {
        if !part.buffer.same_format(&out) {
            return Err(JobError::Audio(format!(
                "segment {} is {} Hz / {} ch, expected {} Hz / {} ch",
                part.index, part.buffer.sample_rate, part.buffer.channels, sample_rate, channels
            )));
        }

        let next = part.buffer;
        let fade = if part.index == prev_index + 1 {
            overlap_frames.min(prev_frames).min(next.frames())
        } else {
            0
        };

        let base = out.samples.len() - fade * channels;
        for frame in 0..fade {
            let position = frame as f32 / fade as f32;
            let (gain_out, gain_in) = curve.gains(position);
            for ch in 0..channels {
                let i = base + frame * channels + ch;
                out.samples[i] = out.samples[i] * gain_out + next.samples[frame * channels + ch] * gain_in;
            }
        }
        out.samples
            .extend_from_slice(&next.samples[fade * channels..]);

        debug!(segment_index = part.index, crossfade_frames = fade, "Stitched segment");
        prev_index = part.index;
        prev_frames = next.frames();
    }

    Ok(out)
}

/// Assemble every segment of a job into `out_path`
///
/// # Errors
/// `IncompleteInput` when the list is empty or any segment has no output.
pub fn assemble(
    segments: &[Segment],
    overlap_secs: f64,
    curve: FadeCurve,
    out_path: &Path,
) -> JobResult<PathBuf> {
    if segments.is_empty() {
        return Err(JobError::IncompleteInput("job has no segments".to_string()));
    }
    let missing: Vec<_> = segments
        .iter()
        .filter(|s| s.output_path.is_none())
        .map(|s| s.index)
        .collect();
    if !missing.is_empty() {
        return Err(JobError::IncompleteInput(format!(
            "segments without output: {:?}",
            missing
        )));
    }

    write_stitched(segments.iter().collect(), overlap_secs, curve, out_path)
}

/// Assemble only the completed segments, leaving gaps where others failed
pub fn assemble_partial(
    segments: &[Segment],
    overlap_secs: f64,
    curve: FadeCurve,
    out_path: &Path,
) -> JobResult<PathBuf> {
    let completed: Vec<_> = segments
        .iter()
        .filter(|s| s.status == SegmentStatus::Completed && s.output_path.is_some())
        .collect();
    if completed.is_empty() {
        return Err(JobError::IncompleteInput(
            "no completed segments to assemble".to_string(),
        ));
    }

    write_stitched(completed, overlap_secs, curve, out_path)
}

fn write_stitched(
    segments: Vec<&Segment>,
    overlap_secs: f64,
    curve: FadeCurve,
    out_path: &Path,
) -> JobResult<PathBuf> {
    let mut parts = Vec::with_capacity(segments.len());
    for segment in segments {
        let Some(path) = &segment.output_path else {
            return Err(JobError::IncompleteInput(format!(
                "segment {} has no output",
                segment.index
            )));
        };
        parts.push(IndexedBuffer {
            index: segment.index,
            buffer: read_wav(path)?,
        });
    }

    let count = parts.len();
    let result = stitch(parts, overlap_secs, curve)?;
    write_wav(out_path, &result)?;
    info!(
        output = %out_path.display(),
        segments = count,
        duration = result.duration_secs(),
        curve = %curve,
        "Assembled result"
    );
    Ok(out_path.to_path_buf())
}
