//! Audio buffers, sources and WAV I/O
//!
//! Buffers are interleaved `f32` samples. Segment outputs and the assembled
//! result are written as 32-bit float WAV files.

use crate::error::{JobError, JobResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Interleaved PCM audio held in memory
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved samples (frame-major)
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1=mono, 2=stereo)
    pub channels: u16,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Buffer of `frames` frames of silence
    pub fn silence(frames: usize, sample_rate: u32, channels: u16) -> Self {
        Self::new(vec![0.0; frames * channels as usize], sample_rate, channels)
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frame index nearest to `seconds`, clamped to the buffer
    pub fn frame_at(&self, seconds: f64) -> usize {
        let frame = (seconds.max(0.0) * self.sample_rate as f64).round() as usize;
        frame.min(self.frames())
    }

    /// Copy of the frames covering `[start, end)` seconds
    pub fn slice_secs(&self, start: f64, end: f64) -> AudioBuffer {
        let first = self.frame_at(start);
        let last = self.frame_at(end).max(first);
        let ch = self.channels as usize;
        AudioBuffer::new(
            self.samples[first * ch..last * ch].to_vec(),
            self.sample_rate,
            self.channels,
        )
    }

    /// Same sample rate and channel layout
    pub fn same_format(&self, other: &AudioBuffer) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }

    /// Largest absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

/// Where a job's raw segment audio comes from
pub trait AudioSource: Send + Sync {
    /// Total duration in seconds
    fn duration(&self) -> f64;

    /// Audio covering `[start, end)` seconds
    fn read_range(&self, start: f64, end: f64) -> JobResult<AudioBuffer>;
}

/// Source backed by a buffer already in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    buffer: Arc<AudioBuffer>,
}

impl MemorySource {
    pub fn new(buffer: AudioBuffer) -> Self {
        Self {
            buffer: Arc::new(buffer),
        }
    }
}

impl AudioSource for MemorySource {
    fn duration(&self) -> f64 {
        self.buffer.duration_secs()
    }

    fn read_range(&self, start: f64, end: f64) -> JobResult<AudioBuffer> {
        Ok(self.buffer.slice_secs(start, end))
    }
}

/// Source decoded from a WAV file on open
#[derive(Debug, Clone)]
pub struct WavSource {
    path: PathBuf,
    inner: MemorySource,
}

impl WavSource {
    pub fn open(path: impl AsRef<Path>) -> JobResult<Self> {
        let path = path.as_ref().to_path_buf();
        let buffer = read_wav(&path)?;
        debug!(
            path = %path.display(),
            sample_rate = buffer.sample_rate,
            channels = buffer.channels,
            duration = buffer.duration_secs(),
            "Opened WAV source"
        );
        Ok(Self {
            path,
            inner: MemorySource::new(buffer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioSource for WavSource {
    fn duration(&self) -> f64 {
        self.inner.duration()
    }

    fn read_range(&self, start: f64, end: f64) -> JobResult<AudioBuffer> {
        self.inner.read_range(start, end)
    }
}

/// Decode a WAV file (integer or float PCM) into normalized `f32`
pub fn read_wav(path: &Path) -> JobResult<AudioBuffer> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = match spec.bits_per_sample {
                8 => i8::MAX as f32,
                16 => i16::MAX as f32,
                24 => 8_388_607.0,
                32 => i32::MAX as f32,
                bits => {
                    return Err(JobError::Audio(format!(
                        "unsupported bit depth {} in {}",
                        bits,
                        path.display()
                    )))
                }
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(AudioBuffer::new(samples, spec.sample_rate, spec.channels))
}

/// Encode a buffer as a 32-bit float WAV file, creating parent directories
pub fn write_wav(path: &Path, buffer: &AudioBuffer) -> JobResult<()> {
    if buffer.channels == 0 || buffer.sample_rate == 0 {
        return Err(JobError::Audio(format!(
            "cannot write {}: {} channels at {} Hz",
            path.display(),
            buffer.channels,
            buffer.sample_rate
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = hound::WavSpec {
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in &buffer.samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}
