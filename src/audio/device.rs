//! # Audio Devices
//!
//! The capture side ([`AudioInput`]) and the playback side ([`AudioOutput`])
//! of the voice client are traits, so the pipeline is independent of where
//! samples come from and where they go.
//!
//! The crate ships WAV-file implementations: [`WavInput`] replays a mono WAV
//! file as if it were a microphone, delivering small blocks at real-time pace,
//! and [`WavOutput`] records everything played into a WAV file.

use crate::audio::pcm;
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// A capture device delivering small blocks of normalized samples.
#[async_trait]
pub trait AudioInput: Send {
    /// Wait for the next device callback.
    ///
    /// Returns `Ok(None)` once the device is exhausted or disconnected.
    async fn next_block(&mut self) -> PipelineResult<Option<Vec<f32>>>;

    /// Disconnect from the hardware. Safe to call more than once.
    fn disconnect(&mut self);
}

/// One decoded chunk, ready to be played.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    /// Arrival order of the chunk this buffer was decoded from.
    pub sequence: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlayableBuffer {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// A playback device.
///
/// `play` resolves when the buffer has finished playing (or failed). The
/// playback scheduler never calls it again before the previous call resolves.
#[async_trait]
pub trait AudioOutput: Send {
    async fn play(&mut self, buffer: PlayableBuffer) -> PipelineResult<()>;

    /// Release the output context. Safe to call more than once.
    async fn release(&mut self) -> PipelineResult<()>;
}

/// Replays a WAV file as a capture device.
pub struct WavInput {
    samples: Vec<f32>,
    position: usize,
    block_size: usize,
    period: Option<Duration>,
    pacing: Option<tokio::time::Interval>,
    connected: bool,
}

impl WavInput {
    /// Open a WAV file and check it matches the pipeline's sample rate.
    pub fn open(path: impl AsRef<Path>, sample_rate: u32, block_size: usize) -> PipelineResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            PipelineError::Device(format!("cannot open {}: {}", path.display(), e))
        })?;
        let input = Self::from_reader(&mut file, sample_rate, block_size)?;
        info!(
            "Capture source {} opened: {} samples",
            path.display(),
            input.samples.len()
        );
        Ok(input)
    }

    /// Read a complete WAV stream into memory.
    ///
    /// ## Conversion:
    /// - 8/16/24-bit integer and 32-bit float data are normalized to [-1.0, 1.0]
    /// - Multi-channel audio is mixed down to mono by averaging
    pub fn from_reader<R: Read + Seek>(
        reader: &mut R,
        sample_rate: u32,
        block_size: usize,
    ) -> PipelineResult<Self> {
        let (header, data) =
            wav::read(reader).map_err(|e| PipelineError::Device(format!("invalid WAV: {}", e)))?;

        if header.sampling_rate != sample_rate {
            return Err(PipelineError::Device(format!(
                "WAV sample rate {} does not match pipeline rate {}",
                header.sampling_rate, sample_rate
            )));
        }

        let interleaved: Vec<f32> = match data {
            wav::BitDepth::Eight(samples) => samples
                .into_iter()
                .map(|s| (s as f32 - 128.0) / 128.0)
                .collect(),
            wav::BitDepth::Sixteen(samples) => samples.into_iter().map(pcm::i16_to_float).collect(),
            wav::BitDepth::TwentyFour(samples) => samples
                .into_iter()
                .map(|s| s as f32 / 8_388_608.0)
                .collect(),
            wav::BitDepth::ThirtyTwoFloat(samples) => samples,
            wav::BitDepth::Empty => Vec::new(),
        };

        let channels = header.channel_count.max(1) as usize;
        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        Ok(Self::from_samples(samples, sample_rate, block_size))
    }

    /// Build an input from samples already in memory.
    ///
    /// Blocks are delivered every `block_size / sample_rate` seconds.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let period = Duration::from_secs_f64(block_size as f64 / sample_rate.max(1) as f64);
        Self {
            samples,
            position: 0,
            block_size,
            period: Some(period),
            pacing: None,
            connected: true,
        }
    }

    /// Deliver blocks as fast as they are requested.
    pub fn unpaced(mut self) -> Self {
        self.period = None;
        self
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

#[async_trait]
impl AudioInput for WavInput {
    async fn next_block(&mut self) -> PipelineResult<Option<Vec<f32>>> {
        if !self.connected || self.position >= self.samples.len() {
            return Ok(None);
        }

        if let Some(period) = self.period {
            // Created on first use so construction needs no runtime.
            let pacing = self.pacing.get_or_insert_with(|| {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                interval
            });
            pacing.tick().await;
        }

        let end = (self.position + self.block_size).min(self.samples.len());
        let block = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(Some(block))
    }

    fn disconnect(&mut self) {
        if self.connected {
            debug!("Capture source disconnected at sample {}", self.position);
        }
        self.connected = false;
    }
}

/// Records played audio and writes it out as a 16-bit mono WAV file.
pub struct WavOutput {
    path: Option<PathBuf>,
    sample_rate: u32,
    recorded: Vec<i16>,
    realtime: bool,
    released: bool,
}

impl WavOutput {
    /// Record to `path`; the file is written when the output is released.
    pub fn create(path: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            path: Some(path.into()),
            sample_rate,
            recorded: Vec::new(),
            realtime: false,
            released: false,
        }
    }

    /// Record to memory only.
    pub fn in_memory(sample_rate: u32) -> Self {
        Self {
            path: None,
            sample_rate,
            recorded: Vec::new(),
            realtime: false,
            released: false,
        }
    }

    /// Make `play` take as long as the audio it plays.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn recorded(&self) -> &[i16] {
        &self.recorded
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn write_file(&self, path: &Path) -> PipelineResult<()> {
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, self.sample_rate, 16);
        let mut file = File::create(path).map_err(|e| {
            PipelineError::Device(format!("cannot create {}: {}", path.display(), e))
        })?;
        wav::write(header, &wav::BitDepth::Sixteen(self.recorded.clone()), &mut file)
            .map_err(|e| PipelineError::Device(format!("cannot write WAV: {}", e)))
    }
}

#[async_trait]
impl AudioOutput for WavOutput {
    async fn play(&mut self, buffer: PlayableBuffer) -> PipelineResult<()> {
        if self.released {
            return Err(PipelineError::Playback("output already released".to_string()));
        }
        if buffer.sample_rate != self.sample_rate {
            return Err(PipelineError::Playback(format!(
                "buffer rate {} does not match output rate {}",
                buffer.sample_rate, self.sample_rate
            )));
        }

        let duration = buffer.duration();
        self.recorded
            .extend(buffer.samples.iter().copied().map(pcm::float_to_i16));

        if self.realtime {
            tokio::time::sleep(duration).await;
        }
        Ok(())
    }

    async fn release(&mut self) -> PipelineResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if let Some(path) = self.path.clone() {
            self.write_file(&path)?;
            info!(
                "Playback recorded to {} ({} samples)",
                path.display(),
                self.recorded.len()
            );
        }
        Ok(())
    }
}
