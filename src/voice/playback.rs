//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Frames per resampler block
const RESAMPLE_CHUNK: usize = 1024;

/// Mono audio with its sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    /// Samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Samples per second
    pub sample_rate: u32,
}

impl Waveform {
    /// Create a waveform
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playing time
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.samples.len() as u64 * 1000 / u64::from(self.sample_rate))
    }

    /// Append another waveform, resampling it to this rate first
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn append(&mut self, other: Self) -> Result<()> {
        if self.samples.is_empty() {
            *self = other;
            return Ok(());
        }
        let other = resample(other, self.sample_rate)?;
        self.samples.extend(other.samples);
        Ok(())
    }
}

/// Somewhere synthesized speech is played
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play a waveform, returning once playback has finished
    async fn play(&self, waveform: Waveform) -> Result<()>;
}

/// Plays audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let config = device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Output sample rate of the device
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Play samples in a blocking manner
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be built
    pub fn play_blocking(&self, waveform: Waveform) -> Result<()> {
        if waveform.samples.is_empty() {
            return Ok(());
        }

        let waveform = resample(waveform, self.sample_rate())?;

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let channels = usize::from(self.config.channels);
        let sample_count = waveform.samples.len();
        let samples = Arc::new(waveform.samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);

            device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let pos = position.load(Ordering::Relaxed);
                            let sample = if let Some(&s) = samples.get(pos) {
                                position.store(pos + 1, Ordering::Relaxed);
                                s
                            } else {
                                finished.store(true, Ordering::Release);
                                0.0
                            };
                            frame.fill(sample);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(self.sample_rate());
        let start = Instant::now();
        let timeout = Duration::from_millis(duration_ms + 500);

        while !finished.load(Ordering::Acquire) {
            if start.elapsed() > timeout {
                tracing::warn!("playback did not drain before timeout");
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        // Let the device flush its last buffer
        std::thread::sleep(Duration::from_millis(100));

        drop(stream);
        tracing::debug!(samples = sample_count, "playback complete");

        Ok(())
    }
}

#[async_trait]
impl AudioSink for AudioPlayback {
    async fn play(&self, waveform: Waveform) -> Result<()> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || Self { config }.play_blocking(waveform))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

/// Resample a waveform to `target_rate`
///
/// # Errors
///
/// Returns error if the resampler cannot be built
pub fn resample(waveform: Waveform, target_rate: u32) -> Result<Waveform> {
    if waveform.sample_rate == target_rate || waveform.samples.is_empty() {
        return Ok(Waveform::new(waveform.samples, target_rate));
    }

    let mut resampler = FftFixedIn::<f32>::new(
        waveform.sample_rate as usize,
        target_rate as usize,
        RESAMPLE_CHUNK,
        2,
        1,
    )
    .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    #[allow(clippy::cast_possible_truncation)]
    let expected = (waveform.samples.len() as u64 * u64::from(target_rate)
        / u64::from(waveform.sample_rate)) as usize;
    let block_len = resampler.input_frames_next();
    let mut out = Vec::with_capacity(expected + resampler.output_frames_max());

    // Trailing block is zero padded; one extra flushes the filter delay
    let mut blocks: Vec<Vec<f32>> = waveform
        .samples
        .chunks(block_len)
        .map(<[f32]>::to_vec)
        .collect();
    blocks.push(Vec::new());

    for mut block in blocks {
        block.resize(block_len, 0.0);
        let resampled = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        out.extend_from_slice(&resampled[0]);
    }

    out.resize(expected, 0.0);
    Ok(Waveform::new(out, target_rate))
}

/// Decode MP3 bytes to a mono waveform
///
/// # Errors
///
/// Returns error if the data is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Waveform> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                samples.extend(downmix_i16(&frame.data, frame.channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e:?}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("MP3 contained no audio frames".to_string()));
    }

    Ok(Waveform::new(samples, sample_rate))
}

/// Decode WAV bytes to a mono waveform
///
/// # Errors
///
/// Returns error if the data is not a readable WAV file
pub fn decode_wav(wav_data: &[u8]) -> Result<Waveform> {
    let mut reader =
        hound::WavReader::new(Cursor::new(wav_data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    #[allow(clippy::cast_precision_loss)]
    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(Waveform::new(samples, spec.sample_rate))
}

#[allow(clippy::cast_precision_loss)]
fn downmix_i16(data: &[i16], channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            frame.iter().map(|&s| f32::from(s) / 32768.0).sum::<f32>() / frame.len() as f32
        })
        .collect()
}
