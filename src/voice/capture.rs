//! Microphone input

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfigRange};

use crate::{Error, Result};

/// Preferred capture rate, matching what the recognizer is sent
pub const SAMPLE_RATE: u32 = 16000;

/// Mono microphone capture into a shared buffer
///
/// Multi-channel devices are downmixed in the stream callback. When the
/// device cannot run at [`SAMPLE_RATE`], the nearest supported rate is used
/// and reported by [`AudioCapture::sample_rate`].
///
/// Not `Send`: the stream must stay on the thread that opened it.
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    failure: Arc<Mutex<Option<String>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns error if there is no input device or it offers no float format
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let ranges: Vec<SupportedStreamConfigRange> = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|range| range.sample_format() == SampleFormat::F32)
            .collect();

        let range = ranges
            .iter()
            .min_by_key(|range| (!covers(range, SAMPLE_RATE), range.channels()))
            .ok_or_else(|| Error::Audio("input device has no f32 format".to_string()))?;

        let rate = SAMPLE_RATE.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
        let config = range.clone().with_sample_rate(SampleRate(rate)).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = rate,
            channels = config.channels,
            "microphone opened"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            failure: Arc::new(Mutex::new(None)),
            stream: None,
        })
    }

    /// Start the input stream
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be built or started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels.max(1));
        let buffer = Arc::clone(&self.buffer);
        let failure = Arc::clone(&self.failure);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        downmix_into(&mut buf, data, channels);
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "microphone stream error");
                    if let Ok(mut slot) = failure.lock() {
                        slot.get_or_insert_with(|| err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Close the input stream
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("microphone closed");
        }
    }

    /// Drain everything captured since the previous call
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// First stream error reported by the device
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|slot| slot.clone())
    }

    /// Rate of the samples in the buffer
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn covers(range: &SupportedStreamConfigRange, rate: u32) -> bool {
    range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0
}

/// Append interleaved `data` to `out` as mono
#[allow(clippy::cast_precision_loss)]
fn downmix_into(out: &mut Vec<f32>, data: &[f32], channels: usize) {
    if channels <= 1 {
        out.extend_from_slice(data);
        return;
    }
    out.extend(
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
    );
}
