//! Live output through the default system audio device.
//!
//! The transport thread pushes interleaved frames into a lock-free ring; the
//! cpal callback pops them and fills with silence when the ring runs dry.
//! The ring opens with a cushion of silence so a late tick does not starve
//! the callback.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use tracing::{error, info, warn};

use super::OutputSink;
use crate::{GrooveError, Result};

/// Ring size in seconds of audio.
const RING_SECONDS: f32 = 0.5;
/// Silence queued on open, a little over one tick at the default tempo.
const PREFILL_SECONDS: f32 = 0.05;

type Fault = Arc<Mutex<Option<String>>>;

/// cpal output stream fed from a ring buffer.
pub struct DeviceSink {
    producer: Option<HeapProd<f32>>,
    stream: Option<cpal::Stream>,
    fault: Fault,
    dropped: u64,
}

impl Default for DeviceSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSink {
    pub fn new() -> Self {
        Self {
            producer: None,
            stream: None,
            fault: Arc::new(Mutex::new(None)),
            dropped: 0,
        }
    }

    /// Samples discarded because the ring was full.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped
    }

    fn take_fault(&self) -> Option<String> {
        self.fault.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl OutputSink for DeviceSink {
    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| GrooveError::device("no audio output device available"))?;
        let supported = device
            .default_output_config()
            .map_err(|err| GrooveError::device(format!("no default output config: {err}")))?;

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let capacity = ((sample_rate as f32 * RING_SECONDS) as usize).max(1) * channels as usize;
        let (mut producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let cushion = prefill(
            &mut producer,
            (sample_rate as f32 * PREFILL_SECONDS) as usize * channels as usize,
        );

        let fault = Arc::clone(&self.fault);
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, fault)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, fault)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, fault)?,
            other => {
                return Err(GrooveError::device(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        };
        stream
            .play()
            .map_err(|err| GrooveError::device(format!("failed to start stream: {err}")))?;

        info!(sample_rate, channels, capacity, cushion, "audio device opened");
        self.producer = Some(producer);
        self.stream = Some(stream);
        Ok(())
    }

    fn write(&mut self, frames: &[f32]) -> Result<()> {
        if let Some(fault) = self.take_fault() {
            return Err(GrooveError::device(fault));
        }
        let producer = self
            .producer
            .as_mut()
            .ok_or_else(|| GrooveError::device("audio device is not open"))?;

        let dropped = push_frames(producer, frames);
        if dropped > 0 {
            self.dropped += dropped as u64;
            warn!(dropped, total = self.dropped, "output ring full, samples dropped");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream
                .pause()
                .map_err(|err| GrooveError::device(format!("failed to stop stream: {err}")))?;
        }
        self.producer = None;
        Ok(())
    }
}

impl std::fmt::Debug for DeviceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSink")
            .field("open", &self.stream.is_some())
            .field("dropped", &self.dropped)
            .finish()
    }
}

/// Queues up to `samples` zeros and returns how many fit.
fn prefill<P: Producer<Item = f32>>(producer: &mut P, samples: usize) -> usize {
    producer.push_iter(std::iter::repeat(0.0).take(samples))
}

/// Pushes interleaved samples and returns how many did not fit.
fn push_frames<P: Producer<Item = f32>>(producer: &mut P, frames: &[f32]) -> usize {
    frames.len() - producer.push_slice(frames)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: HeapCons<f32>,
    fault: Fault,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    let value = consumer.try_pop().unwrap_or(0.0).clamp(-1.0, 1.0);
                    *sample = <T as Sample>::from_sample(value);
                }
            },
            move |err| {
                error!("audio stream error: {err}");
                if let Ok(mut slot) = fault.lock() {
                    *slot = Some(err.to_string());
                }
            },
            None,
        )
        .map_err(|err| GrooveError::device(format!("failed to build output stream: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefill_is_capped_by_capacity() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(8).split();
        assert_eq!(prefill(&mut producer, 6), 6);
        assert_eq!(prefill(&mut producer, 6), 2);
        assert_eq!(consumer.try_pop(), Some(0.0));
    }

    #[test]
    fn overflow_is_counted_not_hidden() {
        let (mut producer, mut consumer) = HeapRb::<f32>::new(4).split();
        assert_eq!(push_frames(&mut producer, &[0.1, 0.2, 0.3]), 0);
        assert_eq!(push_frames(&mut producer, &[0.4, 0.5, 0.6]), 2);

        let played: Vec<f32> = std::iter::from_fn(|| consumer.try_pop()).collect();
        assert_eq!(played, vec![0.1, 0.2, 0.3, 0.4]);
    }
}
