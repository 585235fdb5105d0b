//! Waveform generation.
//!
//! The sequencer only relies on [`WaveformGenerator`]: given a
//! [`SoundRequest`] it expects a finished block of samples. [`Synth`] is the
//! bundled implementation used by the application.

use std::{f32::consts::PI, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{GrooveError, Result};

const KICK_START_HZ: f32 = 150.0;
const KICK_END_HZ: f32 = 30.0;
const SNARE_TONE_HZ: f32 = 200.0;

// Fade-out lengths in seconds, clamped to half the sound at render time.
const FADE: f32 = 0.01;
const KICK_FADE: f32 = 0.1;
const SNARE_FADE: f32 = 1.01;

/// Which instrument a request should render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instrument {
    Kick,
    Snare,
    HiHat,
    Bass { frequency: f32 },
    Chord { frequencies: Vec<f32> },
    Tone { frequency: f32 },
}

/// Parameters for a single generated sound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundRequest {
    pub instrument: Instrument,
    /// Length of the rendered sound in seconds.
    pub duration: f32,
    /// Linear gain applied after synthesis.
    pub gain: f32,
}

impl SoundRequest {
    pub fn new(instrument: Instrument, duration: f32) -> Self {
        Self {
            instrument,
            duration,
            gain: 1.0,
        }
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn kick(duration: f32) -> Self {
        Self::new(Instrument::Kick, duration)
    }

    pub fn snare(duration: f32) -> Self {
        Self::new(Instrument::Snare, duration)
    }

    pub fn hihat(duration: f32) -> Self {
        Self::new(Instrument::HiHat, duration)
    }

    pub fn bass(frequency: f32, duration: f32) -> Self {
        Self::new(Instrument::Bass { frequency }, duration)
    }

    pub fn chord(frequencies: &[f32], duration: f32) -> Self {
        Self::new(
            Instrument::Chord {
                frequencies: frequencies.to_vec(),
            },
            duration,
        )
    }

    pub fn tone(frequency: f32, duration: f32) -> Self {
        Self::new(Instrument::Tone { frequency }, duration)
    }
}

/// Immutable block of interleaved frames produced by a generator.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleData {
    channels: usize,
    samples: Arc<[f32]>,
}

impl SampleData {
    pub fn mono(samples: Vec<f32>) -> Self {
        Self {
            channels: 1,
            samples: samples.into(),
        }
    }

    /// Wraps interleaved samples. The length must be a multiple of `channels`.
    pub fn interleaved(channels: usize, samples: Vec<f32>) -> Result<Self> {
        if channels == 0 {
            return Err(GrooveError::generation("sample data needs at least one channel"));
        }
        if samples.len() % channels != 0 {
            return Err(GrooveError::generation(format!(
                "{} samples do not divide into {channels} channels",
                samples.len()
            )));
        }
        Ok(Self {
            channels,
            samples: samples.into(),
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample of `channel` in `frame`.
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.samples[frame * self.channels + channel]
    }

    /// Rejects data a mix buffer cannot use.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(GrooveError::generation("generator returned no samples"));
        }
        if let Some(index) = self.samples.iter().position(|s| !s.is_finite()) {
            return Err(GrooveError::generation(format!(
                "generator returned a non-finite sample at index {index}"
            )));
        }
        Ok(())
    }
}

/// Capability the sequencer uses to turn requests into audio.
pub trait WaveformGenerator: Send {
    fn generate(&mut self, request: &SoundRequest) -> Result<SampleData>;
}

impl<G: WaveformGenerator + ?Sized> WaveformGenerator for Box<G> {
    fn generate(&mut self, request: &SoundRequest) -> Result<SampleData> {
        (**self).generate(request)
    }
}

/// Mono oscillator and noise synth.
#[derive(Debug, Clone)]
pub struct Synth {
    sample_rate: u32,
    rng: fastrand::Rng,
}

impl Synth {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            rng: fastrand::Rng::new(),
        }
    }

    /// Makes noise-based instruments reproducible.
    pub fn with_seed(sample_rate: u32, seed: u64) -> Self {
        Self {
            sample_rate,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_count(&self, duration: f32) -> Result<usize> {
        if !duration.is_finite() || duration <= 0.0 {
            return Err(GrooveError::generation(format!(
                "duration must be positive, got {duration}"
            )));
        }
        let frames = (self.sample_rate as f32 * duration) as usize;
        if frames == 0 {
            return Err(GrooveError::generation(format!(
                "{duration}s is shorter than one frame"
            )));
        }
        Ok(frames)
    }

    fn time(&self, index: usize) -> f32 {
        index as f32 / self.sample_rate as f32
    }

    fn sine(&self, frequency: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI * frequency * self.time(i)).sin())
            .collect()
    }

    fn kick(&self, frames: usize) -> Vec<f32> {
        let ratio = (KICK_END_HZ / KICK_START_HZ).ln();
        let last = frames.saturating_sub(1).max(1) as f32;
        (0..frames)
            .map(|i| {
                let t = self.time(i);
                let frequency = KICK_START_HZ * (ratio * i as f32 / last).exp();
                (2.0 * PI * frequency * t).sin() * (-3.0 * t).exp()
            })
            .collect()
    }

    fn snare(&mut self, frames: usize) -> Vec<f32> {
        let rate = self.sample_rate as f32;
        let rng = &mut self.rng;
        (0..frames)
            .map(|i| {
                let t = i as f32 / rate;
                let tone = (2.0 * PI * SNARE_TONE_HZ * t).sin();
                (gaussian(rng) * 0.5 + tone * 0.5) * (-10.0 * t).exp()
            })
            .collect()
    }

    fn hihat(&mut self, frames: usize) -> Vec<f32> {
        let rate = self.sample_rate as f32;
        let rng = &mut self.rng;
        (0..frames)
            .map(|i| gaussian(rng) * (-30.0 * i as f32 / rate).exp())
            .collect()
    }

    fn bass(&self, frequency: f32, frames: usize) -> Vec<f32> {
        let last = frames.saturating_sub(1).max(1) as f32;
        self.sine(frequency, frames)
            .into_iter()
            .enumerate()
            .map(|(i, s)| s * (1.0 - i as f32 / last))
            .collect()
    }

    fn chord(&self, frequencies: &[f32], frames: usize) -> Result<Vec<f32>> {
        if frequencies.is_empty() {
            return Err(GrooveError::generation("chord has no notes"));
        }
        let scale = 1.0 / frequencies.len() as f32;
        let mut out = vec![0.0; frames];
        for &frequency in frequencies {
            for (i, sample) in out.iter_mut().enumerate() {
                *sample += (2.0 * PI * frequency * self.time(i)).sin() * scale;
            }
        }
        Ok(out)
    }

    fn fade_out(&self, samples: &mut [f32], fade_seconds: f32) {
        let fade = ((fade_seconds * self.sample_rate as f32) as usize).min(samples.len() / 2);
        if fade == 0 {
            return;
        }
        let start = samples.len() - fade;
        for (i, sample) in samples[start..].iter_mut().enumerate() {
            *sample *= 1.0 - i as f32 / fade as f32;
        }
    }
}

impl WaveformGenerator for Synth {
    fn generate(&mut self, request: &SoundRequest) -> Result<SampleData> {
        let frames = self.frame_count(request.duration)?;
        let (mut samples, fade) = match &request.instrument {
            Instrument::Kick => (self.kick(frames), KICK_FADE),
            Instrument::Snare => (self.snare(frames), SNARE_FADE),
            Instrument::HiHat => (self.hihat(frames), FADE),
            Instrument::Bass { frequency } => (self.bass(*frequency, frames), FADE),
            Instrument::Chord { frequencies } => (self.chord(frequencies, frames)?, FADE),
            Instrument::Tone { frequency } => (self.sine(*frequency, frames), FADE),
        };

        self.fade_out(&mut samples, fade);
        if request.gain != 1.0 {
            samples.iter_mut().for_each(|s| *s *= request.gain);
        }

        let data = SampleData::mono(samples);
        data.validate()?;
        Ok(data)
    }
}

/// Standard normal sample via Box-Muller.
fn gaussian(rng: &mut fastrand::Rng) -> f32 {
    let u1 = rng.f64().max(f64::MIN_POSITIVE);
    let u2 = rng.f64();
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}
