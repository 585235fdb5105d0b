use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{GrooveError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub triggers: TriggerConfig,
    /// Seeds the scene composer. `None` draws a seed from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.triggers.validate()
    }
}

/// Musical grid and output format. Fixed once a sequencer is built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub bpm: f64,
    pub beats_per_bar: u32,
    pub subdivisions: u32,
    pub channels: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            bpm: 80.0,
            beats_per_bar: 8,
            subdivisions: 16,
            channels: 2,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(GrooveError::config("sample rate must be positive"));
        }
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(GrooveError::config(format!(
                "bpm must be a positive number, got {}",
                self.bpm
            )));
        }
        if self.beats_per_bar == 0 {
            return Err(GrooveError::config("beats per bar must be positive"));
        }
        if self.subdivisions == 0 {
            return Err(GrooveError::config("subdivisions must be positive"));
        }
        if self.channels == 0 {
            return Err(GrooveError::config("channel count must be positive"));
        }

        let frames_per_tick = self.frames_per_tick();
        if frames_per_tick == 0 {
            return Err(GrooveError::config(format!(
                "{} bpm with {} subdivisions leaves no frames per tick at {} Hz",
                self.bpm, self.subdivisions, self.sample_rate
            )));
        }
        if self.tick_frames().ceil() as usize > self.buffer_length_frames() {
            return Err(GrooveError::config(
                "mix window is shorter than a single tick",
            ));
        }

        Ok(())
    }

    /// Length of the mix window: `sample_rate * 60 / bpm * beats_per_bar / subdivisions`.
    pub fn buffer_length_frames(&self) -> usize {
        (self.sample_rate as f64 * 60.0 / self.bpm * self.beats_per_bar as f64
            / self.subdivisions as f64) as usize
    }

    /// Whole frames in a tick, rounded down. Ticks written to the sink carry
    /// the remainder; see [`EngineConfig::frames_in_tick`].
    pub fn frames_per_tick(&self) -> usize {
        self.tick_frames() as usize
    }

    /// Exact, fractional length of a tick in frames.
    pub fn tick_frames(&self) -> f64 {
        self.sample_rate as f64 * self.tick_seconds()
    }

    /// Frames the sink has received before tick `tick` starts.
    pub fn frames_before_tick(&self, tick: u64) -> u64 {
        (tick as f64 * self.tick_frames()).floor() as u64
    }

    /// Frames written by tick `tick`: `frames_per_tick` or one more, so the
    /// running total never falls behind the wall clock by a whole frame.
    pub fn frames_in_tick(&self, tick: u64) -> usize {
        (self.frames_before_tick(tick + 1) - self.frames_before_tick(tick)) as usize
    }

    pub fn tick_seconds(&self) -> f64 {
        60.0 / (self.bpm * self.subdivisions as f64)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.tick_seconds())
    }

    /// Number of ticks before `current_beat` wraps back to zero.
    pub fn cycle_length(&self) -> u32 {
        self.beats_per_bar * self.subdivisions
    }

    pub fn channel_count(&self) -> usize {
        self.channels as usize
    }
}

/// Sizing of the trigger worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub workers: usize,
    pub queue_depth: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_depth: 64,
        }
    }
}

impl TriggerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(GrooveError::config("trigger pool needs at least one worker"));
        }
        if self.queue_depth == 0 {
            return Err(GrooveError::config("trigger queue depth must be positive"));
        }
        Ok(())
    }
}
