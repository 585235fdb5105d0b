use serde::{Deserialize, Serialize};

use crate::EngineConfig;

mod scheduler;

pub use scheduler::{DueSound, ScheduledSound, SoundScheduler};

/// Snapshot of the beat clock taken at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockPosition {
    /// Tick index inside the beat cycle, always below
    /// `beats_per_bar * subdivisions`.
    pub beat: u32,
    /// `beat / beats_per_bar`.
    pub bar: u32,
    /// Bars played so far in units of `1 / subdivisions` bar.
    pub bar_ticks: u64,
    /// Ticks elapsed since the clock was created.
    pub tick: u64,
    pub beats_per_bar: u32,
    pub subdivisions: u32,
}

impl ClockPosition {
    pub fn bars_played(&self) -> f64 {
        self.bar_ticks as f64 / self.subdivisions as f64
    }

    pub fn beat_in_bar(&self) -> u32 {
        self.beat % self.beats_per_bar
    }

    pub fn is_bar_start(&self) -> bool {
        self.beat_in_bar() == 0
    }

    /// True when `bars_played` is an exact multiple of `bars`.
    pub fn bars_played_multiple_of(&self, bars: u64) -> bool {
        self.bar_ticks % (bars * self.subdivisions as u64) == 0
    }
}

/// Cyclic tick counter driving the sequencer.
#[derive(Debug, Clone)]
pub struct BeatClock {
    beats_per_bar: u32,
    subdivisions: u32,
    current_beat: u32,
    bar_ticks: u64,
    tick: u64,
}

impl BeatClock {
    pub fn new(beats_per_bar: u32, subdivisions: u32) -> Self {
        Self {
            beats_per_bar: beats_per_bar.max(1),
            subdivisions: subdivisions.max(1),
            current_beat: 0,
            bar_ticks: 0,
            tick: 0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.beats_per_bar, config.subdivisions)
    }

    pub fn cycle_length(&self) -> u32 {
        self.beats_per_bar * self.subdivisions
    }

    pub fn current_beat(&self) -> u32 {
        self.current_beat
    }

    /// Credits one subdivision of a bar and returns the position the tick
    /// should compose and play.
    pub fn begin_tick(&mut self) -> ClockPosition {
        self.bar_ticks += 1;
        self.position()
    }

    /// Moves to the next beat. Wrapping to beat zero credits one more whole
    /// bar.
    pub fn end_tick(&mut self) {
        self.current_beat = (self.current_beat + 1) % self.cycle_length();
        self.tick += 1;
        if self.current_beat == 0 {
            self.bar_ticks += self.subdivisions as u64;
        }
    }

    pub fn position(&self) -> ClockPosition {
        ClockPosition {
            beat: self.current_beat,
            bar: self.current_beat / self.beats_per_bar,
            bar_ticks: self.bar_ticks,
            tick: self.tick,
            beats_per_bar: self.beats_per_bar,
            subdivisions: self.subdivisions,
        }
    }

    pub fn reset(&mut self) {
        self.current_beat = 0;
        self.bar_ticks = 0;
        self.tick = 0;
    }
}

/// Start time of a sound relative to the current tick: whole ticks plus a
/// fraction of a tick that is played as a frame offset into the mix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickOffset {
    pub ticks: u32,
    pub fraction: f32,
}

impl TickOffset {
    pub const NOW: Self = Self {
        ticks: 0,
        fraction: 0.0,
    };

    pub fn ticks(ticks: u32) -> Self {
        Self {
            ticks,
            fraction: 0.0,
        }
    }

    /// Delays by a fraction of a tick. Values outside `[0, 1)` carry into
    /// whole ticks.
    pub fn swung(fraction: f32) -> Self {
        let fraction = fraction.max(0.0);
        Self {
            ticks: fraction.trunc() as u32,
            fraction: fraction.fract(),
        }
    }

    pub fn frame_offset(&self, frames_per_tick: usize) -> usize {
        (self.fraction * frames_per_tick as f32).round() as usize
    }
}
