use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    AppConfig, BeatClock, ClockPosition, EngineConfig, GrooveError, MixBuffer, OutputSink, Result,
    SceneComposer, SceneId, SceneMachine, ScheduledSound, SoundEvent, SoundScheduler, Synth,
    TriggerPool, TriggerSink, WaveformGenerator,
};

/// Counters accumulated over a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransportStats {
    pub ticks: u64,
    pub events_scheduled: u64,
    pub events_played: u64,
    /// Scheduled sounds evicted before their beat came round.
    pub events_missed: u64,
    pub generation_failures: u64,
    pub triggers_fired: u64,
    pub triggers_dropped: u64,
    pub overruns: u64,
    /// Sum of the time by which overrunning ticks exceeded their interval.
    /// Never compensated; every overrun shortens the following interval.
    pub total_drift: Duration,
    pub max_drift: Duration,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub position: ClockPosition,
    pub scene: SceneId,
    pub scheduled: usize,
    pub played: usize,
    pub triggers: usize,
}

/// Owns every piece of per-session state and advances it one tick at a
/// time. The real-time loop in [`crate::Transport`] adds pacing on top; on
/// its own the sequencer can render as fast as the sink accepts audio.
pub struct Sequencer {
    config: EngineConfig,
    frames_per_tick: usize,
    clock: BeatClock,
    scenes: SceneMachine,
    composer: SceneComposer,
    scheduler: SoundScheduler,
    buffer: MixBuffer,
    generator: Box<dyn WaveformGenerator>,
    triggers: Option<TriggerPool>,
    stats: TransportStats,
    output: Vec<f32>,
    staged: Option<TickReport>,
}

impl Sequencer {
    pub fn new(
        config: EngineConfig,
        generator: Box<dyn WaveformGenerator>,
        composer: SceneComposer,
    ) -> Result<Self> {
        config.validate()?;
        let frames_per_tick = config.frames_per_tick();
        Ok(Self {
            frames_per_tick,
            clock: BeatClock::from_config(&config),
            scenes: SceneMachine::new(),
            composer,
            scheduler: SoundScheduler::from_config(&config),
            buffer: MixBuffer::from_config(&config)?,
            generator,
            triggers: None,
            stats: TransportStats::default(),
            output: Vec::with_capacity((frames_per_tick + 1) * config.channel_count()),
            staged: None,
            config,
        })
    }

    /// Builds the bundled synth, a composer seeded from `config.seed` and,
    /// when a side effect is given, a trigger pool.
    pub fn from_app_config(
        config: &AppConfig,
        trigger: Option<Arc<dyn TriggerSink>>,
    ) -> Result<Self> {
        config.validate()?;
        let sample_rate = config.engine.sample_rate;
        let (synth, composer) = match config.seed {
            Some(seed) => (
                Synth::with_seed(sample_rate, seed),
                SceneComposer::with_seed(seed),
            ),
            None => (Synth::new(sample_rate), SceneComposer::new()),
        };

        let sequencer = Self::new(config.engine.clone(), Box::new(synth), composer)?;
        match trigger {
            Some(sink) => Ok(sequencer.with_triggers(TriggerPool::new(sink, &config.triggers)?)),
            None => Ok(sequencer),
        }
    }

    pub fn with_triggers(mut self, pool: TriggerPool) -> Self {
        self.triggers = Some(pool);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whole frames in a tick. Individual ticks write this or one frame
    /// more; see [`EngineConfig::frames_in_tick`].
    pub fn frames_per_tick(&self) -> usize {
        self.frames_per_tick
    }

    /// Position the next tick will play.
    pub fn position(&self) -> ClockPosition {
        self.clock.position()
    }

    pub fn scene(&self) -> SceneId {
        self.scenes.current()
    }

    pub fn scheduler(&self) -> &SoundScheduler {
        &self.scheduler
    }

    pub fn buffer(&self) -> &MixBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Runs one tick: advance the clock, compose and schedule this beat's
    /// sounds, mix whatever is due, write one tick of frames and shift the
    /// mix window. Only a sink failure is returned as an error.
    ///
    /// A failed write leaves the tick staged. The next call retries the write
    /// of the same frames without composing or firing triggers again, so the
    /// clock and queue never hold a half-applied tick.
    pub fn tick<S: OutputSink + ?Sized>(&mut self, sink: &mut S) -> Result<TickReport> {
        let report = match self.staged.take() {
            Some(report) => {
                debug!(beat = report.position.beat, "retrying staged tick");
                report
            }
            None => self.prepare(),
        };

        if let Err(err) = sink.write(&self.output) {
            self.staged = Some(report);
            return Err(err);
        }

        let frames = self.config.frames_in_tick(report.position.tick);
        self.clock.end_tick();
        self.buffer.shift(frames);
        self.stats.events_missed += self.scheduler.retire() as u64;
        self.stats.ticks += 1;
        Ok(report)
    }

    /// True when a tick has been mixed but its write failed.
    pub fn has_staged_tick(&self) -> bool {
        self.staged.is_some()
    }

    fn prepare(&mut self) -> TickReport {
        let position = self.clock.begin_tick();
        let scene = self.scenes.observe(&position);
        debug!(
            beat = position.beat,
            bar = position.bar,
            downbeat = position.beat % 4 == 0,
            ?scene,
            "tick"
        );

        let events = self.composer.compose(scene, &position);
        let scheduled = events
            .into_iter()
            .filter(|event| self.schedule(event, &position))
            .count();

        let due = self.scheduler.advance(position.beat);
        let played = due.len();
        let mut triggers = 0;
        for sound in &due {
            self.buffer.mix(&sound.samples, sound.offset_frames);
            if sound.is_trigger {
                triggers += 1;
                self.fire_trigger();
            }
        }
        self.stats.events_played += played as u64;

        let frames = self.config.frames_in_tick(position.tick);
        self.buffer.read_into(frames, &mut self.output);

        TickReport {
            position,
            scene,
            scheduled,
            played,
            triggers,
        }
    }

    /// Opens `sink`, runs `ticks` ticks back to back and closes it. A sink
    /// failure closes the sink before the error is returned.
    pub fn render<S: OutputSink + ?Sized>(&mut self, ticks: u64, sink: &mut S) -> Result<&TransportStats> {
        sink.open(self.config.sample_rate, self.config.channels)?;
        for _ in 0..ticks {
            if let Err(err) = self.tick(sink) {
                close_after_failure(sink);
                return Err(err);
            }
        }
        sink.close()?;
        Ok(&self.stats)
    }

    /// Records a tick that took `late_by` longer than its interval.
    pub fn record_overrun(&mut self, late_by: Duration) {
        let overrun = GrooveError::SchedulingOverrun {
            tick: self.stats.ticks,
            late_by,
        };
        warn!(%overrun, "tick overran");
        self.stats.overruns += 1;
        self.stats.total_drift += late_by;
        self.stats.max_drift = self.stats.max_drift.max(late_by);
    }

    /// Waits for queued trigger side effects to finish and stops the
    /// trigger workers. Later triggers are dropped.
    pub fn finish_triggers(&mut self) {
        if let Some(pool) = self.triggers.as_mut() {
            pool.shutdown();
        }
    }

    fn schedule(&mut self, event: &SoundEvent, position: &ClockPosition) -> bool {
        let generated = self
            .generator
            .generate(&event.request)
            .and_then(|samples| samples.validate().map(|()| samples));

        match generated {
            Ok(samples) => {
                let start_beat = (position.beat + event.start.ticks) % self.clock.cycle_length();
                let offset = event.start.frame_offset(self.frames_per_tick);
                self.scheduler.enqueue(
                    ScheduledSound::new(samples, start_beat, event.duration_beats, event.is_trigger)
                        .with_offset(offset),
                );
                self.stats.events_scheduled += 1;
                true
            }
            Err(err) => {
                self.stats.generation_failures += 1;
                warn!(
                    error = %err,
                    instrument = ?event.request.instrument,
                    beat = position.beat,
                    "skipping sound"
                );
                false
            }
        }
    }

    fn fire_trigger(&mut self) {
        let Some(pool) = &self.triggers else {
            return;
        };
        if pool.fire() {
            self.stats.triggers_fired += 1;
        } else {
            self.stats.triggers_dropped += 1;
        }
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("config", &self.config)
            .field("position", &self.clock.position())
            .field("scene", &self.scenes.current())
            .field("queued", &self.scheduler.len())
            .field("staged", &self.staged.is_some())
            .field("triggers", &self.triggers)
            .field("stats", &self.stats)
            .finish()
    }
}

pub(crate) fn close_after_failure<S: OutputSink + ?Sized>(sink: &mut S) {
    if let Err(err) = sink.close() {
        warn!(error = %err, "failed to close sink after error");
    }
}
