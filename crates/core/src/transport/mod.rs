//! Real-time playback.
//!
//! A [`Transport`] moves a [`Sequencer`] onto a dedicated thread and runs one
//! tick per tick interval. Ticks that take longer than their interval are
//! logged as overruns and the loop carries on without catching up, so drift
//! accumulates. A sink failure stops the loop and closes the sink.

mod sequencer;

pub use sequencer::{Sequencer, TickReport, TransportStats};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use tracing::{error, info};

use crate::{GrooveError, OutputSink, Result};

type Session = JoinHandle<(Sequencer, Result<()>)>;

/// Stopped/Running state machine around a sequencer.
pub struct Transport {
    sequencer: Option<Sequencer>,
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<TransportStats>>,
    session: Option<Session>,
}

impl Transport {
    pub fn new(sequencer: Sequencer) -> Self {
        let stats = sequencer.stats().clone();
        Self {
            sequencer: Some(sequencer),
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(stats)),
            session: None,
        }
    }

    /// Starts playback on a new thread. The sink is built and opened on that
    /// thread, so sinks that cannot cross threads (audio device streams)
    /// still work.
    pub fn start<F, S>(&mut self, make_sink: F) -> Result<()>
    where
        F: FnOnce() -> Result<S> + Send + 'static,
        S: OutputSink + 'static,
    {
        if self.session.is_some() {
            return Err(GrooveError::msg("transport is already running"));
        }
        let sequencer = self
            .sequencer
            .take()
            .ok_or_else(|| GrooveError::msg("transport lost its sequencer"))?;

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);
        let spawned = thread::Builder::new()
            .name("groove-transport".into())
            .spawn(move || run_session(sequencer, make_sink, running, stats));

        match spawned {
            Ok(handle) => {
                self.session = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Stops playback, waits for the current tick to finish and returns the
    /// session counters. A session that already ended on a sink failure
    /// reports that failure here. Stopping a stopped transport is a no-op.
    pub fn stop(&mut self) -> Result<TransportStats> {
        self.running.store(false, Ordering::Release);
        let Some(session) = self.session.take() else {
            return Ok(self.stats());
        };

        let (sequencer, outcome) = session
            .join()
            .map_err(|_| GrooveError::msg("transport thread panicked"))?;
        let stats = sequencer.stats().clone();
        self.sequencer = Some(sequencer);
        outcome?;

        info!(ticks = stats.ticks, overruns = stats.overruns, "transport stopped");
        Ok(stats)
    }

    /// True while the tick loop runs. Turns false on its own after a sink
    /// failure.
    pub fn is_playing(&self) -> bool {
        self.session.is_some() && self.running.load(Ordering::Acquire)
    }

    /// Counters as of the last completed tick.
    pub fn stats(&self) -> TransportStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    /// The sequencer, available while stopped.
    pub fn sequencer(&self) -> Option<&Sequencer> {
        self.sequencer.as_ref()
    }

    pub fn sequencer_mut(&mut self) -> Option<&mut Sequencer> {
        self.sequencer.as_mut()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!(error = %err, "transport ended with an error");
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("playing", &self.is_playing())
            .field("stats", &self.stats())
            .finish()
    }
}

fn run_session<F, S>(
    mut sequencer: Sequencer,
    make_sink: F,
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<TransportStats>>,
) -> (Sequencer, Result<()>)
where
    F: FnOnce() -> Result<S>,
    S: OutputSink,
{
    let outcome = drive(&mut sequencer, make_sink, &running, &stats);
    running.store(false, Ordering::Release);
    publish(&stats, &sequencer);
    if let Err(err) = &outcome {
        error!(error = %err, "transport stopped on error");
    }
    (sequencer, outcome)
}

fn drive<F, S>(
    sequencer: &mut Sequencer,
    make_sink: F,
    running: &AtomicBool,
    stats: &Mutex<TransportStats>,
) -> Result<()>
where
    F: FnOnce() -> Result<S>,
    S: OutputSink,
{
    let config = sequencer.config().clone();
    let interval = config.tick_interval();
    let mut sink = make_sink()?;
    sink.open(config.sample_rate, config.channels)?;
    info!(
        bpm = config.bpm,
        interval_ms = interval.as_secs_f64() * 1_000.0,
        frames_per_tick = sequencer.frames_per_tick(),
        "transport started"
    );

    while running.load(Ordering::Acquire) {
        let started = Instant::now();
        if let Err(err) = sequencer.tick(&mut sink) {
            sequencer::close_after_failure(&mut sink);
            return Err(err);
        }

        let elapsed = started.elapsed();
        match interval.checked_sub(elapsed) {
            Some(remaining) => thread::sleep(remaining),
            None => sequencer.record_overrun(elapsed - interval),
        }
        publish(stats, sequencer);
    }

    sink.close()
}

fn publish(stats: &Mutex<TransportStats>, sequencer: &Sequencer) {
    if let Ok(mut slot) = stats.lock() {
        slot.clone_from(sequencer.stats());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{EngineConfig, MemorySink, SceneComposer, Synth};

    /// 25 ms ticks.
    fn fast_grid() -> EngineConfig {
        EngineConfig {
            sample_rate: 8_000,
            bpm: 600.0,
            beats_per_bar: 4,
            subdivisions: 4,
            channels: 2,
        }
    }

    fn transport() -> Transport {
        let config = fast_grid();
        let synth = Synth::with_seed(config.sample_rate, 4);
        Transport::new(
            Sequencer::new(config, Box::new(synth), SceneComposer::with_seed(4)).unwrap(),
        )
    }

    fn wait_until_stopped(transport: &Transport) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while transport.is_playing() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn plays_until_stopped() {
        let mut transport = transport();
        let handle = MemorySink::new();
        let sink = handle.clone();

        assert!(!transport.is_playing());
        transport.start(move || Ok(sink)).unwrap();
        assert!(transport.is_playing());
        thread::sleep(Duration::from_millis(200));

        let stats = transport.stop().unwrap();
        assert!(!transport.is_playing());
        assert!(stats.ticks >= 2, "only {} ticks", stats.ticks);

        let recording = handle.recording().unwrap();
        assert!(recording.was_closed);
        assert_eq!(recording.sample_rate, 8_000);
        assert_eq!(recording.frames() as u64, stats.ticks * 200);
        assert_eq!(transport.stats(), stats);
    }

    #[test]
    fn device_failure_stops_the_loop() {
        let mut transport = transport();
        let handle = MemorySink::failing_after(2);
        let sink = handle.clone();

        transport.start(move || Ok(sink)).unwrap();
        wait_until_stopped(&transport);
        assert!(!transport.is_playing());

        let err = transport.stop().unwrap_err();
        assert!(err.is_fatal());
        assert!(handle.recording().unwrap().was_closed);
        assert_eq!(transport.stats().ticks, 2);
    }

    #[test]
    fn sink_construction_failure_is_reported() {
        let mut transport = transport();
        transport
            .start(|| -> Result<MemorySink> { Err(GrooveError::device("no device")) })
            .unwrap();
        wait_until_stopped(&transport);

        assert!(matches!(transport.stop(), Err(GrooveError::Device(_))));
        assert_eq!(transport.stats().ticks, 0);
    }

    #[test]
    fn restarts_where_it_stopped() {
        let mut transport = transport();
        let sink = MemorySink::new();
        let first = sink.clone();
        transport.start(move || Ok(first)).unwrap();
        thread::sleep(Duration::from_millis(80));
        let stopped = transport.stop().unwrap();

        let resumed_at = transport.sequencer().unwrap().position().tick;
        assert_eq!(resumed_at, stopped.ticks);

        transport.start(move || Ok(sink)).unwrap();
        thread::sleep(Duration::from_millis(80));
        let stats = transport.stop().unwrap();
        assert!(stats.ticks > stopped.ticks);
    }

    /// Takes longer to accept a tick than the tick lasts.
    struct SlowSink(MemorySink);

    impl OutputSink for SlowSink {
        fn open(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
            self.0.open(sample_rate, channels)
        }

        fn write(&mut self, frames: &[f32]) -> Result<()> {
            thread::sleep(Duration::from_millis(40));
            self.0.write(frames)
        }

        fn close(&mut self) -> Result<()> {
            self.0.close()
        }
    }

    #[test]
    fn slow_sink_overruns_without_catching_up() {
        let mut transport = transport();
        transport
            .start(|| Ok(SlowSink(MemorySink::new())))
            .unwrap();
        thread::sleep(Duration::from_millis(250));
        let stats = transport.stop().unwrap();

        assert!(stats.ticks >= 2, "only {} ticks", stats.ticks);
        assert_eq!(stats.overruns, stats.ticks);
        assert!(stats.total_drift >= Duration::from_millis(15) * stats.overruns as u32);
        assert!(stats.max_drift >= Duration::from_millis(15));
    }

    #[test]
    fn double_start_is_rejected() {
        let mut transport = transport();
        transport.start(|| Ok(MemorySink::new())).unwrap();
        assert!(transport.start(|| Ok(MemorySink::new())).is_err());
        transport.stop().unwrap();
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let mut transport = transport();
        let stats = transport.stop().unwrap();
        assert_eq!(stats.ticks, 0);
    }
}
