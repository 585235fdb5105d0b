//! Core library for the groovebox sequencer.
//!
//! A tick-driven engine that composes drums, bass, chords and melody for the
//! current scene, renders them with a small synth, mixes them into a rolling
//! buffer and streams one tick of audio at a time to an output sink. Sounds
//! flagged as triggers also fire a side effect on a worker pool when they
//! play.
//!
//! [`Sequencer`] runs ticks synchronously (offline rendering, tests) and
//! [`Transport`] paces it in real time on its own thread.

pub mod audio;
pub mod config;
pub mod error;
pub mod mix;
pub mod scene;
pub mod synth;
pub mod timeline;
pub mod transport;
pub mod trigger;

#[cfg(feature = "device")]
pub use audio::DeviceSink;
pub use audio::{MemorySink, OutputSink, Recording, WavSink};
pub use config::{AppConfig, EngineConfig, TriggerConfig};
pub use error::{GrooveError, Result};
pub use mix::MixBuffer;
pub use scene::{select_scene, SceneComposer, SceneId, SceneMachine, SoundEvent};
pub use synth::{Instrument, SampleData, SoundRequest, Synth, WaveformGenerator};
pub use timeline::{BeatClock, ClockPosition, DueSound, ScheduledSound, SoundScheduler, TickOffset};
pub use transport::{Sequencer, TickReport, Transport, TransportStats};
pub use trigger::{TriggerCounter, TriggerPool, TriggerSink};
