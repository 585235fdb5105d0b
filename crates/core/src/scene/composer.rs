use crate::{ClockPosition, SoundRequest, TickOffset};

use super::SceneId;

/// C, D, E and F major.
const MAJOR_TRIADS: [[f32; 3]; 4] = [
    [261.63, 329.63, 392.00],
    [293.66, 349.23, 440.00],
    [329.63, 415.30, 493.88],
    [349.23, 440.00, 523.25],
];

/// Cmaj7, Am7, Emaj7, Fmaj7 and Gmaj7.
const SEVENTH_CHORDS: [[f32; 4]; 5] = [
    [261.63, 329.63, 392.00, 523.25],
    [220.00, 261.63, 329.63, 392.00],
    [329.63, 415.30, 493.88, 659.26],
    [349.23, 440.00, 523.25, 698.46],
    [392.00, 493.88, 587.33, 739.99],
];

/// Swing delay in ticks for off-grid bass and snare hits.
const SWING: f32 = 0.2;

const ENERGETIC_MELODY_CHANCE: f64 = 0.5;
const AMBIENT_MELODY_CHANCE: f64 = 0.3;
const ESCALATION_CHANCE: f64 = 0.8;
const AMBIENT_SNARE_CHANCE: f64 = 0.6;
/// Escalation happens whenever `bars_played` is a multiple of this.
const ESCALATION_BARS: u64 = 4;

/// A sound the composer wants scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundEvent {
    pub request: SoundRequest,
    /// When to play, relative to the tick being composed.
    pub start: TickOffset,
    pub duration_beats: u32,
    pub is_trigger: bool,
}

impl SoundEvent {
    fn now(request: SoundRequest) -> Self {
        Self {
            request,
            start: TickOffset::NOW,
            duration_beats: 1,
            is_trigger: false,
        }
    }

    fn at(mut self, start: TickOffset) -> Self {
        self.start = start;
        self
    }

    fn lasting(mut self, beats: u32) -> Self {
        self.duration_beats = beats;
        self
    }

    fn trigger(mut self) -> Self {
        self.is_trigger = true;
        self
    }
}

/// Decides per tick which sounds each scene plays.
#[derive(Debug, Clone)]
pub struct SceneComposer {
    rng: fastrand::Rng,
}

impl Default for SceneComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneComposer {
    pub fn new() -> Self {
        Self {
            rng: fastrand::Rng::new(),
        }
    }

    /// Every random choice is reproducible for a given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    pub fn compose(&mut self, scene: SceneId, position: &ClockPosition) -> Vec<SoundEvent> {
        match scene {
            SceneId::Energetic => self.energetic(position),
            SceneId::Ambient => self.ambient(position),
        }
    }

    fn energetic(&mut self, position: &ClockPosition) -> Vec<SoundEvent> {
        let mut events = Vec::new();
        let chord = MAJOR_TRIADS[position.bar as usize % MAJOR_TRIADS.len()];

        if position.is_bar_start() {
            events.push(SoundEvent::now(SoundRequest::kick(0.5)));
        }

        if matches!(position.beat_in_bar(), 1 | 3) {
            events.push(SoundEvent::now(SoundRequest::snare(0.5)).trigger());
        }

        if position.is_bar_start() {
            events.push(
                SoundEvent::now(SoundRequest::chord(&chord, 1.0))
                    .lasting(position.beats_per_bar)
                    .trigger(),
            );
        }

        events.push(SoundEvent::now(SoundRequest::bass(chord[0] / 2.0, 0.5)));

        if self.chance(ENERGETIC_MELODY_CHANCE) {
            let note = self.pick(&chord);
            events.push(SoundEvent::now(SoundRequest::tone(note, 0.5)).trigger());
        }

        events
    }

    fn ambient(&mut self, position: &ClockPosition) -> Vec<SoundEvent> {
        let mut events = Vec::new();
        let chord = SEVENTH_CHORDS[position.bar as usize % SEVENTH_CHORDS.len()];
        let swing = TickOffset::swung(SWING);

        if position.is_bar_start() {
            events.push(SoundEvent::now(SoundRequest::kick(0.3)));
        }

        events.push(SoundEvent::now(SoundRequest::hihat(0.2).with_gain(0.2)));

        if position.is_bar_start() {
            events.push(
                SoundEvent::now(SoundRequest::chord(&chord, 0.8))
                    .lasting(position.beats_per_bar)
                    .trigger(),
            );
        }

        if position.beat % 2 == 0 {
            events.push(SoundEvent::now(SoundRequest::bass(chord[0] / 2.0, 0.3)).at(swing));
        }

        let pentatonic = [chord[0], chord[1], chord[2], chord[0] * 2.0, chord[1] * 2.0];
        if self.chance(AMBIENT_MELODY_CHANCE) {
            let note = self.pick(&pentatonic);
            events.push(SoundEvent::now(SoundRequest::tone(note, 0.5)).trigger());
        }

        if position.bars_played_multiple_of(ESCALATION_BARS) {
            let high = pentatonic.map(|note| note * 4.0);
            if self.chance(ESCALATION_CHANCE) {
                let note = self.pick(&high);
                events.push(
                    SoundEvent::now(SoundRequest::tone(note, 0.5).with_gain(0.3)).trigger(),
                );
            }
        } else if position.is_bar_start() && self.chance(AMBIENT_SNARE_CHANCE) {
            let start = if position.beat % 2 == 0 {
                swing
            } else {
                TickOffset::NOW
            };
            events.push(SoundEvent::now(SoundRequest::snare(0.3).with_gain(1.4)).at(start));
        }

        events
    }

    fn chance(&mut self, probability: f64) -> bool {
        self.rng.f64() < probability
    }

    fn pick(&mut self, notes: &[f32]) -> f32 {
        notes[self.rng.usize(..notes.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BeatClock, Instrument};

    fn positions(ticks: usize) -> Vec<ClockPosition> {
        let mut clock = BeatClock::new(8, 16);
        (0..ticks)
            .map(|_| {
                let position = clock.begin_tick();
                clock.end_tick();
                position
            })
            .collect()
    }

    fn count(events: &[SoundEvent], test: impl Fn(&Instrument) -> bool) -> usize {
        events.iter().filter(|event| test(&event.request.instrument)).count()
    }

    #[test]
    fn energetic_bar_start_has_kick_and_trigger_chord() {
        let mut composer = SceneComposer::with_seed(5);
        let start = positions(1)[0];
        let events = composer.compose(SceneId::Energetic, &start);

        assert_eq!(count(&events, |i| matches!(i, Instrument::Kick)), 1);
        let chord = events
            .iter()
            .find(|event| matches!(event.request.instrument, Instrument::Chord { .. }))
            .unwrap();
        assert!(chord.is_trigger);
        assert_eq!(chord.duration_beats, 8);
    }

    #[test]
    fn energetic_snare_on_beats_one_and_three() {
        let mut composer = SceneComposer::with_seed(5);
        for position in positions(16) {
            let events = composer.compose(SceneId::Energetic, &position);
            let snares: Vec<_> = events
                .iter()
                .filter(|event| matches!(event.request.instrument, Instrument::Snare))
                .collect();

            if matches!(position.beat_in_bar(), 1 | 3) {
                assert_eq!(snares.len(), 1);
                assert!(snares[0].is_trigger);
            } else {
                assert!(snares.is_empty());
            }
        }
    }

    #[test]
    fn energetic_bass_follows_chord_root() {
        let mut composer = SceneComposer::with_seed(9);
        for position in positions(40) {
            let events = composer.compose(SceneId::Energetic, &position);
            let root = MAJOR_TRIADS[position.bar as usize % 4][0];
            let bass = events
                .iter()
                .find_map(|event| match event.request.instrument {
                    Instrument::Bass { frequency } => Some(frequency),
                    _ => None,
                })
                .unwrap();
            assert_eq!(bass, root / 2.0);
        }
    }

    #[test]
    fn ambient_hats_every_tick_and_swung_bass() {
        let mut composer = SceneComposer::with_seed(11);
        for position in positions(32) {
            let events = composer.compose(SceneId::Ambient, &position);
            assert_eq!(count(&events, |i| matches!(i, Instrument::HiHat)), 1);

            let bass: Vec<_> = events
                .iter()
                .filter(|event| matches!(event.request.instrument, Instrument::Bass { .. }))
                .collect();
            if position.beat % 2 == 0 {
                assert_eq!(bass.len(), 1);
                assert!(bass[0].start.fraction > 0.0);
            } else {
                assert!(bass.is_empty());
            }
        }
    }

    #[test]
    fn ambient_escalation_uses_high_notes() {
        let mut composer = SceneComposer::with_seed(3);
        let mut escalated = 0;
        for position in positions(512) {
            if !position.bars_played_multiple_of(ESCALATION_BARS) {
                continue;
            }
            let events = composer.compose(SceneId::Ambient, &position);
            for event in &events {
                if let Instrument::Tone { frequency } = event.request.instrument {
                    if event.request.gain < 1.0 {
                        assert!(frequency >= 220.0 * 4.0);
                        escalated += 1;
                    }
                }
            }
            assert_eq!(count(&events, |i| matches!(i, Instrument::Snare)), 0);
        }
        assert!(escalated > 0);
    }

    #[test]
    fn melody_probability_matches_scene() {
        let mut composer = SceneComposer::with_seed(21);
        let position = positions(3)[2];
        let runs = 4_000;
        let melodies: usize = (0..runs)
            .map(|_| {
                let events = composer.compose(SceneId::Energetic, &position);
                count(&events, |i| matches!(i, Instrument::Tone { .. }))
            })
            .sum();

        let ratio = melodies as f64 / runs as f64;
        assert!((ratio - 0.5).abs() < 0.05, "melody ratio {ratio}");
    }

    #[test]
    fn seeded_melody_is_reproducible() {
        let melody = |seed| {
            let mut composer = SceneComposer::with_seed(seed);
            positions(256)
                .iter()
                .flat_map(|position| composer.compose(SceneId::Energetic, position))
                .filter_map(|event| match event.request.instrument {
                    Instrument::Tone { frequency } => Some(frequency),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };

        let first = melody(1234);
        assert!(!first.is_empty());
        assert_eq!(first, melody(1234));
    }
}
