use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ClockPosition;

mod composer;

pub use composer::{SceneComposer, SoundEvent};

/// Bar after which the composition leaves the ambient opening.
pub const ENERGETIC_AFTER_BAR: u32 = 3;

/// Rule sets the composer can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneId {
    /// Soft kick, constant hi-hats, major-7th pads and a sparse pentatonic
    /// melody.
    Ambient,
    /// Driving kick and snare, major triads and a busy melody.
    Energetic,
}

/// Guard evaluated against the clock for a scene transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    BarAbove(u32),
}

impl Guard {
    pub fn holds(&self, position: &ClockPosition) -> bool {
        match *self {
            Guard::BarAbove(bar) => position.bar > bar,
        }
    }
}

/// One edge of the scene state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SceneId,
    pub to: SceneId,
    pub guard: Guard,
}

/// The composition opens ambient and turns energetic for good. No edge
/// leads back.
pub const TRANSITIONS: &[Transition] = &[Transition {
    from: SceneId::Ambient,
    to: SceneId::Energetic,
    guard: Guard::BarAbove(ENERGETIC_AFTER_BAR),
}];

/// Scene a fresh session plays at `bar`.
pub fn select_scene(bar: u32) -> SceneId {
    if bar > ENERGETIC_AFTER_BAR {
        SceneId::Energetic
    } else {
        SceneId::Ambient
    }
}

/// Finite-state machine over a declared transition table.
#[derive(Debug, Clone)]
pub struct SceneMachine {
    state: SceneId,
    transitions: &'static [Transition],
}

impl Default for SceneMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneMachine {
    pub fn new() -> Self {
        Self::with_table(SceneId::Ambient, TRANSITIONS)
    }

    pub fn with_table(initial: SceneId, transitions: &'static [Transition]) -> Self {
        Self {
            state: initial,
            transitions,
        }
    }

    pub fn current(&self) -> SceneId {
        self.state
    }

    /// Applies the first matching transition for the current state and
    /// returns the scene to compose this tick.
    pub fn observe(&mut self, position: &ClockPosition) -> SceneId {
        if let Some(edge) = self
            .transitions
            .iter()
            .find(|edge| edge.from == self.state && edge.guard.holds(position))
        {
            info!(from = ?edge.from, to = ?edge.to, bar = position.bar, "scene transition");
            self.state = edge.to;
        }
        self.state
    }

    pub fn reset(&mut self) {
        self.state = SceneId::Ambient;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_bar(bar: u32) -> ClockPosition {
        ClockPosition {
            beat: bar * 8,
            bar,
            bar_ticks: 0,
            tick: 0,
            beats_per_bar: 8,
            subdivisions: 16,
        }
    }

    #[test]
    fn selects_by_bar() {
        for bar in 0..=3 {
            assert_eq!(select_scene(bar), SceneId::Ambient);
        }
        for bar in 4..16 {
            assert_eq!(select_scene(bar), SceneId::Energetic);
        }
    }

    #[test]
    fn fresh_machine_matches_selection() {
        for bar in 0..16 {
            let mut machine = SceneMachine::new();
            assert_eq!(machine.observe(&at_bar(bar)), select_scene(bar));
        }
    }

    #[test]
    fn transition_is_one_way() {
        let mut machine = SceneMachine::new();
        assert_eq!(machine.observe(&at_bar(3)), SceneId::Ambient);
        assert_eq!(machine.observe(&at_bar(4)), SceneId::Energetic);

        // The beat cycle wraps back to bar zero; the scene does not.
        assert_eq!(machine.observe(&at_bar(0)), SceneId::Energetic);
        assert_eq!(machine.current(), SceneId::Energetic);

        machine.reset();
        assert_eq!(machine.current(), SceneId::Ambient);
    }

    #[test]
    fn table_has_no_edge_out_of_energetic() {
        assert!(TRANSITIONS.iter().all(|edge| edge.from != SceneId::Energetic));
    }
}
