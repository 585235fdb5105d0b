use std::collections::VecDeque;

use tracing::debug;

use crate::{EngineConfig, SampleData};

/// A generated sound waiting for its beat.
#[derive(Debug, Clone)]
pub struct ScheduledSound {
    pub samples: SampleData,
    pub start_beat: u32,
    /// Frames into the start beat's tick where the sound begins.
    pub offset_frames: usize,
    pub duration_beats: u32,
    pub is_trigger: bool,
    played: bool,
    enqueued_at: u64,
}

impl ScheduledSound {
    pub fn new(samples: SampleData, start_beat: u32, duration_beats: u32, is_trigger: bool) -> Self {
        Self {
            samples,
            start_beat,
            offset_frames: 0,
            duration_beats,
            is_trigger,
            played: false,
            enqueued_at: 0,
        }
    }

    pub fn with_offset(mut self, offset_frames: usize) -> Self {
        self.offset_frames = offset_frames;
        self
    }

    pub fn is_played(&self) -> bool {
        self.played
    }
}

/// A sound whose beat has arrived, ready to be mixed.
#[derive(Debug, Clone)]
pub struct DueSound {
    pub samples: SampleData,
    pub offset_frames: usize,
    pub is_trigger: bool,
}

/// Insertion-ordered queue of scheduled sounds with bounded retention.
///
/// Only touched from the tick thread. `enqueue` and `advance` are linear in
/// the queue length, which [`SoundScheduler::retire`] keeps bounded.
#[derive(Debug)]
pub struct SoundScheduler {
    entries: VecDeque<ScheduledSound>,
    elapsed: u64,
    played_retention: u64,
    pending_retention: u64,
}

impl SoundScheduler {
    /// Played entries are kept for `played_retention` ticks, entries that
    /// never matched their beat for `pending_retention` ticks.
    pub fn new(played_retention: u64, pending_retention: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            elapsed: 0,
            played_retention: played_retention.max(1),
            pending_retention: pending_retention.max(1),
        }
    }

    /// Keeps played sounds for one mix window and pending ones for one beat
    /// cycle, after which their beat has come and gone.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.beats_per_bar as u64, config.cycle_length() as u64)
    }

    /// Appends a sound. Duplicates are allowed and all of them play.
    pub fn enqueue(&mut self, mut sound: ScheduledSound) {
        sound.played = false;
        sound.enqueued_at = self.elapsed;
        self.entries.push_back(sound);
    }

    /// Marks every unplayed entry for `current_beat` as played and returns
    /// them in insertion order. Calling again for the same beat returns
    /// nothing new. Callers signal triggers for the returned sounds.
    pub fn advance(&mut self, current_beat: u32) -> Vec<DueSound> {
        self.entries
            .iter_mut()
            .filter(|entry| entry.start_beat == current_beat && !entry.played)
            .map(|entry| {
                entry.played = true;
                DueSound {
                    samples: entry.samples.clone(),
                    offset_frames: entry.offset_frames,
                    is_trigger: entry.is_trigger,
                }
            })
            .collect()
    }

    /// Ends the current tick and evicts stale entries. Returns how many
    /// evicted entries never played.
    pub fn retire(&mut self) -> usize {
        self.elapsed += 1;
        let elapsed = self.elapsed;
        let played_retention = self.played_retention;
        let pending_retention = self.pending_retention;

        let mut missed = 0;
        self.entries.retain(|entry| {
            let age = elapsed - entry.enqueued_at;
            if entry.played {
                age < played_retention
            } else if age >= pending_retention {
                missed += 1;
                false
            } else {
                true
            }
        });

        if missed > 0 {
            debug!(missed, "evicted sounds that never reached their beat");
        }
        missed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries still waiting for their beat.
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.played).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sound(value: f32, beat: u32) -> ScheduledSound {
        ScheduledSound::new(SampleData::mono(vec![value]), beat, 1, false)
    }

    #[test]
    fn fires_exactly_once_per_beat() {
        let mut scheduler = SoundScheduler::new(8, 64);
        scheduler.enqueue(sound(1.0, 3));

        assert!(scheduler.advance(2).is_empty());
        assert_eq!(scheduler.advance(3).len(), 1);
        assert!(scheduler.advance(3).is_empty());
        assert!(scheduler.advance(3).is_empty());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn keeps_insertion_order_and_duplicates() {
        let mut scheduler = SoundScheduler::new(8, 64);
        scheduler.enqueue(sound(1.0, 0));
        scheduler.enqueue(sound(2.0, 1));
        scheduler.enqueue(sound(3.0, 0));
        scheduler.enqueue(sound(3.0, 0));

        let due: Vec<f32> = scheduler
            .advance(0)
            .iter()
            .map(|due| due.samples.samples()[0])
            .collect();
        assert_eq!(due, vec![1.0, 3.0, 3.0]);
    }

    #[test]
    fn carries_offset_and_trigger_flag() {
        let mut scheduler = SoundScheduler::new(8, 64);
        scheduler.enqueue(
            ScheduledSound::new(SampleData::mono(vec![0.5]), 4, 2, true).with_offset(120),
        );

        let due = scheduler.advance(4);
        assert_eq!(due[0].offset_frames, 120);
        assert!(due[0].is_trigger);
    }

    #[test]
    fn evicts_played_entries_after_one_window() {
        let mut scheduler = SoundScheduler::new(2, 64);
        scheduler.enqueue(sound(1.0, 0));
        scheduler.advance(0);

        scheduler.retire();
        assert_eq!(scheduler.len(), 1);
        scheduler.retire();
        assert!(scheduler.is_empty());
    }

    #[test]
    fn evicts_entries_whose_beat_passed() {
        let mut scheduler = SoundScheduler::new(2, 4);
        scheduler.enqueue(sound(1.0, 99));

        let missed: usize = (0..4).map(|_| scheduler.retire()).sum();
        assert_eq!(missed, 1);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn queue_stays_bounded_under_steady_load() {
        let mut scheduler = SoundScheduler::new(8, 128);
        for tick in 0..10_000u32 {
            let beat = tick % 128;
            scheduler.enqueue(sound(0.1, beat));
            scheduler.enqueue(sound(0.1, beat));
            scheduler.advance(beat);
            scheduler.retire();
        }
        assert!(scheduler.len() <= 16);
    }
}
