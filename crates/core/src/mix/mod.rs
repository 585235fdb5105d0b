use std::ops::Range;

use crate::{EngineConfig, GrooveError, Result, SampleData};

/// Fixed-capacity circular accumulator holding the frames that are about to
/// be played plus the lookahead window that scheduled sounds are mixed into.
///
/// Logical frame `0` is the next frame to be written to the output. Samples
/// are interleaved and never clamped; clipping belongs to the sink.
#[derive(Debug, Clone)]
pub struct MixBuffer {
    frames: usize,
    channels: usize,
    head: usize,
    data: Vec<f32>,
}

impl MixBuffer {
    pub fn new(frames: usize, channels: usize) -> Result<Self> {
        if frames == 0 || channels == 0 {
            return Err(GrooveError::config(format!(
                "mix buffer needs a positive size, got {frames} frames x {channels} channels"
            )));
        }
        Ok(Self {
            frames,
            channels,
            head: 0,
            data: vec![0.0; frames * channels],
        })
    }

    /// Sizes the buffer from the configured grid.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(config.buffer_length_frames(), config.channel_count())
    }

    pub fn len_frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Adds `samples` into the window starting `offset` frames from the
    /// front. Content past the end of the window is dropped. Returns the
    /// number of frames mixed.
    pub fn mix(&mut self, samples: &SampleData, offset: usize) -> usize {
        if offset >= self.frames {
            return 0;
        }

        let count = samples.frames().min(self.frames - offset);
        let source_channels = samples.channels();
        for i in 0..count {
            let base = self.physical(offset + i) * self.channels;
            for channel in 0..self.channels {
                // Mono broadcasts; wider sources wrap around their channels.
                let source = if source_channels == 1 {
                    0
                } else {
                    channel % source_channels
                };
                self.data[base + channel] += samples.sample(i, source);
            }
        }
        count
    }

    /// Retires `n` frames from the front of the window and zero-fills them
    /// so they re-enter at the back as silence.
    pub fn shift(&mut self, n: usize) {
        let n = n.min(self.frames);
        let (first, second) = self.segments(n);
        for range in [first, second] {
            let samples = self.sample_range(range);
            self.data[samples].fill(0.0);
        }
        self.head = (self.head + n) % self.frames;
    }

    /// Copies the first `n` frames (interleaved) into `out`, replacing its
    /// contents.
    pub fn read_into(&self, n: usize, out: &mut Vec<f32>) {
        let n = n.min(self.frames);
        out.clear();
        out.reserve(n * self.channels);
        let (first, second) = self.segments(n);
        for range in [first, second] {
            out.extend_from_slice(&self.data[self.sample_range(range)]);
        }
    }

    /// Interleaved samples of logical frame `index`.
    pub fn frame(&self, index: usize) -> &[f32] {
        let base = self.physical(index) * self.channels;
        &self.data[base..base + self.channels]
    }

    /// Largest absolute amplitude in the window.
    pub fn peak(&self) -> f32 {
        self.data.iter().fold(0.0_f32, |peak, s| peak.max(s.abs()))
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.head = 0;
    }

    fn physical(&self, frame: usize) -> usize {
        (self.head + frame) % self.frames
    }

    /// Physical frame ranges covering the first `n` logical frames.
    fn segments(&self, n: usize) -> (Range<usize>, Range<usize>) {
        let end = self.head + n;
        if end <= self.frames {
            (self.head..end, 0..0)
        } else {
            (self.head..self.frames, 0..end - self.frames)
        }
    }

    fn sample_range(&self, frames: Range<usize>) -> Range<usize> {
        frames.start * self.channels..frames.end * self.channels
    }
}
