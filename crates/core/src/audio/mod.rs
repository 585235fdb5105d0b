use std::sync::{Arc, Mutex, MutexGuard};

use crate::{GrooveError, Result};

#[cfg(feature = "device")]
mod device;
mod wav;

#[cfg(feature = "device")]
pub use device::DeviceSink;
pub use wav::WavSink;

/// Destination for mixed audio. Frames arrive interleaved, one tick's worth
/// per `write`, with unclamped amplitude; sinks clip as their format needs.
pub trait OutputSink {
    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<()>;
    fn write(&mut self, frames: &[f32]) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        (**self).open(sample_rate, channels)
    }

    fn write(&mut self, frames: &[f32]) -> Result<()> {
        (**self).write(frames)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Everything a [`MemorySink`] has received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
    pub writes: usize,
    pub is_open: bool,
    pub was_closed: bool,
}

impl Recording {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Sink that keeps every written sample in memory. Clones share the same
/// recording, so a handle can be inspected after the sink moved into the
/// transport thread.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    shared: Arc<Mutex<Recording>>,
    fail_after: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write after the first `writes` fail with a device error.
    pub fn failing_after(writes: usize) -> Self {
        Self {
            shared: Arc::default(),
            fail_after: Some(writes),
        }
    }

    /// Snapshot of what has been received so far.
    pub fn recording(&self) -> Result<Recording> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Recording>> {
        self.shared
            .lock()
            .map_err(|_| GrooveError::msg("memory sink has been poisoned"))
    }
}

impl OutputSink for MemorySink {
    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        let mut recording = self.lock()?;
        recording.sample_rate = sample_rate;
        recording.channels = channels;
        recording.is_open = true;
        recording.was_closed = false;
        Ok(())
    }

    fn write(&mut self, frames: &[f32]) -> Result<()> {
        let fail_after = self.fail_after;
        let mut recording = self.lock()?;
        if !recording.is_open {
            return Err(GrooveError::device("write to a sink that is not open"));
        }
        if fail_after.is_some_and(|limit| recording.writes >= limit) {
            return Err(GrooveError::device("simulated device failure"));
        }
        recording.samples.extend_from_slice(frames);
        recording.writes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut recording = self.lock()?;
        recording.is_open = false;
        recording.was_closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_writes_through_shared_handle() {
        let handle = MemorySink::new();
        let mut sink: Box<dyn OutputSink> = Box::new(handle.clone());

        sink.open(48_000, 2).unwrap();
        sink.write(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        sink.close().unwrap();

        let recording = handle.recording().unwrap();
        assert_eq!(recording.frames(), 2);
        assert_eq!(recording.writes, 1);
        assert!(recording.was_closed);
    }

    #[test]
    fn rejects_writes_before_open() {
        let mut sink = MemorySink::new();
        assert!(matches!(sink.write(&[0.0]), Err(GrooveError::Device(_))));
    }

    #[test]
    fn injected_failure_is_a_device_error() {
        let mut sink = MemorySink::failing_after(1);
        sink.open(8_000, 1).unwrap();

        sink.write(&[0.0]).unwrap();
        let err = sink.write(&[0.0]).unwrap_err();
        assert!(err.is_fatal());
    }
}
