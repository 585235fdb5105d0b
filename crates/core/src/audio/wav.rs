use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use tracing::info;

use super::OutputSink;
use crate::{GrooveError, Result};

/// Writes the session to a 32-bit float WAV file, clipped to `[-1, 1]`.
pub struct WavSink {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    frames: u64,
    channels: u16,
}

impl WavSink {
    pub fn create(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
            frames: 0,
            channels: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for WavSink {
    fn open(&mut self, sample_rate: u32, channels: u16) -> Result<()> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer = hound::WavWriter::create(&self.path, spec).map_err(|err| {
            GrooveError::device(format!("cannot create {}: {err}", self.path.display()))
        })?;
        self.writer = Some(writer);
        self.channels = channels;
        self.frames = 0;
        Ok(())
    }

    fn write(&mut self, frames: &[f32]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| GrooveError::device("wav sink is not open"))?;
        for sample in frames {
            writer
                .write_sample(sample.clamp(-1.0, 1.0))
                .map_err(|err| GrooveError::device(format!("wav write failed: {err}")))?;
        }
        self.frames += (frames.len() / self.channels.max(1) as usize) as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|err| GrooveError::device(format!("wav finalize failed: {err}")))?;
            info!(path = %self.path.display(), frames = self.frames, "wrote wav file");
        }
        Ok(())
    }
}

impl std::fmt::Debug for WavSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavSink")
            .field("path", &self.path)
            .field("frames", &self.frames)
            .field("channels", &self.channels)
            .finish()
    }
}
