use std::time::Duration;

/// Result alias that carries the custom [`GrooveError`] type.
pub type Result<T> = std::result::Result<T, GrooveError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum GrooveError {
    /// The engine configuration cannot describe a playable grid.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The output sink failed to open, accept a write or close. Fatal for a
    /// running transport.
    #[error("audio device error: {0}")]
    Device(String),
    /// A waveform generator returned data that cannot be mixed.
    #[error("waveform generation failed: {0}")]
    Generation(String),
    /// A tick took longer than its interval.
    #[error("tick {tick} overran its interval by {late_by:?}")]
    SchedulingOverrun { tick: u64, late_by: Duration },
    /// Raised by trigger side effects. Only ever logged by the trigger pool.
    #[error("trigger side effect failed: {0}")]
    Trigger(String),
    /// Free-form failure for lifecycle misuse and worker panics.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl GrooveError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn device<T: Into<String>>(msg: T) -> Self {
        Self::Device(msg.into())
    }

    pub fn generation<T: Into<String>>(msg: T) -> Self {
        Self::Generation(msg.into())
    }

    /// Returns true for errors that must stop a running transport.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Device(_) | Self::Io(_))
    }
}

impl From<&str> for GrooveError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for GrooveError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
