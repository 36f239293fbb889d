/// Result alias that carries the custom [`SoundclashError`] type.
pub type Result<T> = std::result::Result<T, SoundclashError>;

/// Common error type for the core crate.
///
/// Data-dependent conditions (silence, too little audio, unsupported PCM
/// encodings) never surface here; processors degrade to pass-through or
/// zero-confidence results instead. These variants cover configuration and
/// plumbing faults only.
#[derive(Debug, thiserror::Error)]
pub enum SoundclashError {
    /// Free-form message, mostly used for poisoned shared state.
    #[error("{0}")]
    Message(String),
    /// A caller handed in an argument the API cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed configuration document.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// The FFT backend rejected a buffer.
    #[error("fft failure: {0}")]
    Fft(#[from] realfft::FftError),
}

impl SoundclashError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for SoundclashError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SoundclashError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
