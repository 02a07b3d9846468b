/// Result alias that carries the custom [`MuseError`] type.
pub type Result<T> = std::result::Result<T, MuseError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum MuseError {
    /// An export was requested while no audio track (or transport) is available.
    #[error("no audio track is loaded")]
    NoTrackLoaded,
    /// The external encoder binary could not be located or launched.
    #[error("encoder process unavailable: {0}")]
    EncoderProcessUnavailable(String),
    /// The encoder reported a failure while a session was running. Partial
    /// output on disk should be treated as invalid.
    #[error("encoder stream error: {0}")]
    EncoderStreamError(String),
    /// A second export was started while one is still active.
    #[error("an export session is already active")]
    ConcurrentExportRejected,
    /// The renderer could not produce a still image for a due frame.
    #[error("frame capture failed: {0}")]
    FrameCapture(String),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Wav(#[from] hound::Error),
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl MuseError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Returns `true` for failures raised by the external encoder, either at
    /// launch or mid-stream.
    pub fn is_encoder_failure(&self) -> bool {
        matches!(
            self,
            Self::EncoderProcessUnavailable(_) | Self::EncoderStreamError(_)
        )
    }
}

impl From<&str> for MuseError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MuseError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
