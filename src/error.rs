use std::io;

/// Errors produced by the Ogg/Opus framing layer.
///
/// All faults are deterministic for a given input: nothing here is retried.
#[derive(thiserror::Error, Debug, Clone)]
pub enum VoiceError {
    #[error("I/O error ({kind:?}): {message}")]
    Io {
        kind: io::ErrorKind,
        message: String,
    },
    /// The byte stream violates the Ogg or Opus wire format.
    #[error("format error: {0}")]
    Format(String),
    /// The source is well-formed but incompatible with voice framing
    /// (wrong sample rate, frames that do not divide 60 ms windows, ...).
    #[error("incompatible source: {0}")]
    Configuration(String),
    /// The Opus codec collaborator reported a failure; carries its own
    /// diagnostic text.
    #[error("Opus encoder error: {0}")]
    Encoder(String),
    #[error("internal channel closed unexpectedly")]
    ChannelClosed,
    #[error("{role} task failed: {details}")]
    TaskJoin { role: &'static str, details: String },
}

impl From<io::Error> for VoiceError {
    fn from(err: io::Error) -> Self {
        VoiceError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<opus::Error> for VoiceError {
    fn from(err: opus::Error) -> Self {
        VoiceError::Encoder(err.to_string())
    }
}
