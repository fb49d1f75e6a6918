use thiserror::Error;

/// Reasons a single frame could not be parsed.
///
/// A parse failure is local to one frame: the connection logs it and keeps
/// reading, so these errors never carry I/O state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameParseError {
    #[error("Empty frame: no command line")]
    EmptyFrame,

    #[error("Missing blank line after headers")]
    MissingHeaderTerminator,

    #[error("Malformed header line: {line:?}")]
    MalformedHeader { line: String },

    #[error("Invalid UTF-8 in frame head: {message}")]
    InvalidUtf8 { message: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Wire errors
    #[error("Frame parse error: {0}")]
    FrameParse(#[from] FrameParseError),

    #[error("Frame too large: {size} bytes exceeds maximum of {max_size}")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("Invalid heart-beat header: {0}")]
    InvalidHeartBeat(String),

    // Payload errors
    #[error("Invalid payload on {destination}: {message}")]
    InvalidPayload {
        destination: String,
        message: String,
    },
}

impl Error {
    /// Create an invalid payload error for a destination.
    pub fn invalid_payload(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            destination: destination.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
