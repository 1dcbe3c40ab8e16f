//! Error handling for SensorVis-RS
//!
//! This module defines custom error types and a Result alias for use
//! throughout the crate.
//!
//! Errors fall into four groups:
//!
//! - **Configuration** errors are fatal at stream creation (bad framing parameters,
//!   unknown CRC presets, duplicate stream names).
//! - **Frame** errors are transient: the offending frame is dropped and the
//!   dispatch loop moves on.
//! - **Preprocessor** failures drop that tick's data for the stream.
//! - **Transport** errors are surfaced to the stream owner; the stream is not
//!   reconnected by this crate.

use thiserror::Error;

/// Reasons a single frame is discarded after it was carved out of the stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame (or preprocessor output) is not valid UTF-8
    #[error("frame is not valid UTF-8")]
    NonUtf8,

    /// The text contains no `{...}` group
    #[error("no brace-delimited record in frame")]
    MalformedRecord,

    /// A `b"..."` field did not hold valid base64
    #[error("field '{field}' holds invalid base64 data")]
    InvalidBinaryField { field: String },
}

/// Main error type for SensorVis-RS operations
#[derive(Error, Debug)]
pub enum SensorVisError {
    /// Invalid framing parameters, unknown presets, unreadable config files
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stream with this name is already registered
    #[error("Duplicate stream name: {0}")]
    DuplicateStream(String),

    /// A variable with this (field, stream) key is already registered
    #[error("Duplicate variable: {0}")]
    DuplicateVariable(String),

    /// A frame was dropped after extraction
    #[error("Frame dropped: {0}")]
    Frame(#[from] FrameError),

    /// The external preprocessor failed for this frame
    #[error("Preprocessor error: {0}")]
    Preprocessor(String),

    /// The byte source of a stream failed
    #[error("Transport error on stream '{stream}': {message}")]
    Transport { stream: String, message: String },

    /// Errors related to Rhai script execution
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SensorVisError>,
    },
}

impl SensorVisError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SensorVisError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        SensorVisError::Script(err.to_string())
    }

    /// Create a transport error for the named stream
    pub fn transport(stream: impl Into<String>, message: impl Into<String>) -> Self {
        SensorVisError::Transport {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Whether the dispatch loop should simply drop the frame and continue
    ///
    /// Frame, preprocessor and script failures only cost the current frame.
    /// Everything else is either fatal at startup or faults the stream.
    pub fn is_transient(&self) -> bool {
        match self {
            SensorVisError::Frame(_)
            | SensorVisError::Preprocessor(_)
            | SensorVisError::Script(_) => true,
            SensorVisError::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Whether this error came from the stream's byte source
    pub fn is_transport(&self) -> bool {
        match self {
            SensorVisError::Transport { .. } => true,
            SensorVisError::WithContext { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}

/// Result type alias for SensorVis-RS operations
pub type Result<T> = std::result::Result<T, SensorVisError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| SensorVisError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| SensorVisError::from_rhai_error(e).with_context(f()))
    }
}
