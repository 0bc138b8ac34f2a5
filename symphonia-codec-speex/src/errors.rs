use std::collections::TryReserveError;

use thiserror::Error;

/// Reasons a stream header is refused. Every one of them is fatal to the stream.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum HeaderError {
    #[error("malformed header: {0}")]
    Malformed(String),
    #[error("header framing truncated: segment of {declared} bytes, {available} available")]
    Truncated { declared: usize, available: usize },
    #[error("mode number {0} does not exist in this codec engine")]
    UnknownMode(i32),
    #[error("bit-stream version {0} is not supported by this decoder")]
    UnsupportedVersion(i32),
    #[error("stream encoded with a newer bit-stream version ({found} > {supported})")]
    NewerBitstream { found: i32, supported: i32 },
    #[error("stream encoded with an older bit-stream version ({found} < {supported})")]
    OlderBitstream { found: i32, supported: i32 },
    #[error("invalid number of channels (not between 1 and 5): {0}")]
    InvalidChannels(i32),
    #[error("frame size {found} does not match the mode's {expected}")]
    FrameSizeMismatch { found: i32, expected: i32 },
    #[error("invalid sample rate: {0}")]
    InvalidRate(i32),
    #[error("no valid header available")]
    Missing,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    #[error("header error: {0}")]
    Header(#[from] HeaderError),
    #[error("framing error: {0}")]
    Framing(String),
    #[error("decoding error: {0}")]
    CodecTransform(String),
    #[error("buffer allocation failed: {0}")]
    Allocation(String),
    #[error("invalid encoder configuration: {0}")]
    Config(String),
    #[error("codec engine error: {0}")]
    Engine(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<TryReserveError> for Error {
    fn from(err: TryReserveError) -> Self {
        Error::Allocation(err.to_string())
    }
}

impl From<Error> for symphonia_core::errors::Error {
    fn from(err: Error) -> Self {
        use symphonia_core::errors::Error as E;
        match err {
            Error::Header(_) => E::DecodeError("speex: invalid stream header"),
            Error::Framing(_) => E::DecodeError("speex: invalid packet framing"),
            Error::CodecTransform(_) => E::DecodeError("speex: corrupted stream"),
            Error::Allocation(_) => E::LimitError("speex: buffer allocation failed"),
            Error::Config(_) => E::Unsupported("speex: invalid encoder configuration"),
            Error::Engine(_) => E::Unsupported("speex: codec engine failure"),
        }
    }
}
