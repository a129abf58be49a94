//! Newline framing for the child's output streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length. Unlike
//! a bare `LinesCodec`, an oversized line is not an error: it is discarded
//! with a warning and framing resumes after the next `\n`, so one runaway
//! line never ends the stream.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use mcp_relay::bridge::codec::LineCodec;
//!
//! let lines = FramedRead::new(child_stdout, LineCodec::new());
//! ```

use std::io::ErrorKind;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum accepted output line length: 16 MiB.
pub const MAX_LINE_BYTES: usize = 16 * 1_048_576;

/// Line framer for child stdout/stderr.
///
/// Each `\n`-terminated UTF-8 string is one item, without the terminator (a
/// trailing `\r` is stripped too). Incomplete trailing bytes stay buffered
/// until more data arrives; on EOF the remainder is yielded as a final line.
#[derive(Debug)]
pub struct LineCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl LineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next complete line from `src`.
    ///
    /// Returns `Ok(None)` while `src` holds no complete line.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src) {
                // LinesCodec switches to discard mode; calling again skips
                // to the next newline.
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(
                        max_bytes = self.max_length,
                        "child output line too long, discarding"
                    );
                }
                // The offending line has already been split off the buffer.
                Err(LinesCodecError::Io(err)) if err.kind() == ErrorKind::InvalidData => {
                    warn!(error = %err, "child output line is not utf-8, discarding");
                }
                other => return other.map_err(map_codec_error),
            }
        }
    }

    /// Decode the final line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(
                        max_bytes = self.max_length,
                        "child output line too long at EOF, discarding"
                    );
                }
                Err(LinesCodecError::Io(err)) if err.kind() == ErrorKind::InvalidData => {
                    warn!(error = %err, "final child output line is not utf-8, discarding");
                }
                other => return other.map_err(map_codec_error),
            }
        }
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::MalformedOutput("line too long".into())
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
