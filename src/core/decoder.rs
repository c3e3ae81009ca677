//! Lazy fragment sequence over an SSE byte stream.

use std::fmt;
use std::time::Duration;

use futures_util::Stream;
use tracing::{debug, warn};

use crate::core::codec::{CodecError, DeltaFragment, FrameCodec};
use crate::core::constants::{DEFAULT_MAX_CONSECUTIVE_DECODE_ERRORS, DEFAULT_READ_TIMEOUT_SECS};
use crate::core::sse::{FrameError, FrameReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Malformed frames tolerated in a row before the stream fails.
    pub max_consecutive_errors: u32,
    /// Limit on the wait for each chunk; `None` waits forever.
    pub read_timeout: Option<Duration>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_DECODE_ERRORS,
            read_timeout: Some(Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Transport(String),
    TimedOut(Duration),
    Parse { consecutive: u32, last: String },
    Protocol(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Transport(message) => write!(f, "stream transport error: {message}"),
            DecodeError::TimedOut(limit) => {
                write!(f, "no data received for {} seconds", limit.as_secs_f64())
            }
            DecodeError::Parse { consecutive, last } => write!(
                f,
                "giving up after {consecutive} consecutive malformed frames (last: {last})"
            ),
            DecodeError::Protocol(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<FrameError> for DecodeError {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::Transport(message) => DecodeError::Transport(message),
            FrameError::TimedOut(limit) => DecodeError::TimedOut(limit),
        }
    }
}

/// Pulls frames from the transport and decodes each one with the active
/// codec. Every decoded frame yields exactly one fragment. After the sentinel,
/// the end of the transport, or an error, the sequence stays finished.
pub struct FragmentStream<S> {
    frames: FrameReader<S>,
    codec: Box<dyn FrameCodec>,
    max_consecutive_errors: u32,
    consecutive_errors: u32,
    finished: bool,
}

impl<S, B, E> FragmentStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    pub fn new(inner: S, codec: Box<dyn FrameCodec>, config: DecoderConfig) -> Self {
        Self {
            frames: FrameReader::new(inner).with_read_timeout(config.read_timeout),
            codec,
            max_consecutive_errors: config.max_consecutive_errors,
            consecutive_errors: 0,
            finished: false,
        }
    }

    pub async fn next_fragment(&mut self) -> Result<Option<DeltaFragment>, DecodeError> {
        if self.finished {
            return Ok(None);
        }
        let result = self.pull().await;
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }

    async fn pull(&mut self) -> Result<Option<DeltaFragment>, DecodeError> {
        loop {
            let Some(frame) = self.frames.next_frame().await? else {
                debug!(schema = %self.codec.schema(), "event stream ended");
                return Ok(None);
            };

            match self.codec.decode(&frame) {
                Ok(Some(fragment)) => {
                    self.consecutive_errors = 0;
                    return Ok(Some(fragment));
                }
                Ok(None) => {
                    debug!(schema = %self.codec.schema(), "terminal sentinel received");
                    return Ok(None);
                }
                Err(CodecError::Malformed(reason)) => {
                    self.consecutive_errors += 1;
                    warn!(
                        consecutive = self.consecutive_errors,
                        %reason,
                        "skipping malformed frame"
                    );
                    if self.consecutive_errors > self.max_consecutive_errors {
                        return Err(DecodeError::Parse {
                            consecutive: self.consecutive_errors,
                            last: reason,
                        });
                    }
                }
                Err(CodecError::Protocol(reason)) => return Err(DecodeError::Protocol(reason)),
            }
        }
    }
}
