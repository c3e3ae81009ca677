//! Incremental `text/event-stream` framing.
//!
//! [`FrameReader`] pulls byte chunks from a transport stream on demand and
//! yields one [`SseFrame`] per dispatched event. Lines may end in `\n` or
//! `\r\n`; multiple `data:` lines are joined with `\n`; comment lines and the
//! `id`/`retry` fields are ignored. A frame still pending when the transport
//! ends is dispatched if it carries data.

use std::fmt;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use memchr::memchr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The underlying transport reported an error mid-stream.
    Transport(String),
    /// No bytes arrived within the per-read timeout.
    TimedOut(Duration),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Transport(message) => write!(f, "stream transport error: {message}"),
            FrameError::TimedOut(limit) => {
                write!(f, "no data received for {} seconds", limit.as_secs_f64())
            }
        }
    }
}

impl std::error::Error for FrameError {}

#[derive(Debug, Default)]
struct PendingFrame {
    event: Option<String>,
    data: String,
    has_data: bool,
}

impl PendingFrame {
    fn feed_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let pending = std::mem::take(self);
        if !pending.has_data {
            return None;
        }
        Some(SseFrame {
            event: pending.event.filter(|name| !name.is_empty()),
            data: pending.data,
        })
    }
}

/// Single-pass reader of SSE frames over a chunked byte stream.
pub struct FrameReader<S> {
    inner: S,
    buffer: Vec<u8>,
    pending: PendingFrame,
    finished: bool,
    read_timeout: Option<Duration>,
}

impl<S, B, E> FrameReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            pending: PendingFrame::default(),
            finished: false,
            read_timeout: None,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Returns the next complete frame, or `None` once the transport has
    /// ended and every buffered frame has been returned.
    pub async fn next_frame(&mut self) -> Result<Option<SseFrame>, FrameError> {
        loop {
            while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
                let frame = {
                    let line = strip_carriage_return(&self.buffer[..newline_pos]);
                    self.pending.feed_line(&String::from_utf8_lossy(line))
                };
                self.buffer.drain(..=newline_pos);
                if frame.is_some() {
                    return Ok(frame);
                }
            }

            if self.finished {
                if !self.buffer.is_empty() {
                    let rest = std::mem::take(&mut self.buffer);
                    let line = strip_carriage_return(&rest);
                    if let Some(frame) = self.pending.feed_line(&String::from_utf8_lossy(line)) {
                        return Ok(Some(frame));
                    }
                }
                return Ok(self.pending.dispatch());
            }

            match self.read_chunk().await? {
                Some(chunk) => self.buffer.extend_from_slice(chunk.as_ref()),
                None => self.finished = true,
            }
        }
    }

    async fn read_chunk(&mut self) -> Result<Option<B>, FrameError> {
        let next = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.next())
                .await
                .map_err(|_| FrameError::TimedOut(limit))?,
            None => self.inner.next().await,
        };

        match next {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(error)) => Err(FrameError::Transport(error.to_string())),
            None => Ok(None),
        }
    }
}

fn strip_carriage_return(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}


#[cfg(test)]
mod tests {
    use super::test_support::chunks;
    use super::*;
    use futures_util::stream;

    async fn collect(parts: &[&str]) -> Vec<SseFrame> {
        let mut reader = FrameReader::new(chunks(parts));
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().await.expect("frame") {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn frames_split_across_chunks_are_reassembled() {
        let frames = collect(&["da", "ta: Hel", "\n\ndata: lo\n", "\n"]).await;
        assert_eq!(frames, vec![SseFrame::data("Hel"), SseFrame::data("lo")]);
    }

    #[tokio::test]
    async fn multi_line_data_is_joined_with_newlines() {
        let frames = collect(&["event: token\r\ndata: first\r\ndata:second\r\n\r\n"]).await;
        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("token".into()),
                data: "first\nsecond".into(),
            }]
        );
    }

    #[tokio::test]
    async fn comments_and_empty_events_are_skipped() {
        let frames = collect(&[": keep-alive\n\n", "id: 7\nretry: 10\n\n", "data: x\n\n"]).await;
        assert_eq!(frames, vec![SseFrame::data("x")]);
    }

    #[tokio::test]
    async fn pending_frame_is_flushed_when_transport_ends() {
        let frames = collect(&["data: a\n\n", "data: tail"]).await;
        assert_eq!(frames, vec![SseFrame::data("a"), SseFrame::data("tail")]);
    }

    #[tokio::test]
    async fn empty_data_field_still_dispatches() {
        let frames = collect(&["data:\n\n"]).await;
        assert_eq!(frames, vec![SseFrame::data("")]);
    }

    #[tokio::test]
    async fn multibyte_characters_split_across_chunks_survive() {
        let bytes = "data: héllo\n\n".as_bytes();
        let split = 8;
        let items: Vec<Result<Vec<u8>, String>> =
            vec![Ok(bytes[..split].to_vec()), Ok(bytes[split..].to_vec())];
        let mut reader = FrameReader::new(stream::iter(items));
        let frame = reader.next_frame().await.expect("frame").expect("some");
        assert_eq!(frame.data, "héllo");
    }

    #[tokio::test]
    async fn transport_errors_are_reported() {
        let items: Vec<Result<Vec<u8>, String>> =
            vec![Ok(b"data: ok\n\n".to_vec()), Err("connection reset".into())];
        let mut reader = FrameReader::new(stream::iter(items));
        assert_eq!(
            reader.next_frame().await,
            Ok(Some(SseFrame::data("ok")))
        );
        assert_eq!(
            reader.next_frame().await,
            Err(FrameError::Transport("connection reset".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_reads_time_out() {
        let stalled = stream::pending::<Result<Vec<u8>, String>>();
        let mut reader =
            FrameReader::new(stalled).with_read_timeout(Some(Duration::from_secs(5)));
        assert_eq!(
            reader.next_frame().await,
            Err(FrameError::TimedOut(Duration::from_secs(5)))
        );
    }
}
