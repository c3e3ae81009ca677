//! The session state machine behind a chat or playground surface.
//!
//! ```text
//! Idle -> Sending -> Streaming -> Completed | Failed | Cancelled -> Idle
//!            \-----------------> Failed | Cancelled
//! ```
//!
//! The controller is the only thing that mutates session status. The stream
//! task it launches reports progress as [`StreamMessage`]s tagged with the
//! stream id; the owner of the controller feeds them back through
//! [`SessionController::handle_message`] from a single loop, so every
//! transition happens on one task between suspension points.

use std::fmt;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::accumulator::{self, AccumulateError};
use crate::core::codec::DeltaFragment;
use crate::core::decoder::DecodeError;
use crate::core::endpoints::ResolveError;
use crate::core::message::{Message, Seal, Transcript, WeakMessage};
use crate::core::request::{self, GenerationRequest, RequestPayload, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// `Sending` or `Streaming`.
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Sending | SessionStatus::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Idle, Sending)
                | (Sending, Streaming)
                | (Sending, Failed)
                | (Sending, Cancelled)
                | (Streaming, Completed)
                | (Streaming, Failed)
                | (Streaming, Cancelled)
                | (Completed, Idle)
                | (Failed, Idle)
                | (Cancelled, Idle)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Sending => "sending",
            SessionStatus::Streaming => "streaming",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection refused, DNS, discovery or mid-stream transport failure,
    /// including read timeouts.
    Network,
    /// Non-2xx response to the generation request.
    Http(u16),
    /// Too many consecutive malformed frames.
    Parse,
    /// A frame or response with an unexpected shape.
    Protocol,
    /// Aborted through the session's own token. Never surfaced as a failure.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    kind: ErrorKind,
    detail: String,
}

impl SessionError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, detail)
    }

    pub fn http(status: u16, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Http(status), detail)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request cancelled")
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Network => write!(f, "network error: {}", self.detail),
            ErrorKind::Http(status) => write!(f, "HTTP {status}: {}", self.detail),
            ErrorKind::Parse => write!(f, "parse error: {}", self.detail),
            ErrorKind::Protocol => write!(f, "protocol error: {}", self.detail),
            ErrorKind::Cancelled => write!(f, "{}", self.detail),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<DecodeError> for SessionError {
    fn from(error: DecodeError) -> Self {
        let kind = match &error {
            DecodeError::Transport(_) | DecodeError::TimedOut(_) => ErrorKind::Network,
            DecodeError::Parse { .. } => ErrorKind::Parse,
            DecodeError::Protocol(_) => ErrorKind::Protocol,
        };
        Self::new(kind, error.to_string())
    }
}

impl From<ResolveError> for SessionError {
    fn from(error: ResolveError) -> Self {
        Self::network(error.to_string())
    }
}

/// Progress reported by a stream task.
#[derive(Debug)]
pub enum StreamMessage {
    /// A 2xx response arrived and its body is about to be read.
    Connected,
    Fragment(DeltaFragment),
    /// The stream ended. `Err` with [`ErrorKind::Cancelled`] means the
    /// session's token fired.
    Finished(Result<(), SessionError>),
}

pub type StreamSender = mpsc::UnboundedSender<(StreamMessage, u64)>;
pub type StreamReceiver = mpsc::UnboundedReceiver<(StreamMessage, u64)>;

/// Everything a stream task needs for one session.
#[derive(Debug)]
pub struct StreamJob {
    pub payload: RequestPayload,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

/// Starts the network side of a session.
pub trait StreamLauncher: Send {
    fn launch(&self, job: StreamJob);
}

/// Notified synchronously by the controller.
pub trait SessionObserver: Send {
    fn status_changed(&mut self, _status: SessionStatus) {}

    /// Called after each fragment is applied; `appended` is the new text.
    fn fragment_applied(&mut self, _appended: &str, _message: &Message) {}

    /// Failures only; cancellations are not reported here.
    fn error_raised(&mut self, _error: &SessionError) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartError {
    Busy(SessionStatus),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::Busy(status) => {
                write!(f, "a request is already in progress ({status})")
            }
        }
    }
}

impl std::error::Error for StartError {}

/// How a session ended, returned once it has released the surface.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub stream_id: u64,
    pub status: SessionStatus,
    pub error: Option<SessionError>,
    pub message: Option<Message>,
}

pub struct SessionController {
    schema: Schema,
    status: SessionStatus,
    cancel_token: CancellationToken,
    stream_id: u64,
    target: WeakMessage,
    last_error: Option<SessionError>,
    transcript: Transcript,
    launcher: Box<dyn StreamLauncher>,
    observers: Vec<Box<dyn SessionObserver>>,
}

impl SessionController {
    pub fn new(schema: Schema, launcher: Box<dyn StreamLauncher>) -> Self {
        Self {
            schema,
            status: SessionStatus::Idle,
            cancel_token: CancellationToken::new(),
            stream_id: 0,
            target: WeakMessage::default(),
            last_error: None,
            transcript: Transcript::new(),
            launcher,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    pub fn schema(&self) -> Schema {
        self.schema
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_busy(&self) -> bool {
        self.status.is_active()
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// The error of the most recent failed session, kept until the next start.
    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Adds a finished message (e.g. the user's turn). Rejected while a
    /// session is active so the target stays the last message.
    pub fn push_message(&mut self, message: Message) -> Result<(), StartError> {
        if self.is_busy() {
            return Err(StartError::Busy(self.status));
        }
        self.transcript.push(message);
        Ok(())
    }

    pub fn clear_transcript(&mut self) -> Result<(), StartError> {
        if self.is_busy() {
            return Err(StartError::Busy(self.status));
        }
        self.transcript.clear();
        Ok(())
    }

    pub fn is_current_stream(&self, stream_id: u64) -> bool {
        self.stream_id == stream_id
    }

    /// Starts a session for `request`, returning its stream id.
    pub fn start(&mut self, request: &GenerationRequest) -> Result<u64, StartError> {
        if self.status != SessionStatus::Idle {
            return Err(StartError::Busy(self.status));
        }

        self.cancel_token = CancellationToken::new();
        self.stream_id += 1;
        self.last_error = None;
        self.target = WeakMessage::default();

        let payload = request::build(request, self.schema);
        self.transition(SessionStatus::Sending);
        info!(stream_id = self.stream_id, schema = %self.schema, "session started");

        self.launcher.launch(StreamJob {
            payload,
            cancel_token: self.cancel_token.clone(),
            stream_id: self.stream_id,
        });
        Ok(self.stream_id)
    }

    /// Fires the active session's token. Returns `false` when idle.
    pub fn cancel(&mut self) -> bool {
        if !self.is_busy() {
            return false;
        }
        debug!(stream_id = self.stream_id, "cancellation requested");
        self.cancel_token.cancel();
        true
    }

    /// Applies one message from a stream task. Messages for superseded
    /// streams are ignored. Returns the outcome when the session ends.
    pub fn handle_message(
        &mut self,
        message: StreamMessage,
        stream_id: u64,
    ) -> Option<SessionOutcome> {
        if !self.is_current_stream(stream_id) || !self.is_busy() {
            debug!(stream_id, current = self.stream_id, "ignoring stale stream message");
            return None;
        }

        match message {
            StreamMessage::Connected => {
                self.begin_streaming();
                None
            }
            StreamMessage::Fragment(fragment) => {
                self.apply_fragment(fragment);
                None
            }
            StreamMessage::Finished(Ok(())) if self.status == SessionStatus::Sending => {
                Some(self.finish(
                    SessionStatus::Failed,
                    Some(SessionError::new(
                        ErrorKind::Protocol,
                        "stream finished before a response arrived",
                    )),
                ))
            }
            StreamMessage::Finished(Ok(())) => Some(self.finish(SessionStatus::Completed, None)),
            StreamMessage::Finished(Err(error)) if error.is_cancellation() => {
                Some(self.finish(SessionStatus::Cancelled, None))
            }
            StreamMessage::Finished(Err(error)) => {
                Some(self.finish(SessionStatus::Failed, Some(error)))
            }
        }
    }

    /// Called when the stream channel closes. An active session can no longer
    /// finish normally, so it fails instead of holding the surface.
    pub fn handle_channel_closed(&mut self) -> Option<SessionOutcome> {
        if !self.is_busy() {
            return None;
        }
        Some(self.finish(
            SessionStatus::Failed,
            Some(SessionError::network("stream task ended without a result")),
        ))
    }

    /// Drives the active session from `rx` until it ends.
    pub async fn run_to_completion(&mut self, rx: &mut StreamReceiver) -> Option<SessionOutcome> {
        while self.is_busy() {
            match rx.recv().await {
                Some((message, stream_id)) => {
                    if let Some(outcome) = self.handle_message(message, stream_id) {
                        return Some(outcome);
                    }
                }
                None => return self.handle_channel_closed(),
            }
        }
        None
    }

    fn begin_streaming(&mut self) {
        if self.status != SessionStatus::Sending {
            warn!(stream_id = self.stream_id, "duplicate connected message ignored");
            return;
        }
        let target = self.transcript.push(Message::placeholder());
        self.target = target.downgrade();
        self.transition(SessionStatus::Streaming);
    }

    fn apply_fragment(&mut self, fragment: DeltaFragment) {
        if self.status != SessionStatus::Streaming {
            warn!(stream_id = self.stream_id, "fragment before response; dropping");
            return;
        }

        match accumulator::apply(fragment, &self.target) {
            Ok(applied) => {
                if applied.new_len == applied.previous_len {
                    return;
                }
                if let Some(target) = self.target.upgrade() {
                    let message = target.read();
                    let appended = &message.content()[applied.previous_len..applied.new_len];
                    for observer in self.observers.iter_mut() {
                        observer.fragment_applied(appended, &message);
                    }
                }
            }
            Err(AccumulateError::TargetDropped) => {
                warn!(stream_id = self.stream_id, "target message dropped; cancelling");
                self.cancel_token.cancel();
            }
            Err(error @ AccumulateError::Sealed(_)) => {
                warn!(stream_id = self.stream_id, %error, "fragment rejected");
            }
        }
    }

    fn finish(&mut self, status: SessionStatus, error: Option<SessionError>) -> SessionOutcome {
        let seal = match status {
            SessionStatus::Completed => Seal::Completed,
            SessionStatus::Cancelled => Seal::Cancelled,
            _ => Seal::Failed,
        };
        let message = self.target.upgrade().map(|target| {
            target.write().seal_as(seal);
            target.snapshot()
        });

        match &error {
            Some(error) => warn!(stream_id = self.stream_id, %error, "session failed"),
            None => info!(stream_id = self.stream_id, %status, "session finished"),
        }

        self.last_error = error.clone();
        self.transition(status);
        if let Some(error) = &error {
            for observer in self.observers.iter_mut() {
                observer.error_raised(error);
            }
        }

        // The consumed token is never reused; a later start mints its own too.
        self.cancel_token = CancellationToken::new();
        self.target = WeakMessage::default();
        self.transition(SessionStatus::Idle);

        SessionOutcome {
            stream_id: self.stream_id,
            status,
            error,
            message,
        }
    }

    fn transition(&mut self, next: SessionStatus) {
        if !self.status.can_transition_to(next) {
            warn!(from = %self.status, to = %next, "invalid session transition ignored");
            return;
        }
        debug!(stream_id = self.stream_id, from = %self.status, to = %next, "session transition");
        self.status = next;
        for observer in self.observers.iter_mut() {
            observer.status_changed(next);
        }
    }
}
