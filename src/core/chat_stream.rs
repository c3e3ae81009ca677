use std::sync::Arc;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::api_error::format_api_error;
use crate::core::codec::codec_for;
use crate::core::decoder::{DecoderConfig, FragmentStream};
use crate::core::endpoints::EndpointResolver;
use crate::core::request::RequestPayload;
use crate::core::session::{
    SessionError, StreamJob, StreamLauncher, StreamMessage, StreamReceiver, StreamSender,
};
use crate::utils::url::construct_api_url;

const GENERATE_STREAM_PATH: &str = "generate_stream";

/// Sends a stream's messages and guarantees it ends with exactly one
/// `Finished`, even if the task is dropped part way through.
struct StreamReporter {
    tx: StreamSender,
    stream_id: u64,
    finished: bool,
}

impl StreamReporter {
    fn new(tx: StreamSender, stream_id: u64) -> Self {
        Self {
            tx,
            stream_id,
            finished: false,
        }
    }

    fn send(&self, message: StreamMessage) {
        if self.tx.send((message, self.stream_id)).is_err() {
            debug!(stream_id = self.stream_id, "session receiver gone");
        }
    }

    fn finish(mut self, result: Result<(), SessionError>) {
        self.finished = true;
        self.send(StreamMessage::Finished(result));
    }
}

impl Drop for StreamReporter {
    fn drop(&mut self) {
        if !self.finished {
            self.send(StreamMessage::Finished(Err(SessionError::network(
                "stream task stopped unexpectedly",
            ))));
        }
    }
}

/// Spawns one task per session that performs the request and forwards
/// decoded fragments over a channel tagged with the stream id.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: StreamSender,
    client: Client,
    resolver: Arc<EndpointResolver>,
    decoder: DecoderConfig,
}

impl ChatStreamService {
    pub fn new(
        client: Client,
        resolver: Arc<EndpointResolver>,
        decoder: DecoderConfig,
    ) -> (Self, StreamReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                client,
                resolver,
                decoder,
            },
            rx,
        )
    }

    pub fn spawn_stream(&self, job: StreamJob) {
        let service = self.clone();
        tokio::spawn(async move {
            let StreamJob {
                payload,
                cancel_token,
                stream_id,
            } = job;
            let reporter = StreamReporter::new(service.tx.clone(), stream_id);

            let result = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => Err(SessionError::cancelled()),
                result = service.run_stream(&payload, &cancel_token, &reporter) => result,
            };
            reporter.finish(result);
        });
    }

    async fn run_stream(
        &self,
        payload: &RequestPayload,
        cancel_token: &CancellationToken,
        reporter: &StreamReporter,
    ) -> Result<(), SessionError> {
        let url = match payload {
            RequestPayload::OpenAi(_) => self.resolver.resolve().await?.inference_url,
            RequestPayload::Native(_) => {
                construct_api_url(self.resolver.base_url(), GENERATE_STREAM_PATH)
            }
        };
        debug!(
            stream_id = reporter.stream_id,
            %url,
            schema = %payload.schema(),
            "sending generation request"
        );

        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(payload)
            .send();
        let response = match self.decoder.read_timeout {
            Some(limit) => tokio::time::timeout(limit, request).await.map_err(|_| {
                SessionError::network(format!(
                    "no response from {url} within {} seconds",
                    limit.as_secs_f64()
                ))
            })?,
            None => request.await,
        }
        .map_err(|error| SessionError::network(format!("request to {url} failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = match self.decoder.read_timeout {
                Some(limit) => tokio::time::timeout(limit, response.text())
                    .await
                    .ok()
                    .and_then(Result::ok),
                None => response.text().await.ok(),
            }
            .unwrap_or_default();
            let detail = format_api_error(&body);
            warn!(
                stream_id = reporter.stream_id,
                status = status.as_u16(),
                %detail,
                "generation request rejected"
            );
            return Err(SessionError::http(status.as_u16(), detail));
        }

        reporter.send(StreamMessage::Connected);

        let mut fragments = FragmentStream::new(
            response.bytes_stream(),
            codec_for(payload.schema()),
            self.decoder,
        );
        while let Some(fragment) = fragments.next_fragment().await? {
            if cancel_token.is_cancelled() {
                return Err(SessionError::cancelled());
            }
            reporter.send(StreamMessage::Fragment(fragment));
        }
        Ok(())
    }
}

impl StreamLauncher for ChatStreamService {
    fn launch(&self, job: StreamJob) {
        self.spawn_stream(job);
    }
}
