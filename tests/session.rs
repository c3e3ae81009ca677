mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{chat_chunk, Deployment, Reply};
use reqwest::Client;
use serde_json::json;
use takeoff::core::chat_stream::ChatStreamService;
use takeoff::core::decoder::DecoderConfig;
use takeoff::core::endpoints::EndpointResolver;
use takeoff::core::message::{Role, Seal};
use takeoff::core::request::{
    GenerationRequest, GrammarConstraint, PromptInput, SamplingParams, Schema,
};
use takeoff::core::session::{
    ErrorKind, SessionController, SessionStatus, StartError, StreamMessage, StreamReceiver,
};

fn controller(
    deployment: &Deployment,
    schema: Schema,
    decoder: DecoderConfig,
) -> (SessionController, StreamReceiver) {
    let client = Client::new();
    let resolver = Arc::new(
        EndpointResolver::new(client.clone(), &deployment.serving.url()).expect("host"),
    );
    let (service, rx) = ChatStreamService::new(client, resolver, decoder);
    (SessionController::new(schema, Box::new(service)), rx)
}

fn decoder() -> DecoderConfig {
    DecoderConfig {
        max_consecutive_errors: 3,
        read_timeout: Some(Duration::from_secs(5)),
    }
}

fn chat_request(text: &str) -> GenerationRequest {
    GenerationRequest::new(
        PromptInput::Messages(vec![(Role::User, text.to_string())]),
        SamplingParams::default(),
        "primary",
        None,
    )
    .expect("valid request")
}

#[tokio::test]
async fn openai_stream_accumulates_into_one_completed_message() {
    let hel = chat_chunk("Hel");
    let lo = chat_chunk("lo");
    let deployment = Deployment::openai(move |_| {
        Reply::sse(&[
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            hel.as_str(),
            lo.as_str(),
            "data: [DONE]\n\n",
        ])
    })
    .await;
    let (mut controller, mut rx) = controller(&deployment, Schema::OpenAi, decoder());

    controller.start(&chat_request("hi")).expect("start");
    let outcome = controller
        .run_to_completion(&mut rx)
        .await
        .expect("outcome");

    assert_eq!(outcome.status, SessionStatus::Completed);
    let message = outcome.message.expect("message");
    assert_eq!(message.content(), "Hello");
    assert_eq!(message.seal(), Some(Seal::Completed));
    assert_eq!(controller.status(), SessionStatus::Idle);
    assert_eq!(controller.transcript().len(), 1);

    let request = &deployment.openai.requests()[0];
    assert_eq!(request.path, "/v1/chat/completions");
    assert_eq!(request.header("accept"), Some("text/event-stream"));
    assert_eq!(
        request.json(),
        json!({
            "model": "primary",
            "messages": [{ "role": "user", "content": "hi" }],
            "top_p": 0.1,
            "max_tokens": 300,
            "temperature": 0.7,
            "stream": true
        })
    );
}

#[tokio::test]
async fn native_stream_posts_generate_request_to_serving_port() {
    let deployment = Deployment::start(
        |request| {
            (request.path == "/generate_stream")
                .then(|| Reply::sse(&["data: Once\n\n", "data:  upon\n", "\n", "data: a time"]))
        },
        |_| None,
        |_| Reply::status(404, "unused"),
    )
    .await;
    let (mut controller, mut rx) = controller(&deployment, Schema::Native, decoder());

    let request = GenerationRequest::new(
        PromptInput::Text("Tell me a story".into()),
        SamplingParams::default(),
        "primary",
        GrammarConstraint::from_parts(None, Some(r#"{"type":"string"}"#)),
    )
    .expect("valid request");
    controller.start(&request).expect("start");
    let outcome = controller
        .run_to_completion(&mut rx)
        .await
        .expect("outcome");

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(
        outcome.message.expect("message").content(),
        "Once upona time"
    );
    assert_eq!(deployment.serving.hits("/status"), 0);
    let sent = deployment
        .serving
        .requests()
        .into_iter()
        .find(|request| request.path == "/generate_stream")
        .expect("generate request");
    assert_eq!(
        sent.json(),
        json!({
            "text": "Tell me a story",
            "consumer_group": "primary",
            "sampling_temperature": 0.7,
            "sampling_topp": 0.1,
            "sampling_topk": 50,
            "max_new_tokens": 300,
            "json_schema": { "type": "string" }
        })
    );
}

#[tokio::test]
async fn http_error_fails_from_sending_and_releases_the_surface() {
    let deployment = Deployment::openai(|_| {
        Reply::status(500, r#"{"error":{"message":"model crashed"}}"#)
    })
    .await;
    let (mut controller, mut rx) = controller(&deployment, Schema::OpenAi, decoder());

    controller.start(&chat_request("hi")).expect("start");
    let outcome = controller
        .run_to_completion(&mut rx)
        .await
        .expect("outcome");

    assert_eq!(outcome.status, SessionStatus::Failed);
    let error = outcome.error.expect("error");
    assert_eq!(error.kind(), ErrorKind::Http(500));
    assert_eq!(error.detail(), "model crashed");
    assert!(outcome.message.is_none());
    assert!(controller.transcript().is_empty());
    assert!(!controller.is_busy());
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let client = Client::new();
    let resolver = Arc::new(
        EndpointResolver::new(client.clone(), &format!("http://127.0.0.1:{port}"))
            .expect("host"),
    );
    let (service, mut rx) = ChatStreamService::new(client, resolver, decoder());
    let mut controller = SessionController::new(Schema::OpenAi, Box::new(service));

    controller.start(&chat_request("hi")).expect("start");
    let outcome = controller
        .run_to_completion(&mut rx)
        .await
        .expect("outcome");

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(
        outcome.error.map(|error| error.kind()),
        Some(ErrorKind::Network)
    );
}

#[tokio::test]
async fn cancel_mid_stream_then_restart_immediately() {
    let first = chat_chunk("partial");
    let second = chat_chunk("fresh");
    let deployment = Deployment::openai(move |request| {
        if request.json()["messages"][0]["content"] == "first" {
            Reply::sse(&[first.as_str()]).held_open()
        } else {
            Reply::sse(&[second.as_str(), "data: [DONE]\n\n"])
        }
    })
    .await;
    let (mut controller, mut rx) = controller(&deployment, Schema::OpenAi, decoder());

    let first_id = controller.start(&chat_request("first")).expect("start");
    loop {
        let (message, stream_id) = rx.recv().await.expect("stream message");
        let is_fragment = matches!(message, StreamMessage::Fragment(_));
        controller.handle_message(message, stream_id);
        if is_fragment {
            break;
        }
    }
    assert_eq!(controller.status(), SessionStatus::Streaming);
    assert_eq!(
        controller.start(&chat_request("again")),
        Err(StartError::Busy(SessionStatus::Streaming))
    );

    assert!(controller.cancel());
    let outcome = controller
        .run_to_completion(&mut rx)
        .await
        .expect("outcome");
    assert_eq!(outcome.stream_id, first_id);
    assert_eq!(outcome.status, SessionStatus::Cancelled);
    assert!(outcome.error.is_none());
    assert!(controller.last_error().is_none());
    let message = outcome.message.expect("message");
    assert_eq!(message.content(), "partial");
    assert_eq!(message.seal(), Some(Seal::Cancelled));

    controller.start(&chat_request("second")).expect("restart");
    let outcome = controller
        .run_to_completion(&mut rx)
        .await
        .expect("outcome");
    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.message.expect("message").content(), "fresh");
    assert_eq!(controller.transcript().len(), 2);
}

#[tokio::test]
async fn cancel_while_sending_ends_without_a_message() {
    let deployment = Deployment::openai(|_| {
        Reply::sse(&["data: [DONE]\n\n"]).delayed(Duration::from_secs(5))
    })
    .await;
    let (mut controller, mut rx) = controller(&deployment, Schema::OpenAi, decoder());

    controller.start(&chat_request("hi")).expect("start");
    assert!(controller.cancel());
    let outcome = controller
        .run_to_completion(&mut rx)
        .await
        .expect("outcome");

    assert_eq!(outcome.status, SessionStatus::Cancelled);
    assert!(outcome.message.is_none());
    assert!(controller.transcript().is_empty());
}

#[tokio::test]
async fn repeated_malformed_frames_fail_the_session() {
    let hi = chat_chunk("ok ");
    let deployment = Deployment::openai(move |_| {
        Reply::sse(&[
            hi.as_str(),
            "data: {not json\n\n",
            "data: {still not\n\n",
            "data: nope\n\n",
            "data: never\n\n",
            "data: [DONE]\n\n",
        ])
    })
    .await;
    let (mut controller, mut rx) = controller(&deployment, Schema::OpenAi, decoder());

    controller.start(&chat_request("hi")).expect("start");
    let outcome = controller
        .run_to_completion(&mut rx)
        .await
        .expect("outcome");

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(
        outcome.error.map(|error| error.kind()),
        Some(ErrorKind::Parse)
    );
    let message = outcome.message.expect("message");
    assert_eq!(message.content(), "ok ");
    assert_eq!(message.seal(), Some(Seal::Failed));
}

#[tokio::test]
async fn silent_stream_times_out_as_network_error() {
    let deployment = Deployment::openai(|_| Reply::sse(&[]).held_open()).await;
    let (mut controller, mut rx) = controller(
        &deployment,
        Schema::OpenAi,
        DecoderConfig {
            max_consecutive_errors: 3,
            read_timeout: Some(Duration::from_millis(200)),
        },
    );

    controller.start(&chat_request("hi")).expect("start");
    let outcome = controller
        .run_to_completion(&mut rx)
        .await
        .expect("outcome");

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(
        outcome.error.map(|error| error.kind()),
        Some(ErrorKind::Network)
    );
    assert_eq!(outcome.message.expect("message").content(), "");
}

#[tokio::test]
async fn mid_stream_error_object_is_a_protocol_error() {
    let deployment = Deployment::openai(|_| {
        Reply::sse(&["data: {\"error\":{\"message\":\"out of memory\"}}\n\n"])
    })
    .await;
    let (mut controller, mut rx) = controller(&deployment, Schema::OpenAi, decoder());

    controller.start(&chat_request("hi")).expect("start");
    let outcome = controller
        .run_to_completion(&mut rx)
        .await
        .expect("outcome");

    let error = outcome.error.expect("error");
    assert_eq!(error.kind(), ErrorKind::Protocol);
    assert!(error.detail().contains("out of memory"));
}

#[tokio::test]
async fn server_that_never_sends_headers_times_out_as_network_error() {
    let deployment = Deployment::openai(|_| {
        Reply::sse(&["data: [DONE]\n\n"]).delayed(Duration::from_secs(4))
    })
    .await;
    let (mut controller, mut rx) = controller(
        &deployment,
        Schema::OpenAi,
        DecoderConfig {
            max_consecutive_errors: 3,
            read_timeout: Some(Duration::from_millis(200)),
        },
    );

    let started = std::time::Instant::now();
    controller.start(&chat_request("hi")).expect("start");
    let outcome = controller
        .run_to_completion(&mut rx)
        .await
        .expect("outcome");

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(outcome.status, SessionStatus::Failed);
    let error = outcome.error.expect("error");
    assert_eq!(error.kind(), ErrorKind::Network);
    assert!(error.detail().contains("no response"));
    assert!(outcome.message.is_none());
    assert!(!controller.is_busy());
}
