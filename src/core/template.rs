//! Chat template lookup for a consumer group.
//!
//! The template is rendered by the server for a placeholder conversation and
//! used as the starting prompt text for one-shot generation.

use std::fmt;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::api::{ChatMessage, ChatTemplateRequest, ChatTemplateResponse, ReaderGroups};
use crate::core::endpoints::{EndpointResolver, ResolveError};
use crate::utils::url::construct_api_url;

pub const SYSTEM_PLACEHOLDER: &str = "{{system prompt}}";
pub const USER_PLACEHOLDER: &str = "{{user message}}";

#[derive(Debug)]
pub enum TemplateError {
    Resolve(ResolveError),
    Request { url: String, source: reqwest::Error },
    Status { url: String, status: u16 },
    Body { url: String, source: reqwest::Error },
    UnknownGroup(String),
    EmptyTemplate,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::Resolve(error) => write!(f, "{error}"),
            TemplateError::Request { url, source } => {
                write!(f, "failed to reach {url}: {source}")
            }
            TemplateError::Status { url, status } => {
                write!(f, "{url} responded with HTTP {status}")
            }
            TemplateError::Body { url, source } => {
                write!(f, "unexpected response from {url}: {source}")
            }
            TemplateError::UnknownGroup(group) => {
                write!(f, "consumer group '{group}' has no readers")
            }
            TemplateError::EmptyTemplate => write!(f, "server returned no rendered template"),
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TemplateError::Resolve(source) => Some(source),
            TemplateError::Request { source, .. } | TemplateError::Body { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

impl From<ResolveError> for TemplateError {
    fn from(error: ResolveError) -> Self {
        TemplateError::Resolve(error)
    }
}

pub struct TemplateClient<'a> {
    client: Client,
    resolver: &'a EndpointResolver,
}

impl<'a> TemplateClient<'a> {
    pub fn new(client: Client, resolver: &'a EndpointResolver) -> Self {
        Self { client, resolver }
    }

    /// First reader registered for `consumer_group` on the management port.
    pub async fn fetch_reader_id(&self, consumer_group: &str) -> Result<String, TemplateError> {
        let management_url = self.resolver.management_url().await?;
        let url = construct_api_url(&management_url, "reader_groups");
        let response = self.client.get(&url).send().await.map_err(|source| {
            TemplateError::Request {
                url: url.clone(),
                source,
            }
        })?;
        let mut groups: ReaderGroups = read_json(&url, response).await?;

        groups
            .remove(consumer_group)
            .and_then(|readers| readers.into_iter().next())
            .map(|reader| reader.reader_id)
            .ok_or_else(|| TemplateError::UnknownGroup(consumer_group.to_string()))
    }

    /// Renders the chat template of `reader_id` around the placeholder turns.
    pub async fn fetch_chat_template(
        &self,
        reader_id: &str,
        with_system_prompt: bool,
    ) -> Result<String, TemplateError> {
        let url = construct_api_url(
            self.resolver.base_url(),
            &format!("chat_template/{reader_id}"),
        );
        let mut conversation = Vec::with_capacity(2);
        if with_system_prompt {
            conversation.push(ChatMessage::new("system", SYSTEM_PLACEHOLDER));
        }
        conversation.push(ChatMessage::new("user", USER_PLACEHOLDER));
        let body = ChatTemplateRequest {
            inputs: vec![conversation],
            add_generation_prompt: true,
        };

        debug!(%url, with_system_prompt, "fetching chat template");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| TemplateError::Request {
                url: url.clone(),
                source,
            })?;
        let rendered: ChatTemplateResponse = read_json(&url, response).await?;
        rendered
            .messages
            .into_iter()
            .next()
            .ok_or(TemplateError::EmptyTemplate)
    }

    /// The group's template with a system turn, falling back to a user-only
    /// template, and finally to an empty string.
    pub async fn chat_template_for_group(&self, consumer_group: &str) -> String {
        let reader_id = match self.fetch_reader_id(consumer_group).await {
            Ok(reader_id) => reader_id,
            Err(error) => {
                warn!(%consumer_group, %error, "no reader found; skipping chat template");
                return String::new();
            }
        };

        match self.fetch_chat_template(&reader_id, true).await {
            Ok(template) => return template,
            Err(error) => {
                info!(%reader_id, %error, "system prompt template failed; trying without")
            }
        }

        self.fetch_chat_template(&reader_id, false)
            .await
            .unwrap_or_else(|error| {
                warn!(%reader_id, %error, "chat template unavailable");
                String::new()
            })
    }
}

async fn read_json<T: DeserializeOwned>(
    url: &str,
    response: reqwest::Response,
) -> Result<T, TemplateError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TemplateError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    response.json::<T>().await.map_err(|source| TemplateError::Body {
        url: url.to_string(),
        source,
    })
}
