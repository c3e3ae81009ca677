//! The two user-facing surfaces built on a [`SessionController`].
//!
//! Chat keeps a conversation and never sends a grammar constraint. The
//! playground sends a single templated prompt with optional constraints.

use std::collections::HashMap;
use std::fmt;

use crate::core::message::{Message, Role};
use crate::core::prompt::{prepare_chat_prompt, substitute_variables};
use crate::core::request::{
    GenerationRequest, GrammarConstraint, PromptInput, SamplingError, SamplingParams, Schema,
};
use crate::core::session::{SessionController, StartError};

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceError {
    EmptyInput,
    Busy(StartError),
    Sampling(SamplingError),
}

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceError::EmptyInput => write!(f, "nothing to send"),
            SurfaceError::Busy(error) => write!(f, "{error}"),
            SurfaceError::Sampling(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for SurfaceError {}

impl From<StartError> for SurfaceError {
    fn from(error: StartError) -> Self {
        SurfaceError::Busy(error)
    }
}

impl From<SamplingError> for SurfaceError {
    fn from(error: SamplingError) -> Self {
        SurfaceError::Sampling(error)
    }
}

pub struct ChatSurface {
    controller: SessionController,
    system_prompt: String,
    sampling: SamplingParams,
    consumer_group: String,
}

impl ChatSurface {
    pub fn new(
        controller: SessionController,
        system_prompt: impl Into<String>,
        sampling: SamplingParams,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            system_prompt: system_prompt.into(),
            sampling,
            consumer_group: consumer_group.into(),
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut SessionController {
        &mut self.controller
    }

    /// Appends the user's turn and starts a session answering it.
    pub fn send(&mut self, text: &str) -> Result<u64, SurfaceError> {
        if text.trim().is_empty() {
            return Err(SurfaceError::EmptyInput);
        }
        if self.controller.is_busy() {
            return Err(SurfaceError::Busy(StartError::Busy(self.controller.status())));
        }

        self.controller.push_message(Message::new(Role::User, text))?;
        let request = GenerationRequest::new(
            self.prompt_input(),
            self.sampling,
            self.consumer_group.as_str(),
            None,
        )?;
        Ok(self.controller.start(&request)?)
    }

    /// Clears the conversation; rejected while a reply is streaming.
    pub fn reset(&mut self) -> Result<(), SurfaceError> {
        Ok(self.controller.clear_transcript()?)
    }

    fn prompt_input(&self) -> PromptInput {
        // Turns that failed before producing text carry nothing to resend.
        let history: Vec<Message> = self
            .controller
            .transcript()
            .snapshot()
            .into_iter()
            .filter(|message| message.is_user() || !message.content().is_empty())
            .collect();

        match self.controller.schema() {
            Schema::OpenAi => PromptInput::Messages(
                history
                    .into_iter()
                    .map(|message| (message.role, message.content().to_string()))
                    .collect(),
            ),
            Schema::Native => PromptInput::Text(prepare_chat_prompt(&self.system_prompt, &history)),
        }
    }
}

pub struct PlaygroundSurface {
    controller: SessionController,
    sampling: SamplingParams,
    consumer_group: String,
    constraint: Option<GrammarConstraint>,
    variables: HashMap<String, String>,
}

impl PlaygroundSurface {
    pub fn new(
        controller: SessionController,
        sampling: SamplingParams,
        consumer_group: impl Into<String>,
        constraint: Option<GrammarConstraint>,
    ) -> Self {
        Self {
            controller,
            sampling,
            consumer_group: consumer_group.into(),
            constraint,
            variables: HashMap::new(),
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut SessionController {
        &mut self.controller
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }

    /// The prompt exactly as it will be sent.
    pub fn render(&self, text: &str) -> String {
        substitute_variables(text, &self.variables)
    }

    pub fn generate(&mut self, text: &str) -> Result<u64, SurfaceError> {
        let prompt = self.render(text);
        if prompt.trim().is_empty() {
            return Err(SurfaceError::EmptyInput);
        }
        let request = GenerationRequest::new(
            PromptInput::Text(prompt),
            self.sampling,
            self.consumer_group.as_str(),
            self.constraint.clone(),
        )?;
        Ok(self.controller.start(&request)?)
    }
}
