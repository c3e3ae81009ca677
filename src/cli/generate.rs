//! One-shot generation without an interactive session

use std::error::Error;
use std::io::Read;
use std::sync::Arc;

use reqwest::Client;

use crate::cli::{drive_session, new_session};
use crate::core::config::Config;
use crate::core::endpoints::EndpointResolver;
use crate::core::prompt::{extract_variables, parse_variable_assignment};
use crate::core::session::SessionStatus;
use crate::core::surface::PlaygroundSurface;
use crate::core::template::{TemplateClient, SYSTEM_PLACEHOLDER, USER_PLACEHOLDER};

pub struct GenerateOptions {
    pub prompt: Vec<String>,
    pub vars: Vec<String>,
    pub template: bool,
}

/// Places `prompt` into a rendered chat template. An empty template leaves
/// the prompt unchanged.
pub fn apply_template(template: &str, system_prompt: &str, prompt: &str) -> String {
    if template.is_empty() {
        return prompt.to_string();
    }
    template
        .replace(SYSTEM_PLACEHOLDER, system_prompt)
        .replace(USER_PLACEHOLDER, prompt)
}

pub async fn run_generate(
    config: &Config,
    client: Client,
    resolver: Arc<EndpointResolver>,
    options: GenerateOptions,
) -> Result<(), Box<dyn Error>> {
    let mut prompt = options.prompt.join(" ");
    if prompt.is_empty() {
        std::io::stdin().read_to_string(&mut prompt)?;
    }
    if prompt.trim().is_empty() {
        eprintln!("Usage: takeoff generate <prompt>");
        std::process::exit(1);
    }

    if options.template {
        let template = TemplateClient::new(client.clone(), &resolver)
            .chat_template_for_group(config.consumer_group())
            .await;
        prompt = apply_template(&template, config.system_prompt(), &prompt);
    }

    let (controller, mut rx) = new_session(config, client, resolver);
    let mut surface = PlaygroundSurface::new(
        controller,
        config.sampling_params(),
        config.consumer_group(),
        config.grammar_constraint(),
    );
    for assignment in &options.vars {
        let (name, value) = parse_variable_assignment(assignment)?;
        surface.set_variable(name, value);
    }
    for name in extract_variables(&prompt) {
        if !surface.variables().contains_key(&name) {
            eprintln!("⚠️  No value for {{{{{name}}}}}; sending it unchanged");
        }
    }

    surface.generate(&prompt)?;
    let outcome = drive_session(surface.controller_mut(), &mut rx).await;
    println!();

    match outcome {
        Some(outcome) if outcome.status == SessionStatus::Completed => Ok(()),
        Some(outcome) if outcome.status == SessionStatus::Cancelled => {
            eprintln!("(cancelled)");
            std::process::exit(130);
        }
        Some(outcome) => match outcome.error {
            Some(error) => Err(error.into()),
            None => Err("generation failed".into()),
        },
        None => Err("generation ended without a result".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_placeholders_are_filled() {
        let template = "<|system|>{{system prompt}}<|user|>{{user message}}<|assistant|>";
        assert_eq!(
            apply_template(template, "Be brief.", "Hi {{name}}"),
            "<|system|>Be brief.<|user|>Hi {{name}}<|assistant|>"
        );
    }

    #[test]
    fn missing_template_keeps_prompt() {
        assert_eq!(apply_template("", "ignored", "plain"), "plain");
    }
}
