//! Prompt shaping for the two surfaces: flattening a chat transcript into a
//! single native prompt, and `{{variable}}` substitution for playground text.

use std::collections::HashMap;

use crate::core::message::Message;

const SPEAKER_PREFIXES: &[&str] = &["TitanBot: ", "You: ", "Assistant: ", "Me: "];
const END_OF_SEQUENCE: &str = "</s>";

/// Removes a leading speaker tag (optionally preceded by one character) and
/// the first end-of-sequence marker from a prior turn.
pub fn preprocess_turn(text: &str) -> String {
    let stripped = strip_speaker_prefix(text)
        .map(|rest| format!(" {rest}"))
        .unwrap_or_else(|| text.to_string());
    stripped.replacen(END_OF_SEQUENCE, "", 1)
}

fn strip_speaker_prefix(text: &str) -> Option<&str> {
    let mut offsets = Vec::with_capacity(2);
    if let Some(first) = text.chars().next().filter(|c| *c != '\n') {
        offsets.push(first.len_utf8());
    }
    offsets.push(0);

    offsets.into_iter().find_map(|offset| {
        SPEAKER_PREFIXES
            .iter()
            .find_map(|prefix| text[offset..].strip_prefix(prefix))
    })
}

/// Flattens a transcript into the prompt format native backends expect:
/// the system prompt, one `role: content` line per turn, then an open
/// assistant turn.
pub fn prepare_chat_prompt(system_prompt: &str, messages: &[Message]) -> String {
    let turns = messages
        .iter()
        .map(|message| format!("{}: {}", message.role, preprocess_turn(message.content())))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{system_prompt}\n{turns}\nAssistant: ")
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Yields `(start, end, name)` for every `{{name}}` placeholder in `text`.
fn placeholders(text: &str) -> impl Iterator<Item = (usize, usize, &str)> {
    let mut cursor = 0;
    std::iter::from_fn(move || {
        while let Some(found) = text[cursor..].find("{{") {
            let start = cursor + found;
            let name_start = start + 2;
            let name_len = text[name_start..]
                .find(|c: char| !is_word_char(c))
                .unwrap_or(text.len() - name_start);
            let name_end = name_start + name_len;
            if name_len > 0 && text[name_end..].starts_with("}}") {
                cursor = name_end + 2;
                return Some((start, cursor, &text[name_start..name_end]));
            }
            cursor = start + 1;
        }
        None
    })
}

/// Distinct placeholder names in order of first appearance.
pub fn extract_variables(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (_, _, name) in placeholders(text) {
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Replaces placeholders with mapped values. Missing or empty mappings leave
/// the placeholder as written.
pub fn substitute_variables(text: &str, mappings: &HashMap<String, String>) -> String {
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    for (start, end, name) in placeholders(text) {
        output.push_str(&text[last..start]);
        match mappings.get(name).filter(|value| !value.is_empty()) {
            Some(value) => output.push_str(value),
            None => output.push_str(&text[start..end]),
        }
        last = end;
    }
    output.push_str(&text[last..]);
    output
}

/// Parses `name=value` pairs from the command line.
pub fn parse_variable_assignment(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(is_word_char) {
        return Err(format!("invalid variable name '{name}'"));
    }
    Ok((name.to_string(), value.to_string()))
}
