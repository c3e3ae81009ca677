//! Line-based interactive chat

use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use reqwest::Client;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing::warn;

use crate::cli::new_session;
use crate::core::config::Config;
use crate::core::endpoints::EndpointResolver;
use crate::core::message::{Message, Role};
use crate::core::session::{SessionOutcome, SessionStatus, StreamReceiver};
use crate::core::surface::{ChatSurface, SurfaceError};
use crate::utils::logging::TranscriptLog;

enum Input {
    Message(String),
    Reset,
    Quit,
    Empty,
}

fn parse_input(line: &str) -> Input {
    match line.trim() {
        "" => Input::Empty,
        "/quit" | "/exit" => Input::Quit,
        "/reset" => Input::Reset,
        _ => Input::Message(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

/// How a streamed reply ended, and what was typed while it streamed.
struct ReplyEnd {
    outcome: Option<SessionOutcome>,
    rejected: usize,
    quit: bool,
}

/// Drives the active reply to its end while still reading input. Lines that
/// arrive mid-reply are refused with a busy notice instead of being queued;
/// `/quit` cancels the reply and ends the chat once it has settled.
async fn drive_reply<R>(
    surface: &mut ChatSurface,
    rx: &mut StreamReceiver,
    lines: &mut Lines<R>,
) -> io::Result<ReplyEnd>
where
    R: AsyncBufRead + Unpin,
{
    let mut end = ReplyEnd {
        outcome: None,
        rejected: 0,
        quit: false,
    };
    let mut input_open = true;

    while surface.controller().is_busy() {
        tokio::select! {
            message = rx.recv() => match message {
                Some((message, stream_id)) => {
                    end.outcome = surface.controller_mut().handle_message(message, stream_id);
                }
                None => end.outcome = surface.controller_mut().handle_channel_closed(),
            },
            line = lines.next_line(), if input_open => match line? {
                Some(line) => {
                    let refused = match parse_input(&line) {
                        Input::Empty => None,
                        Input::Quit => {
                            end.quit = true;
                            surface.controller_mut().cancel();
                            None
                        }
                        Input::Reset => surface.reset().err(),
                        Input::Message(text) => surface.send(&text).err(),
                    };
                    if let Some(error) = refused {
                        eprintln!("\n⏳ {error}; input ignored until the reply finishes");
                        end.rejected += 1;
                    }
                }
                None => input_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                surface.controller_mut().cancel();
            }
        }
    }
    Ok(end)
}

pub async fn run_chat(
    config: &Config,
    client: Client,
    resolver: Arc<EndpointResolver>,
    log_file: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let (controller, mut rx) = new_session(config, client, resolver);
    let mut surface = ChatSurface::new(
        controller,
        config.system_prompt(),
        config.sampling_params(),
        config.consumer_group(),
    );
    let transcript_log = log_file
        .map(|path| TranscriptLog::open(path, config.user_name()))
        .transpose()?;

    eprintln!(
        "Chatting with '{}' at {} ({} schema). Ctrl+C cancels a reply, /quit exits.",
        config.consumer_group(),
        config.host(),
        config.schema()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}> ", config.user_name());
        io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            return Ok(());
        };

        let text = match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => return Ok(()),
            Input::Reset => {
                surface.reset()?;
                if let Some(log) = &transcript_log {
                    log.log_note("Conversation reset")?;
                }
                eprintln!("Started a new conversation.");
                continue;
            }
            Input::Message(text) => text,
        };

        match surface.send(&text) {
            Ok(_) => {}
            Err(SurfaceError::EmptyInput) => continue,
            Err(error) => {
                eprintln!("❌ {error}");
                continue;
            }
        }
        if let Some(log) = &transcript_log {
            log.log_message(&Message::new(Role::User, text.as_str()))?;
        }

        print!("{}: ", config.bot_name());
        io::stdout().flush()?;
        let end = drive_reply(&mut surface, &mut rx, &mut lines).await?;
        println!();

        if let Some(outcome) = &end.outcome {
            if outcome.status == SessionStatus::Cancelled {
                eprintln!("(cancelled)");
            }
            if let (Some(log), Some(message)) = (&transcript_log, &outcome.message) {
                if let Err(error) = log.log_message(message) {
                    warn!(%error, "failed to write transcript log");
                }
            }
        }
        if end.quit {
            return Ok(());
        }
    }
}
