//! Command-line interface parsing and handling

pub mod chat;
pub mod generate;
pub mod inspect;

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use reqwest::Client;

use crate::cli::chat::run_chat;
use crate::cli::generate::{run_generate, GenerateOptions};
use crate::cli::inspect::{show_endpoints, show_template};
use crate::core::chat_stream::ChatStreamService;
use crate::core::config::{Config, ConfigKey, KeyError};
use crate::core::endpoints::EndpointResolver;
use crate::core::message::Message;
use crate::core::session::{
    SessionController, SessionError, SessionObserver, SessionOutcome, StreamReceiver,
};
use crate::utils::logging::init_tracing;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("VERGEN_GIT_DESCRIBE"),
    "\nbuilt: ",
    env!("VERGEN_BUILD_DATE"),
    "\ntarget: ",
    env!("VERGEN_CARGO_TARGET_TRIPLE"),
    "\nrustc: ",
    env!("VERGEN_RUSTC_SEMVER"),
);

#[derive(Parser)]
#[command(name = "takeoff")]
#[command(version, long_version = LONG_VERSION)]
#[command(about = "Stream text generation from a Takeoff inference server")]
#[command(
    long_about = "Takeoff talks to a Takeoff deployment over its native /generate_stream \
endpoint or its OpenAI-compatible chat completions endpoint, printing tokens as they arrive.\n\n\
Settings are read from config.toml in the platform config directory and can be \
overridden per invocation with the flags below.\n\n\
Environment Variables:\n\
  TAKEOFF_LOG       tracing filter for diagnostics on stderr (e.g. 'takeoff=debug')\n\n\
Controls:\n\
  Ctrl+C            Cancel the response that is streaming; quit when idle\n\
  /reset            Start a new conversation (chat)\n\
  /quit             Leave the chat"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Serving address of the deployment, e.g. http://localhost:8000
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Backend API to use: "openai" or "native"
    #[arg(long, global = true)]
    pub schema: Option<String>,

    /// Consumer group (model) to send requests to
    #[arg(short = 'g', long, global = true)]
    pub consumer_group: Option<String>,

    #[arg(long, global = true)]
    pub max_new_tokens: Option<String>,

    #[arg(long, global = true)]
    pub temperature: Option<String>,

    #[arg(long, global = true)]
    pub top_p: Option<String>,

    #[arg(long, global = true)]
    pub top_k: Option<String>,

    /// Constrain generation to a regular expression (generate only)
    #[arg(long, global = true)]
    pub regex: Option<String>,

    /// Constrain generation to a JSON schema (generate only)
    #[arg(long, global = true, value_name = "SCHEMA")]
    pub json_schema: Option<String>,

    /// Seconds to wait for the next chunk of a response; 0 waits forever
    #[arg(long, global = true, value_name = "SECS")]
    pub read_timeout: Option<String>,

    /// Append the conversation to this file
    #[arg(short = 'l', long, global = true)]
    pub log: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Generate a single completion and print it
    Generate {
        /// Prompt text; read from stdin when omitted
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
        /// Fill a {{name}} placeholder, e.g. --var city=Paris
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,
        /// Wrap the prompt in the consumer group's chat template
        #[arg(long)]
        template: bool,
    },
    /// Show the discovered management and inference endpoints
    Endpoints,
    /// Print the chat template of the consumer group selected with -g
    Template,
    /// Show the current configuration
    Config,
    /// Set a configuration value
    Set {
        key: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Unset a configuration value
    Unset { key: String },
}

impl Args {
    fn overrides(&self) -> [(ConfigKey, Option<&String>); 10] {
        [
            (ConfigKey::Host, self.host.as_ref()),
            (ConfigKey::Schema, self.schema.as_ref()),
            (ConfigKey::ConsumerGroup, self.consumer_group.as_ref()),
            (ConfigKey::MaxNewTokens, self.max_new_tokens.as_ref()),
            (ConfigKey::Temperature, self.temperature.as_ref()),
            (ConfigKey::TopP, self.top_p.as_ref()),
            (ConfigKey::TopK, self.top_k.as_ref()),
            (ConfigKey::RegexString, self.regex.as_ref()),
            (ConfigKey::JsonSchema, self.json_schema.as_ref()),
            (ConfigKey::ReadTimeoutSecs, self.read_timeout.as_ref()),
        ]
    }

    /// Layers command-line flags over the loaded config without saving them.
    pub fn apply_overrides(&self, config: &mut Config) -> Result<(), KeyError> {
        for (key, value) in self.overrides() {
            if let Some(value) = value {
                config.set_key(key, value)?;
            }
        }
        Ok(())
    }
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main(args))
}

async fn async_main(mut args: Args) -> Result<(), Box<dyn Error>> {
    let (mut config, config_path) = Config::load(args.config.as_deref())?;
    let command = args.command.take().unwrap_or(Commands::Chat);

    match command {
        Commands::Config => {
            config.print_all();
            Ok(())
        }
        Commands::Set { key, value } => {
            let key: ConfigKey = key.parse()?;
            if value.is_empty() {
                config.print_all();
                return Ok(());
            }
            let value = value.join(" ");
            config.set_key(key, &value)?;
            config.save_to_path(&config_path)?;
            println!("✅ Set {key} to: {}", config.effective_value(key));
            Ok(())
        }
        Commands::Unset { key } => {
            let key: ConfigKey = key.parse()?;
            config.unset_key(key);
            config.save_to_path(&config_path)?;
            println!("✅ Unset {key}");
            Ok(())
        }
        command => {
            args.apply_overrides(&mut config)?;
            let client = build_client()?;
            let resolver = Arc::new(
                EndpointResolver::new(client.clone(), &config.host())?
                    .with_request_timeout(config.decoder_config().read_timeout),
            );
            match command {
                Commands::Endpoints => show_endpoints(&resolver).await,
                Commands::Template => {
                    show_template(client, &resolver, config.consumer_group()).await
                }
                Commands::Generate {
                    prompt,
                    vars,
                    template,
                } => {
                    let options = GenerateOptions {
                        prompt,
                        vars,
                        template,
                    };
                    run_generate(&config, client, resolver, options).await
                }
                _ => run_chat(&config, client, resolver, args.log.as_deref()).await,
            }
        }
    }
}

fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("takeoff/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Wires a controller to a stream service for the configured schema.
pub(crate) fn new_session(
    config: &Config,
    client: Client,
    resolver: Arc<EndpointResolver>,
) -> (SessionController, StreamReceiver) {
    let (service, rx) = ChatStreamService::new(client, resolver, config.decoder_config());
    let mut controller = SessionController::new(config.schema(), Box::new(service));
    controller.add_observer(Box::new(TerminalPrinter));
    (controller, rx)
}

/// Streams fragments to stdout and failures to stderr.
struct TerminalPrinter;

impl SessionObserver for TerminalPrinter {
    fn fragment_applied(&mut self, appended: &str, _message: &Message) {
        print!("{appended}");
        let _ = io::stdout().flush();
    }

    fn error_raised(&mut self, error: &SessionError) {
        eprintln!("\n❌ {error}");
    }
}

/// Drives the active session to its end. Ctrl+C cancels it.
pub(crate) async fn drive_session(
    controller: &mut SessionController,
    rx: &mut StreamReceiver,
) -> Option<SessionOutcome> {
    while controller.is_busy() {
        tokio::select! {
            message = rx.recv() => match message {
                Some((message, stream_id)) => {
                    if let Some(outcome) = controller.handle_message(message, stream_id) {
                        return Some(outcome);
                    }
                }
                None => return controller.handle_channel_closed(),
            },
            _ = tokio::signal::ctrl_c() => {
                controller.cancel();
            }
        }
    }
    None
}
