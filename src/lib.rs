//! Takeoff is a terminal client for streaming text generation from Takeoff
//! inference servers.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`api`] defines the wire payloads of the serving, management and
//!   OpenAI-compatible endpoints.
//! - [`core`] owns endpoint discovery, request building, SSE decoding, and
//!   the session controller that drives one streaming generation at a time.
//! - [`cli`] parses arguments and runs the chat REPL and one-shot commands.
//! - [`utils`] holds URL helpers and logging setup.
//!
//! The binary (`src/main.rs`) only calls [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
