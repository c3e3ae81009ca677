pub mod accumulator;
pub mod api_error;
pub mod chat_stream;
pub mod codec;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod endpoints;
pub mod message;
pub mod prompt;
pub mod request;
pub mod session;
pub mod sse;
pub mod surface;
pub mod template;
