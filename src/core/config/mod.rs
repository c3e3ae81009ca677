pub mod data;
pub mod io;
pub mod keys;
pub mod printing;


pub use data::{path_display, Config, GenerationConfig, StreamConfig};
pub use io::ConfigError;
pub use keys::{ConfigKey, KeyError};
