use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use chrono::Local;
use tracing_subscriber::EnvFilter;

use crate::core::constants::LOG_FILTER_ENV;
use crate::core::message::{Message, Seal};

/// Installs the stderr `tracing` subscriber. The filter comes from
/// `TAKEOFF_LOG` and defaults to warnings only.
pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_env_var(LOG_FILTER_ENV)
        .with_default_directive(tracing::Level::WARN.into())
        .from_env_lossy();

    // A subscriber may already be set, e.g. by a test harness.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Appends finished conversation turns to a plain-text file.
pub struct TranscriptLog {
    file_path: PathBuf,
    user_name: String,
}

impl TranscriptLog {
    /// Opens (or creates) `path` and writes a session header.
    pub fn open(path: impl Into<PathBuf>, user_name: impl Into<String>) -> io::Result<Self> {
        let log = Self {
            file_path: path.into(),
            user_name: user_name.into(),
        };
        log.write_block(&format!(
            "## Session started {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ))?;
        Ok(log)
    }


    pub fn log_message(&self, message: &Message) -> io::Result<()> {
        let mut block = if message.is_user() {
            format!("{}: {}", self.user_name, message.content())
        } else {
            message.content().to_string()
        };
        match message.seal() {
            Some(Seal::Cancelled) => block.push_str("\n## (cancelled)"),
            Some(Seal::Failed) => block.push_str("\n## (failed)"),
            _ => {}
        }
        if block.is_empty() {
            return Ok(());
        }
        self.write_block(&block)
    }

    pub fn log_note(&self, note: &str) -> io::Result<()> {
        self.write_block(&format!("## {note}"))
    }

    fn write_block(&self, content: &str) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        let mut writer = BufWriter::new(file);

        for line in content.lines() {
            writeln!(writer, "{line}")?;
        }
        // Blank line between turns.
        writeln!(writer)?;
        writer.flush()
    }
}
