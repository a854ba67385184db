//! Bentley - theatrical log formatting for `tracing`
//!
//! ## Features
//!
//! - Bracketed, color-coded level tags (`[info]`, `[warn]`, `[error]`, `[debug]`, `[verb]`)
//! - Multi-line message support with the tag repeated on every line
//! - Optional `HH:MM:SS` timestamps for event-style logging
//! - All output to stderr, colored only when a human is watching
//!
//! ## Usage
//!
//! Call `bentley::init(verbosity)` once at startup, then log through the
//! ordinary `tracing` macros. `RUST_LOG` overrides the verbosity mapping.

use std::fmt;

use anyhow::{anyhow, Result};
use chrono::Local;
use colored::*;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const PREFIX_WIDTH: usize = 7;

fn level_style(level: Level) -> (&'static str, Color) {
  match level {
    Level::ERROR => ("error", Color::Red),
    Level::WARN => ("warn", Color::Yellow),
    Level::INFO => ("info", Color::Blue),
    Level::DEBUG => ("debug", Color::Magenta),
    _ => ("verb", Color::Cyan),
  }
}

/// Format the bracketed tag for a level, padded so messages line up
pub fn format_prefix(level: Level, ansi: bool) -> String {
  let (tag, color) = level_style(level);
  let padding = PREFIX_WIDTH.saturating_sub(tag.len() + 2);

  if ansi {
    format!("[{}]{:<padding$}", tag.color(color).bold(), "")
  } else {
    format!("[{tag}]{:<padding$}", "")
  }
}

/// Create a banner line of the specified length and character
pub fn banner_line(length: usize, char: char) -> String {
  char.to_string().repeat(length)
}

/// Frame a title between two banner lines
pub fn banner(title: &str, width: usize) -> String {
  let line = banner_line(width, '=');
  format!("{line}\n{title}\n{line}")
}

/// Event formatter that renders tracing events the bentley way
#[derive(Debug, Clone)]
pub struct BentleyFormat {
  ansi: bool,
  timestamps: bool,
}

impl Default for BentleyFormat {
  fn default() -> Self {
    Self::new()
  }
}

impl BentleyFormat {
  /// Colors follow whether stderr is attended by a user
  pub fn new() -> Self {
    Self { ansi: console::user_attended_stderr(), timestamps: false }
  }

  pub fn with_ansi(mut self, ansi: bool) -> Self {
    self.ansi = ansi;
    self
  }

  pub fn with_timestamps(mut self, timestamps: bool) -> Self {
    self.timestamps = timestamps;
    self
  }

  fn timestamp(&self) -> Option<String> {
    if !self.timestamps {
      return None;
    }

    let stamp = Local::now().format("%H:%M:%S").to_string();
    if self.ansi {
      Some(format!("[{}]", stamp.cyan()))
    } else {
      Some(format!("[{stamp}]"))
    }
  }
}

impl<S, N> FormatEvent<S, N> for BentleyFormat
where
  S: Subscriber + for<'a> LookupSpan<'a>,
  N: for<'a> FormatFields<'a> + 'static,
{
  fn format_event(
    &self,
    ctx: &FmtContext<'_, S, N>,
    mut writer: Writer<'_>,
    event: &Event<'_>,
  ) -> fmt::Result {
    let mut message = String::new();
    ctx.field_format().format_fields(Writer::new(&mut message), event)?;

    let mut prefix = format_prefix(*event.metadata().level(), self.ansi);
    if let Some(stamp) = self.timestamp() {
      prefix = format!("{prefix} {stamp}");
    }

    if message.is_empty() {
      return writeln!(writer, "{prefix}");
    }

    for line in message.lines() {
      writeln!(writer, "{prefix} {line}")?;
    }
    Ok(())
  }
}

/// Map a `-v` count to a default filter directive
pub fn default_directive(verbosity: u8) -> &'static str {
  match verbosity {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  }
}

/// Build the filter, preferring `RUST_LOG` when it is set and valid
pub fn filter_for(verbosity: u8) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)))
}

/// Install the global subscriber, failing if one is already installed
pub fn try_init(verbosity: u8) -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(filter_for(verbosity))
    .event_format(BentleyFormat::new())
    .with_writer(std::io::stderr)
    .try_init()
    .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}

/// Install the global subscriber; a second call is a no-op
pub fn init(verbosity: u8) {
  let _ = try_init(verbosity);
}
