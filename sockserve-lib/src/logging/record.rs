use super::level::Level;
use crate::time_util::format_timestamp;
use chrono::{DateTime, Local};

/// One enqueued log record, immutable once built
#[derive(Debug)]
pub(crate) struct Record {
  pub(crate) level: Level,
  pub(crate) message: String,
  pub(crate) timestamp: DateTime<Local>,
  pub(crate) caller: Option<Caller>,
}

/// Call-site location captured on the producer thread
#[derive(Debug)]
pub(crate) struct Caller {
  pub(crate) file: String,
  pub(crate) line: u32,
}

impl Record {
  /// Render the output line, without the trailing newline.
  /// The level token is padded to 5 columns so lines align.
  pub(crate) fn format_line(&self) -> String {
    let ts = format_timestamp(&self.timestamp);
    match &self.caller {
      Some(caller) => format!(
        "{ts} {:<5} [{}:{}] {}",
        self.level.as_str(),
        caller.file,
        caller.line,
        self.message
      ),
      None => format!("{ts} {:<5} {}", self.level.as_str(), self.message),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn record_at(level: Level, caller: Option<Caller>) -> Record {
    Record {
      level,
      message: String::from("message text"),
      timestamp: Local.with_ymd_and_hms(2024, 1, 15, 14, 32, 10).unwrap(),
      caller,
    }
  }

  #[test]
  fn test_line_format_without_caller() {
    let line = record_at(Level::Warn, None).format_line();
    assert_eq!(line, "2024-01-15 14:32:10.000 WARN  message text");
  }

  #[test]
  fn test_line_format_with_caller() {
    let caller = Caller {
      file: String::from("server.rs"),
      line: 42,
    };
    let line = record_at(Level::Info, Some(caller)).format_line();
    assert_eq!(line, "2024-01-15 14:32:10.000 INFO  [server.rs:42] message text");
  }

  #[test]
  fn test_level_tokens_align() {
    let short = record_at(Level::Info, None).format_line();
    let long = record_at(Level::Error, None).format_line();
    assert_eq!(
      short.find("message text").unwrap(),
      long.find("message text").unwrap()
    );
  }
}
