use crate::error::LogError;
use std::str::FromStr;

/// Severity of a log record, strictly ordered from most to least urgent.
/// A record at level L is emitted iff `L <= threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Level {
  Fatal = 0,
  Error = 1,
  Warn = 2,
  #[default]
  Info = 3,
  Debug = 4,
  Trace = 5,
}

impl Level {
  /// Integer ordinal, lower is more urgent
  pub fn ordinal(&self) -> u8 {
    *self as u8
  }

  pub(crate) fn from_ordinal(ordinal: u8) -> Self {
    match ordinal {
      0 => Self::Fatal,
      1 => Self::Error,
      2 => Self::Warn,
      3 => Self::Info,
      4 => Self::Debug,
      _ => Self::Trace,
    }
  }

  /// Uppercase token used in output lines
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Fatal => "FATAL",
      Self::Error => "ERROR",
      Self::Warn => "WARN",
      Self::Info => "INFO",
      Self::Debug => "DEBUG",
      Self::Trace => "TRACE",
    }
  }
}

impl std::fmt::Display for Level {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for Level {
  type Err = LogError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "fatal" => Ok(Self::Fatal),
      "error" => Ok(Self::Error),
      "warn" => Ok(Self::Warn),
      "info" => Ok(Self::Info),
      "debug" => Ok(Self::Debug),
      "trace" => Ok(Self::Trace),
      other => Err(LogError::UnknownLevel(other.to_string())),
    }
  }
}
