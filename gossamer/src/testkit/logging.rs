use crate::core::GossipError;
use std::str::FromStr;
use tracing::Level;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
  Off,
}
impl LogLevel {
  fn as_tracing(&self) -> Option<Level> {
    match self {
      LogLevel::Trace => Some(Level::TRACE),
      LogLevel::Debug => Some(Level::DEBUG),
      LogLevel::Info => Some(Level::INFO),
      LogLevel::Warn => Some(Level::WARN),
      LogLevel::Error => Some(Level::ERROR),
      LogLevel::Off => None,
    }
  }
}
impl FromStr for LogLevel {
  type Err = GossipError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "trace" => Ok(LogLevel::Trace),
      "debug" => Ok(LogLevel::Debug),
      "info" => Ok(LogLevel::Info),
      "warn" => Ok(LogLevel::Warn),
      "error" => Ok(LogLevel::Error),
      "off" => Ok(LogLevel::Off),
      _ => Err(GossipError::InvalidSetting(format!("unknown log level `{}`", s))),
    }
  }
}

/// Installs a formatting subscriber at `level` for the whole process. Returns false if one was
/// already installed, which makes it safe to call from every test.
pub fn init_logging(level: LogLevel) -> bool {
  match level.as_tracing() {
    Some(level) => tracing_subscriber::fmt().with_max_level(level).try_init().is_ok(),
    None => false,
  }
}

#[test]
fn test_log_level_parse() {
  assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
  assert_eq!("off".parse::<LogLevel>().unwrap(), LogLevel::Off);
  assert!("loud".parse::<LogLevel>().is_err());
  assert!(LogLevel::Trace < LogLevel::Error);
  assert!(!init_logging(LogLevel::Off));
}
