use crate::log::warn;
use anyhow::anyhow;
use serde::Deserialize;
use sockserve_lib::{Level, LogConfig, LogConfigBuilder, LogOutput};
use std::{
  collections::HashSet,
  fs,
  path::PathBuf,
  str::FromStr,
  time::Duration,
};

#[derive(Deserialize, Debug, Default, PartialEq, Clone)]
pub struct ConfigToml {
  /// TCP listen address, e.g. "127.0.0.1:7070" or ":7070"
  pub tcp_listen: Option<String>,
  /// Capacity of the accepted-connection handoff channel
  pub tcp_pool_size: Option<usize>,
  /// Cap on concurrently served TCP connections
  pub tcp_max_connections: Option<usize>,
  /// UDP listen address
  pub udp_listen: Option<String>,
  /// Per-packet application buffer in bytes
  pub udp_recv_buffer: Option<usize>,
  /// Dispatch each packet on its own task instead of inline
  pub udp_async: Option<bool>,
  /// Cap on in-flight UDP handlers in async mode
  pub udp_max_concurrent: Option<usize>,
  /// Deadline in seconds awaiting UDP handlers on shutdown
  pub udp_shutdown_wait: Option<u64>,
  /// Requested OS receive buffer for the UDP socket
  pub udp_read_buffer: Option<usize>,
  /// Requested OS send buffer for the UDP socket
  pub udp_write_buffer: Option<usize>,
  /// Access log writer settings
  pub log: Option<LogToml>,
}

#[derive(Deserialize, Debug, Default, PartialEq, Clone)]
pub struct LogToml {
  /// Severity threshold name, e.g. "info"
  pub level: Option<String>,
  /// One of "stdout", "stderr", "file"
  pub output: Option<String>,
  /// Directory of rotated files, output = "file" only
  pub directory: Option<String>,
  /// File name prefix, output = "file" only
  pub prefix: Option<String>,
  pub retention_days: Option<u16>,
  pub queue_capacity: Option<usize>,
  pub rotation_bytes: Option<u64>,
  pub capture_caller: Option<bool>,
}

impl ConfigToml {
  pub fn new(config_file: &str) -> Result<Self, anyhow::Error> {
    let config_str = fs::read_to_string(config_file)?;

    // Check unused fields during deserialization
    let t = toml::de::Deserializer::new(&config_str);
    let mut unused = HashSet::new();

    let res = serde_ignored::deserialize(t, |path| {
      unused.insert(path.to_string());
    })
    .map_err(|e| anyhow::anyhow!(e));

    if !unused.is_empty() {
      let str = unused.iter().fold(String::new(), |acc, x| acc + x + "\n");
      warn!("Configuration file contains unsupported fields. Check typos:\n{}", str);
    }

    res
  }

  pub fn udp_shutdown_wait(&self) -> Option<Duration> {
    self.udp_shutdown_wait.map(Duration::from_secs)
  }
}

impl LogToml {
  /// Build the writer configuration, validating names early
  pub fn to_log_config(&self) -> Result<LogConfig, anyhow::Error> {
    let mut builder = LogConfigBuilder::default();

    if let Some(level) = &self.level {
      builder.threshold(Level::from_str(level)?);
    }

    match self.output.as_deref() {
      None | Some("stdout") => {
        builder.output(LogOutput::Stdout);
      }
      Some("stderr") => {
        builder.output(LogOutput::Stderr);
      }
      Some("file") => {
        let directory = self
          .directory
          .as_ref()
          .ok_or_else(|| anyhow!("log.directory is required for file output"))?;
        let prefix = self
          .prefix
          .as_ref()
          .ok_or_else(|| anyhow!("log.prefix is required for file output"))?;
        builder.output(LogOutput::File {
          directory: PathBuf::from(directory),
          prefix: prefix.clone(),
        });
      }
      Some(other) => return Err(anyhow!("Unknown log output: {other}")),
    }

    if let Some(days) = self.retention_days {
      builder.retention_days(days);
    }
    if let Some(capacity) = self.queue_capacity {
      builder.queue_capacity(capacity);
    }
    if let Some(bytes) = self.rotation_bytes {
      builder.rotation_bytes(bytes);
    }
    if let Some(capture) = self.capture_caller {
      builder.capture_caller(capture);
    }

    Ok(builder.build()?)
  }
}
