/// Errors that happen during server start, serve and stop
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
  /* --------------------------------------- */
  #[error("IO error: {0}")]
  IoError(#[from] std::io::Error),

  /* --------------------------------------- */
  #[error("Invalid network selector: {0}")]
  InvalidNetwork(String),

  #[error("Invalid address: {0}")]
  InvalidAddress(String),

  #[error("Pool size must be positive")]
  InvalidPoolSize,

  #[error("Receive buffer size must be positive")]
  InvalidBufferSize,
}

/// Errors that happen on the client side of a connection
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
  /* --------------------------------------- */
  #[error("IO error: {0}")]
  IoError(#[from] std::io::Error),

  /* --------------------------------------- */
  #[error("Not connected, call connect() first")]
  NotConnected,

  #[error("Connection closed by peer")]
  ConnectionClosed,

  #[error("Receive timed out")]
  Timeout,

  /* --------------------------------------- */
  #[error("Invalid network selector: {0}")]
  InvalidNetwork(String),

  #[error("Invalid address: {0}")]
  InvalidAddress(String),
}

/// Errors that happen during building and running the log pipeline
#[derive(thiserror::Error, Debug)]
pub enum LogError {
  /* --------------------------------------- */
  #[error("IO error: {0}")]
  IoError(#[from] std::io::Error),

  /* --------------------------------------- */
  #[error("Unknown log level name: {0}")]
  UnknownLevel(String),

  #[error("Invalid log configuration: {0}")]
  InvalidConfig(String),
}
