use crate::{
  connection::ByteStream,
  error::{ClientError, ServerError},
  target::{Network, resolve_addr},
};
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::{
  io::{AsyncReadExt, AsyncWriteExt},
  net::TcpStream,
};

#[cfg(unix)]
use tokio::net::UnixStream;

/// Connection state of a client, either kind rules out a half-initialized socket
enum ClientState {
  Disconnected,
  Connected(ByteStream),
}

/* ---------------------------------------------------------- */
/// Byte-stream dialing client.
///
/// All I/O operations require a prior successful [`connect`](Self::connect)
/// and fail with [`ClientError::NotConnected`] otherwise.
#[derive(Default)]
pub struct TcpClient {
  state: ClientState,
}

impl Default for ClientState {
  fn default() -> Self {
    Self::Disconnected
  }
}

impl TcpClient {
  /// Dial the given address. Selectors: `tcp`, `tcp4`, `tcp6`, `unix`.
  /// A connection already owned by this client is closed and replaced.
  pub async fn connect(&mut self, network: &str, address: &str) -> Result<(), ClientError> {
    let network: Network = network.parse().map_err(map_validation)?;
    if !network.is_stream() {
      return Err(ClientError::InvalidNetwork(format!(
        "{network} is not a stream selector"
      )));
    }

    // dropping any previous stream closes it before the replacement is dialed
    self.state = ClientState::Disconnected;

    #[cfg(unix)]
    if network.is_path() {
      if address.is_empty() {
        return Err(ClientError::InvalidAddress(String::from("empty address")));
      }
      let stream = UnixStream::connect(address).await?;
      self.state = ClientState::Connected(ByteStream::Unix(stream));
      return Ok(());
    }

    let addr = resolve_addr(&network, address).map_err(map_validation)?;
    let stream = TcpStream::connect(addr).await?;
    self.state = ClientState::Connected(ByteStream::Tcp(stream));
    Ok(())
  }

  /// Read up to `max_bytes` bytes, blocking until at least one byte arrives.
  /// A peer close surfaces as [`ClientError::ConnectionClosed`].
  pub async fn read(&mut self, max_bytes: usize) -> Result<Bytes, ClientError> {
    let ClientState::Connected(stream) = &mut self.state else {
      return Err(ClientError::NotConnected);
    };
    let mut buf = vec![0u8; max_bytes];
    let n = stream.read(&mut buf).await?;
    if n == 0 && max_bytes > 0 {
      return Err(ClientError::ConnectionClosed);
    }
    buf.truncate(n);
    Ok(Bytes::from(buf))
  }

  /// Write all bytes of `data`, returning the number written
  pub async fn write(&mut self, data: &[u8]) -> Result<usize, ClientError> {
    let ClientState::Connected(stream) = &mut self.state else {
      return Err(ClientError::NotConnected);
    };
    stream.write_all(data).await?;
    Ok(data.len())
  }

  /// Release the connection. Any close error is returned once; further
  /// calls are no-ops returning success.
  pub async fn close(&mut self) -> Result<(), ClientError> {
    match std::mem::replace(&mut self.state, ClientState::Disconnected) {
      ClientState::Disconnected => Ok(()),
      ClientState::Connected(mut stream) => {
        stream.shutdown().await?;
        Ok(())
      }
    }
  }

  /// Whether the client currently owns a connection
  pub fn is_connected(&self) -> bool {
    matches!(self.state, ClientState::Connected(_))
  }

  /// Local inet address, `None` when disconnected or path-based
  pub fn local_addr(&self) -> Option<SocketAddr> {
    match &self.state {
      ClientState::Connected(stream) => stream.local_addr(),
      ClientState::Disconnected => None,
    }
  }

  /// Peer inet address, `None` when disconnected or path-based
  pub fn peer_addr(&self) -> Option<SocketAddr> {
    match &self.state {
      ClientState::Connected(stream) => stream.peer_addr(),
      ClientState::Disconnected => None,
    }
  }
}

/// Validation errors from the shared selector/address parsing carry over verbatim
pub(crate) fn map_validation(e: ServerError) -> ClientError {
  match e {
    ServerError::InvalidNetwork(s) => ClientError::InvalidNetwork(s),
    ServerError::InvalidAddress(s) => ClientError::InvalidAddress(s),
    ServerError::IoError(e) => ClientError::IoError(e),
    other => ClientError::InvalidAddress(other.to_string()),
  }
}

/* ---------------------------------------------------------- */
#[cfg(test)]
mod tests {
  use super::*;
  use tokio::net::TcpListener;

  async fn spawn_echo_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      while let Ok((mut stream, _)) = listener.accept().await {
        tokio::spawn(async move {
          let mut buf = vec![0u8; 1024];
          while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 {
              break;
            }
            if stream.write_all(&buf[..n]).await.is_err() {
              break;
            }
          }
        });
      }
    });
    addr
  }

  #[tokio::test]
  async fn test_requires_connect_first() {
    let mut client = TcpClient::default();
    assert!(matches!(client.read(16).await, Err(ClientError::NotConnected)));
    assert!(matches!(client.write(b"x").await, Err(ClientError::NotConnected)));
    assert!(client.local_addr().is_none());
    assert!(client.peer_addr().is_none());
  }

  #[tokio::test]
  async fn test_connect_write_read() {
    let addr = spawn_echo_listener().await;
    let mut client = TcpClient::default();
    client.connect("tcp", &addr.to_string()).await.unwrap();
    assert!(client.is_connected());
    assert_eq!(client.peer_addr(), Some(addr));

    let written = client.write(b"hello").await.unwrap();
    assert_eq!(written, 5);
    let reply = client.read(1024).await.unwrap();
    assert_eq!(reply.as_ref(), b"hello");

    client.close().await.unwrap();
    assert!(!client.is_connected());
  }

  #[tokio::test]
  async fn test_close_is_idempotent() {
    let addr = spawn_echo_listener().await;
    let mut client = TcpClient::default();
    client.connect("tcp", &addr.to_string()).await.unwrap();
    client.close().await.unwrap();
    client.close().await.unwrap();
    assert!(matches!(client.read(16).await, Err(ClientError::NotConnected)));
  }

  #[tokio::test]
  async fn test_reconnect_replaces_connection() {
    let addr = spawn_echo_listener().await;
    let mut client = TcpClient::default();
    client.connect("tcp", &addr.to_string()).await.unwrap();
    let first_local = client.local_addr().unwrap();
    client.connect("tcp", &addr.to_string()).await.unwrap();
    assert!(client.is_connected());
    assert_ne!(client.local_addr().unwrap(), first_local);
  }

  #[tokio::test]
  async fn test_peer_close_is_distinct() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      drop(stream);
    });

    let mut client = TcpClient::default();
    client.connect("tcp", &addr.to_string()).await.unwrap();
    assert!(matches!(client.read(16).await, Err(ClientError::ConnectionClosed)));
  }

  #[tokio::test]
  async fn test_rejects_bad_selector_and_address() {
    let mut client = TcpClient::default();
    assert!(matches!(
      client.connect("udp", "127.0.0.1:1").await,
      Err(ClientError::InvalidNetwork(_))
    ));
    assert!(matches!(
      client.connect("tcp", "").await,
      Err(ClientError::InvalidAddress(_))
    ));
    assert!(matches!(
      client.connect("tcp", "127.0.0.1").await,
      Err(ClientError::InvalidAddress(_))
    ));
  }
}
