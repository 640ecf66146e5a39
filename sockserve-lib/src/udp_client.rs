use crate::{
  error::ClientError,
  socket::bind_udp_socket,
  target::{Network, resolve_addr},
  tcp_client::map_validation,
};
use bytes::Bytes;
use std::{net::SocketAddr, time::Duration};
use tokio::net::UdpSocket;

/// Connection state of the client, a connected socket always has one default peer
enum ClientState {
  Disconnected,
  Connected(UdpSocket),
}

/* ---------------------------------------------------------- */
/// Connected-mode UDP client with one default peer.
///
/// All I/O operations require a prior successful [`connect`](Self::connect)
/// and fail with [`ClientError::NotConnected`] otherwise.
#[derive(Default)]
pub struct UdpClient {
  state: ClientState,
}

impl Default for ClientState {
  fn default() -> Self {
    Self::Disconnected
  }
}

impl UdpClient {
  /// Dial a connected UDP socket. Selectors: `udp`, `udp4`, `udp6`.
  /// A socket already owned by this client is closed and replaced.
  pub async fn connect(&mut self, network: &str, address: &str) -> Result<(), ClientError> {
    let network: Network = network.parse().map_err(map_validation)?;
    if !network.is_datagram() {
      return Err(ClientError::InvalidNetwork(format!(
        "{network} is not a datagram selector"
      )));
    }
    let peer = resolve_addr(&network, address).map_err(map_validation)?;

    self.state = ClientState::Disconnected;

    let local: SocketAddr = if peer.is_ipv6() {
      "[::]:0".parse().map_err(|_| ClientError::InvalidAddress(String::from("[::]:0")))?
    } else {
      "0.0.0.0:0"
        .parse()
        .map_err(|_| ClientError::InvalidAddress(String::from("0.0.0.0:0")))?
    };
    let socket = UdpSocket::from_std(bind_udp_socket(&local, None, None)?)?;
    socket.connect(peer).await?;
    self.state = ClientState::Connected(socket);
    Ok(())
  }

  /// Send one datagram to the default peer, returning the bytes sent
  pub async fn send(&self, data: &[u8]) -> Result<usize, ClientError> {
    let ClientState::Connected(socket) = &self.state else {
      return Err(ClientError::NotConnected);
    };
    Ok(socket.send(data).await?)
  }

  /// Receive one datagram of up to `max_bytes`, returning the payload and the
  /// sender address. `Some(timeout)` sets a read deadline surfaced as
  /// [`ClientError::Timeout`]; `None` or a zero duration disables it.
  pub async fn receive(&self, max_bytes: usize, timeout: Option<Duration>) -> Result<(Bytes, SocketAddr), ClientError> {
    let ClientState::Connected(socket) = &self.state else {
      return Err(ClientError::NotConnected);
    };
    let mut buf = vec![0u8; max_bytes];
    let (n, from) = match timeout {
      Some(deadline) if !deadline.is_zero() => tokio::time::timeout(deadline, socket.recv_from(&mut buf))
        .await
        .map_err(|_| ClientError::Timeout)??,
      _ => socket.recv_from(&mut buf).await?,
    };
    buf.truncate(n);
    Ok((Bytes::from(buf), from))
  }

  /// Release the socket; further calls are no-ops returning success
  pub async fn close(&mut self) -> Result<(), ClientError> {
    self.state = ClientState::Disconnected;
    Ok(())
  }

  /// Whether the client currently owns a connected socket
  pub fn is_connected(&self) -> bool {
    matches!(self.state, ClientState::Connected(_))
  }

  /// Local socket address, `None` when disconnected
  pub fn local_addr(&self) -> Option<SocketAddr> {
    match &self.state {
      ClientState::Connected(socket) => socket.local_addr().ok(),
      ClientState::Disconnected => None,
    }
  }

  /// Default peer address, `None` when disconnected
  pub fn peer_addr(&self) -> Option<SocketAddr> {
    match &self.state {
      ClientState::Connected(socket) => socket.peer_addr().ok(),
      ClientState::Disconnected => None,
    }
  }
}

/* ---------------------------------------------------------- */
#[cfg(test)]
mod tests {
  use super::*;

  async fn spawn_echo_socket() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
      let mut buf = vec![0u8; 2048];
      while let Ok((n, from)) = socket.recv_from(&mut buf).await {
        let _ = socket.send_to(&buf[..n], from).await;
      }
    });
    addr
  }

  #[tokio::test]
  async fn test_requires_connect_first() {
    let client = UdpClient::default();
    assert!(matches!(client.send(b"x").await, Err(ClientError::NotConnected)));
    assert!(matches!(client.receive(16, None).await, Err(ClientError::NotConnected)));
  }

  #[tokio::test]
  async fn test_send_receive_roundtrip() {
    let addr = spawn_echo_socket().await;
    let mut client = UdpClient::default();
    client.connect("udp", &addr.to_string()).await.unwrap();
    assert_eq!(client.peer_addr(), Some(addr));

    let sent = client.send(b"token-42").await.unwrap();
    assert_eq!(sent, 8);
    let (payload, from) = client.receive(1024, Some(Duration::from_secs(1))).await.unwrap();
    assert_eq!(payload.as_ref(), b"token-42");
    assert_eq!(from, addr);

    client.close().await.unwrap();
    assert!(!client.is_connected());
  }

  #[tokio::test]
  async fn test_receive_timeout_is_distinct() {
    // a bound socket that never answers
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = silent.local_addr().unwrap();

    let mut client = UdpClient::default();
    client.connect("udp", &addr.to_string()).await.unwrap();
    let res = client.receive(64, Some(Duration::from_millis(50))).await;
    assert!(matches!(res, Err(ClientError::Timeout)));
  }

  #[tokio::test]
  async fn test_close_is_idempotent() {
    let addr = spawn_echo_socket().await;
    let mut client = UdpClient::default();
    client.connect("udp", &addr.to_string()).await.unwrap();
    client.close().await.unwrap();
    client.close().await.unwrap();
  }

  #[tokio::test]
  async fn test_rejects_stream_selector() {
    let mut client = UdpClient::default();
    assert!(matches!(
      client.connect("tcp", "127.0.0.1:1").await,
      Err(ClientError::InvalidNetwork(_))
    ));
  }
}
