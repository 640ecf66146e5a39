use crate::{constants::TCP_BACKLOG, error::ServerError, socket::bind_tcp_socket, target::Network, trace::*};
use std::{
  io,
  net::SocketAddr,
  pin::Pin,
  task::{Context, Poll},
};
use tokio::{
  io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf},
  net::{TcpListener, TcpStream},
};

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/* ---------------------------------------------------------- */
/// Byte-stream connection over either an inet or a path-based socket.
/// Both the client and the server worker path operate on this one type.
#[derive(Debug)]
pub enum ByteStream {
  /// TCP stream
  Tcp(TcpStream),
  /// Unix domain stream
  #[cfg(unix)]
  Unix(UnixStream),
}

impl ByteStream {
  /// Local inet address, `None` for path-based sockets
  pub fn local_addr(&self) -> Option<SocketAddr> {
    match self {
      Self::Tcp(s) => s.local_addr().ok(),
      #[cfg(unix)]
      Self::Unix(_) => None,
    }
  }

  /// Peer inet address, `None` for path-based sockets
  pub fn peer_addr(&self) -> Option<SocketAddr> {
    match self {
      Self::Tcp(s) => s.peer_addr().ok(),
      #[cfg(unix)]
      Self::Unix(_) => None,
    }
  }

  /// Shut down the write half, signalling end-of-stream to the peer
  pub async fn shutdown(&mut self) -> io::Result<()> {
    match self {
      Self::Tcp(s) => s.shutdown().await,
      #[cfg(unix)]
      Self::Unix(s) => s.shutdown().await,
    }
  }
}

impl AsyncRead for ByteStream {
  fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
    match self.get_mut() {
      Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
      #[cfg(unix)]
      Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
    }
  }
}

impl AsyncWrite for ByteStream {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
    match self.get_mut() {
      Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
      #[cfg(unix)]
      Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    match self.get_mut() {
      Self::Tcp(s) => Pin::new(s).poll_flush(cx),
      #[cfg(unix)]
      Self::Unix(s) => Pin::new(s).poll_flush(cx),
    }
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    match self.get_mut() {
      Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
      #[cfg(unix)]
      Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
    }
  }
}

/* ---------------------------------------------------------- */
/// One established connection as handed to the server's connect callback.
/// The handle exclusively owns its socket; dropping it on any exit path of
/// the worker releases the socket, so a second release is impossible.
#[derive(Debug)]
pub struct TcpConnection {
  stream: ByteStream,
  local_addr: Option<SocketAddr>,
  peer_addr: Option<SocketAddr>,
}

impl TcpConnection {
  pub(crate) fn new(stream: ByteStream) -> Self {
    let local_addr = stream.local_addr();
    let peer_addr = stream.peer_addr();
    Self {
      stream,
      local_addr,
      peer_addr,
    }
  }

  /// Local inet address captured at accept time, `None` for path-based sockets
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.local_addr
  }

  /// Remote inet address captured at accept time, `None` for path-based sockets
  pub fn peer_addr(&self) -> Option<SocketAddr> {
    self.peer_addr
  }

  /// Take the underlying stream out of the handle
  pub fn into_stream(self) -> ByteStream {
    self.stream
  }
}

impl AsyncRead for TcpConnection {
  fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
  }
}

impl AsyncWrite for TcpConnection {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
    Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.get_mut().stream).poll_flush(cx)
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
  }
}

/* ---------------------------------------------------------- */
/// Listening socket over either transport
pub(crate) enum ByteListener {
  Tcp(TcpListener),
  #[cfg(unix)]
  Unix(UnixListener),
}

impl ByteListener {
  /// Bind a listening socket for the given stream selector and address
  pub(crate) fn bind(network: &Network, address: &str) -> Result<Self, ServerError> {
    #[cfg(unix)]
    if network.is_path() {
      if address.is_empty() {
        return Err(ServerError::InvalidAddress(String::from("empty address")));
      }
      remove_stale_socket_file(address);
      let listener = UnixListener::bind(address)?;
      return Ok(Self::Unix(listener));
    }

    let addr = crate::target::resolve_addr(network, address)?;
    let socket = bind_tcp_socket(&addr)?;
    let listener = socket.listen(TCP_BACKLOG)?;
    Ok(Self::Tcp(listener))
  }

  /// Accept one connection, wrapping it into an owned handle
  pub(crate) async fn accept(&self) -> io::Result<TcpConnection> {
    let stream = match self {
      Self::Tcp(listener) => {
        let (stream, _) = listener.accept().await?;
        ByteStream::Tcp(stream)
      }
      #[cfg(unix)]
      Self::Unix(listener) => {
        let (stream, _) = listener.accept().await?;
        ByteStream::Unix(stream)
      }
    };
    Ok(TcpConnection::new(stream))
  }

  /// Bound inet address, `None` for path-based sockets
  pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
    match self {
      Self::Tcp(listener) => listener.local_addr().ok(),
      #[cfg(unix)]
      Self::Unix(_) => None,
    }
  }
}

/// A socket file left behind by a previous run blocks re-binding the path.
/// Only socket files are removed, anything else fails the subsequent bind.
#[cfg(unix)]
fn remove_stale_socket_file(path: &str) {
  use std::os::unix::fs::FileTypeExt;
  let Ok(meta) = std::fs::metadata(path) else {
    return;
  };
  if meta.file_type().is_socket() {
    debug!("Removing stale socket file: {path}");
    let _ = std::fs::remove_file(path);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};

  #[tokio::test]
  async fn test_accept_and_roundtrip() {
    let listener = ByteListener::bind(&Network::Tcp, "127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let client = tokio::spawn(async move {
      let mut stream = TcpStream::connect(addr).await.unwrap();
      stream.write_all(b"ping").await.unwrap();
      let mut buf = [0u8; 4];
      stream.read_exact(&mut buf).await.unwrap();
      buf
    });

    let mut conn = listener.accept().await.unwrap();
    assert!(conn.peer_addr().is_some());
    let mut buf = [0u8; 4];
    conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
    conn.write_all(b"pong").await.unwrap();

    assert_eq!(&client.await.unwrap(), b"pong");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_unix_listener_rebinds_over_stale_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("echo.sock");
    let path = path.to_str().unwrap();

    let first = ByteListener::bind(&Network::Unix, path).unwrap();
    drop(first);
    // the socket file persists after drop, bind must clean it up
    let second = ByteListener::bind(&Network::Unix, path);
    assert!(second.is_ok());
  }
}
