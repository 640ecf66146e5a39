use crate::{
  connection::{ByteListener, TcpConnection},
  count::ConnectionCount,
  error::ServerError,
  target::Network,
  trace::*,
};
use std::{
  future::Future,
  io,
  net::SocketAddr,
  pin::Pin,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Callback invoked by a worker with each accepted connection.
/// The worker owns the connection for the duration of the call and releases it afterwards.
pub type ConnectHandler = Arc<dyn Fn(TcpConnection) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback invoked with accept/receive loop errors observed while running
pub type FailureHandler = Arc<dyn Fn(io::Error) + Send + Sync>;

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, Default, derive_builder::Builder)]
#[builder(default)]
/// Tuning knobs of the TCP server beyond the start arguments
pub struct TcpServerConfig {
  /// Cap on concurrently served connections. `None` leaves concurrency
  /// unbounded; the accept loop defers further accepts while at the cap.
  max_connections: Option<usize>,
  /// Connection counter, set a shared counter if the total over several servers is needed
  connection_count: ConnectionCount,
}

/* ---------------------------------------------------------- */
/// Concurrent TCP accept server with a worker-dispatch pipeline.
///
/// Accepted connections are pushed onto a bounded handoff channel whose
/// capacity equals the start-time pool size; one worker task is spawned per
/// enqueued connection. A full channel blocks the accept loop, propagating
/// sink slowness upstream instead of dropping connections.
#[derive(Default)]
pub struct TcpServer {
  /// Running flag, `false -> true` on start and `true -> false` on stop
  running: Arc<AtomicBool>,
  config: TcpServerConfig,
  /// State held between start and stop
  active: Mutex<Option<Active>>,
}

/// Live state of a started server
struct Active {
  cancel_token: CancellationToken,
  accept_tracker: TaskTracker,
  worker_tracker: TaskTracker,
  local_addr: Option<SocketAddr>,
}

impl TcpServer {
  /// Create a server with explicit tuning knobs
  pub fn with_config(config: TcpServerConfig) -> Self {
    Self {
      config,
      ..Default::default()
    }
  }

  /// Whether the server is currently serving
  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  /// Bound inet address while running, `None` otherwise or for path-based sockets
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.active.lock().ok().and_then(|guard| guard.as_ref().and_then(|a| a.local_addr))
  }

  /// Start serving on the given network selector and address.
  ///
  /// `pool_size` bounds the backlog of accepted-but-not-yet-dispatched
  /// connections, not concurrency; see [`TcpServerConfig`] for the cap.
  /// A running server is stopped first, so the same instance can be moved
  /// to a different address.
  pub async fn start(
    &self,
    network: &str,
    address: &str,
    pool_size: usize,
    on_connect: Option<ConnectHandler>,
    on_failure: Option<FailureHandler>,
  ) -> Result<(), ServerError> {
    let network: Network = network.parse()?;
    if !network.is_stream() {
      return Err(ServerError::InvalidNetwork(format!(
        "{network} is not a stream selector"
      )));
    }
    if address.is_empty() {
      return Err(ServerError::InvalidAddress(String::from("empty address")));
    }
    if pool_size == 0 {
      return Err(ServerError::InvalidPoolSize);
    }

    if self.is_running() {
      self.stop().await?;
    }

    let listener = ByteListener::bind(&network, address)?;
    let local_addr = listener.local_addr();
    info!("Starting TCP server on {network}:{address}");

    let cancel_token = CancellationToken::new();
    let accept_tracker = TaskTracker::new();
    let worker_tracker = TaskTracker::new();
    let (handoff_tx, handoff_rx) = mpsc::channel::<TcpConnection>(pool_size);

    self.running.store(true, Ordering::Release);

    accept_tracker.spawn(accept_loop(AcceptLoop {
      listener,
      handoff_tx,
      handoff_rx: Arc::new(tokio::sync::Mutex::new(handoff_rx)),
      worker_tracker: worker_tracker.clone(),
      running: self.running.clone(),
      cancel_token: cancel_token.clone(),
      on_connect,
      on_failure,
      max_connections: self.config.max_connections.map(|n| Arc::new(Semaphore::new(n))),
      connection_count: self.config.connection_count.clone(),
    }));
    accept_tracker.close();

    if let Ok(mut guard) = self.active.lock() {
      *guard = Some(Active {
        cancel_token,
        accept_tracker,
        worker_tracker,
        local_addr,
      });
    }
    Ok(())
  }

  /// Stop serving: unblock the accept loop, then await it, then await every
  /// worker. There is no deadline; a stalled connect callback stalls stop.
  /// Stopping an idle server is a no-op.
  pub async fn stop(&self) -> Result<(), ServerError> {
    self.running.store(false, Ordering::Release);
    let active = self.active.lock().ok().and_then(|mut guard| guard.take());
    let Some(active) = active else {
      return Ok(());
    };

    active.cancel_token.cancel();
    active.accept_tracker.wait().await;
    // the accept loop has exited, no further workers can be spawned
    active.worker_tracker.close();
    active.worker_tracker.wait().await;
    info!("TCP server stopped");
    Ok(())
  }
}

/* ---------------------------------------------------------- */
/// Everything the accept loop owns
struct AcceptLoop {
  listener: ByteListener,
  handoff_tx: mpsc::Sender<TcpConnection>,
  handoff_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<TcpConnection>>>,
  worker_tracker: TaskTracker,
  running: Arc<AtomicBool>,
  cancel_token: CancellationToken,
  on_connect: Option<ConnectHandler>,
  on_failure: Option<FailureHandler>,
  max_connections: Option<Arc<Semaphore>>,
  connection_count: ConnectionCount,
}

async fn accept_loop(ctx: AcceptLoop) {
  loop {
    // Connection limit: defer accepting while at the cap
    let permit = match &ctx.max_connections {
      Some(semaphore) => {
        let acquired = tokio::select! {
          acquired = semaphore.clone().acquire_owned() => acquired,
          _ = ctx.cancel_token.cancelled() => break,
        };
        let Ok(permit) = acquired else { break };
        Some(permit)
      }
      None => None,
    };

    let conn = tokio::select! {
      res = ctx.listener.accept() => match res {
        Ok(conn) => conn,
        Err(e) => {
          if !ctx.running.load(Ordering::Acquire) {
            // shutdown-induced accept error, swallowed
            break;
          }
          warn!("Error in TCP listener: {e}");
          if let Some(on_failure) = &ctx.on_failure {
            on_failure(e);
          }
          continue;
        }
      },
      _ = ctx.cancel_token.cancelled() => break,
    };

    ctx.connection_count.increment();
    debug!(
      "Accepted TCP connection from: {:?} (total: {})",
      conn.peer_addr(),
      ctx.connection_count.current()
    );

    // Backpressure: a full handoff channel blocks here until a worker pops
    tokio::select! {
      res = ctx.handoff_tx.send(conn) => {
        if res.is_err() {
          ctx.connection_count.decrement();
          break;
        }
      }
      _ = ctx.cancel_token.cancelled() => {
        // the undispatched connection is dropped, releasing its socket
        ctx.connection_count.decrement();
        break;
      }
    }

    ctx.worker_tracker.spawn(handle_one(
      ctx.handoff_rx.clone(),
      ctx.on_connect.clone(),
      ctx.connection_count.clone(),
      permit,
    ));
  }
  debug!("TCP accept loop exited");
}

/// Worker task: dequeue exactly one connection, run the connect callback,
/// release the connection on every exit path.
async fn handle_one(
  handoff_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<TcpConnection>>>,
  on_connect: Option<ConnectHandler>,
  connection_count: ConnectionCount,
  _permit: Option<tokio::sync::OwnedSemaphorePermit>,
) {
  let conn = handoff_rx.lock().await.recv().await;
  let Some(conn) = conn else {
    return;
  };
  if let Some(on_connect) = &on_connect {
    on_connect(conn).await;
  }
  // without a callback the connection is dropped, and thereby closed, here
  connection_count.decrement();
}

/* ---------------------------------------------------------- */
#[cfg(test)]
mod tests {
  use super::*;
  use crate::tcp_client::TcpClient;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};

  fn echo_handler() -> ConnectHandler {
    Arc::new(|mut conn: TcpConnection| {
      Box::pin(async move {
        let mut buf = vec![0u8; 1024];
        let Ok(n) = conn.read(&mut buf).await else { return };
        if n == 0 {
          return;
        }
        let _ = conn.write_all(&buf[..n]).await;
      })
    })
  }

  #[tokio::test]
  async fn test_echo_roundtrip() {
    let server = TcpServer::default();
    server
      .start("tcp", "127.0.0.1:0", 4, Some(echo_handler()), None)
      .await
      .unwrap();
    assert!(server.is_running());
    let addr = server.local_addr().unwrap();

    let mut client = TcpClient::default();
    client.connect("tcp", &addr.to_string()).await.unwrap();
    client.write(b"hello").await.unwrap();
    let reply = client.read(1024).await.unwrap();
    assert_eq!(reply.as_ref(), b"hello");
    client.close().await.unwrap();

    server.stop().await.unwrap();
    assert!(!server.is_running());
  }

  #[tokio::test]
  async fn test_start_validation() {
    let server = TcpServer::default();
    assert!(matches!(
      server.start("", "127.0.0.1:0", 4, None, None).await,
      Err(ServerError::InvalidNetwork(_))
    ));
    assert!(matches!(
      server.start("udp", "127.0.0.1:0", 4, None, None).await,
      Err(ServerError::InvalidNetwork(_))
    ));
    assert!(matches!(
      server.start("tcp", "", 4, None, None).await,
      Err(ServerError::InvalidAddress(_))
    ));
    assert!(matches!(
      server.start("tcp", "127.0.0.1:0", 0, None, None).await,
      Err(ServerError::InvalidPoolSize)
    ));
    assert!(!server.is_running());
  }

  #[tokio::test]
  async fn test_stop_is_idempotent() {
    let server = TcpServer::default();
    // stop on an idle server is a no-op
    server.stop().await.unwrap();

    server.start("tcp", "127.0.0.1:0", 2, None, None).await.unwrap();
    server.stop().await.unwrap();
    server.stop().await.unwrap();
    assert!(!server.is_running());
  }

  #[tokio::test]
  async fn test_restart_on_same_port() {
    let server = TcpServer::default();
    server
      .start("tcp", "127.0.0.1:0", 2, Some(echo_handler()), None)
      .await
      .unwrap();
    let addr = server.local_addr().unwrap();
    server.stop().await.unwrap();

    server
      .start("tcp", &addr.to_string(), 2, Some(echo_handler()), None)
      .await
      .unwrap();
    assert_eq!(server.local_addr(), Some(addr));

    let mut client = TcpClient::default();
    client.connect("tcp", &addr.to_string()).await.unwrap();
    client.write(b"again").await.unwrap();
    assert_eq!(client.read(64).await.unwrap().as_ref(), b"again");
    client.close().await.unwrap();

    server.stop().await.unwrap();
  }

  #[tokio::test]
  async fn test_start_while_running_restarts() {
    let server = TcpServer::default();
    server.start("tcp", "127.0.0.1:0", 2, None, None).await.unwrap();
    assert!(server.is_running());

    server
      .start("tcp", "127.0.0.1:0", 2, Some(echo_handler()), None)
      .await
      .unwrap();
    assert!(server.is_running());
    let addr = server.local_addr().unwrap();

    let mut client = TcpClient::default();
    client.connect("tcp", &addr.to_string()).await.unwrap();
    client.write(b"second life").await.unwrap();
    assert_eq!(client.read(64).await.unwrap().as_ref(), b"second life");
    client.close().await.unwrap();

    server.stop().await.unwrap();
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_unix_stream_echo() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("echo.sock");
    let path = path.to_str().unwrap();

    let server = TcpServer::default();
    server.start("unix", path, 2, Some(echo_handler()), None).await.unwrap();

    let mut client = TcpClient::default();
    client.connect("unix", path).await.unwrap();
    assert!(client.local_addr().is_none());
    client.write(b"over the path").await.unwrap();
    assert_eq!(client.read(64).await.unwrap().as_ref(), b"over the path");
    client.close().await.unwrap();

    server.stop().await.unwrap();
  }
}
