use crate::{
  constants::UDP_SHUTDOWN_WAIT,
  error::ServerError,
  socket::bind_udp_socket,
  target::{Network, resolve_addr},
  tcp_server::FailureHandler,
  trace::*,
};
use bytes::Bytes;
use std::{
  future::Future,
  io,
  net::SocketAddr,
  pin::Pin,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};
use tokio::{net::UdpSocket, sync::Semaphore};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Callback invoked with each received packet
pub type PacketHandler = Arc<dyn Fn(UdpPacket) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(default)]
/// Tuning knobs of the UDP server beyond the start arguments
pub struct UdpServerConfig {
  /// Requested OS-socket receive buffer (`SO_RCVBUF`); the OS may clamp it
  read_buffer_size: Option<usize>,
  /// Requested OS-socket send buffer (`SO_SNDBUF`); the OS may clamp it
  write_buffer_size: Option<usize>,
  /// Cap on in-flight handler tasks in async mode, unbounded when unset
  max_concurrent: Option<usize>,
  /// Deadline awaiting in-flight handlers on stop; expired handlers are detached
  shutdown_wait: Duration,
}

impl Default for UdpServerConfig {
  fn default() -> Self {
    Self {
      read_buffer_size: None,
      write_buffer_size: None,
      max_concurrent: None,
      shutdown_wait: UDP_SHUTDOWN_WAIT,
    }
  }
}

/* ---------------------------------------------------------- */
/// One received datagram together with a capability to answer through the
/// server's own endpoint. Handlers get this record instead of the server,
/// so nothing refers back into the serving state.
pub struct UdpPacket {
  payload: Bytes,
  src_addr: SocketAddr,
  reply: ReplyHandle,
}

impl UdpPacket {
  /// Payload limited to the bytes actually read
  pub fn payload(&self) -> &Bytes {
    &self.payload
  }

  /// Sender address of the datagram
  pub fn src_addr(&self) -> SocketAddr {
    self.src_addr
  }

  /// Capability to send through the server's listening socket
  pub fn reply(&self) -> &ReplyHandle {
    &self.reply
  }

  /// Answer the sender through the server's listening socket
  pub async fn respond(&self, data: &[u8]) -> io::Result<usize> {
    self.reply.send_to(data, self.src_addr).await
  }
}

#[derive(Clone)]
/// Send-only handle over the server's listening socket
pub struct ReplyHandle {
  socket: Arc<UdpSocket>,
}

impl ReplyHandle {
  /// Send one datagram from the server's endpoint to `to`
  pub async fn send_to(&self, data: &[u8], to: SocketAddr) -> io::Result<usize> {
    self.socket.send_to(data, to).await
  }

  /// Bound address of the server's endpoint
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.socket.local_addr().ok()
  }
}

/* ---------------------------------------------------------- */
/// Connectionless UDP packet server.
///
/// Each received datagram is handed to the packet handler either inline
/// (sync mode) or on a tracked task (async mode). Stop drains in-flight
/// handlers up to the configured deadline and detaches the rest.
#[derive(Default)]
pub struct UdpServer {
  /// Running flag, `false -> true` on start and `true -> false` on stop
  running: Arc<AtomicBool>,
  config: UdpServerConfig,
  /// State held between start and stop
  active: Mutex<Option<Active>>,
}

/// Live state of a started server
struct Active {
  cancel_token: CancellationToken,
  loop_tracker: TaskTracker,
  handler_tracker: TaskTracker,
  shutdown_wait: Duration,
  local_addr: Option<SocketAddr>,
}

impl UdpServer {
  /// Create a server with explicit tuning knobs
  pub fn with_config(config: UdpServerConfig) -> Self {
    Self {
      config,
      ..Default::default()
    }
  }

  /// Whether the server is currently serving
  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  /// Bound socket address while running, `None` otherwise
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.active.lock().ok().and_then(|guard| guard.as_ref().and_then(|a| a.local_addr))
  }

  /// Start serving on the given selector (`udp`, `udp4`, `udp6`) and address.
  ///
  /// `recv_buffer_bytes` sizes the per-packet application buffer and must be
  /// positive. In async mode each packet spawns a tracked handler task,
  /// otherwise the handler runs inline in the receive loop. A running server
  /// is stopped first.
  pub async fn start(
    &self,
    network: &str,
    address: &str,
    recv_buffer_bytes: usize,
    on_packet: PacketHandler,
    async_mode: bool,
    on_failure: Option<FailureHandler>,
  ) -> Result<(), ServerError> {
    let network: Network = network.parse()?;
    if !network.is_datagram() {
      return Err(ServerError::InvalidNetwork(format!(
        "{network} is not a datagram selector"
      )));
    }
    if address.is_empty() {
      return Err(ServerError::InvalidAddress(String::from("empty address")));
    }
    if recv_buffer_bytes == 0 {
      return Err(ServerError::InvalidBufferSize);
    }

    if self.is_running() {
      self.stop().await?;
    }

    let addr = resolve_addr(&network, address)?;
    let socket = bind_udp_socket(&addr, self.config.read_buffer_size, self.config.write_buffer_size)?;
    let socket = Arc::new(UdpSocket::from_std(socket)?);
    let local_addr = socket.local_addr().ok();
    info!("Starting UDP server on {network}:{address}");

    let cancel_token = CancellationToken::new();
    let loop_tracker = TaskTracker::new();
    let handler_tracker = TaskTracker::new();

    self.running.store(true, Ordering::Release);

    loop_tracker.spawn(receive_loop(ReceiveLoop {
      socket,
      recv_buffer_bytes,
      on_packet,
      async_mode,
      on_failure,
      handler_tracker: handler_tracker.clone(),
      running: self.running.clone(),
      cancel_token: cancel_token.clone(),
      max_concurrent: self.config.max_concurrent.map(|n| Arc::new(Semaphore::new(n))),
    }));
    loop_tracker.close();

    if let Ok(mut guard) = self.active.lock() {
      *guard = Some(Active {
        cancel_token,
        loop_tracker,
        handler_tracker,
        shutdown_wait: self.config.shutdown_wait,
        local_addr,
      });
    }
    Ok(())
  }

  /// Stop serving: unblock the receive loop, then drain in-flight handlers
  /// up to the configured deadline. Handlers still running when it expires
  /// are detached and finish best-effort. Stopping an idle server is a no-op.
  pub async fn stop(&self) -> Result<(), ServerError> {
    self.running.store(false, Ordering::Release);
    let active = self.active.lock().ok().and_then(|mut guard| guard.take());
    let Some(active) = active else {
      return Ok(());
    };

    active.cancel_token.cancel();
    let drained = async {
      active.loop_tracker.wait().await;
      active.handler_tracker.close();
      active.handler_tracker.wait().await;
    };
    if tokio::time::timeout(active.shutdown_wait, drained).await.is_err() {
      warn!(
        "UDP handlers still running after {:?}, detaching them",
        active.shutdown_wait
      );
    }
    info!("UDP server stopped");
    Ok(())
  }
}

/* ---------------------------------------------------------- */
/// Everything the receive loop owns
struct ReceiveLoop {
  socket: Arc<UdpSocket>,
  recv_buffer_bytes: usize,
  on_packet: PacketHandler,
  async_mode: bool,
  on_failure: Option<FailureHandler>,
  handler_tracker: TaskTracker,
  running: Arc<AtomicBool>,
  cancel_token: CancellationToken,
  max_concurrent: Option<Arc<Semaphore>>,
}

async fn receive_loop(ctx: ReceiveLoop) {
  loop {
    let mut buf = vec![0u8; ctx.recv_buffer_bytes];
    let (buf_size, src_addr) = tokio::select! {
      res = ctx.socket.recv_from(&mut buf) => match res {
        Ok(res) => res,
        Err(e) => {
          if !ctx.running.load(Ordering::Acquire) {
            // shutdown-induced receive error, swallowed
            break;
          }
          warn!("Error in UDP listener: {e}");
          if let Some(on_failure) = &ctx.on_failure {
            on_failure(e);
          }
          continue;
        }
      },
      _ = ctx.cancel_token.cancelled() => break,
    };
    debug!("received {buf_size} bytes from {src_addr}");

    buf.truncate(buf_size);
    let packet = UdpPacket {
      payload: Bytes::from(buf),
      src_addr,
      reply: ReplyHandle {
        socket: ctx.socket.clone(),
      },
    };

    if !ctx.async_mode {
      (ctx.on_packet)(packet).await;
      continue;
    }

    // In-flight cap: defer dispatching further packets while at the cap
    let permit = match &ctx.max_concurrent {
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
    let on_packet = ctx.on_packet.clone();
    ctx.handler_tracker.spawn(async move {
      let _permit = permit;
      on_packet(packet).await;
    });
  }
  debug!("UDP receive loop exited");
}

/* ---------------------------------------------------------- */
#[cfg(test)]
mod tests {
  use super::*;
  use crate::udp_client::UdpClient;
  use std::sync::atomic::AtomicUsize;
  use std::time::Instant;

  fn echo_handler() -> PacketHandler {
    Arc::new(|packet: UdpPacket| {
      Box::pin(async move {
        let _ = packet.respond(packet.payload()).await;
      })
    })
  }

  #[tokio::test]
  async fn test_start_validation() {
    let server = UdpServer::default();
    assert!(matches!(
      server.start("tcp", "127.0.0.1:0", 1024, echo_handler(), true, None).await,
      Err(ServerError::InvalidNetwork(_))
    ));
    assert!(matches!(
      server.start("udp", "", 1024, echo_handler(), true, None).await,
      Err(ServerError::InvalidAddress(_))
    ));
    assert!(matches!(
      server.start("udp", "127.0.0.1:0", 0, echo_handler(), true, None).await,
      Err(ServerError::InvalidBufferSize)
    ));
    assert!(!server.is_running());
  }

  #[tokio::test]
  async fn test_async_echo() {
    let server = UdpServer::default();
    server
      .start("udp", "127.0.0.1:0", 1024, echo_handler(), true, None)
      .await
      .unwrap();
    assert!(server.is_running());
    let addr = server.local_addr().unwrap();

    let mut client = UdpClient::default();
    client.connect("udp", &addr.to_string()).await.unwrap();
    client.send(b"ping").await.unwrap();
    let (payload, from) = client.receive(1024, Some(Duration::from_secs(1))).await.unwrap();
    assert_eq!(payload.as_ref(), b"ping");
    assert_eq!(from, addr);

    server.stop().await.unwrap();
    assert!(!server.is_running());
  }

  #[tokio::test]
  async fn test_sync_mode_echo() {
    let hits = Arc::new(AtomicUsize::new(0));
    let handler: PacketHandler = {
      let hits = hits.clone();
      Arc::new(move |packet: UdpPacket| {
        let hits = hits.clone();
        Box::pin(async move {
          hits.fetch_add(1, Ordering::SeqCst);
          let _ = packet.respond(packet.payload()).await;
        })
      })
    };

    let server = UdpServer::default();
    server
      .start("udp", "127.0.0.1:0", 1024, handler, false, None)
      .await
      .unwrap();
    let addr = server.local_addr().unwrap();

    let mut client = UdpClient::default();
    client.connect("udp", &addr.to_string()).await.unwrap();
    for i in 0..3u8 {
      client.send(&[i]).await.unwrap();
      let (payload, _) = client.receive(16, Some(Duration::from_secs(1))).await.unwrap();
      assert_eq!(payload.as_ref(), &[i]);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    server.stop().await.unwrap();
  }

  #[tokio::test]
  async fn test_stop_is_idempotent() {
    let server = UdpServer::default();
    server.stop().await.unwrap();

    server
      .start("udp", "127.0.0.1:0", 512, echo_handler(), true, None)
      .await
      .unwrap();
    server.stop().await.unwrap();
    server.stop().await.unwrap();
    assert!(!server.is_running());
  }

  #[tokio::test]
  async fn test_stop_returns_within_shutdown_wait() {
    let config = UdpServerConfigBuilder::default()
      .shutdown_wait(Duration::from_millis(200))
      .build()
      .unwrap();
    let stalled: PacketHandler = Arc::new(|_packet: UdpPacket| {
      Box::pin(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
      })
    });

    let server = UdpServer::with_config(config);
    server
      .start("udp", "127.0.0.1:0", 512, stalled, true, None)
      .await
      .unwrap();
    let addr = server.local_addr().unwrap();

    let mut client = UdpClient::default();
    client.connect("udp", &addr.to_string()).await.unwrap();
    client.send(b"stall").await.unwrap();
    // give the receive loop a moment to dispatch the handler
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    server.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!server.is_running());
  }

  #[tokio::test]
  async fn test_max_concurrent_caps_handlers() {
    let peak = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));
    let handler: PacketHandler = {
      let peak = peak.clone();
      let active = active.clone();
      Arc::new(move |packet: UdpPacket| {
        let peak = peak.clone();
        let active = active.clone();
        Box::pin(async move {
          let now = active.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(50)).await;
          active.fetch_sub(1, Ordering::SeqCst);
          let _ = packet.respond(packet.payload()).await;
        })
      })
    };

    let config = UdpServerConfigBuilder::default().max_concurrent(Some(2)).build().unwrap();
    let server = UdpServer::with_config(config);
    server
      .start("udp", "127.0.0.1:0", 512, handler, true, None)
      .await
      .unwrap();
    let addr = server.local_addr().unwrap();

    let mut client = UdpClient::default();
    client.connect("udp", &addr.to_string()).await.unwrap();
    for i in 0..8u8 {
      client.send(&[i]).await.unwrap();
    }
    for _ in 0..8 {
      client.receive(16, Some(Duration::from_secs(2))).await.unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);

    server.stop().await.unwrap();
  }
}
