mod config;
mod log;

use crate::{
  config::{ConfigToml, parse_opts},
  log::*,
};
use sockserve_lib::{
  ConnectHandler, FailureHandler, LogConfig, LogWriter, PacketHandler, TcpServer, TcpServerConfigBuilder, UdpPacket,
  UdpServer, UdpServerConfigBuilder,
};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Default handoff channel capacity when the config does not set one
const DEFAULT_POOL_SIZE: usize = 16;
/// Default per-packet buffer when the config does not set one
const DEFAULT_RECV_BUFFER: usize = 2048;

fn main() {
  let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
  runtime_builder.enable_all();
  runtime_builder.thread_name("sockserve");
  let runtime = runtime_builder.build().unwrap();

  init_logger();

  runtime.block_on(async {
    if let Err(e) = run().await {
      error!("{e}");
      std::process::exit(1);
    }
  });
}

async fn run() -> Result<(), anyhow::Error> {
  let opts = parse_opts()?;
  let config = ConfigToml::new(&opts.config_file_path)?;
  if config.tcp_listen.is_none() && config.udp_listen.is_none() {
    return Err(anyhow::anyhow!("at least one of tcp_listen and udp_listen is required"));
  }

  let log_config = match &config.log {
    Some(log) => log.to_log_config()?,
    None => LogConfig::default(),
  };
  let writer = LogWriter::spawn(log_config)?;

  let mut tcp_server = None;
  if let Some(listen) = &config.tcp_listen {
    let server_config = TcpServerConfigBuilder::default()
      .max_connections(config.tcp_max_connections)
      .build()?;
    let server = TcpServer::with_config(server_config);
    server
      .start(
        "tcp",
        listen,
        config.tcp_pool_size.unwrap_or(DEFAULT_POOL_SIZE),
        Some(tcp_echo_handler(writer.clone())),
        Some(accept_failure_handler()),
      )
      .await?;
    info!("TCP echo service on {listen}");
    tcp_server = Some(server);
  }

  let mut udp_server = None;
  if let Some(listen) = &config.udp_listen {
    let mut builder = UdpServerConfigBuilder::default();
    builder
      .read_buffer_size(config.udp_read_buffer)
      .write_buffer_size(config.udp_write_buffer)
      .max_concurrent(config.udp_max_concurrent);
    if let Some(wait) = config.udp_shutdown_wait() {
      builder.shutdown_wait(wait);
    }
    let server = UdpServer::with_config(builder.build()?);
    server
      .start(
        "udp",
        listen,
        config.udp_recv_buffer.unwrap_or(DEFAULT_RECV_BUFFER),
        udp_echo_handler(writer.clone()),
        config.udp_async.unwrap_or(true),
        Some(accept_failure_handler()),
      )
      .await?;
    info!("UDP echo service on {listen}");
    udp_server = Some(server);
  }

  info!("sockserve started, Ctrl-C to stop");
  tokio::signal::ctrl_c().await?;
  info!("shutting down");

  if let Some(server) = tcp_server {
    server.stop().await?;
  }
  if let Some(server) = udp_server {
    server.stop().await?;
  }
  writer.shutdown().await;
  Ok(())
}

/// Echo every received chunk back to the peer, recording one access line per connection
fn tcp_echo_handler(writer: LogWriter) -> ConnectHandler {
  Arc::new(move |mut conn| {
    let writer = writer.clone();
    Box::pin(async move {
      let peer = conn.peer_addr();
      let mut served = 0usize;
      let mut buf = vec![0u8; 4096];
      loop {
        let Ok(n) = conn.read(&mut buf).await else { break };
        if n == 0 {
          break;
        }
        if conn.write_all(&buf[..n]).await.is_err() {
          break;
        }
        served += n;
      }
      writer.info(format!("tcp: {peer:?} echoed {served} bytes")).await;
    })
  })
}

/// Echo each datagram back through the server's endpoint
fn udp_echo_handler(writer: LogWriter) -> PacketHandler {
  Arc::new(move |packet: UdpPacket| {
    let writer = writer.clone();
    Box::pin(async move {
      let size = packet.payload().len();
      if let Err(e) = packet.respond(packet.payload()).await {
        warn!("udp: failed to answer {}: {e}", packet.src_addr());
        return;
      }
      writer.info(format!("udp: {} echoed {size} bytes", packet.src_addr())).await;
    })
  })
}

fn accept_failure_handler() -> FailureHandler {
  Arc::new(|e| {
    warn!("listener failure: {e}");
  })
}
