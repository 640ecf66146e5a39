mod connection;
mod constants;
mod count;
mod error;
mod logging;
mod socket;
mod target;
mod tcp_client;
mod tcp_server;
mod time_util;
mod trace;
mod udp_client;
mod udp_server;


pub use connection::{ByteStream, TcpConnection};
pub use count::ConnectionCount;
pub use error::{ClientError, LogError, ServerError};
pub use logging::{Level, LogConfig, LogConfigBuilder, LogOutput, LogWriter};
pub use target::Network;
pub use tcp_client::TcpClient;
pub use tcp_server::{ConnectHandler, FailureHandler, TcpServer, TcpServerConfig, TcpServerConfigBuilder};
pub use udp_client::UdpClient;
pub use udp_server::{PacketHandler, ReplyHandle, UdpPacket, UdpServer, UdpServerConfig, UdpServerConfigBuilder};
