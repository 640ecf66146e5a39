use crate::error::ServerError;
use std::{
  fmt,
  net::{SocketAddr, ToSocketAddrs},
  str::FromStr,
};

/// Network selector accepted by the servers and clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
  /// TCP over IPv4 or IPv6
  Tcp,
  /// TCP over IPv4 only
  Tcp4,
  /// TCP over IPv6 only
  Tcp6,
  /// Path-based stream socket
  #[cfg(unix)]
  Unix,
  /// UDP over IPv4 or IPv6
  Udp,
  /// UDP over IPv4 only
  Udp4,
  /// UDP over IPv6 only
  Udp6,
}

impl Network {
  /// Whether the selector names a byte-stream transport
  pub fn is_stream(&self) -> bool {
    match self {
      Self::Tcp | Self::Tcp4 | Self::Tcp6 => true,
      #[cfg(unix)]
      Self::Unix => true,
      _ => false,
    }
  }

  /// Whether the selector names a datagram transport
  pub fn is_datagram(&self) -> bool {
    matches!(self, Self::Udp | Self::Udp4 | Self::Udp6)
  }

  /// Whether the selector is path-based rather than host-port based
  pub fn is_path(&self) -> bool {
    #[cfg(unix)]
    {
      matches!(self, Self::Unix)
    }
    #[cfg(not(unix))]
    {
      false
    }
  }

  /// Whether the resolved address family is acceptable for this selector
  fn matches_family(&self, addr: &SocketAddr) -> bool {
    match self {
      Self::Tcp4 | Self::Udp4 => addr.is_ipv4(),
      Self::Tcp6 | Self::Udp6 => addr.is_ipv6(),
      _ => true,
    }
  }

  /// Wildcard host used when the address is given as `:port`
  fn wildcard_host(&self) -> &'static str {
    match self {
      Self::Tcp6 | Self::Udp6 => "[::]",
      _ => "0.0.0.0",
    }
  }
}

impl fmt::Display for Network {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Tcp => "tcp",
      Self::Tcp4 => "tcp4",
      Self::Tcp6 => "tcp6",
      #[cfg(unix)]
      Self::Unix => "unix",
      Self::Udp => "udp",
      Self::Udp4 => "udp4",
      Self::Udp6 => "udp6",
    };
    write!(f, "{name}")
  }
}

impl FromStr for Network {
  type Err = ServerError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.is_empty() {
      return Err(ServerError::InvalidNetwork(String::from("empty network selector")));
    }
    match s {
      "tcp" => Ok(Self::Tcp),
      "tcp4" => Ok(Self::Tcp4),
      "tcp6" => Ok(Self::Tcp6),
      #[cfg(unix)]
      "unix" => Ok(Self::Unix),
      "udp" => Ok(Self::Udp),
      "udp4" => Ok(Self::Udp4),
      "udp6" => Ok(Self::Udp6),
      other => Err(ServerError::InvalidNetwork(other.to_string())),
    }
  }
}

/// Resolves a host-port listen/dial address for the given selector.
///
/// Accepts `host:port`, `:port` and `[v6]:port` forms. Host names are resolved
/// and the first address matching the selector family is taken. Rejects empty
/// input and addresses without a port.
pub(crate) fn resolve_addr(network: &Network, address: &str) -> Result<SocketAddr, ServerError> {
  if address.is_empty() {
    return Err(ServerError::InvalidAddress(String::from("empty address")));
  }

  let addr_str = if address.starts_with(':') {
    format!("{}{}", network.wildcard_host(), address)
  } else {
    address.to_string()
  };

  if let Ok(addr) = addr_str.parse::<SocketAddr>() {
    if !network.matches_family(&addr) {
      return Err(ServerError::InvalidAddress(format!(
        "address family of {address} does not match selector {network}"
      )));
    }
    return Ok(addr);
  }

  // Not a literal socket address, try host name resolution with a port check first
  let Some((host, port)) = addr_str.rsplit_once(':') else {
    return Err(ServerError::InvalidAddress(format!("missing port in address: {address}")));
  };
  if host.is_empty() || port.is_empty() || port.parse::<u16>().is_err() {
    return Err(ServerError::InvalidAddress(format!("invalid port in address: {address}")));
  }

  let resolved = addr_str
    .to_socket_addrs()
    .map_err(|e| ServerError::InvalidAddress(format!("{address}: {e}")))?
    .find(|addr| network.matches_family(addr));
  resolved.ok_or_else(|| {
    ServerError::InvalidAddress(format!(
      "no address of {address} matches the family of selector {network}"
    ))
  })
}
