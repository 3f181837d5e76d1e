use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, TransportError};

const TCP_SCHEME: &str = "tcp://";
const UNIX_SCHEME: &str = "unix://";

/// Where a connection endpoint lives.
///
/// Parsed from the endpoint string a controller hands to a test host:
/// `host:port` and `[v6]:port` select TCP, anything else is treated as a
/// Unix domain socket path. Explicit `tcp://` and `unix://` prefixes
/// override the guess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAddress {
    /// Unix domain socket at a filesystem path.
    Unix(PathBuf),
    /// TCP `host:port`, resolved at bind/connect time.
    Tcp(String),
}

impl EndpointAddress {
    /// Parse an endpoint string.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TransportError::InvalidAddress(input.to_string()));
        }

        if let Some(rest) = input.strip_prefix(TCP_SCHEME) {
            if !looks_like_host_port(rest) {
                return Err(TransportError::InvalidAddress(input.to_string()));
            }
            return Ok(Self::Tcp(rest.to_string()));
        }

        if let Some(rest) = input.strip_prefix(UNIX_SCHEME) {
            if rest.is_empty() {
                return Err(TransportError::InvalidAddress(input.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(rest)));
        }

        if looks_like_host_port(input) {
            Ok(Self::Tcp(input.to_string()))
        } else {
            Ok(Self::Unix(PathBuf::from(input)))
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Unix(_) => "unix-domain-socket",
            Self::Tcp(_) => "tcp",
        }
    }
}

impl FromStr for EndpointAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "{}", path.display()),
            Self::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

impl From<SocketAddr> for EndpointAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::Tcp(addr.to_string())
    }
}

fn looks_like_host_port(input: &str) -> bool {
    if input.parse::<SocketAddr>().is_ok() {
        return true;
    }
    let Some((host, port)) = input.rsplit_once(':') else {
        return false;
    };
    !host.is_empty()
        && !host.contains('/')
        && !host.contains('\\')
        && port.parse::<u16>().is_ok()
}
