use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// TCP transport.
///
/// Used when the test host runs on another machine or inside a container
/// and a filesystem socket cannot be shared with the controller.
#[derive(Debug)]
pub struct TcpSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpSocket {
    /// Bind and listen on `host:port`. Port `0` picks an ephemeral port;
    /// [`TcpSocket::local_addr`] reports the one actually bound.
    pub fn bind(address: &str) -> Result<Self> {
        let listener = TcpListener::bind(address).map_err(|e| TransportError::Bind {
            address: address.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            address: address.to_string(),
            source: e,
        })?;

        info!(%local_addr, "listening on tcp");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted tcp connection");
        Ok(IpcStream::from_tcp(stream))
    }

    /// Connect to a listening TCP endpoint (blocking).
    ///
    /// Every resolved address is tried in order; the last failure is reported.
    pub fn connect(address: &str) -> Result<IpcStream> {
        let addrs = address
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect {
                address: address.to_string(),
                source: e,
            })?;

        let mut last_err = std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "address resolved to nothing",
        );
        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    debug!(%addr, "connected to tcp endpoint");
                    return Ok(IpcStream::from_tcp(stream));
                }
                Err(err) => last_err = err,
            }
        }

        Err(TransportError::Connect {
            address: address.to_string(),
            source: last_err,
        })
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn bind_ephemeral_port_reports_real_port() {
        let socket = TcpSocket::bind("127.0.0.1:0").unwrap();
        assert_ne!(socket.local_addr().port(), 0);
        assert_eq!(socket.transport_name(), "tcp");
    }

    #[test]
    fn accept_and_connect_exchange_bytes() {
        let socket = TcpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().to_string();

        let handle = std::thread::spawn(move || {
            let mut client = TcpSocket::connect(&addr).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = socket.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        handle.join().unwrap();
    }

    #[test]
    fn connect_refused_is_connect_error() {
        // Bind then drop to get a port that is very likely closed.
        let port = TcpSocket::bind("127.0.0.1:0").unwrap().local_addr().port();
        let err = TcpSocket::connect(&format!("127.0.0.1:{port}")).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[test]
    fn bind_invalid_address_is_bind_error() {
        let err = TcpSocket::bind("not an address").unwrap_err();
        assert!(matches!(err, TransportError::Bind { .. }));
    }
}
