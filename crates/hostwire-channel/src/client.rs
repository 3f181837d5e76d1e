use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use hostwire_transport::{EndpointAddress, IpcStream, TcpSocket, TransportError};
#[cfg(unix)]
use hostwire_transport::UnixDomainSocket;
use tracing::{debug, info};

use crate::channel::{join_unless_current, CommunicationChannel, FramedChannel};
use crate::endpoint::{CommunicationEndpoint, ConnectedCallback, EndpointConfig};
use crate::error::{ChannelError, Result};

/// Client-role endpoint: connects to a listening peer, retrying until it
/// comes up or the connect timeout elapses.
pub struct SocketClient {
    config: EndpointConfig,
    state: Mutex<ClientState>,
    stopped: Arc<AtomicBool>,
    channel: Arc<Mutex<Option<Arc<FramedChannel>>>>,
}

#[derive(Default)]
struct ClientState {
    started: bool,
    connect_thread: Option<JoinHandle<()>>,
}

impl SocketClient {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ClientState::default()),
            stopped: Arc::new(AtomicBool::new(false)),
            channel: Arc::new(Mutex::new(None)),
        }
    }
}

impl CommunicationEndpoint for SocketClient {
    fn start(&self, address: &str, on_connected: ConnectedCallback) -> Result<String> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.started {
            return Err(ChannelError::AlreadyStarted);
        }

        let address = EndpointAddress::parse(address)?;
        let display = address.to_string();
        let stopped = Arc::clone(&self.stopped);
        let slot = Arc::clone(&self.channel);
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("hostwire-connect".to_string())
            .spawn(move || {
                let result = connect_with_retry(&address, &config, &stopped).and_then(|stream| {
                    Ok(Arc::new(FramedChannel::new(stream, config.frame.clone())?))
                });
                match result {
                    Ok(channel) => {
                        info!(%address, transport = channel.transport_name(), "connected to peer");
                        *slot.lock().unwrap_or_else(PoisonError::into_inner) =
                            Some(Arc::clone(&channel));
                        on_connected(Ok(channel as Arc<dyn CommunicationChannel>));
                    }
                    Err(err) => on_connected(Err(err)),
                }
            })
            .map_err(|source| ChannelError::Spawn {
                name: "connect",
                source,
            })?;

        state.started = true;
        state.connect_thread = Some(handle);
        Ok(display)
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .connect_thread
            .take();
        join_unless_current(handle);

        if let Some(channel) = self
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            channel.close();
        }
        debug!("socket client stopped");
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn connect_with_retry(
    address: &EndpointAddress,
    config: &EndpointConfig,
    stopped: &AtomicBool,
) -> Result<IpcStream> {
    let deadline = Instant::now() + config.connect_timeout;
    loop {
        if stopped.load(Ordering::SeqCst) {
            return Err(ChannelError::Stopped);
        }
        match connect_stream(address) {
            Ok(stream) => {
                if stopped.load(Ordering::SeqCst) {
                    let _ = stream.shutdown();
                    return Err(ChannelError::Stopped);
                }
                return Ok(stream);
            }
            Err(err) if is_not_listening(&err) => {
                if Instant::now() >= deadline {
                    return Err(ChannelError::ConnectTimeout {
                        address: address.to_string(),
                        timeout: config.connect_timeout,
                    });
                }
                debug!(%address, "peer not listening yet, retrying");
                thread::sleep(config.connect_retry_interval);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn is_not_listening(err: &TransportError) -> bool {
    matches!(
        err.io_kind(),
        Some(ErrorKind::NotFound | ErrorKind::ConnectionRefused)
    )
}

/// Open a raw stream to `address`.
pub(crate) fn connect_stream(address: &EndpointAddress) -> hostwire_transport::Result<IpcStream> {
    match address {
        #[cfg(unix)]
        EndpointAddress::Unix(path) => UnixDomainSocket::connect(path),
        #[cfg(not(unix))]
        EndpointAddress::Unix(_) => Err(TransportError::Unsupported("unix domain sockets")),
        EndpointAddress::Tcp(addr) => TcpSocket::connect(addr),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::server::SocketServer;

    fn quick_config() -> EndpointConfig {
        EndpointConfig {
            connect_timeout: Duration::from_millis(300),
            connect_retry_interval: Duration::from_millis(10),
            ..EndpointConfig::default()
        }
    }

    #[cfg(unix)]
    #[test]
    fn client_waits_for_listener_to_appear() {
        let dir = std::env::temp_dir().join(format!("hostwire-client-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sock_path = dir.join("late.sock");
        let address = sock_path.to_str().unwrap().to_string();

        let client = SocketClient::new(EndpointConfig {
            connect_timeout: Duration::from_secs(5),
            ..quick_config()
        });
        let (tx, rx) = mpsc::channel();
        client
            .start(&address, Box::new(move |r| tx.send(r.is_ok()).unwrap()))
            .unwrap();

        thread::sleep(Duration::from_millis(100));
        let server = SocketServer::new(EndpointConfig::default());
        server.start(&address, Box::new(|_| {})).unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        client.stop();
        server.stop();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn client_gives_up_after_timeout() {
        let path = std::env::temp_dir().join(format!("hostwire-nobody-{}.sock", std::process::id()));
        let client = SocketClient::new(quick_config());
        let (tx, rx) = mpsc::channel();
        client
            .start(path.to_str().unwrap(), Box::new(move |r| tx.send(r.err()).unwrap()))
            .unwrap();

        let err = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(err, Some(ChannelError::ConnectTimeout { .. })));
    }

    #[test]
    fn stop_interrupts_retry_loop() {
        let client = SocketClient::new(EndpointConfig {
            connect_timeout: Duration::from_secs(60),
            ..quick_config()
        });
        let (tx, rx) = mpsc::channel();
        // Reserved port on loopback; nothing listens there.
        client
            .start("127.0.0.1:1", Box::new(move |r| tx.send(r.err()).unwrap()))
            .unwrap();

        thread::sleep(Duration::from_millis(50));
        client.stop();
        let err = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(err, Some(ChannelError::Stopped)));
    }

    #[test]
    fn invalid_address_fails_synchronously() {
        let client = SocketClient::new(quick_config());
        assert!(matches!(
            client.start("   ", Box::new(|_| {})),
            Err(ChannelError::Transport(TransportError::InvalidAddress(_)))
        ));
    }
}
