use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use hostwire_transport::{EndpointAddress, IpcStream, TcpSocket};
#[cfg(unix)]
use hostwire_transport::UnixDomainSocket;
use tracing::{debug, info, warn};

use crate::channel::{join_unless_current, CommunicationChannel, FramedChannel};
use crate::client::connect_stream;
use crate::endpoint::{CommunicationEndpoint, ConnectedCallback, EndpointConfig};
use crate::error::{ChannelError, Result};

type ChannelSlot = Arc<Mutex<Option<Arc<FramedChannel>>>>;

/// Host-role endpoint: listens and accepts exactly one connection.
pub struct SocketServer {
    config: EndpointConfig,
    state: Mutex<ServerState>,
    stopped: Arc<AtomicBool>,
    channel: ChannelSlot,
}

#[derive(Default)]
struct ServerState {
    started: bool,
    wake_address: Option<EndpointAddress>,
    accept_thread: Option<JoinHandle<()>>,
}

impl SocketServer {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ServerState::default()),
            stopped: Arc::new(AtomicBool::new(false)),
            channel: Arc::new(Mutex::new(None)),
        }
    }
}

impl CommunicationEndpoint for SocketServer {
    fn start(&self, address: &str, on_connected: ConnectedCallback) -> Result<String> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.started {
            return Err(ChannelError::AlreadyStarted);
        }

        let address = EndpointAddress::parse(address)?;
        let listener = Listener::bind(&address)?;
        let bound = listener.bound_address();
        info!(address = %bound, transport = bound.transport_name(), "waiting for controller connection");

        let stopped = Arc::clone(&self.stopped);
        let slot = Arc::clone(&self.channel);
        let frame = self.config.frame.clone();
        let handle = thread::Builder::new()
            .name("hostwire-accept".to_string())
            .spawn(move || {
                let result = accept_one(&listener, &stopped, frame);
                drop(listener);
                match result {
                    Ok(channel) => {
                        *slot.lock().unwrap_or_else(PoisonError::into_inner) =
                            Some(Arc::clone(&channel));
                        on_connected(Ok(channel as Arc<dyn CommunicationChannel>));
                    }
                    Err(err) => on_connected(Err(err)),
                }
            })
            .map_err(|source| ChannelError::Spawn {
                name: "accept",
                source,
            })?;

        state.started = true;
        state.wake_address = Some(wake_address(&bound));
        state.accept_thread = Some(handle);
        Ok(bound.to_string())
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let (wake, handle) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            (state.wake_address.take(), state.accept_thread.take())
        };

        if let Some(handle) = &handle {
            if !handle.is_finished() {
                if let Some(wake) = wake {
                    // Unblock accept(); the thread sees `stopped` and discards it.
                    if let Err(err) = connect_stream(&wake) {
                        debug!(error = %err, "wake connection failed");
                    }
                }
            }
        }
        join_unless_current(handle);

        if let Some(channel) = self
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            channel.close();
        }
        debug!("socket server stopped");
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_one(
    listener: &Listener,
    stopped: &AtomicBool,
    frame: hostwire_frame::FrameConfig,
) -> Result<Arc<FramedChannel>> {
    let accepted = listener.accept();
    if stopped.load(Ordering::SeqCst) {
        if let Ok(stream) = accepted {
            let _ = stream.shutdown();
        }
        return Err(ChannelError::Stopped);
    }
    let stream = accepted?;
    debug!(transport = stream.transport_name(), "controller connected");
    Ok(Arc::new(FramedChannel::new(stream, frame)?))
}

enum Listener {
    #[cfg(unix)]
    Unix(UnixDomainSocket),
    Tcp(TcpSocket),
}

impl Listener {
    fn bind(address: &EndpointAddress) -> Result<Self> {
        match address {
            #[cfg(unix)]
            EndpointAddress::Unix(path) => Ok(Self::Unix(UnixDomainSocket::bind(path)?)),
            #[cfg(not(unix))]
            EndpointAddress::Unix(_) => Err(hostwire_transport::TransportError::Unsupported(
                "unix domain sockets",
            )
            .into()),
            EndpointAddress::Tcp(addr) => Ok(Self::Tcp(TcpSocket::bind(addr)?)),
        }
    }

    fn accept(&self) -> Result<IpcStream> {
        let stream = match self {
            #[cfg(unix)]
            Self::Unix(socket) => socket.accept()?,
            Self::Tcp(socket) => socket.accept()?,
        };
        Ok(stream)
    }

    fn bound_address(&self) -> EndpointAddress {
        match self {
            #[cfg(unix)]
            Self::Unix(socket) => EndpointAddress::Unix(socket.path().to_path_buf()),
            Self::Tcp(socket) => EndpointAddress::from(socket.local_addr()),
        }
    }
}

/// Where to connect to reach our own listener.
fn wake_address(bound: &EndpointAddress) -> EndpointAddress {
    let EndpointAddress::Tcp(addr) = bound else {
        return bound.clone();
    };
    match addr.parse::<SocketAddr>() {
        Ok(mut socket_addr) if socket_addr.ip().is_unspecified() => {
            let loopback = match socket_addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            };
            socket_addr.set_ip(loopback);
            EndpointAddress::from(socket_addr)
        }
        Ok(_) => bound.clone(),
        Err(err) => {
            warn!(%addr, error = %err, "bound address is not a socket address");
            bound.clone()
        }
    }
}
