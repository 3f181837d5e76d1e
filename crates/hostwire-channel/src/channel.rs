use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use hostwire_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use hostwire_transport::IpcStream;
use tracing::{debug, warn};

use crate::error::{ChannelError, Result};

/// Receives the inbound side of a channel.
///
/// Both methods run on the channel's reader thread, one call at a time and
/// in wire order. That thread is the protocol dispatch thread.
pub trait MessageHandler: Send + 'static {
    /// One complete inbound message.
    fn on_message(&mut self, message: String);

    /// The reader stopped. `error` is `None` for an orderly close by either
    /// side. Called at most once, after the last `on_message`.
    fn on_disconnected(&mut self, error: Option<ChannelError>) {
        let _ = error;
    }
}

/// A bidirectional, message-oriented connection to one peer.
pub trait CommunicationChannel: Send + Sync {
    /// Write one complete message. Safe to call from several threads.
    fn send(&self, message: &str) -> Result<()>;

    /// Attach the inbound handler and start delivering messages.
    ///
    /// Messages that arrive before a handler is attached wait in the socket.
    fn set_message_handler(&self, handler: Box<dyn MessageHandler>) -> Result<()>;

    /// Close the connection. Idempotent and callable from any thread.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// [`CommunicationChannel`] over a framed [`IpcStream`].
pub struct FramedChannel {
    writer: Mutex<FrameWriter<IpcStream>>,
    reader: Mutex<Option<FrameReader<IpcStream>>>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
    control: IpcStream,
    closed: Arc<AtomicBool>,
    transport: &'static str,
}

impl FramedChannel {
    /// Wrap a connected stream.
    pub fn new(stream: IpcStream, config: FrameConfig) -> Result<Self> {
        let transport = stream.transport_name();
        let control = stream.try_clone()?;
        let reader = FrameReader::with_config_ipc(stream.try_clone()?, config.clone())?;
        let writer = FrameWriter::with_config_ipc(stream, config)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
            reader_thread: Mutex::new(None),
            control,
            closed: Arc::new(AtomicBool::new(false)),
            transport,
        })
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        self.transport
    }
}

impl CommunicationChannel for FramedChannel {
    fn send(&self, message: &str) -> Result<()> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.send_text(message).map_err(|err| match err {
            FrameError::ConnectionClosed => ChannelError::Closed,
            other => other.into(),
        })
    }

    fn set_message_handler(&self, mut handler: Box<dyn MessageHandler>) -> Result<()> {
        let mut reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ChannelError::HandlerAlreadySet)?;
        let closed = Arc::clone(&self.closed);

        let handle = thread::Builder::new()
            .name("hostwire-channel-reader".to_string())
            .spawn(move || loop {
                match reader.read_message() {
                    Ok(message) => handler.on_message(message),
                    Err(FrameError::ConnectionClosed) => {
                        debug!("peer closed the channel");
                        handler.on_disconnected(None);
                        break;
                    }
                    Err(_) if closed.load(Ordering::SeqCst) => {
                        handler.on_disconnected(None);
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "channel reader failed");
                        handler.on_disconnected(Some(err.into()));
                        break;
                    }
                }
            })
            .map_err(|source| ChannelError::Spawn {
                name: "channel reader",
                source,
            })?;

        *self
            .reader_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(transport = self.transport, "closing channel");
        if let Err(err) = self.control.shutdown() {
            debug!(error = %err, "channel shutdown failed");
        }
        let handle = self
            .reader_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        join_unless_current(handle);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for FramedChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Join `handle`, unless it is the calling thread (a close issued from a
/// callback running on that thread).
pub(crate) fn join_unless_current(handle: Option<JoinHandle<()>>) {
    let Some(handle) = handle else {
        return;
    };
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        warn!("background thread panicked");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    fn pair() -> (FramedChannel, FramedChannel) {
        let (left, right) = UnixStream::pair().unwrap();
        (
            FramedChannel::new(IpcStream::from_unix(left), FrameConfig::default()).unwrap(),
            FramedChannel::new(IpcStream::from_unix(right), FrameConfig::default()).unwrap(),
        )
    }

    enum Event {
        Message(String),
        Disconnected(bool),
    }

    struct Forward(mpsc::Sender<Event>);

    impl MessageHandler for Forward {
        fn on_message(&mut self, message: String) {
            let _ = self.0.send(Event::Message(message));
        }

        fn on_disconnected(&mut self, error: Option<ChannelError>) {
            let _ = self.0.send(Event::Disconnected(error.is_some()));
        }
    }

    fn recv(rx: &mpsc::Receiver<Event>) -> Event {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn delivers_messages_in_order() {
        let (a, b) = pair();
        let (tx, rx) = mpsc::channel();
        b.set_message_handler(Box::new(Forward(tx))).unwrap();

        for text in ["one", "two", "three"] {
            a.send(text).unwrap();
        }
        for expected in ["one", "two", "three"] {
            match recv(&rx) {
                Event::Message(m) => assert_eq!(m, expected),
                Event::Disconnected(_) => panic!("unexpected disconnect"),
            }
        }
    }

    #[test]
    fn messages_sent_before_handler_are_not_lost() {
        let (a, b) = pair();
        a.send("early").unwrap();

        let (tx, rx) = mpsc::channel();
        b.set_message_handler(Box::new(Forward(tx))).unwrap();
        assert!(matches!(recv(&rx), Event::Message(m) if m == "early"));
    }

    #[test]
    fn second_handler_rejected() {
        let (_a, b) = pair();
        let (tx, _rx) = mpsc::channel();
        b.set_message_handler(Box::new(Forward(tx.clone()))).unwrap();
        assert!(matches!(
            b.set_message_handler(Box::new(Forward(tx))),
            Err(ChannelError::HandlerAlreadySet)
        ));
    }

    #[test]
    fn peer_close_reports_orderly_disconnect() {
        let (a, b) = pair();
        let (tx, rx) = mpsc::channel();
        b.set_message_handler(Box::new(Forward(tx))).unwrap();

        a.close();
        assert!(matches!(recv(&rx), Event::Disconnected(false)));
    }

    #[test]
    fn close_is_idempotent_and_rejects_sends() {
        let (a, b) = pair();
        let (tx, rx) = mpsc::channel();
        b.set_message_handler(Box::new(Forward(tx))).unwrap();

        b.close();
        b.close();
        assert!(b.is_closed());
        assert!(matches!(b.send("late"), Err(ChannelError::Closed)));
        assert!(matches!(recv(&rx), Event::Disconnected(false)));
        drop(a);
    }

    #[test]
    fn concurrent_close_from_two_threads() {
        let (_a, b) = pair();
        let (tx, rx) = mpsc::channel();
        b.set_message_handler(Box::new(Forward(tx))).unwrap();
        let b = Arc::new(b);

        let threads: Vec<_> = (0..2)
            .map(|_| {
                let b = Arc::clone(&b);
                thread::spawn(move || b.close())
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(matches!(recv(&rx), Event::Disconnected(false)));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn interleaved_senders_keep_frames_whole() {
        let (a, b) = pair();
        let (tx, rx) = mpsc::channel();
        b.set_message_handler(Box::new(Forward(tx))).unwrap();
        let a = Arc::new(a);

        let senders: Vec<_> = (0..4)
            .map(|n| {
                let a = Arc::clone(&a);
                thread::spawn(move || {
                    for i in 0..50 {
                        a.send(&format!("{n}:{i}:{}", "x".repeat(512))).unwrap();
                    }
                })
            })
            .collect();
        for s in senders {
            s.join().unwrap();
        }

        for _ in 0..200 {
            match recv(&rx) {
                Event::Message(m) => assert!(m.ends_with(&"x".repeat(512))),
                Event::Disconnected(_) => panic!("unexpected disconnect"),
            }
        }
    }
}
