use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use hostwire_transport::IpcStream;
use tracing::warn;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Partial reads are handled internally; callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            let decoded = decode_frame(&mut self.buf, self.config.max_payload_size)
                .inspect_err(|err| warn!(error = %err, "rejecting inbound frame"))?;
            if let Some(frame) = decoded {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Read the next complete frame and return it as message text.
    pub fn read_message(&mut self) -> Result<String> {
        self.read_frame()?.into_text()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: hostwire_transport::TransportError) -> FrameError {
    match err {
        hostwire_transport::TransportError::Io(io)
        | hostwire_transport::TransportError::Accept(io) => FrameError::Io(io),
        hostwire_transport::TransportError::Bind { source, .. }
        | hostwire_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, MAGIC};
    use crate::writer::FrameWriter;

    fn wire_of(messages: &[&str]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        for message in messages {
            encode_frame(message.as_bytes(), &mut wire).unwrap();
        }
        wire.to_vec()
    }

    #[test]
    fn reads_messages_in_order() {
        let mut reader = FrameReader::new(Cursor::new(wire_of(&["one", "two", "three"])));

        assert_eq!(reader.read_message().unwrap(), "one");
        assert_eq!(reader.read_message().unwrap(), "two");
        assert_eq!(reader.read_message().unwrap(), "three");
        assert!(matches!(
            reader.read_message(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn reads_payload_larger_than_chunk() {
        let payload = "x".repeat(64 * 1024);
        let mut reader = FrameReader::new(Cursor::new(wire_of(&[&payload])));
        assert_eq!(reader.read_message().unwrap().len(), payload.len());
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire_of(&["slow"]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);
        assert_eq!(reader.read_message().unwrap(), "slow");
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut partial = BytesMut::new();
        partial.put_slice(&MAGIC);
        partial.put_u32_le(16);
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn invalid_magic_in_stream() {
        let bytes = vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x00];
        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert!(matches!(reader.read_frame(), Err(FrameError::InvalidMagic)));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let cfg = FrameConfig {
            max_payload_size: 2,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire_of(&["too long"])), cfg);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire_of(&["ok"])),
        };
        let mut framed = FrameReader::new(reader);
        assert_eq!(framed.read_message().unwrap(), "ok");
    }

    #[test]
    fn timed_out_read_surfaces_as_io_error() {
        let mut framed = FrameReader::new(AlwaysTimedOut);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::TimedOut));
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.send_text("ping").unwrap();
        assert_eq!(reader.read_message().unwrap(), "ping");
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_ipc_stream_uds() {
        let dir = std::env::temp_dir().join(format!(
            "hostwire-frame-uds-roundtrip-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let sock_path = dir.join("test.sock");
        let listener = hostwire_transport::UnixDomainSocket::bind(&sock_path).unwrap();

        let path_clone = sock_path.clone();
        let server = std::thread::spawn(move || {
            let stream = listener.accept().unwrap();
            let cfg = FrameConfig {
                read_timeout: Some(std::time::Duration::from_secs(5)),
                ..FrameConfig::default()
            };
            let mut reader = FrameReader::with_config_ipc(stream, cfg).unwrap();
            reader.read_message().unwrap()
        });

        let stream = hostwire_transport::UnixDomainSocket::connect(&path_clone).unwrap();
        let mut writer = FrameWriter::new(stream);
        writer.send_text("uds").unwrap();

        assert_eq!(server.join().unwrap(), "uds");
        let _ = std::fs::remove_dir_all(&dir);
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    struct AlwaysTimedOut;

    impl Read for AlwaysTimedOut {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::TimedOut))
        }
    }
}
