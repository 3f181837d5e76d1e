use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// `sockaddr_un.sun_path` capacity, including the trailing NUL.
#[cfg(target_os = "linux")]
const SUN_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const SUN_PATH_LEN: usize = 104;

/// Only the user running the controller may connect.
const SOCKET_MODE: u32 = 0o600;

/// Device and inode of the socket file this listener created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketFile {
    dev: u64,
    ino: u64,
}

impl SocketFile {
    fn of(metadata: &std::fs::Metadata) -> Self {
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }
}

/// Listener on a filesystem Unix socket named by the controller.
///
/// A socket left behind by a dead test host is replaced; one that still
/// accepts connections is not. The socket file is unlinked on drop if it is
/// still the one this listener created.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    file: SocketFile,
}

impl UnixDomainSocket {
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= SUN_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: SUN_PATH_LEN,
            });
        }

        let bind_err = |source| TransportError::Bind {
            address: path.display().to_string(),
            source,
        };
        clear_stale_socket(&path).map_err(bind_err)?;

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .map_err(bind_err)?;
        let file = std::fs::symlink_metadata(&path)
            .map(|metadata| SocketFile::of(&metadata))
            .map_err(bind_err)?;

        info!(path = %path.display(), "listening on unix socket");
        Ok(Self {
            listener,
            path,
            file,
        })
    }

    /// Accept one connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _) = self.listener.accept().map_err(TransportError::Accept)?;
        let stream = IpcStream::from_unix(stream);
        match stream.peer_credentials() {
            Some((uid, _, pid)) => debug!(uid, pid, "controller connected over unix socket"),
            None => debug!("controller connected over unix socket"),
        }
        Ok(stream)
    }

    /// Connect to a test host listening on `path` (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            address: path.display().to_string(),
            source,
        })?;
        Ok(IpcStream::from_unix(stream))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Make `path` free to bind. Fails if it is not a socket, or if another
/// host is still serving on it.
fn clear_stale_socket(path: &Path) -> io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists and is not a unix socket",
        ));
    }
    if UnixStream::connect(path).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            "another test host is listening on this socket",
        ));
    }

    warn!(path = %path.display(), "replacing stale socket");
    std::fs::remove_file(path)
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        match std::fs::symlink_metadata(&self.path) {
            Ok(metadata)
                if metadata.file_type().is_socket() && SocketFile::of(&metadata) == self.file =>
            {
                if let Err(err) = std::fs::remove_file(&self.path) {
                    debug!(path = %self.path.display(), error = %err, "socket cleanup failed");
                }
            }
            Ok(_) => debug!(path = %self.path.display(), "socket path reused; left in place"),
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hw-uds-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn accepts_controller_and_unlinks_on_drop() {
        let dir = scratch("accept");
        let path = dir.join("host.sock");
        let listener = UnixDomainSocket::bind(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, SOCKET_MODE);

        let client_path = path.clone();
        let client = std::thread::spawn(move || {
            let mut stream = UnixDomainSocket::connect(&client_path).unwrap();
            stream.write_all(b"ping").unwrap();
        });
        let mut host = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        host.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        client.join().unwrap();

        drop(listener);
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stale_socket_is_replaced() {
        let dir = scratch("stale");
        let path = dir.join("host.sock");
        // A bound socket nobody accepts on is stale once its listener is gone.
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = UnixDomainSocket::bind(&path).unwrap();
        assert_eq!(listener.path(), path);
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn live_socket_is_not_taken_over() {
        let dir = scratch("live");
        let path = dir.join("host.sock");
        let first = UnixDomainSocket::bind(&path).unwrap();

        let err = UnixDomainSocket::bind(&path).err().unwrap();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::AddrInUse));

        drop(first);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn regular_file_is_never_removed() {
        let dir = scratch("file");
        let path = dir.join("host.sock");
        std::fs::write(&path, b"data").unwrap();

        let err = UnixDomainSocket::bind(&path).err().unwrap();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::AlreadyExists));
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn overlong_path_is_rejected() {
        let path = format!("/tmp/{}.sock", "h".repeat(SUN_PATH_LEN));
        assert!(matches!(
            UnixDomainSocket::bind(&path),
            Err(TransportError::PathTooLong { .. })
        ));
    }

    #[test]
    fn connect_to_missing_socket_is_not_found() {
        let path = scratch("missing").join("absent.sock");
        let err = UnixDomainSocket::connect(&path).err().unwrap();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::NotFound));
    }

    #[test]
    fn replaced_path_survives_drop() {
        let dir = scratch("replaced");
        let path = dir.join("host.sock");
        let listener = UnixDomainSocket::bind(&path).unwrap();

        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, b"someone else").unwrap();
        drop(listener);

        assert!(path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
