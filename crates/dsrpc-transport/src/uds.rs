use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::reactor::FdEvents;
use crate::scm::{recv_with_fds, send_with_fds};
use crate::traits::{StreamTransport, TransportObserver};

/// Unix domain socket listener.
///
/// Servers (and tests standing in for a compositor) bind here; clients call
/// [`UnixDomainSocket::connect`] to obtain a [`UnixStreamTransport`].
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
    /// Whether the path should be removed on drop.
    cleanup_on_drop: bool,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// If the path already exists and is a socket, it is removed first
    /// (stale socket cleanup). Any other existing file is left alone.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            created_inode: Some((created.dev(), created.ino())),
            path,
            cleanup_on_drop: true,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<UnixStreamTransport> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(UnixStreamTransport::new(stream))
    }

    /// Connect to a listening socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<UnixStreamTransport> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "connected to unix domain socket");
        Ok(UnixStreamTransport::new(stream))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        if !self.cleanup_on_drop {
            return;
        }
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

/// Stream transport over a connected Unix domain socket.
///
/// Descriptors travel as `SCM_RIGHTS` ancillary data. Received descriptors
/// are returned as [`OwnedFd`] and close-on-exec on Linux.
pub struct UnixStreamTransport {
    stream: UnixStream,
    observers: Mutex<Vec<Weak<dyn TransportObserver>>>,
}

impl UnixStreamTransport {
    /// Wrap a connected stream.
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// A connected pair of transports (tests, in-process servers).
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::new(left), Self::new(right)))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Read exactly `buf.len()` bytes, keeping any descriptors that arrive
    /// alongside them (at most `max_fds`).
    ///
    /// Servers use this to read invocation headers: a client attaches its
    /// descriptors to the first byte of the frame.
    pub fn receive_with_any_fds(&self, buf: &mut [u8], max_fds: usize) -> Result<Vec<OwnedFd>> {
        self.read_exact_collecting(buf, max_fds)
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        use std::os::fd::AsRawFd;

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and the descriptor is an open Unix socket owned by this transport.
        let rc = unsafe {
            libc::getsockopt(
                self.stream.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }

    fn observers(&self) -> Vec<std::sync::Arc<dyn TransportObserver>> {
        let mut observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        observers.retain(|observer| observer.strong_count() > 0);
        observers.iter().filter_map(Weak::upgrade).collect()
    }

    fn notify_disconnected(&self) {
        for observer in self.observers() {
            observer.on_disconnected();
        }
    }

    fn read_exact_collecting(&self, buf: &mut [u8], max_fds: usize) -> Result<Vec<OwnedFd>> {
        let mut fds = Vec::new();
        let mut offset = 0usize;

        while offset < buf.len() {
            let remaining_fds = max_fds.saturating_sub(fds.len());
            let read = if remaining_fds > 0 {
                recv_with_fds(
                    self.stream.as_fd(),
                    &mut buf[offset..],
                    remaining_fds,
                    &mut fds,
                )
            } else {
                (&self.stream).read(&mut buf[offset..])
            };

            match read {
                Ok(0) => {
                    debug!(offset, wanted = buf.len(), "end of stream");
                    self.notify_disconnected();
                    return Err(TransportError::Disconnected);
                }
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::InvalidData => {
                    return Err(TransportError::ControlTruncated)
                }
                Err(err) => {
                    let err = TransportError::Io(err);
                    if err.is_disconnect() {
                        self.notify_disconnected();
                    }
                    return Err(err);
                }
            }
        }

        trace!(bytes = buf.len(), fds = fds.len(), "received");
        Ok(fds)
    }
}

impl StreamTransport for UnixStreamTransport {
    fn register_observer(&self, observer: Weak<dyn TransportObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn receive_data(&self, buf: &mut [u8]) -> Result<()> {
        let stray = self.read_exact_collecting(buf, 0)?;
        debug_assert!(stray.is_empty());
        Ok(())
    }

    fn receive_data_with_fds(&self, buf: &mut [u8], fd_count: usize) -> Result<Vec<OwnedFd>> {
        if buf.is_empty() && fd_count > 0 {
            return Err(TransportError::EmptyPayload(fd_count));
        }
        let fds = self.read_exact_collecting(buf, fd_count)?;
        if fds.len() != fd_count {
            return Err(TransportError::DescriptorMismatch {
                expected: fd_count,
                received: fds.len(),
            });
        }
        Ok(fds)
    }

    fn send_message(&self, buf: &[u8], fds: &[BorrowedFd<'_>]) -> Result<()> {
        if buf.is_empty() && !fds.is_empty() {
            return Err(TransportError::EmptyPayload(fds.len()));
        }

        let mut offset = 0usize;
        if !fds.is_empty() {
            loop {
                match send_with_fds(self.stream.as_fd(), buf, fds) {
                    Ok(n) => {
                        offset = n;
                        break;
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err.into()),
                }
            }
        }

        while offset < buf.len() {
            match (&self.stream).write(&buf[offset..]) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        trace!(bytes = buf.len(), fds = fds.len(), "sent");
        Ok(())
    }

    fn watch_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }

    fn dispatch(&self, events: FdEvents) -> bool {
        if events.contains(FdEvents::READABLE) {
            for observer in self.observers() {
                observer.on_data_available();
            }
            return true;
        }
        if events.is_hangup() {
            self.notify_disconnected();
            return false;
        }
        true
    }
}

impl std::fmt::Debug for UnixStreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixStreamTransport")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Default)]
    struct CountingObserver {
        data: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl TransportObserver for CountingObserver {
        fn on_data_available(&self) {
            self.data.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disconnected(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dsrpc-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_bind_accept_connect() {
        let dir = temp_dir("uds-test");
        let sock_path = dir.join("test.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        let path_clone = sock_path.clone();
        let handle = std::thread::spawn(move || {
            let client = UnixDomainSocket::connect(&path_clone).unwrap();
            client.send_message(b"hello", &[]).unwrap();
        });

        let server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.receive_data(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();

        drop(listener);
        assert!(
            !sock_path.exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixDomainSocket::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn test_bind_default_permissions_hardened() {
        let dir = temp_dir("uds-perms");
        let sock_path = dir.join("perm.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bind_rejects_existing_non_socket_file() {
        let dir = temp_dir("uds-bind-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UnixDomainSocket::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_drop_does_not_remove_replaced_path() {
        let dir = temp_dir("uds-drop-race");
        let sock_path = dir.join("drop.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement-file").unwrap();

        drop(listener);
        assert!(
            sock_path.exists(),
            "drop must not remove path if inode identity changed"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn receive_assembles_fragmented_writes() {
        let (client, server) = UnixStreamTransport::pair().unwrap();

        let writer = std::thread::spawn(move || {
            client.send_message(&[1u8; 2048], &[]).unwrap();
            std::thread::sleep(Duration::from_millis(20));
            client.send_message(&[2u8; 2048], &[]).unwrap();
            client
        });

        let mut buf = vec![0u8; 4096];
        server.receive_data(&mut buf).unwrap();
        assert!(buf[..2048].iter().all(|b| *b == 1));
        assert!(buf[2048..].iter().all(|b| *b == 2));

        let _client = writer.join().unwrap();
    }

    #[test]
    fn descriptors_arrive_in_order() {
        let (client, server) = UnixStreamTransport::pair().unwrap();
        let probes: Vec<(UnixStream, UnixStream)> =
            (0..3).map(|_| UnixStream::pair().unwrap()).collect();

        let carried: Vec<BorrowedFd<'_>> = probes.iter().map(|(_, far)| far.as_fd()).collect();
        client.send_message(&[0u8], &carried).unwrap();

        let mut dummy = [0u8; 1];
        let fds = server.receive_data_with_fds(&mut dummy, 3).unwrap();
        assert_eq!(fds.len(), 3);

        // Write through each received descriptor; the matching probe sees it.
        for (index, fd) in fds.into_iter().enumerate() {
            let mut stream = UnixStream::from(fd);
            stream.write_all(&[index as u8]).unwrap();
            let mut byte = [0u8; 1];
            (&probes[index].0).read_exact(&mut byte).unwrap();
            assert_eq!(byte[0], index as u8);
        }
    }

    #[test]
    fn descriptor_count_mismatch_is_reported() {
        let (client, server) = UnixStreamTransport::pair().unwrap();
        let (_keep, far) = UnixStream::pair().unwrap();
        client.send_message(&[0u8], &[far.as_fd()]).unwrap();

        let mut dummy = [0u8; 1];
        let err = server.receive_data_with_fds(&mut dummy, 2).unwrap_err();
        assert!(matches!(
            err,
            TransportError::DescriptorMismatch {
                expected: 2,
                received: 1
            }
        ));
    }

    #[test]
    fn end_of_stream_notifies_observers() {
        let (client, server) = UnixStreamTransport::pair().unwrap();
        let observer = Arc::new(CountingObserver::default());
        let weak: Weak<dyn TransportObserver> = Arc::downgrade(&observer) as Weak<dyn TransportObserver>;
        server.register_observer(weak);

        drop(client);
        let mut buf = [0u8; 2];
        let err = server.receive_data(&mut buf).unwrap_err();
        assert!(matches!(err, TransportError::Disconnected));
        assert_eq!(observer.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_routes_readiness_to_live_observers() {
        let (_client, server) = UnixStreamTransport::pair().unwrap();
        let observer = Arc::new(CountingObserver::default());
        server.register_observer(Arc::downgrade(&observer) as Weak<dyn TransportObserver>);
        {
            let dropped = Arc::new(CountingObserver::default());
            server.register_observer(Arc::downgrade(&dropped) as Weak<dyn TransportObserver>);
        }

        assert!(server.dispatch(FdEvents::READABLE));
        assert_eq!(observer.data.load(Ordering::SeqCst), 1);

        assert!(!server.dispatch(FdEvents::REMOTE_CLOSED));
        assert_eq!(observer.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sending_descriptors_needs_payload() {
        let (client, _server) = UnixStreamTransport::pair().unwrap();
        let (_keep, far) = UnixStream::pair().unwrap();
        let err = client.send_message(&[], &[far.as_fd()]).unwrap_err();
        assert!(matches!(err, TransportError::EmptyPayload(1)));
    }
}
