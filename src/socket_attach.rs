//! C5 socket-attach engine: connect to the slot's supervisor socket, read
//! the configuration blob, send the architecture hint, optionally go
//! non-blocking (§4.4).

use std::io::Write;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use thiserror::Error;

use crate::config::{ConfigBlob, ConfigReadError};
use crate::registry::Slot;

/// Hard-coded connect retry budget: 250 attempts of 1ms each (§4.4 step 2).
pub const SOCKET_CONNECT_TIMEOUT_MS: u32 = 250;

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("failed to create AF_UNIX socket: {0}")]
    SocketCreate(std::io::Error),
    #[error("timed out connecting to {path} after {attempts} attempts")]
    ConnectTimeout { path: String, attempts: u32 },
    #[error("failed to read config blob from {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: ConfigReadError,
    },
    #[error("failed to send architecture hint to {path}: {0}")]
    ArchHintWrite(std::io::Error),
    #[error("failed to set socket non-blocking: {0}")]
    NonBlocking(nix::Error),
}

/// Connect to `slot`'s socket, read its configuration blob into the slot's
/// cache, and return the live fd. `set_nonblocking_now` is `false` for
/// `open64`, whose non-blocking transition is deferred to the next
/// `epoll_ctl(EPOLL_CTL_ADD, ...)` registration (§4.4 step 5).
pub fn attach(slot: &'static Slot, set_nonblocking_now: bool) -> Result<RawFd, AttachError> {
    let mut stream = connect_with_retry(slot.socket_path)?;

    let config = ConfigBlob::read_from(&mut stream).map_err(|source| AttachError::ConfigRead {
        path: slot.socket_path.to_string(),
        source,
    })?;

    let arch_hint = [std::mem::size_of::<libc::c_ulong>() as u8];
    stream
        .write_all(&arch_hint)
        .map_err(AttachError::ArchHintWrite)?;

    if set_nonblocking_now {
        set_nonblocking(stream.as_raw_fd())?;
    }

    *slot.config.lock() = config;

    let fd = stream.into_raw_fd();
    slot.force_bind(fd);
    log::info!(
        "started interposer for 'open' call on {} with fd: {}",
        slot.device_path,
        fd
    );
    Ok(fd)
}

fn connect_with_retry(socket_path: &str) -> Result<UnixStream, AttachError> {
    let mut attempt = 0u32;
    loop {
        match UnixStream::connect(socket_path) {
            Ok(stream) => return Ok(stream),
            Err(_) if attempt < SOCKET_CONNECT_TIMEOUT_MS => {
                attempt += 1;
                thread::sleep(Duration::from_millis(1));
            }
            Err(_) => {
                return Err(AttachError::ConnectTimeout {
                    path: socket_path.to_string(),
                    attempts: SOCKET_CONNECT_TIMEOUT_MS,
                })
            }
        }
    }
}

/// Set `O_NONBLOCK` on `fd` (used both by the immediate path in `attach` and
/// by the lifecycle hook's `epoll_ctl` handler, C8).
pub fn set_nonblocking(fd: RawFd) -> Result<(), AttachError> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(AttachError::NonBlocking)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(AttachError::NonBlocking)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixListener;

    /// A private socket path under a throwaway directory, distinct from the
    /// fixed `/tmp/selkies_*.sock` paths so tests never collide with each
    /// other or with a live supervisor (see SPEC_FULL.md's test tooling
    /// section). The returned `TempDir` must stay alive for the path to
    /// remain valid.
    fn temp_socket_path(tag: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::Builder::new()
            .prefix("selkies-test-")
            .tempdir()
            .unwrap();
        let path = dir.path().join(format!("{}.sock", tag));
        (dir, path)
    }

    #[test]
    fn connect_retry_succeeds_once_listener_appears() {
        let (_dir, path) = temp_socket_path("retry");
        let path_clone = path.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let listener = UnixListener::bind(&path_clone).unwrap();
            let (mut stream, _) = listener.accept().unwrap();
            // 1353-byte config blob, all zero, is a valid (if empty) config.
            let blob = vec![0u8; crate::config::CONFIG_BLOB_LEN];
            stream.write_all(&blob).unwrap();
            let mut hint = [0u8; 1];
            stream.read_exact(&mut hint).unwrap();
            hint
        });

        let result = connect_with_retry(path.to_str().unwrap());
        assert!(result.is_ok());
        let hint = handle.join().unwrap();
        assert_eq!(hint[0] as usize, std::mem::size_of::<libc::c_ulong>());
    }

    #[test]
    fn connect_timeout_when_nothing_is_listening() {
        let (_dir, path) = temp_socket_path("timeout");
        let err = connect_with_retry(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, AttachError::ConnectTimeout { attempts, .. } if attempts == SOCKET_CONNECT_TIMEOUT_MS));
    }
}
