// Framed IPC (4.4): length-prefixed JSON records over a Unix-domain rendezvous socket, one
// accepted peer at a time. Server half parks inside the command dispatcher's stop loop;
// client half is used by the CLI façade for exactly one round trip per invocation.
use crate::error::{ErrorKind, Result};
use crate::err;
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

fn read_frame(stream: &mut UnixStream) -> Result<Option<serde_json::Value>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if matches!(e.kind(), IoErrorKind::UnexpectedEof | IoErrorKind::ConnectionReset | IoErrorKind::BrokenPipe) => {
            return Ok(None);
        }
        Err(e) if e.kind() == IoErrorKind::WouldBlock || e.kind() == IoErrorKind::TimedOut => {
            return err!(Transport, "timed out waiting for a frame");
        }
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return err!(Protocol, "frame of {} bytes exceeds the maximum of {}", len, MAX_FRAME_LEN);
    }
    let mut body = vec![0u8; len as usize];
    match stream.read_exact(&mut body) {
        Ok(()) => {}
        Err(e) if matches!(e.kind(), IoErrorKind::UnexpectedEof | IoErrorKind::ConnectionReset | IoErrorKind::BrokenPipe) => {
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(Some(serde_json::from_slice(&body)?))
}

fn write_frame(stream: &mut UnixStream, record: &serde_json::Value) -> Result<()> {
    let body = serde_json::to_vec(record)?;
    let len = (body.len() as u32).to_be_bytes();
    stream.write_all(&len).and_then(|_| stream.write_all(&body)).map_err(|e| e.into())
}

/// Server half: binds the rendezvous socket, accepts one peer at a time, and serves framed
/// request/response round trips. Never emits unsolicited frames.
pub struct IpcServer {
    listener: Option<UnixListener>,
    peer: Option<UnixStream>,
    socket_path: PathBuf,
    socket_timeout: Duration,
}

impl IpcServer {
    /// Unlinks any stale socket file, binds, and listens with backlog 1 (4.4).
    pub fn start(socket_path: &Path, socket_timeout: Duration) -> Result<Self> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)?;
        Ok(IpcServer { listener: Some(listener), peer: None, socket_path: socket_path.to_path_buf(), socket_timeout })
    }

    /// Accept-with-timeout: returns whether a peer is attached after waiting up to
    /// `timeout` for one, via `poll(2)` on the listener's raw fd so the daemon can
    /// periodically observe shutdown flags between polls (4.4/5).
    pub fn accept(&mut self, timeout: Duration) -> Result<bool> {
        if self.peer.is_some() {
            return Ok(true);
        }
        let listener = match &self.listener {
            Some(l) => l,
            None => return err!(Transport, "IPC server is closed"),
        };
        let fd = listener.as_raw_fd();
        let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        let ret = unsafe { libc::poll(&mut pfd, 1, millis) };
        if ret < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        if ret == 0 || (pfd.revents & libc::POLLIN) == 0 {
            return Ok(false);
        }
        let (stream, _addr) = listener.accept()?;
        stream.set_read_timeout(Some(self.socket_timeout))?;
        stream.set_write_timeout(Some(self.socket_timeout))?;
        self.peer = Some(stream);
        Ok(true)
    }

    /// Reads one framed request. Returns `None` on clean EOF or reset (the peer disconnected
    /// mid-stop); the listener itself is left intact so accept() can take a new peer (4.4).
    pub fn receive(&mut self) -> Result<Option<serde_json::Value>> {
        let stream = match &mut self.peer {
            Some(s) => s,
            None => return Ok(None),
        };
        match read_frame(stream) {
            Ok(Some(v)) => Ok(Some(v)),
            Ok(None) => {
                self.peer = None;
                Ok(None)
            }
            Err(e) => {
                self.peer = None;
                Err(e)
            }
        }
    }

    /// Writes one framed response. On broken pipe, closes the peer and returns failure (4.4).
    pub fn send(&mut self, record: &serde_json::Value) -> Result<()> {
        let stream = match &mut self.peer {
            Some(s) => s,
            None => return err!(Transport, "no peer is connected"),
        };
        match write_frame(stream, record) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.peer = None;
                Err(e)
            }
        }
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    /// Tears down both sockets and removes the socket file. Idempotent (4.4).
    pub fn close(&mut self) {
        self.peer = None;
        self.listener = None;
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Client half: a thin one-shot façade used by the CLI -- connect, send one framed request,
/// read one framed response (4.4).
pub struct IpcClient {
    stream: UnixStream,
}

impl IpcClient {
    /// Polls for the socket file to exist, then attempts a connection, retrying until
    /// `timeout` elapses (4.4).
    pub fn connect(socket_path: &Path, timeout: Duration, socket_timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            if socket_path.exists() {
                match UnixStream::connect(socket_path) {
                    Ok(stream) => {
                        stream.set_read_timeout(Some(socket_timeout))?;
                        stream.set_write_timeout(Some(socket_timeout))?;
                        return Ok(IpcClient { stream });
                    }
                    Err(_) if Instant::now() < deadline => {
                        std::thread::sleep(Duration::from_millis(25));
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if Instant::now() >= deadline {
                return err!(Transport, "timed out waiting for socket {}", socket_path.display());
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    /// Writes one request, reads one response. On timeout/reset, returns a structured error
    /// rather than raising (4.4) -- the caller decides how to render it.
    pub fn send_command(&mut self, request: &serde_json::Value) -> Result<serde_json::Value> {
        write_frame(&mut self.stream, request)?;
        match read_frame(&mut self.stream)? {
            Some(v) => Ok(v),
            None => err!(Transport, "connection closed before a response was received"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_one_request_response() {
        let dir = std::env::temp_dir().join(format!("scriptdbg-ipc-test-{:08x}", rand::random::<u32>()));
        std::fs::create_dir_all(&dir).unwrap();
        let socket_path = dir.join("test.sock");

        let mut server = IpcServer::start(&socket_path, Duration::from_secs(5)).unwrap();

        let socket_path_clone = socket_path.clone();
        let client_thread = std::thread::spawn(move || {
            let mut client = IpcClient::connect(&socket_path_clone, Duration::from_secs(5), Duration::from_secs(5)).unwrap();
            client.send_command(&json!({"command": "status"})).unwrap()
        });

        assert!(server.accept(Duration::from_secs(5)).unwrap());
        let req = server.receive().unwrap().unwrap();
        assert_eq!(req["command"], "status");
        server.send(&json!({"status": "ok"})).unwrap();

        let response = client_thread.join().unwrap();
        assert_eq!(response["status"], "ok");
    }

    #[test]
    fn receive_returns_none_on_disconnect_without_closing_listener() {
        let dir = std::env::temp_dir().join(format!("scriptdbg-ipc-test-{:08x}", rand::random::<u32>()));
        std::fs::create_dir_all(&dir).unwrap();
        let socket_path = dir.join("test.sock");
        let mut server = IpcServer::start(&socket_path, Duration::from_secs(5)).unwrap();

        let socket_path_clone = socket_path.clone();
        std::thread::spawn(move || {
            let _client = UnixStream::connect(&socket_path_clone).unwrap();
            // dropped immediately: peer disconnects before sending anything
        });

        assert!(server.accept(Duration::from_secs(5)).unwrap());
        assert!(server.receive().unwrap().is_none());
        // Listener must still be usable for the next peer.
        assert!(!server.has_peer());
    }

    #[test]
    fn accept_times_out_when_nobody_connects() {
        let dir = std::env::temp_dir().join(format!("scriptdbg-ipc-test-{:08x}", rand::random::<u32>()));
        std::fs::create_dir_all(&dir).unwrap();
        let socket_path = dir.join("test.sock");
        let mut server = IpcServer::start(&socket_path, Duration::from_secs(5)).unwrap();
        assert!(!server.accept(Duration::from_millis(50)).unwrap());
    }
}
