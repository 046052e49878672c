//! Socket transport to the window manager
//!
//! Two channels to the same unix socket path:
//!
//! - [`CommandChannel`]: a long-lived synchronous request/response channel.
//!   A request is its argument list joined with NUL and no trailing
//!   terminator; the response is one newline-terminated byte blob, returned
//!   with the newline stripped. The content grammar is the caller's concern.
//! - [`EventStream`]: a second connection turned into a one-way notification
//!   feed by sending the subscribe command. It then delivers one
//!   newline-terminated event record per state change, forever. A stream is
//!   not restartable; once it closes, a new connection is required.
//!
//! Any I/O error or unexpected close surfaces as [`TransportError`] and is
//! fatal to the mirror; there is no reconnect logic at this layer.

use std::env;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::error::TransportError;

/// Environment variable overriding the socket path
const SOCKET_ENV: &str = "BSPWM_SOCKET";

/// Environment variable the fallback path is derived from
const DISPLAY_ENV: &str = "DISPLAY";

/// Arguments of the subscribe command that turns a connection into an event
/// stream
const SUBSCRIBE_ARGS: &[&str] = &["subscribe", "all"];

/// A parsed DISPLAY string (`host:display[.screen]`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XDisplay {
    pub host: String,
    pub display: u32,
    pub screen: u32,
}

/// Parse a DISPLAY string into its three components.
///
/// The host may be empty (the common `:0` case); a missing screen part means
/// screen 0.
///
/// # Errors
///
/// Returns `TransportError::BadDisplay` when the string has no colon, a
/// non-numeric display or screen, or more than one dot.
pub fn parse_display(display: &str) -> Result<XDisplay, TransportError> {
    let bad = || TransportError::BadDisplay { display: display.to_string() };

    let (host, rest) = display.split_once(':').ok_or_else(bad)?;
    let mut parts = rest.split('.');
    let number = parts.next().ok_or_else(bad)?;
    let screen = match (parts.next(), parts.next()) {
        (None, _) => 0,
        (Some(screen), None) => screen.parse().map_err(|_| bad())?,
        (Some(_), Some(_)) => return Err(bad()),
    };
    Ok(XDisplay {
        host: host.to_string(),
        display: number.parse().map_err(|_| bad())?,
        screen,
    })
}

/// The socket path the window manager uses for a given display
pub fn socket_path_for(display: &XDisplay) -> PathBuf {
    PathBuf::from(format!(
        "/tmp/bspwm{}_{}_{}-socket",
        display.host, display.display, display.screen
    ))
}

/// Discover the window manager's socket path from the environment.
///
/// `$BSPWM_SOCKET` wins when set; otherwise the path is derived from
/// `$DISPLAY`. Either way the path must exist and be a unix socket.
///
/// # Errors
///
/// Returns `TransportError::SocketNotSet` when neither variable is set,
/// `BadDisplay` when `$DISPLAY` does not parse, `SocketNotFound` when the
/// path does not exist, and `NotASocket` when it is a different file type.
pub fn socket_path() -> Result<PathBuf, TransportError> {
    let path = match env::var(SOCKET_ENV) {
        Ok(explicit) => PathBuf::from(explicit),
        Err(_) => {
            let display = env::var(DISPLAY_ENV).map_err(|_| TransportError::SocketNotSet)?;
            socket_path_for(&parse_display(&display)?)
        }
    };
    match std::fs::metadata(&path) {
        Err(_) => Err(TransportError::SocketNotFound { path }),
        Ok(meta) if !meta.file_type().is_socket() => Err(TransportError::NotASocket { path }),
        Ok(_) => Ok(path),
    }
}

/// The synchronous request/response channel
#[derive(Debug)]
pub struct CommandChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl CommandChannel {
    /// Connect the command channel.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the socket cannot be
    /// connected.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let (read_half, write_half) = connect(path.as_ref()).await?;
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    /// One synchronous round trip: send an argument list, return the
    /// response blob with its trailing newline stripped.
    ///
    /// Arguments are forwarded verbatim; nothing here interprets command
    /// semantics.
    ///
    /// # Errors
    ///
    /// `SendFailed`/`ReceiveFailed` on I/O errors, `ConnectionClosed` when
    /// the peer closes before responding.
    pub async fn request(&mut self, args: &[&str]) -> Result<Vec<u8>, TransportError> {
        let payload = args.join("\0");
        self.writer
            .write_all(payload.as_bytes())
            .await
            .map_err(TransportError::SendFailed)?;
        self.writer.flush().await.map_err(TransportError::SendFailed)?;

        let mut response = Vec::new();
        let bytes_read = self
            .reader
            .read_until(b'\n', &mut response)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if bytes_read == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        if response.last() == Some(&b'\n') {
            response.pop();
        }
        Ok(response)
    }
}

/// The one-way notification feed
#[derive(Debug)]
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
    // Keeping the write half alive keeps the connection from half-closing
    _writer: OwnedWriteHalf,
}

impl EventStream {
    /// Open a fresh connection and subscribe it to all notifications.
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` if the socket cannot be connected, `SendFailed` if
    /// the subscribe command cannot be written.
    pub async fn subscribe(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let (read_half, mut write_half) = connect(path.as_ref()).await?;

        let payload = SUBSCRIBE_ARGS.join("\0");
        write_half
            .write_all(payload.as_bytes())
            .await
            .map_err(TransportError::SendFailed)?;
        write_half.flush().await.map_err(TransportError::SendFailed)?;

        Ok(Self {
            reader: BufReader::new(read_half),
            _writer: write_half,
        })
    }

    /// Block until the next event record arrives, returning it without its
    /// trailing newline.
    ///
    /// # Errors
    ///
    /// `ReceiveFailed` on I/O errors, `ConnectionClosed` on EOF.
    pub async fn next_line(&mut self) -> Result<String, TransportError> {
        let mut line = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if bytes_read == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }
}

async fn connect(path: &Path) -> Result<(OwnedReadHalf, OwnedWriteHalf), TransportError> {
    let stream = UnixStream::connect(path)
        .await
        .map_err(|e| TransportError::ConnectionFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(stream.into_split())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    // Env vars are process-global; tests touching them must not interleave.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn parses_display_strings() {
        assert_eq!(
            parse_display(":1").unwrap(),
            XDisplay { host: String::new(), display: 1, screen: 0 }
        );
        assert_eq!(
            parse_display("abc:0").unwrap(),
            XDisplay { host: "abc".to_string(), display: 0, screen: 0 }
        );
        assert_eq!(
            parse_display(":1.1").unwrap(),
            XDisplay { host: String::new(), display: 1, screen: 1 }
        );
    }

    #[test]
    fn rejects_bad_display_strings() {
        for input in [":1.1.1", "nocolon", ":x", ":1.y"] {
            assert!(
                matches!(parse_display(input), Err(TransportError::BadDisplay { .. })),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn builds_socket_paths() {
        let plain = XDisplay { host: String::new(), display: 0, screen: 0 };
        assert_eq!(socket_path_for(&plain), PathBuf::from("/tmp/bspwm_0_0-socket"));

        let remote = XDisplay { host: "box".to_string(), display: 1, screen: 2 };
        assert_eq!(socket_path_for(&remote), PathBuf::from("/tmp/bspwmbox_1_2-socket"));
    }

    #[test]
    fn socket_discovery_requires_some_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved_socket = env::var(SOCKET_ENV).ok();
        let saved_display = env::var(DISPLAY_ENV).ok();
        env::remove_var(SOCKET_ENV);
        env::remove_var(DISPLAY_ENV);

        let result = socket_path();

        restore(SOCKET_ENV, saved_socket);
        restore(DISPLAY_ENV, saved_display);
        assert!(matches!(result, Err(TransportError::SocketNotSet)));
    }

    #[test]
    fn socket_discovery_rejects_non_socket_paths() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved_socket = env::var(SOCKET_ENV).ok();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-socket");
        std::fs::write(&file, b"").unwrap();
        env::set_var(SOCKET_ENV, &file);

        let result = socket_path();

        restore(SOCKET_ENV, saved_socket);
        assert!(matches!(result, Err(TransportError::NotASocket { .. })));
    }

    #[test]
    fn socket_discovery_rejects_missing_paths() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved_socket = env::var(SOCKET_ENV).ok();
        env::set_var(SOCKET_ENV, "/tmp/definitely-not-a-bspmirror-socket");

        let result = socket_path();

        restore(SOCKET_ENV, saved_socket);
        assert!(matches!(result, Err(TransportError::SocketNotFound { .. })));
    }

    fn restore(key: &str, value: Option<String>) {
        match value {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }

    #[tokio::test]
    async fn request_frames_args_with_nul_and_strips_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wm.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            // "wm" NUL "-g", no trailing terminator
            let mut request = vec![0u8; 5];
            conn.read_exact(&mut request).await.unwrap();
            conn.write_all(b"WMLVDS1:oI:fII\n").await.unwrap();
            request
        });

        let mut channel = CommandChannel::connect(&path).await.unwrap();
        let response = channel.request(&["wm", "-g"]).await.unwrap();
        assert_eq!(response, b"WMLVDS1:oI:fII");

        let request = server.await.unwrap();
        assert_eq!(request, b"wm\0-g");

        drop(channel);
    }

    #[tokio::test]
    async fn request_reports_close_before_response() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wm.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            // Hang up without answering
            drop(conn);
        });

        let mut channel = CommandChannel::connect(&path).await.unwrap();
        let result = channel.request(&["wm", "-d"]).await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn event_stream_subscribes_then_reads_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wm.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut subscribe = vec![0u8; 13];
            conn.read_exact(&mut subscribe).await.unwrap();
            assert_eq!(subscribe, b"subscribe\0all");
            conn.write_all(b"desktop_focus mon0 II\n").await.unwrap();
            conn.write_all(b"node_remove mon0 II win2\n").await.unwrap();
            // EOF follows
        });

        let mut stream = EventStream::subscribe(&path).await.unwrap();
        assert_eq!(stream.next_line().await.unwrap(), "desktop_focus mon0 II");
        assert_eq!(stream.next_line().await.unwrap(), "node_remove mon0 II win2");
        assert!(matches!(
            stream.next_line().await,
            Err(TransportError::ConnectionClosed)
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.sock");
        let result = CommandChannel::connect(&path).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed { .. })));
    }
}
