//! Optional idle timeouts for socket operations.
//!
//! Socket reads and writes are unbounded unless an idle timeout is
//! configured. Outbound connects always carry a timeout.

use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

fn timeout_error(stage: &'static str, timeout: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{} timed out after {}ms", stage, timeout.as_millis()),
    )
}

/// Run `fut`, failing with `TimedOut` if `timeout` is set and elapses first.
pub(crate) async fn idle<F, T>(
    timeout: Option<Duration>,
    stage: &'static str,
    fut: F,
) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(timeout_error(stage, limit))),
        None => fut.await,
    }
}

/// Connect to `host:port`, resolving the hostname, within `timeout`.
pub(crate) async fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .unwrap_or_else(|_| Err(timeout_error("connect", timeout)))
}

/// Shutdown errors after the peer has already gone away carry no information.
pub(crate) fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
