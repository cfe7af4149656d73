//! Protocol classification from the first segment of a connection.
//!
//! A single read decides the path: requests starting with the `CONNECT`
//! method token become tunnels, everything else is rewritten and forwarded.

use crate::error::{ProxyError, Result};
use crate::timeouts;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on the initial read used for classification (8 KiB).
pub const INITIAL_READ_LIMIT: usize = 8 * 1024;

const CONNECT_TOKEN: &[u8] = b"CONNECT";

/// Handling path chosen for a connection, carrying the initial segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// `CONNECT host:port` request; handled by the tunnel relay.
    Tunnel { request: String },
    /// Any other request; handled by the rewrite forwarder, which parses
    /// headers from the raw bytes.
    Forward { request: String, raw: Vec<u8> },
}

/// Classify an initial segment by its leading method token.
#[must_use]
pub fn classify(buf: &[u8]) -> Classified {
    let request = String::from_utf8_lossy(buf).into_owned();
    if buf.starts_with(CONNECT_TOKEN) {
        Classified::Tunnel { request }
    } else {
        Classified::Forward {
            request,
            raw: buf.to_vec(),
        }
    }
}

/// Read the first segment of a fresh connection and classify it.
///
/// Performs exactly one read of at most [`INITIAL_READ_LIMIT`] bytes.
/// Returns `Ok(None)` if the client closed without sending anything.
pub async fn read_and_classify<S>(
    stream: &mut S,
    io_timeout: Option<Duration>,
) -> Result<Option<Classified>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; INITIAL_READ_LIMIT];
    let n = timeouts::idle(io_timeout, "initial read", stream.read(&mut buf))
        .await
        .map_err(ProxyError::Read)?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(classify(&buf[..n])))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_routes_to_tunnel() {
        let classified = classify(b"CONNECT indexer.example:443 HTTP/1.1\r\n\r\n");
        match classified {
            Classified::Tunnel { request } => {
                assert!(request.starts_with("CONNECT indexer.example:443"));
            }
            other => panic!("CONNECT classified as {:?}", other),
        }
    }

    #[test]
    fn test_other_methods_route_to_forward() {
        for line in [
            "GET http://a.example/ HTTP/1.1\r\n\r\n",
            "POST http://a.example/ HTTP/1.1\r\n\r\n",
            "HEAD http://a.example/ HTTP/1.1\r\n\r\n",
            "connect a.example:443 HTTP/1.1\r\n\r\n",
            " CONNECT a.example:443 HTTP/1.1\r\n\r\n",
            "garbage",
        ] {
            match classify(line.as_bytes()) {
                Classified::Forward { request, raw } => {
                    assert_eq!(request, line);
                    assert_eq!(raw, line.as_bytes());
                }
                other => panic!("{:?} classified as {:?}", line, other),
            }
        }
    }

    #[tokio::test]
    async fn test_read_empty_stream_is_none() {
        let mut empty: &[u8] = b"";
        assert!(read_and_classify(&mut empty, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_is_bounded() {
        let big = vec![b'A'; INITIAL_READ_LIMIT * 2];
        let mut reader: &[u8] = &big;
        match read_and_classify(&mut reader, None).await.unwrap() {
            Some(Classified::Forward { raw, .. }) => assert_eq!(raw.len(), INITIAL_READ_LIMIT),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_timeout_is_read_error() {
        let (mut client, _server) = tokio::io::duplex(64);
        let err = read_and_classify(&mut client, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Read(_)));
    }
}
