//! Line-based parsing of the initial request segment.
//!
//! Works directly on the bytes read by the classifier; nothing beyond the
//! request line and header lines is interpreted.

use crate::error::{ProxyError, Result};
use std::collections::HashMap;

/// Header name to value, keys as received, values trimmed.
///
/// Repeated header names keep the last value.
pub type HeaderMap = HashMap<String, String>;

/// The first line of an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequestLine {
    pub method: String,
    /// Absolute URI for plain requests, `host:port` for CONNECT.
    pub target: String,
    pub version: String,
}

impl ParsedRequestLine {
    /// Parse the first line of `request`.
    ///
    /// The protocol version is optional; a missing one is recorded as empty.
    pub fn parse(request: &str) -> Result<Self> {
        let line = request.lines().next().unwrap_or("");
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(method), Some(target)) => Ok(Self {
                method: method.to_string(),
                target: target.to_string(),
                version: parts.next().unwrap_or("").to_string(),
            }),
            _ => Err(ProxyError::HttpParse(format!(
                "malformed request line: {}",
                line
            ))),
        }
    }
}

/// Build a [`HeaderMap`] from every line after the request line.
///
/// Lines without a colon, or with a colon in first position, are ignored.
#[must_use]
pub fn parse_headers(buf: &[u8]) -> HeaderMap {
    let text = String::from_utf8_lossy(buf);
    let mut headers = HeaderMap::new();
    for line in text.split("\r\n").filter(|l| !l.is_empty()).skip(1) {
        if let Some(colon) = line.find(':') {
            if colon > 0 {
                headers.insert(
                    line[..colon].trim().to_string(),
                    line[colon + 1..].trim().to_string(),
                );
            }
        }
    }
    headers
}
