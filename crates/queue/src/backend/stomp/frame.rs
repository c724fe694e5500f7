//! STOMP 1.2 frame encoding and decoding.
//!
//! See: <https://stomp.github.io/stomp-specification-1.2.html>

use bytes::{Buf, BufMut, BytesMut};
use herald_common::{AppError, AppResult};

/// Largest frame accepted from the broker.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command line, e.g. `SEND` or `MESSAGE`.
    pub command: String,
    /// Headers in wire order. Repeated names keep the first value.
    pub headers: Vec<(String, String)>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl Frame {
    /// Frame with no headers and an empty body.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Header values are not escaped in CONNECT and CONNECTED frames.
    fn escapes_headers(&self) -> bool {
        !matches!(self.command.as_str(), "CONNECT" | "CONNECTED" | "STOMP")
    }

    /// Append the wire form of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let escape = self.escapes_headers();

        dst.put_slice(self.command.as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in &self.headers {
            if escape {
                dst.put_slice(escape_header(name).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(escape_header(value).as_bytes());
            } else {
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            dst.put_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }
        dst.put_u8(b'\n');
        dst.put_slice(&self.body);
        dst.put_u8(0);
    }

    /// Take one complete frame off the front of `src`.
    ///
    /// Returns `Ok(None)` until a whole frame has arrived. Heart-beat newlines
    /// between frames are skipped.
    pub fn decode(src: &mut BytesMut) -> AppResult<Option<Self>> {
        while matches!(src.first(), Some(b'\n' | b'\r')) {
            src.advance(1);
        }
        if src.is_empty() {
            return Ok(None);
        }

        let Some(header_end) = find_header_end(src) else {
            if src.len() > MAX_FRAME_LEN {
                return Err(AppError::Broker("frame header too large".to_string()));
            }
            return Ok(None);
        };

        let head = std::str::from_utf8(&src[..header_end.text_len])
            .map_err(|e| AppError::Broker(format!("frame header is not UTF-8: {e}")))?;
        let mut lines = head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

        let command = lines
            .next()
            .filter(|command| !command.is_empty())
            .ok_or_else(|| AppError::Broker("frame without command".to_string()))?
            .to_string();

        let unescape = !matches!(command.as_str(), "CONNECT" | "CONNECTED" | "STOMP");
        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| AppError::Broker(format!("malformed header line: {line}")))?;
            if unescape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .map(|(_, value)| {
                value
                    .parse::<usize>()
                    .map_err(|e| AppError::Broker(format!("invalid content-length: {e}")))
            })
            .transpose()?;

        let body_start = header_end.body_start;
        let body_len = match content_length {
            Some(len) => {
                if len > MAX_FRAME_LEN {
                    return Err(AppError::Broker(format!("frame body too large: {len}")));
                }
                if src.len() < body_start + len + 1 {
                    return Ok(None);
                }
                if src[body_start + len] != 0 {
                    return Err(AppError::Broker(
                        "frame body not terminated by NUL".to_string(),
                    ));
                }
                len
            }
            None => match src[body_start..].iter().position(|&b| b == 0) {
                Some(len) => len,
                None => {
                    if src.len() > MAX_FRAME_LEN {
                        return Err(AppError::Broker("frame body too large".to_string()));
                    }
                    return Ok(None);
                }
            },
        };

        let body = src[body_start..body_start + body_len].to_vec();
        src.advance(body_start + body_len + 1);

        Ok(Some(Self {
            command,
            headers,
            body,
        }))
    }
}

struct HeaderEnd {
    /// Length of the command and header lines, without the blank line.
    text_len: usize,
    /// Offset of the first body byte.
    body_start: usize,
}

fn find_header_end(src: &[u8]) -> Option<HeaderEnd> {
    let mut i = 0;
    while i < src.len() {
        if src[i] == b'\n' {
            if src.get(i + 1) == Some(&b'\n') {
                return Some(HeaderEnd {
                    text_len: i,
                    body_start: i + 2,
                });
            }
            if src.get(i + 1) == Some(&b'\r') && src.get(i + 2) == Some(&b'\n') {
                return Some(HeaderEnd {
                    text_len: i,
                    body_start: i + 3,
                });
            }
        }
        i += 1;
    }
    None
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(value: &str) -> AppResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(AppError::Broker(format!(
                    "invalid header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encoded(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        buf
    }

    #[test]
    fn test_encode_send_layout() {
        let frame = Frame::new("SEND")
            .header("destination", "/queue/herald.federation")
            .body("{}");

        assert_eq!(
            &encoded(&frame)[..],
            b"SEND\ndestination:/queue/herald.federation\ncontent-length:2\n\n{}\0"
        );
    }

    #[test]
    fn test_header_values_are_escaped() {
        let frame = Frame::new("SEND").header("herald-enqueued-at", "2026-01-01T00:00:00Z");
        let buf = encoded(&frame);

        assert!(String::from_utf8_lossy(&buf).contains("herald-enqueued-at:2026-01-01T00\\c00\\c00Z"));
        let decoded = Frame::decode(&mut buf.clone()).unwrap().unwrap();
        assert_eq!(decoded.get("herald-enqueued-at"), Some("2026-01-01T00:00:00Z"));
    }

    #[test]
    fn test_connect_headers_are_literal() {
        let frame = Frame::new("CONNECT").header("host", "vhost:1");
        assert!(String::from_utf8_lossy(&encoded(&frame)).contains("host:vhost:1\n"));
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let full = encoded(&Frame::new("MESSAGE").header("ack", "m-1").body("{\"a\":1}"));

        let mut partial = BytesMut::from(&full[..full.len() - 3]);
        assert!(Frame::decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 3..]);
        let frame = Frame::decode(&mut partial).unwrap().unwrap();
        assert_eq!(frame.command, "MESSAGE");
        assert_eq!(frame.body, b"{\"a\":1}");
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_skips_heartbeats_and_reads_back_to_back_frames() {
        let mut buf = BytesMut::from(&b"\n\r\n"[..]);
        buf.extend_from_slice(&encoded(&Frame::new("RECEIPT").header("receipt-id", "r1")));
        buf.extend_from_slice(b"\n");
        buf.extend_from_slice(b"ERROR\nmessage:bad\n\noops\0");

        let first = Frame::decode(&mut buf).unwrap().unwrap();
        let second = Frame::decode(&mut buf).unwrap().unwrap();

        assert_eq!(first.get("receipt-id"), Some("r1"));
        assert_eq!(second.command, "ERROR");
        assert_eq!(second.body, b"oops");
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_content_length_allows_nul_in_body() {
        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:3\n\na\0b\0"[..]);
        let frame = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.body, b"a\0b");
    }

    #[test]
    fn test_invalid_escape_is_broker_error() {
        let mut buf = BytesMut::from(&b"MESSAGE\nbad:\\t\n\n\0"[..]);
        assert!(matches!(Frame::decode(&mut buf), Err(AppError::Broker(_))));
    }
}
