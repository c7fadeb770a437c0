//! Newline-delimited JSON framing for pub/sub records.

use rentchat_types::error::GatewayError;
use rentchat_types::feed::LiveMessage;

/// Remove and return the next complete line from `buffer`, without its
/// terminator. Returns `None` until a newline has arrived.
pub fn take_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.iter().position(|b| *b == b'\n')?;
    let mut line: Vec<u8> = buffer.drain(..=end).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(line)
}

/// Decode one record. Blank lines yield `None`.
pub fn parse_line(line: &[u8]) -> Result<Option<LiveMessage>, GatewayError> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(line)
        .map(Some)
        .map_err(|e| GatewayError::Decode(format!("invalid pub/sub record: {e}")))
}

/// Decode a whole NDJSON body, as returned by a batch poll.
pub fn parse_batch(body: &str) -> Result<Vec<LiveMessage>, GatewayError> {
    body.lines()
        .filter_map(|line| parse_line(line.as_bytes()).transpose())
        .collect()
}
