//! Length-prefixed frame codec.
//!
//! Every unit on the wire looks like `~m~<len>~m~<payload>`, where the
//! payload is either a compact JSON object `{"m": <name>, "p": [...]}` or a
//! keepalive probe `~h~<n>`. A single WebSocket read may carry several
//! frames back to back, so [`decode`] splits a packet into [`Frame`]s.

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::ser::{Formatter, Serializer};
use tracing::trace;

use crate::Result;
use crate::error::TvError;
use crate::models::ServerMessage;

/// Delimiter surrounding the decimal length of each frame.
const DELIMITER: &str = "~m~";

/// Prefix of a keepalive probe payload.
const HEARTBEAT_PREFIX: &str = "~h~";

/// One decoded unit of an inbound packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Keepalive probe; holds the `~h~<n>` payload that must be echoed back.
    Heartbeat(String),
    /// A protocol message routed by its `"m"` field.
    Message(ServerMessage),
}

/// Raw `{"m": ..., "p": [...]}` object as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub m: String,
    #[serde(default)]
    pub p: Vec<Value>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    m: &'a str,
    p: &'a [Value],
}

/// Compact JSON formatter that writes non-ASCII characters as `\uXXXX`
/// escapes (UTF-16 units, surrogate pairs above the BMP).
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

/// Serializes `value` as compact, ASCII-only JSON.
///
/// The remote counts the frame length over this form, so every outbound
/// payload (and any JSON embedded in a parameter) goes through here.
///
/// # Errors
///
/// Returns [`TvError::Json`] if `value` cannot be serialized.
pub fn to_ascii_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut out = Vec::new();
    value.serialize(&mut Serializer::with_formatter(&mut out, AsciiFormatter))?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Wraps a payload in the `~m~<len>~m~` header.
///
/// The length counts characters; payloads built by [`encode`] are ASCII, so
/// this equals their byte length.
pub fn frame(payload: &str) -> String {
    format!(
        "{DELIMITER}{}{DELIMITER}{payload}",
        payload.chars().count()
    )
}

/// Encodes a command into a single wire frame.
///
/// # Errors
///
/// Returns [`TvError::Json`] if a parameter cannot be serialized.
pub fn encode(name: &str, params: &[Value]) -> Result<String> {
    let json = to_ascii_json(&EnvelopeRef { m: name, p: params })?;
    Ok(frame(&json))
}

/// Splits a raw packet into frame payloads, dropping empty chunks and any
/// bytes in front of the first header.
pub fn split_frames(packet: &str) -> Vec<&str> {
    let mut payloads = Vec::new();
    let mut cursor = match find_header(packet, 0) {
        Some((_, end)) => end,
        None => return payloads,
    };

    loop {
        match find_header(packet, cursor) {
            Some((start, end)) => {
                push_payload(&mut payloads, &packet[cursor..start]);
                cursor = end;
            }
            None => {
                push_payload(&mut payloads, &packet[cursor..]);
                return payloads;
            }
        }
    }
}

fn push_payload<'a>(payloads: &mut Vec<&'a str>, chunk: &'a str) {
    if !chunk.is_empty() {
        payloads.push(chunk);
    }
}

/// Locates the next `~m~<digits>~m~` header at or after `from`, returning
/// its start and end byte offsets.
fn find_header(packet: &str, from: usize) -> Option<(usize, usize)> {
    let mut search = from;
    while let Some(offset) = packet[search..].find(DELIMITER) {
        let start = search + offset;
        let digits_start = start + DELIMITER.len();
        let digits_len = packet[digits_start..]
            .bytes()
            .take_while(u8::is_ascii_digit)
            .count();
        let digits_end = digits_start + digits_len;

        if digits_len > 0 && packet[digits_end..].starts_with(DELIMITER) {
            return Some((start, digits_end + DELIMITER.len()));
        }
        search = digits_start;
    }
    None
}

/// Decodes one inbound packet.
///
/// Keepalive probes come back as [`Frame::Heartbeat`]. Chunks that are not
/// JSON, or JSON objects without an `"m"` field (such as the server hello),
/// are discarded.
///
/// # Errors
///
/// Returns [`TvError::Protocol`] as soon as a message whose name contains
/// `error` is seen.
pub fn decode(packet: &str) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();

    for payload in split_frames(packet) {
        if payload.starts_with(HEARTBEAT_PREFIX) {
            frames.push(Frame::Heartbeat(payload.to_string()));
            continue;
        }

        let envelope: Envelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                trace!(error = %e, payload, "Discarding unparseable chunk");
                continue;
            }
        };

        if envelope.m.contains("error") {
            return Err(TvError::Protocol {
                message: envelope.m,
                payload: Value::Array(envelope.p),
            });
        }

        frames.push(Frame::Message(ServerMessage::from_envelope(envelope)));
    }

    Ok(frames)
}
