//! Wire-format definitions for LRCP messages.
//!
//! Every datagram exchanged between peers is a [`Message`].  This module is
//! responsible for:
//! - Parsing a raw datagram into a [`Message`], rejecting anything that does
//!   not follow the grammar below.
//! - Serialising a [`Message`] back into the bytes that go on the wire.
//! - Escaping and unescaping `data` payloads.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! Messages are ASCII text framed by a leading and trailing `/`:
//!
//! ```text
//! /connect/SESSION/
//! /data/SESSION/POS/PAYLOAD/
//! /ack/SESSION/LENGTH/
//! /close/SESSION/
//! ```
//!
//! Numeric fields are one or more ASCII digits with a value below
//! [`MAX_NUMERIC`].  Inside `PAYLOAD` a literal `/` is sent as `\/` and a
//! literal `\` as `\\`; no other escape exists.
//!
//! A payload with an unescaped `/` is rejected here like any other framing
//! error.  Otherwise a `data` message keeps its payload in escaped wire form
//! and unescaping is left to the session: an unknown or dangling escape inside
//! an accepted segment is a protocol violation for that session.

use std::fmt;

use thiserror::Error;

/// Peer-chosen session identifier.
pub type SessionId = u32;

/// Exclusive upper bound of every numeric field (2³¹).
pub const MAX_NUMERIC: u32 = 1 << 31;

/// Largest datagram the service reads or writes.
pub const MAX_DATAGRAM: usize = 1000;

/// Default bound on the escaped payload of one outbound `data` message.
pub const MAX_PAYLOAD: usize = 900;

/// Largest escaped payload that still fits in [`MAX_DATAGRAM`] with the
/// longest possible `data` framing.
pub const MAX_PAYLOAD_LIMIT: usize = MAX_DATAGRAM - "/data/2147483647/2147483647//".len();

/// Smallest usable payload bound: one escaped byte.
pub const MIN_PAYLOAD: usize = 2;

const ESCAPE: u8 = b'\\';
const SLASH: u8 = b'/';

/// One decoded LRCP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Open (or re-confirm) a session.
    Connect { session: SessionId },
    /// Stream bytes starting at offset `pos`.
    ///
    /// `escaped` holds the payload exactly as it appears on the wire.
    Data {
        session: SessionId,
        pos: u32,
        escaped: Vec<u8>,
    },
    /// Cumulative acknowledgement of the first `length` bytes.
    Ack { session: SessionId, length: u32 },
    /// Tear the session down.
    Close { session: SessionId },
}

impl Message {
    /// Build a `data` message from raw application bytes, escaping them.
    pub fn data(session: SessionId, pos: u32, raw: &[u8]) -> Self {
        Message::Data {
            session,
            pos,
            escaped: escape(raw),
        }
    }

    /// Session this message belongs to.
    pub fn session(&self) -> SessionId {
        match *self {
            Message::Connect { session }
            | Message::Data { session, .. }
            | Message::Ack { session, .. }
            | Message::Close { session } => session,
        }
    }

    /// Serialise this message into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Connect { session } => format!("/connect/{session}/").into_bytes(),
            Message::Data {
                session,
                pos,
                escaped,
            } => {
                let mut buf = format!("/data/{session}/{pos}/").into_bytes();
                buf.reserve(escaped.len() + 1);
                buf.extend_from_slice(escaped);
                buf.push(SLASH);
                buf
            }
            Message::Ack { session, length } => format!("/ack/{session}/{length}/").into_bytes(),
            Message::Close { session } => format!("/close/{session}/").into_bytes(),
        }
    }

    /// Parse a [`Message`] from a raw datagram.
    ///
    /// Returns [`Err`] if the datagram is not framed by `/`, names an unknown
    /// message type, carries the wrong number of fields for its type, or has
    /// a numeric field that is not a plain decimal below [`MAX_NUMERIC`].
    pub fn decode(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() < 2 || buf[0] != SLASH || buf[buf.len() - 1] != SLASH {
            return Err(MessageError::Framing);
        }

        // `data` is the only type with a free-form trailing field, so at most
        // three separators are significant.
        let mut fields = buf[1..buf.len() - 1].splitn(4, |&b| b == SLASH);
        let kind = fields.next().ok_or(MessageError::Framing)?;
        let session = parse_number(fields.next().ok_or(MessageError::FieldCount)?)?;
        let third = fields.next();
        let fourth = fields.next();

        match (kind, third, fourth) {
            (b"connect", None, None) => Ok(Message::Connect { session }),
            (b"close", None, None) => Ok(Message::Close { session }),
            (b"ack", Some(length), None) => Ok(Message::Ack {
                session,
                length: parse_number(length)?,
            }),
            (b"data", Some(pos), Some(payload)) => {
                let pos = parse_number(pos)?;
                // An unescaped `/` means the datagram has too many fields.
                if has_bare_slash(payload) {
                    return Err(MessageError::FieldCount);
                }
                Ok(Message::Data {
                    session,
                    pos,
                    escaped: payload.to_vec(),
                })
            }
            (b"connect" | b"close" | b"ack" | b"data", _, _) => Err(MessageError::FieldCount),
            _ => Err(MessageError::UnknownType),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.encode()).escape_debug())
    }
}

/// Errors that can arise when parsing a raw datagram or payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// Datagram does not start and end with `/`.
    #[error("message must start and end with '/'")]
    Framing,
    /// First field is not one of the four message types.
    #[error("unknown message type")]
    UnknownType,
    /// Too few or too many fields for the message type.
    #[error("wrong number of fields for message type")]
    FieldCount,
    /// Numeric field is empty, non-decimal, or not below 2³¹.
    #[error("numeric field is not a decimal below 2^31")]
    BadNumber,
    /// Payload contains a bare `/`, a dangling `\`, or an unknown escape.
    #[error("illegal escape sequence in payload")]
    BadEscape,
    /// Datagram is longer than [`MAX_DATAGRAM`].
    #[error("datagram exceeds 1000 bytes")]
    Oversize,
}

fn parse_number(field: &[u8]) -> Result<u32, MessageError> {
    if field.is_empty() {
        return Err(MessageError::BadNumber);
    }
    let mut value: u32 = 0;
    for &b in field {
        if !b.is_ascii_digit() {
            return Err(MessageError::BadNumber);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u32::from(b - b'0')))
            .filter(|&v| v < MAX_NUMERIC)
            .ok_or(MessageError::BadNumber)?;
    }
    Ok(value)
}

/// `true` if `escaped` holds a `/` that is not the second byte of an escape.
fn has_bare_slash(escaped: &[u8]) -> bool {
    let mut bytes = escaped.iter();
    while let Some(&b) = bytes.next() {
        match b {
            ESCAPE => {
                bytes.next();
            }
            SLASH => return true,
            _ => {}
        }
    }
    false
}

/// Number of wire bytes `byte` occupies once escaped.
#[inline]
pub fn escaped_len(byte: u8) -> usize {
    if byte == SLASH || byte == ESCAPE {
        2
    } else {
        1
    }
}

/// Escape raw application bytes for a `data` payload.
pub fn escape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for &b in raw {
        if b == SLASH || b == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(b);
    }
    out
}

/// Reverse [`escape`], rejecting anything `escape` could not have produced.
pub fn unescape(escaped: &[u8]) -> Result<Vec<u8>, MessageError> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut bytes = escaped.iter().copied();
    while let Some(b) = bytes.next() {
        match b {
            ESCAPE => match bytes.next() {
                Some(next @ (SLASH | ESCAPE)) => out.push(next),
                _ => return Err(MessageError::BadEscape),
            },
            SLASH => return Err(MessageError::BadEscape),
            other => out.push(other),
        }
    }
    Ok(out)
}
