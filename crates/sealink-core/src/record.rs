//! TLS record-layer framing.
//!
//! A record on the wire is a 1-byte content type, a 2-byte protocol
//! version, a 2-byte big-endian payload length, and then the payload.
//! [`classify`] inspects the front of a buffered run and reports which
//! record is pending and where it ends, without consuming anything, so a
//! caller can slice exactly one record and go around again when several
//! arrived in a single read.

use crate::pipe::ReadBuf;

/// Bytes of fixed header per record: type, version, length.
pub const RECORD_HEADER_LEN: usize = 5;

const CONTENT_CHANGE_CIPHER_SPEC: u8 = 0x14;
const CONTENT_ALERT: u8 = 0x15;
const CONTENT_HANDSHAKE: u8 = 0x16;
const CONTENT_APP_DATA: u8 = 0x17;

/// Recognized TLS record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    ChangeCipherSpec,
    Alert,
    Handshake,
    AppData,
}

impl RecordKind {
    fn from_content_type(byte: u8) -> Option<Self> {
        match byte {
            CONTENT_CHANGE_CIPHER_SPEC => Some(RecordKind::ChangeCipherSpec),
            CONTENT_ALERT => Some(RecordKind::Alert),
            CONTENT_HANDSHAKE => Some(RecordKind::Handshake),
            CONTENT_APP_DATA => Some(RecordKind::AppData),
            _ => None,
        }
    }
}

/// Result of inspecting the front of a buffered run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A whole record is buffered; `end` is one past its last byte.
    Record { kind: RecordKind, end: usize },
    /// Not enough bytes yet; accumulate more and classify again.
    Incomplete,
    /// The content type byte matches no known record type.
    Invalid { type_byte: u8 },
}

/// Determine the type and extent of the record at the front of `buf`.
///
/// Tolerates non-contiguous views; header bytes may straddle segments.
pub fn classify(buf: &ReadBuf<'_>) -> Classification {
    if buf.len() < RECORD_HEADER_LEN {
        return Classification::Incomplete;
    }
    let type_byte = buf.byte(0).expect("header byte present");
    let Some(kind) = RecordKind::from_content_type(type_byte) else {
        return Classification::Invalid { type_byte };
    };
    let length = u16::from_be_bytes([
        buf.byte(3).expect("header byte present"),
        buf.byte(4).expect("header byte present"),
    ]) as usize;
    let end = RECORD_HEADER_LEN + length;
    if buf.len() < end {
        return Classification::Incomplete;
    }
    Classification::Record { kind, end }
}
