//! Transport-agnostic plumbing for the sealink secure channel: in-memory
//! byte pipes with cursor/flush semantics, and TLS record-layer framing.

pub mod pipe;
pub mod record;

pub use pipe::{duplex, pipe, wire, DuplexPipe, PipeError, PipeReader, PipeWriter, ReadBuf};
pub use record::{classify, Classification, RecordKind, RECORD_HEADER_LEN};
