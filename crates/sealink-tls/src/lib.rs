//! TLS record-layer channel: handshake driving, record encode/decode, and
//! the duplex pump that turns an unauthenticated byte transport into an
//! encrypted one with the same read/advance/flush contract.
//!
//! The actual cryptography lives behind the [`SecurityProvider`]
//! capability; this crate owns the session state machine, the record
//! codec, and the channel orchestration on top of `sealink-core` pipes.

pub mod channel;
pub mod codec;
pub mod provider;
pub mod session;

pub use channel::{ChannelError, SecureChannel};
pub use codec::{decode_record, encode_record, CodecError};
pub use provider::{
    DecryptedRegion, HandshakeOutcome, HandshakeStatus, ProviderError, SecurityProvider,
    StreamSizes,
};
pub use session::{SecureSession, SessionConfig, SessionError, SessionState};
