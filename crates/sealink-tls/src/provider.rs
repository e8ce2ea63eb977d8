//! The security provider capability.
//!
//! All actual cryptography (key exchange, certificate checks, bulk
//! encryption) lives behind [`SecurityProvider`]. The channel core only
//! ever hands the provider whole records and scratch regions; it never
//! depends on the provider's internal layout. Implementations own their
//! backend handle and are driven exclusively through `&mut self`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The backend refused the operation (bad token, invalidated session, ...).
    #[error("security backend rejected the operation: {0}")]
    Rejected(String),
    /// The operation is not legal in the backend's current state.
    #[error("security backend is not in a usable state")]
    InvalidState,
}

/// Outcome of one handshake token exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    /// Token to transmit back to the peer; may be empty.
    pub token: Vec<u8>,
    pub status: HandshakeStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// More token round-trips are required.
    ContinueNeeded,
    /// Negotiation finished; stream parameters may now be queried.
    Complete,
    /// Negotiation failed with a backend-specific code.
    Fatal(i32),
}

/// Per-record framing overhead, known once the handshake completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSizes {
    /// Bytes reserved at the front of every record.
    pub header: usize,
    /// Bytes reserved at the back of every record (MAC / auth tag).
    pub trailer: usize,
    /// Largest whole record the peer accepts, header and trailer included.
    pub max_record: usize,
}

impl StreamSizes {
    /// Largest plaintext payload that fits a single record.
    pub fn max_payload(&self) -> usize {
        self.max_record - self.header - self.trailer
    }
}

/// Where the plaintext landed inside a record after in-place decryption.
///
/// Providers may shift or shrink the data region; the offset is relative
/// to the start of the record buffer that was handed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptedRegion {
    pub offset: usize,
    pub len: usize,
}

/// Capability interface to an external cryptographic backend.
///
/// Buffers handed to the provider are always contiguous; callers copy
/// fragmented input into scratch beforehand.
pub trait SecurityProvider: Send {
    /// Consume one inbound handshake token and produce the next outbound
    /// one. `inbound` is empty on the initiating side's first call, in
    /// which case `offered_protocols` (the application-protocol
    /// preference list) is supplied instead.
    fn drive_handshake(
        &mut self,
        peer_name: &str,
        inbound: &[u8],
        offered_protocols: &[String],
    ) -> Result<HandshakeOutcome, ProviderError>;

    /// Stream parameters for the negotiated session. Only meaningful after
    /// [`HandshakeStatus::Complete`].
    fn stream_sizes(&self) -> Result<StreamSizes, ProviderError>;

    /// The application protocol both sides agreed on, if any.
    fn negotiated_protocol(&self) -> Result<Option<String>, ProviderError>;

    /// Produce header and trailer bytes in place around the plaintext
    /// occupying `record[header_len .. header_len + data_len]`, encrypting
    /// the data region.
    fn encrypt_in_place(
        &mut self,
        record: &mut [u8],
        header_len: usize,
        data_len: usize,
        trailer_len: usize,
    ) -> Result<(), ProviderError>;

    /// Decrypt one whole record in place and report where the plaintext
    /// ended up.
    fn decrypt_in_place(&mut self, record: &mut [u8]) -> Result<DecryptedRegion, ProviderError>;

    /// Release the backend handle. Called exactly once per session.
    fn release(&mut self);
}
