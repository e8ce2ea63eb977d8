//! The handshake state machine for one secure session.
//!
//! A [`SecureSession`] owns its [`SecurityProvider`] and drives it through
//! repeated token exchanges until the provider reports completion, at
//! which point the negotiated stream parameters (and application protocol,
//! when one was offered) become available and the session can carry
//! records. The provider handle is released exactly once, on close or
//! drop, whichever comes first.

use crate::provider::{HandshakeStatus, ProviderError, SecurityProvider, StreamSizes};
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The provider reported a fatal status during negotiation.
    #[error("handshake failed with provider status {0}")]
    HandshakeFailed(i32),
    /// The handshake finished but no offered application protocol was
    /// mutually agreed.
    #[error("no mutual application protocol could be negotiated")]
    ProtocolNegotiationFailed,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitiated,
    Negotiating,
    Established,
    Closed,
}

/// Caller-supplied parameters for one session, forwarded opaquely to the
/// provider.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub peer_name: String,
    pub offered_protocols: Vec<String>,
    /// The initiating side opens the handshake with an empty inbound token.
    pub initiate: bool,
}

impl SessionConfig {
    pub fn new(peer_name: impl Into<String>) -> Self {
        Self {
            peer_name: peer_name.into(),
            offered_protocols: Vec::new(),
            initiate: false,
        }
    }

    /// Offer an application-protocol preference list (ALPN).
    pub fn with_offered_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.offered_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Mark this side as the one that opens the handshake.
    pub fn with_initiator(mut self, initiate: bool) -> Self {
        self.initiate = initiate;
        self
    }
}

/// One handshake/record lifetime over a single provider handle.
pub struct SecureSession {
    provider: Box<dyn SecurityProvider>,
    config: SessionConfig,
    state: SessionState,
    sizes: Option<StreamSizes>,
    negotiated_protocol: Option<String>,
}

impl SecureSession {
    pub fn new(provider: Box<dyn SecurityProvider>, config: SessionConfig) -> Self {
        Self {
            provider,
            config,
            state: SessionState::Uninitiated,
            sizes: None,
            negotiated_protocol: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Framing parameters; `Some` only once established.
    pub fn stream_sizes(&self) -> Option<StreamSizes> {
        self.sizes
    }

    /// Largest plaintext chunk a single record can carry; `Some` only once
    /// established.
    pub fn max_record_payload(&self) -> Option<usize> {
        self.sizes.map(|s| s.max_payload())
    }

    /// Application protocol agreed during the handshake, when one was
    /// offered and the handshake has completed.
    pub fn negotiated_protocol(&self) -> Option<&str> {
        self.negotiated_protocol.as_deref()
    }

    /// Feed one classified handshake-class record (or the initiating
    /// empty token) to the provider and return any reply token to send.
    ///
    /// # Panics
    /// Calling this after the session is established or closed is a
    /// programming error and panics.
    pub fn process_handshake_message(
        &mut self,
        inbound: &[u8],
    ) -> Result<Option<Bytes>, SessionError> {
        assert!(
            matches!(
                self.state,
                SessionState::Uninitiated | SessionState::Negotiating
            ),
            "handshake message delivered to a session in state {:?}",
            self.state
        );
        self.state = SessionState::Negotiating;

        // The preference list rides along only on the initiating empty
        // call; afterwards the provider already holds it.
        let offered: &[String] = if inbound.is_empty() {
            &self.config.offered_protocols
        } else {
            &[]
        };

        let outcome = match self
            .provider
            .drive_handshake(&self.config.peer_name, inbound, offered)
        {
            Ok(outcome) => outcome,
            Err(err) => {
                self.close();
                return Err(err.into());
            }
        };

        match outcome.status {
            HandshakeStatus::ContinueNeeded => {}
            HandshakeStatus::Complete => {
                let sizes = match self.provider.stream_sizes() {
                    Ok(sizes) => sizes,
                    Err(err) => {
                        self.close();
                        return Err(err.into());
                    }
                };
                if !self.config.offered_protocols.is_empty() {
                    match self.provider.negotiated_protocol() {
                        Ok(Some(protocol)) => self.negotiated_protocol = Some(protocol),
                        Ok(None) => {
                            self.close();
                            return Err(SessionError::ProtocolNegotiationFailed);
                        }
                        Err(err) => {
                            self.close();
                            return Err(err.into());
                        }
                    }
                }
                self.sizes = Some(sizes);
                self.state = SessionState::Established;
                debug!(
                    target: "sealink::session",
                    peer = %self.config.peer_name,
                    header = sizes.header,
                    trailer = sizes.trailer,
                    protocol = self.negotiated_protocol.as_deref().unwrap_or(""),
                    "session established"
                );
            }
            HandshakeStatus::Fatal(code) => {
                self.close();
                return Err(SessionError::HandshakeFailed(code));
            }
        }

        if outcome.token.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Bytes::from(outcome.token)))
        }
    }

    /// Release the provider handle. Safe to call any number of times; the
    /// handle is released on the first call only.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.provider.release();
            self.state = SessionState::Closed;
            debug!(target: "sealink::session", peer = %self.config.peer_name, "session closed");
        }
    }

    pub(crate) fn codec_parts(&mut self) -> Option<(&mut dyn SecurityProvider, StreamSizes)> {
        if self.state != SessionState::Established {
            return None;
        }
        let sizes = self.sizes?;
        Some((self.provider.as_mut(), sizes))
    }
}

impl Drop for SecureSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("peer_name", &self.config.peer_name)
            .field("state", &self.state)
            .field("sizes", &self.sizes)
            .field("negotiated_protocol", &self.negotiated_protocol)
            .finish()
    }
}
