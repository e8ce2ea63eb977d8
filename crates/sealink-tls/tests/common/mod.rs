//! Test doubles and wire helpers shared by the integration suite.
//!
//! `TestProvider` is a byte-identity "cipher": handshake tokens come from
//! a script, encryption writes a real application-data record header and a
//! constant trailer around untouched plaintext, and decryption reports the
//! region between them. That keeps every offset and length observable on
//! the wire without any cryptography.

use sealink_core::pipe::PipeReader;
use sealink_core::record::{classify, Classification, RecordKind, RECORD_HEADER_LEN};
use sealink_tls::{
    DecryptedRegion, HandshakeOutcome, HandshakeStatus, ProviderError, SecurityProvider,
    StreamSizes,
};
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

pub const HEADER: usize = RECORD_HEADER_LEN;
pub const TRAILER: usize = 4;
pub const TRAILER_BYTE: u8 = 0xEE;

pub struct TestProvider {
    script: VecDeque<HandshakeOutcome>,
    sizes: StreamSizes,
    negotiated: Option<String>,
    released: Arc<AtomicUsize>,
}

impl TestProvider {
    pub fn scripted(script: Vec<(HandshakeStatus, Vec<u8>)>) -> Self {
        Self {
            script: script
                .into_iter()
                .map(|(status, token)| HandshakeOutcome { token, status })
                .collect(),
            sizes: StreamSizes {
                header: HEADER,
                trailer: TRAILER,
                max_record: 16384,
            },
            negotiated: None,
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_max_record(mut self, max_record: usize) -> Self {
        self.sizes.max_record = max_record;
        self
    }

    pub fn with_negotiated(mut self, protocol: &str) -> Self {
        self.negotiated = Some(protocol.to_string());
        self
    }

    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.released)
    }
}

impl SecurityProvider for TestProvider {
    fn drive_handshake(
        &mut self,
        _peer_name: &str,
        _inbound: &[u8],
        _offered_protocols: &[String],
    ) -> Result<HandshakeOutcome, ProviderError> {
        self.script
            .pop_front()
            .ok_or_else(|| ProviderError::Rejected("handshake script exhausted".into()))
    }

    fn stream_sizes(&self) -> Result<StreamSizes, ProviderError> {
        Ok(self.sizes)
    }

    fn negotiated_protocol(&self) -> Result<Option<String>, ProviderError> {
        Ok(self.negotiated.clone())
    }

    fn encrypt_in_place(
        &mut self,
        record: &mut [u8],
        header_len: usize,
        data_len: usize,
        trailer_len: usize,
    ) -> Result<(), ProviderError> {
        record[0] = 0x17;
        record[1] = 0x03;
        record[2] = 0x03;
        let body = (data_len + trailer_len) as u16;
        record[3..5].copy_from_slice(&body.to_be_bytes());
        for byte in &mut record[header_len + data_len..] {
            *byte = TRAILER_BYTE;
        }
        Ok(())
    }

    fn decrypt_in_place(&mut self, record: &mut [u8]) -> Result<DecryptedRegion, ProviderError> {
        if record.len() < HEADER + TRAILER {
            return Err(ProviderError::Rejected("record too short".into()));
        }
        Ok(DecryptedRegion {
            offset: HEADER,
            len: record.len() - HEADER - TRAILER,
        })
    }

    fn release(&mut self) {
        self.released
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Frame `payload` as a plaintext handshake record.
pub fn handshake_record(payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x16, 0x03, 0x03];
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Frame `plaintext` the way `TestProvider` encrypts it.
pub fn appdata_record(plaintext: &[u8]) -> Vec<u8> {
    let mut out = vec![0x17, 0x03, 0x03];
    out.extend_from_slice(&((plaintext.len() + TRAILER) as u16).to_be_bytes());
    out.extend_from_slice(plaintext);
    out.extend_from_slice(&[TRAILER_BYTE; TRAILER]);
    out
}

/// Strip the identity framing off a whole application-data record.
pub fn unwrap_appdata(record: &[u8]) -> &[u8] {
    &record[HEADER..record.len() - TRAILER]
}

/// Read exactly one record off a raw transport reader.
pub async fn read_record(reader: &mut PipeReader) -> Option<(RecordKind, Vec<u8>)> {
    loop {
        match classify(&reader.view()) {
            Classification::Record { kind, end } => {
                let record = reader.view().slice(0, end).to_vec();
                reader.advance(end);
                return Some((kind, record));
            }
            Classification::Incomplete => {
                if !reader.fill().await {
                    return None;
                }
            }
            Classification::Invalid { type_byte } => {
                panic!("test peer received invalid record type {type_byte:#04x}");
            }
        }
    }
}
