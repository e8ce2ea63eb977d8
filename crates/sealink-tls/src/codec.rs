//! Record encode/decode for an established session.
//!
//! Encoding lays the plaintext out at the header offset inside the
//! transport writer's spare region and lets the provider produce the
//! header and trailer in place, so the whole framed record is committed in
//! one advance. Decoding hands a contiguous record to the provider and
//! returns the sub-range where the plaintext landed, with a bounds check
//! against a misbehaving provider.

use crate::provider::ProviderError;
use crate::session::SecureSession;
use sealink_core::pipe::PipeWriter;
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Encode/decode are illegal before the handshake completes.
    #[error("record codec used before the session was established")]
    NotEstablished,
    #[error("record encryption failed: {0}")]
    Encryption(ProviderError),
    #[error("record decryption failed: {0}")]
    Decryption(ProviderError),
    /// The provider reported a decrypted region outside the record it was
    /// given. Treated as corruption; the session cannot be trusted after.
    #[error("decrypted region [{offset}, +{len}] exceeds the {record_len} byte record")]
    Overflow {
        offset: usize,
        len: usize,
        record_len: usize,
    },
}

/// Encrypt `plaintext` into one framed record, committed into `out`.
///
/// The caller is responsible for keeping `plaintext` within the session's
/// `max_record_payload`.
pub fn encode_record(
    session: &mut SecureSession,
    plaintext: &[u8],
    out: &mut PipeWriter,
) -> Result<(), CodecError> {
    let (provider, sizes) = session.codec_parts().ok_or(CodecError::NotEstablished)?;
    debug_assert!(
        plaintext.len() <= sizes.max_payload(),
        "plaintext exceeds the negotiated record payload"
    );

    let total = sizes.header + plaintext.len() + sizes.trailer;
    out.ensure_capacity(total);
    let record = out.spare_mut(total);
    record[sizes.header..sizes.header + plaintext.len()].copy_from_slice(plaintext);
    provider
        .encrypt_in_place(record, sizes.header, plaintext.len(), sizes.trailer)
        .map_err(CodecError::Encryption)?;
    out.advance(total);
    Ok(())
}

/// Decrypt one whole record in place and return the plaintext sub-range.
pub fn decode_record(
    session: &mut SecureSession,
    record: &mut [u8],
) -> Result<Range<usize>, CodecError> {
    let (provider, _) = session.codec_parts().ok_or(CodecError::NotEstablished)?;
    let record_len = record.len();
    let region = provider
        .decrypt_in_place(record)
        .map_err(CodecError::Decryption)?;
    let end = region
        .offset
        .checked_add(region.len)
        .filter(|&end| end <= record_len)
        .ok_or(CodecError::Overflow {
            offset: region.offset,
            len: region.len,
            record_len,
        })?;
    Ok(region.offset..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        DecryptedRegion, HandshakeOutcome, HandshakeStatus, SecurityProvider, StreamSizes,
    };
    use crate::session::SessionConfig;
    use sealink_core::pipe::pipe;

    const HEADER: usize = 5;
    const TRAILER: usize = 16;

    /// Byte-identity "cipher": real record header, zeroed trailer, data
    /// untouched. Lets the tests validate offset and length bookkeeping
    /// without any cryptography.
    struct IdentityProvider {
        region_override: Option<DecryptedRegion>,
    }

    impl IdentityProvider {
        fn new() -> Self {
            Self {
                region_override: None,
            }
        }

        fn reporting(region: DecryptedRegion) -> Self {
            Self {
                region_override: Some(region),
            }
        }
    }

    impl SecurityProvider for IdentityProvider {
        fn drive_handshake(
            &mut self,
            _peer_name: &str,
            _inbound: &[u8],
            _offered_protocols: &[String],
        ) -> Result<HandshakeOutcome, ProviderError> {
            Ok(HandshakeOutcome {
                token: Vec::new(),
                status: HandshakeStatus::Complete,
            })
        }

        fn stream_sizes(&self) -> Result<StreamSizes, ProviderError> {
            Ok(StreamSizes {
                header: HEADER,
                trailer: TRAILER,
                max_record: 16384,
            })
        }

        fn negotiated_protocol(&self) -> Result<Option<String>, ProviderError> {
            Ok(None)
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
                *byte = 0;
            }
            Ok(())
        }

        fn decrypt_in_place(
            &mut self,
            record: &mut [u8],
        ) -> Result<DecryptedRegion, ProviderError> {
            Ok(self.region_override.unwrap_or_else(|| DecryptedRegion {
                offset: HEADER,
                len: record.len() - HEADER - TRAILER,
            }))
        }

        fn release(&mut self) {}
    }

    fn established(provider: IdentityProvider) -> SecureSession {
        let mut session = SecureSession::new(
            Box::new(provider),
            SessionConfig::new("peer.test").with_initiator(true),
        );
        session.process_handshake_message(&[]).expect("handshake");
        assert!(session.is_established());
        session
    }

    #[tokio::test]
    async fn roundtrip_restores_the_plaintext() {
        let mut session = established(IdentityProvider::new());
        let (mut writer, mut reader) = pipe(2);

        let plaintext = b"the quick brown fox";
        encode_record(&mut session, plaintext, &mut writer).expect("encode");
        writer.flush().await.expect("flush");

        assert!(reader.fill().await);
        let mut record = reader.view().to_vec();
        assert_eq!(record.len(), HEADER + plaintext.len() + TRAILER);
        assert_eq!(record[0], 0x17);

        let range = decode_record(&mut session, &mut record).expect("decode");
        assert_eq!(&record[range], plaintext);
    }

    #[tokio::test]
    async fn empty_plaintext_still_frames_header_and_trailer() {
        let mut session = established(IdentityProvider::new());
        let (mut writer, mut reader) = pipe(2);

        encode_record(&mut session, b"", &mut writer).expect("encode");
        writer.flush().await.expect("flush");
        assert!(reader.fill().await);
        assert_eq!(reader.buffered(), HEADER + TRAILER);
    }

    #[test]
    fn zero_length_decrypted_region_is_legal() {
        let mut session = established(IdentityProvider::reporting(DecryptedRegion {
            offset: HEADER,
            len: 0,
        }));
        let mut record = vec![0u8; HEADER + TRAILER];
        let range = decode_record(&mut session, &mut record).expect("decode");
        assert!(range.is_empty());
    }

    #[test]
    fn out_of_bounds_region_is_overflow() {
        let mut session = established(IdentityProvider::reporting(DecryptedRegion {
            offset: 30,
            len: 10,
        }));
        let mut record = vec![0u8; 32];
        let err = decode_record(&mut session, &mut record).unwrap_err();
        assert_eq!(
            err,
            CodecError::Overflow {
                offset: 30,
                len: 10,
                record_len: 32,
            }
        );
    }

    #[test]
    fn overflowing_arithmetic_is_caught() {
        let mut session = established(IdentityProvider::reporting(DecryptedRegion {
            offset: usize::MAX,
            len: 2,
        }));
        let mut record = vec![0u8; 8];
        assert!(matches!(
            decode_record(&mut session, &mut record),
            Err(CodecError::Overflow { .. })
        ));
    }

    #[test]
    fn codec_is_illegal_before_establishment() {
        let mut session = SecureSession::new(
            Box::new(IdentityProvider::new()),
            SessionConfig::new("peer.test"),
        );
        let (mut writer, _reader) = pipe(1);
        assert_eq!(
            encode_record(&mut session, b"data", &mut writer),
            Err(CodecError::NotEstablished)
        );
        let mut record = vec![0u8; 8];
        assert_eq!(
            decode_record(&mut session, &mut record).unwrap_err(),
            CodecError::NotEstablished
        );
    }
}
