//! The secure channel pump.
//!
//! A [`SecureChannel`] sits between a lower (encrypted) duplex pipe and
//! the application, running two tasks for its lifetime. The inbound loop
//! classifies records off the transport and routes them: handshake-class
//! records into the session, application data through the codec to the
//! decrypted pipe. The outbound loop starts only once the session is
//! established and encrypts application plaintext into records.
//!
//! Both loops write to the transport (handshake tokens vs. encrypted
//! records), so every transport write+flush happens under one mutex; a
//! token is never interleaved inside a data record.

use crate::codec::{decode_record, encode_record, CodecError};
use crate::provider::SecurityProvider;
use crate::session::{SecureSession, SessionConfig, SessionError};
use bytes::Bytes;
use sealink_core::pipe::{pipe, DuplexPipe, PipeError, PipeReader, PipeWriter};
use sealink_core::record::{classify, Classification, RecordKind};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// In-flight chunk budget for each upper-facing pipe.
const UPPER_PIPE_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The transport delivered a record with an unrecognized content type.
    #[error("received a record with unrecognized content type {0:#04x}")]
    MalformedFrame(u8),
    /// A handshake-class record arrived after establishment; renegotiation
    /// is not supported.
    #[error("handshake record received after the session was established")]
    UnexpectedHandshake,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] PipeError),
}

/// An authenticated, encrypted duplex byte channel over a lower transport.
///
/// Reads on [`input`](Self::input) yield decrypted application data;
/// writes on [`output`](Self::output) are encrypted and framed before they
/// reach the transport. On any fatal condition the application observes
/// end-of-stream on `input` and the underlying cause through
/// [`fault`](Self::fault) / [`closed`](Self::closed).
pub struct SecureChannel {
    input: PipeReader,
    output: Option<PipeWriter>,
    session: Arc<Mutex<SecureSession>>,
    fault: Arc<OnceLock<ChannelError>>,
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SecureChannel {
    /// Start pumping over `lower`, driving the handshake with `provider`.
    pub fn new(
        lower: DuplexPipe,
        provider: Box<dyn SecurityProvider>,
        config: SessionConfig,
    ) -> Self {
        let initiate = config.initiate;
        let session = Arc::new(Mutex::new(SecureSession::new(provider, config)));
        let DuplexPipe {
            reader: transport_reader,
            writer: transport_writer,
        } = lower;
        let transport_writer = Arc::new(Mutex::new(transport_writer));

        let (decrypted_writer, decrypted_reader) = pipe(UPPER_PIPE_CAPACITY);
        let (plaintext_writer, plaintext_reader) = pipe(UPPER_PIPE_CAPACITY);
        let (ready_tx, ready_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);
        let fault: Arc<OnceLock<ChannelError>> = Arc::new(OnceLock::new());

        let inbound = {
            let session = Arc::clone(&session);
            let writer = Arc::clone(&transport_writer);
            let fault = Arc::clone(&fault);
            let shutdown = Arc::clone(&shutdown);
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    res = inbound_loop(
                        transport_reader,
                        decrypted_writer,
                        &session,
                        &writer,
                        ready_tx,
                        initiate,
                    ) => res,
                    _ = shutdown_rx.changed() => Ok(()),
                };
                finish("inbound", result, &session, &fault, &shutdown).await;
            })
        };

        let outbound = {
            let session = Arc::clone(&session);
            let writer = Arc::clone(&transport_writer);
            let fault = Arc::clone(&fault);
            let shutdown = Arc::clone(&shutdown);
            let mut shutdown_rx = shutdown_rx;
            tokio::spawn(async move {
                let result = tokio::select! {
                    res = outbound_loop(plaintext_reader, &session, &writer, ready_rx) => res,
                    _ = shutdown_rx.changed() => Ok(()),
                };
                finish("outbound", result, &session, &fault, &shutdown).await;
            })
        };

        Self {
            input: decrypted_reader,
            output: Some(plaintext_writer),
            session,
            fault,
            shutdown,
            tasks: vec![inbound, outbound],
        }
    }

    /// Decrypted application data from the peer.
    pub fn input(&mut self) -> &mut PipeReader {
        &mut self.input
    }

    /// Plaintext destined for the peer; encrypted once the session is
    /// established.
    ///
    /// # Panics
    /// Panics after [`finish_output`](Self::finish_output).
    pub fn output(&mut self) -> &mut PipeWriter {
        self.output
            .as_mut()
            .expect("plaintext writer already finished")
    }

    /// Signal that no more plaintext will be written. Flush first; staged
    /// but unflushed bytes are discarded.
    pub fn finish_output(&mut self) {
        self.output = None;
    }

    /// Application protocol negotiated during the handshake, if any.
    pub async fn negotiated_protocol(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .negotiated_protocol()
            .map(str::to_owned)
    }

    /// The first fatal error either loop hit, if any.
    pub fn fault(&self) -> Option<ChannelError> {
        self.fault.get().cloned()
    }

    /// Ask both loops to stop. The session's provider handle is released
    /// as part of teardown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for both loops to finish and report the channel's fate.
    pub async fn closed(&mut self) -> Result<(), ChannelError> {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        match self.fault.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

async fn finish(
    task: &'static str,
    result: Result<(), ChannelError>,
    session: &Mutex<SecureSession>,
    fault: &OnceLock<ChannelError>,
    shutdown: &watch::Sender<bool>,
) {
    match result {
        Ok(()) => debug!(target: "sealink::channel", task, "channel loop finished"),
        Err(err) => {
            error!(target: "sealink::channel", task, %err, "channel loop failed");
            let _ = fault.set(err);
        }
    }
    session.lock().await.close();
    let _ = shutdown.send(true);
}

async fn inbound_loop(
    mut transport: PipeReader,
    mut decrypted: PipeWriter,
    session: &Mutex<SecureSession>,
    writer: &Mutex<PipeWriter>,
    ready: watch::Sender<bool>,
    initiate: bool,
) -> Result<(), ChannelError> {
    if initiate {
        let (token, became_ready) = {
            let mut session = session.lock().await;
            let token = session.process_handshake_message(&[])?;
            (token, session.is_established())
        };
        send_token(writer, token).await?;
        if became_ready {
            let _ = ready.send(true);
        }
    }

    let mut scratch = Vec::new();
    loop {
        if !transport.fill().await {
            debug!(target: "sealink::channel", "transport reached end of stream");
            return Ok(());
        }

        // Drain every complete record that arrived in this read.
        loop {
            let classified = classify(&transport.view());
            let (kind, end) = match classified {
                Classification::Incomplete => break,
                Classification::Invalid { type_byte } => {
                    return Err(ChannelError::MalformedFrame(type_byte));
                }
                Classification::Record { kind, end } => (kind, end),
            };

            scratch.resize(end, 0);
            transport.view().slice(0, end).copy_into(&mut scratch);

            match kind {
                RecordKind::Handshake | RecordKind::ChangeCipherSpec => {
                    let (reply, became_ready) = {
                        let mut session = session.lock().await;
                        if session.is_established() {
                            return Err(ChannelError::UnexpectedHandshake);
                        }
                        let reply = session.process_handshake_message(&scratch)?;
                        (reply, session.is_established())
                    };
                    send_token(writer, reply).await?;
                    if became_ready {
                        let _ = ready.send(true);
                    }
                }
                RecordKind::AppData => {
                    let range = {
                        let mut session = session.lock().await;
                        decode_record(&mut session, &mut scratch)?
                    };
                    if !range.is_empty() {
                        decrypted.write(&scratch[range]);
                        decrypted.flush().await?;
                    }
                }
                RecordKind::Alert => {
                    warn!(target: "sealink::channel", "alert record received; closing the channel");
                    return Ok(());
                }
            }
            transport.advance(end);
        }
    }
}

async fn outbound_loop(
    mut plaintext: PipeReader,
    session: &Mutex<SecureSession>,
    writer: &Mutex<PipeWriter>,
    mut ready: watch::Receiver<bool>,
) -> Result<(), ChannelError> {
    // Parked until the handshake hands over the stream parameters.
    while !*ready.borrow() {
        if ready.changed().await.is_err() {
            return Ok(());
        }
    }
    let max_payload = match session.lock().await.max_record_payload() {
        Some(max) => max,
        // Session torn down between establishment and here.
        None => return Ok(()),
    };
    debug!(target: "sealink::channel", max_payload, "outbound loop started");

    let mut chunk = Vec::new();
    loop {
        while plaintext.buffered() > 0 {
            let take = plaintext.buffered().min(max_payload);
            chunk.resize(take, 0);
            plaintext.view().slice(0, take).copy_into(&mut chunk);
            let mut writer = writer.lock().await;
            {
                let mut session = session.lock().await;
                encode_record(&mut session, &chunk, &mut writer)?;
            }
            // Flush may park on transport backpressure; the session lock
            // must not be held across it, the inbound loop needs it.
            writer.flush().await?;
            drop(writer);
            plaintext.advance(take);
        }
        if !plaintext.fill().await {
            return Ok(());
        }
    }
}

async fn send_token(
    writer: &Mutex<PipeWriter>,
    token: Option<Bytes>,
) -> Result<(), ChannelError> {
    let Some(token) = token else {
        return Ok(());
    };
    let mut writer = writer.lock().await;
    writer.write(&token);
    writer.flush().await?;
    debug!(target: "sealink::channel", len = token.len(), "handshake token sent");
    Ok(())
}
