//! In-memory asynchronous byte pipes.
//!
//! A pipe carries bytes in one direction between a [`PipeWriter`] and a
//! [`PipeReader`]. Writers stage bytes into a growable buffer, commit them
//! with [`PipeWriter::advance`], and ship them with [`PipeWriter::flush`];
//! readers accumulate flushed chunks and consume them through a
//! cursor-style [`PipeReader::advance`]. The channel between the halves is
//! bounded, so flushing applies backpressure once the reader falls behind.

use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Chunk size used by the [`wire`] bridge when pulling from a raw transport.
const WIRE_READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipeError {
    #[error("pipe closed by peer")]
    Closed,
}

/// Create a bounded unidirectional byte pipe.
///
/// `capacity` is the number of in-flight flushed chunks the reader may
/// buffer before further flushes suspend.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        PipeWriter {
            tx,
            staged: BytesMut::new(),
            committed: 0,
        },
        PipeReader {
            rx,
            segments: VecDeque::new(),
            buffered: 0,
            eof: false,
        },
    )
}

/// Writing half of a pipe: a growable staging buffer with explicit commit
/// and flush.
#[derive(Debug)]
pub struct PipeWriter {
    tx: mpsc::Sender<Bytes>,
    staged: BytesMut,
    committed: usize,
}

impl PipeWriter {
    /// Reserve room for `additional` bytes beyond what is already staged.
    pub fn ensure_capacity(&mut self, additional: usize) {
        self.staged.reserve(additional);
    }

    /// Expose `len` writable bytes past the committed watermark.
    ///
    /// The region is zero-initialised. Nothing becomes readable until the
    /// caller commits it with [`advance`](Self::advance); a region that is
    /// never advanced is reused by the next call.
    pub fn spare_mut(&mut self, len: usize) -> &mut [u8] {
        let end = self.committed + len;
        self.staged.resize(end, 0);
        &mut self.staged[self.committed..end]
    }

    /// Commit `len` bytes of the spare region as readable.
    pub fn advance(&mut self, len: usize) {
        debug_assert!(
            self.committed + len <= self.staged.len(),
            "advance past the staged region"
        );
        self.committed += len;
    }

    /// Stage and commit `bytes` in one step.
    pub fn write(&mut self, bytes: &[u8]) {
        self.staged.truncate(self.committed);
        self.staged.extend_from_slice(bytes);
        self.committed = self.staged.len();
    }

    /// Number of committed bytes awaiting a flush.
    pub fn pending(&self) -> usize {
        self.committed
    }

    /// Ship all committed bytes downstream as one chunk.
    ///
    /// Suspends while the pipe is at capacity. Fails with
    /// [`PipeError::Closed`] once the reading half is gone.
    pub async fn flush(&mut self) -> Result<(), PipeError> {
        if self.committed == 0 {
            return Ok(());
        }
        let chunk = self.staged.split_to(self.committed).freeze();
        self.committed = 0;
        self.tx.send(chunk).await.map_err(|_| PipeError::Closed)
    }
}

/// Reading half of a pipe: accumulated chunks with cursor semantics.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<Bytes>,
    segments: VecDeque<Bytes>,
    buffered: usize,
    eof: bool,
}

impl PipeReader {
    /// Wait until at least one new chunk arrives, then drain everything
    /// immediately available. Returns `false` on clean end-of-stream.
    pub async fn fill(&mut self) -> bool {
        if self.eof {
            return false;
        }
        match self.rx.recv().await {
            Some(chunk) => self.push(chunk),
            None => {
                self.eof = true;
                return false;
            }
        }
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => self.push(chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.eof = true;
                    break;
                }
            }
        }
        true
    }

    fn push(&mut self, chunk: Bytes) {
        if !chunk.is_empty() {
            self.buffered += chunk.len();
            self.segments.push_back(chunk);
        }
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Snapshot over the buffered run. The view may span multiple
    /// discontiguous segments; it borrows the reader and is invalidated by
    /// the next [`advance`](Self::advance) or [`fill`](Self::fill).
    pub fn view(&self) -> ReadBuf<'_> {
        ReadBuf {
            segments: self.segments.iter().map(|s| s.as_ref()).collect(),
            len: self.buffered,
        }
    }

    /// Drop `len` consumed bytes from the front of the buffered run.
    pub fn advance(&mut self, mut len: usize) {
        assert!(len <= self.buffered, "advance past the buffered run");
        self.buffered -= len;
        while len > 0 {
            let front = self.segments.front_mut().expect("buffered run not empty");
            if front.len() > len {
                front.advance(len);
                break;
            }
            len -= front.len();
            self.segments.pop_front();
        }
    }
}

/// Immutable, sliceable view over buffered pipe bytes.
#[derive(Debug, Clone)]
pub struct ReadBuf<'a> {
    segments: Vec<&'a [u8]>,
    len: usize,
}

impl<'a> ReadBuf<'a> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte at `index`, or `None` past the end.
    pub fn byte(&self, mut index: usize) -> Option<u8> {
        for segment in &self.segments {
            if index < segment.len() {
                return Some(segment[index]);
            }
            index -= segment.len();
        }
        None
    }

    /// Sub-view of `len` bytes starting at `start`.
    ///
    /// # Panics
    /// Panics when the requested range exceeds the view.
    pub fn slice(&self, start: usize, len: usize) -> ReadBuf<'a> {
        assert!(
            start + len <= self.len,
            "slice [{start}, +{len}] out of bounds of a {} byte view",
            self.len
        );
        let mut out = Vec::new();
        let mut skip = start;
        let mut remaining = len;
        for segment in &self.segments {
            if remaining == 0 {
                break;
            }
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let take = (segment.len() - skip).min(remaining);
            out.push(&segment[skip..skip + take]);
            skip = 0;
            remaining -= take;
        }
        ReadBuf { segments: out, len }
    }

    /// Copy the whole view into `dst`.
    ///
    /// # Panics
    /// Panics when `dst` is not exactly `self.len()` bytes.
    pub fn copy_into(&self, dst: &mut [u8]) {
        assert_eq!(dst.len(), self.len, "destination size mismatch");
        let mut at = 0;
        for segment in &self.segments {
            dst[at..at + segment.len()].copy_from_slice(segment);
            at += segment.len();
        }
    }

    /// The backing slice when the view happens to be contiguous.
    pub fn as_contiguous(&self) -> Option<&'a [u8]> {
        match self.segments.len() {
            0 => Some(&[]),
            1 => Some(self.segments[0]),
            _ => None,
        }
    }

    /// Iterate the backing segments in order.
    pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.segments.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        self.copy_into(&mut out);
        out
    }
}

/// One end of a duplex byte channel.
#[derive(Debug)]
pub struct DuplexPipe {
    pub reader: PipeReader,
    pub writer: PipeWriter,
}

/// Create a crossed pair of duplex pipes, one end per party.
pub fn duplex(capacity: usize) -> (DuplexPipe, DuplexPipe) {
    let (a_writer, b_reader) = pipe(capacity);
    let (b_writer, a_reader) = pipe(capacity);
    (
        DuplexPipe {
            reader: a_reader,
            writer: a_writer,
        },
        DuplexPipe {
            reader: b_reader,
            writer: b_writer,
        },
    )
}

/// Bridge a raw transport into a duplex pipe by spawning two copy loops.
///
/// Closing the transport surfaces as end-of-stream on the returned reader;
/// dropping the returned writer closes the transport's write side once the
/// staged bytes are drained.
pub fn wire<T>(io: T, capacity: usize) -> DuplexPipe
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(io);
    let (mut inbound_writer, inbound_reader) = pipe(capacity);
    let (outbound_writer, mut outbound_reader) = pipe(capacity);

    tokio::spawn(async move {
        let mut buf = [0u8; WIRE_READ_CHUNK];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    inbound_writer.write(&buf[..n]);
                    if inbound_writer.flush().await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    tokio::spawn(async move {
        while outbound_reader.fill().await {
            let buffered = outbound_reader.buffered();
            {
                let view = outbound_reader.view();
                for segment in view.iter() {
                    if write_half.write_all(segment).await.is_err() {
                        return;
                    }
                }
            }
            if write_half.flush().await.is_err() {
                return;
            }
            outbound_reader.advance(buffered);
        }
        let _ = write_half.shutdown().await;
    });

    DuplexPipe {
        reader: inbound_reader,
        writer: outbound_writer,
    }
}
