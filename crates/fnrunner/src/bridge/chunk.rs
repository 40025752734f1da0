//! Chunked transport for runner communication.
//!
//! Messages carry no length prefix. The sender cuts a message into `CHUNK`-byte
//! writes and the receiver keeps reading until a read comes back shorter than
//! `CHUNK`. A message whose length is a multiple of `CHUNK` (including the empty
//! message) gets one trailing NUL so that its last write is short; the receiver
//! strips it again.
//!
//! Write boundaries must survive to the reader: the host uses a
//! `SOCK_SEQPACKET` socketpair. Plain pipes work only in strict lockstep.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;

/// Transport unit size. A read shorter than this terminates a message.
pub const CHUNK: usize = 1024;

const PAD: &[u8] = &[0];

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer closed its end (a read returned zero bytes).
    #[error("channel closed by peer")]
    Closed,

    #[error("channel i/o failed: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// True when the error is a receive timeout set on the descriptor.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }
}

/// Split a message into the chunks written on the wire, padding included.
pub fn frame(message: &[u8]) -> Chunks<'_> {
    Chunks {
        rest: message,
        pad: message.len() % CHUNK == 0,
    }
}

/// Iterator over the wire chunks of one message. See [`frame`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    rest: &'a [u8],
    pad: bool,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if !self.rest.is_empty() {
            let n = self.rest.len().min(CHUNK);
            let (head, tail) = self.rest.split_at(n);
            self.rest = tail;
            Some(head)
        } else if self.pad {
            self.pad = false;
            Some(PAD)
        } else {
            None
        }
    }
}

/// Accumulates chunks until the short one arrives.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: Vec<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk as returned by a single read.
    ///
    /// Returns the complete message when `chunk` is short. A short chunk that
    /// is exactly one NUL byte is the sender's padding and is dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        if chunk.len() >= CHUNK {
            self.buf.extend_from_slice(chunk);
            return None;
        }
        if chunk != PAD {
            self.buf.extend_from_slice(chunk);
        }
        Some(std::mem::take(&mut self.buf))
    }

    /// Bytes held for a message still in flight.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Reassemble a message from a sequence of wire chunks.
///
/// Returns `None` if the sequence ends before a short chunk.
pub fn decode_chunks<'a, I>(chunks: I) -> Option<Vec<u8>>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut reassembler = Reassembler::new();
    chunks.into_iter().find_map(|chunk| reassembler.push(chunk))
}

/// Blocking chunk transport over a reader/writer pair.
///
/// Owns the descriptors for the lifetime of the runner; nothing else reads
/// or writes them.
pub struct ChunkTransport<R, W> {
    reader: R,
    writer: W,
    reassembler: Reassembler,
    buf: Box<[u8; CHUNK]>,
}

impl<R: Read, W: Write> ChunkTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            reassembler: Reassembler::new(),
            buf: Box::new([0u8; CHUNK]),
        }
    }

    /// Block until one complete message has been read.
    pub fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            let n = match self.reader.read(&mut self.buf[..]) {
                Ok(0) => {
                    tracing::debug!(
                        pending = self.reassembler.pending(),
                        "Read returned EOF"
                    );
                    return Err(TransportError::Closed);
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            tracing::trace!(bytes = n, "Read chunk");
            if let Some(message) = self.reassembler.push(&self.buf[..n]) {
                return Ok(message);
            }
        }
    }

    /// Write one message, chunked and padded.
    pub fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        for chunk in frame(message) {
            self.writer.write_all(chunk)?;
        }
        self.writer.flush()?;
        tracing::trace!(bytes = message.len(), "Sent message");
        Ok(())
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl ChunkTransport<File, File> {
    /// Transport over one bidirectional descriptor (a socket queue).
    pub fn from_queue(fd: OwnedFd) -> io::Result<Self> {
        let reader = File::from(fd);
        let writer = reader.try_clone()?;
        Ok(Self::new(reader, writer))
    }

    /// Transport over separate inbound and outbound descriptors.
    pub fn from_pipes(input: OwnedFd, output: OwnedFd) -> Self {
        Self::new(File::from(input), File::from(output))
    }
}
