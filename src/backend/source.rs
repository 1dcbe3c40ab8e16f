//! Byte sources feeding the dispatch loop
//!
//! The dispatcher never blocks on a transport. It asks a [`ByteSource`]
//! whether bytes are waiting and, if so, takes whatever has arrived.
//! Blocking readers (stdin, files, FIFOs, character devices) are moved to
//! a helper thread that forwards chunks through a bounded channel.

use crate::error::{Result, SensorVisError};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::io::Read;

/// Capacity of the chunk channel between a reader thread and its source
const READER_CHANNEL_CAPACITY: usize = 64;

/// Non-blocking access to a stream's raw bytes
///
/// A transport that has failed for good reports a
/// [`SensorVisError::Transport`] from either method. The dispatcher marks
/// the stream faulted and stops polling it.
#[cfg_attr(test, mockall::automock)]
pub trait ByteSource: Send {
    /// Whether [`ByteSource::read_available`] would return bytes
    fn has_data_available(&mut self) -> Result<bool>;

    /// Take every byte received so far
    fn read_available(&mut self) -> Result<Vec<u8>>;
}

/// Sending half of a [`ChannelSource`]
///
/// `Err` carries the reason the producer gave up.
pub type ChunkSender = Sender<std::result::Result<Vec<u8>, String>>;

/// A source backed by a channel of chunks
///
/// Closing the sender ends the stream: once pending bytes are consumed the
/// source reports a transport error.
pub struct ChannelSource {
    label: String,
    receiver: Receiver<std::result::Result<Vec<u8>, String>>,
    pending: Vec<u8>,
    closed: Option<String>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it
    pub fn new(label: impl Into<String>, capacity: usize) -> (ChunkSender, Self) {
        let (tx, rx) = bounded(capacity.max(1));
        let source = Self {
            label: label.into(),
            receiver: rx,
            pending: Vec::new(),
            closed: None,
        };
        (tx, source)
    }

    fn pull(&mut self) {
        while self.closed.is_none() {
            match self.receiver.try_recv() {
                Ok(Ok(chunk)) => self.pending.extend_from_slice(&chunk),
                Ok(Err(reason)) => self.closed = Some(reason),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.closed = Some("end of input".into()),
            }
        }
    }

    fn closed_error(&self) -> Option<SensorVisError> {
        self.closed
            .as_ref()
            .map(|reason| SensorVisError::transport(&self.label, reason))
    }
}

impl ByteSource for ChannelSource {
    fn has_data_available(&mut self) -> Result<bool> {
        self.pull();
        if !self.pending.is_empty() {
            return Ok(true);
        }
        match self.closed_error() {
            Some(err) => Err(err),
            None => Ok(false),
        }
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        self.pull();
        if self.pending.is_empty() {
            if let Some(err) = self.closed_error() {
                return Err(err);
            }
        }
        Ok(std::mem::take(&mut self.pending))
    }
}

impl std::fmt::Debug for ChannelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSource")
            .field("label", &self.label)
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Read `reader` on a helper thread in chunks of at most `chunk_size` bytes
///
/// The thread ends at end of input, on a read error, or once the returned
/// source is dropped.
pub fn spawn_reader<R>(
    label: impl Into<String>,
    mut reader: R,
    chunk_size: usize,
) -> Result<ChannelSource>
where
    R: Read + Send + 'static,
{
    let label = label.into();
    let (tx, source) = ChannelSource::new(label.clone(), READER_CHANNEL_CAPACITY);
    let chunk_size = chunk_size.max(1);

    std::thread::Builder::new()
        .name(format!("reader-{}", label))
        .spawn(move || {
            let mut buf = vec![0u8; chunk_size];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        tracing::debug!(stream = %label, "Reader reached end of input");
                        break;
                    }
                    Ok(n) => {
                        if tx.send(Ok(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::warn!(stream = %label, "Read failed: {}", e);
                        let _ = tx.send(Err(e.to_string()));
                        break;
                    }
                }
            }
        })?;

    Ok(source)
}
