//! Incremental frame extraction
//!
//! [`Framer::feed`] appends newly read bytes to the stream buffer and performs
//! at most one extraction. Complete frames beyond the first stay buffered and
//! come out on later calls (an empty feed is enough), so a caller polling once
//! per tick sees frames in stream order without ever losing one.

use super::{CrcTrailer, FramingPolicy, HeaderLayout, LinkSettings, TimeoutSetting};
use crate::crc::Crc;
use crate::error::Result;
use std::time::{Duration, Instant};

/// One complete message carved out of a byte stream
pub type Frame = Vec<u8>;

/// Mutable per-stream state owned by a [`Framer`]
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    /// Bytes received but not yet emitted
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a delimiter
    scanned: usize,
    /// Header start sequence located at the front of `buffer`
    header_found: bool,
    /// Total length of the frame being assembled, once its header is decoded
    current_msg_length: Option<usize>,
    /// Instant the last non-empty chunk arrived (timeout policy)
    last_arrival: Option<Instant>,
}

impl StreamState {
    /// Bytes currently buffered
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Whether a header start has been located
    pub fn header_found(&self) -> bool {
        self.header_found
    }

    /// Decoded total length of the pending frame
    pub fn current_msg_length(&self) -> Option<usize> {
        self.current_msg_length
    }

    /// Arrival time of the last non-empty chunk
    pub fn last_arrival(&self) -> Option<Instant> {
        self.last_arrival
    }

    fn reset_header(&mut self) {
        self.header_found = false;
        self.current_msg_length = None;
    }

    fn take(&mut self, len: usize) -> Frame {
        self.scanned = 0;
        self.buffer.drain(..len).collect()
    }
}

/// Counters kept by a framer over its lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramerStats {
    /// Bytes handed to the framer
    pub bytes_received: u64,
    /// Frames returned to the caller
    pub frames_emitted: u64,
    /// Candidate frames dropped because their CRC did not match
    pub crc_failures: u64,
    /// Headers abandoned because their length field was unusable
    pub resyncs: u64,
    /// Bytes thrown away while hunting for a header start
    pub bytes_discarded: u64,
}

/// Outcome of a single extraction attempt
#[derive(Debug)]
enum Extraction {
    /// A complete, valid frame
    Frame(Frame),
    /// A candidate was consumed but rejected
    Dropped,
    /// Not enough data yet
    Pending,
}

/// Per-stream end-of-transmission state machine
#[derive(Debug)]
pub struct Framer {
    policy: FramingPolicy,
    crc: Option<Crc>,
    quiet_interval: Duration,
    state: StreamState,
    stats: FramerStats,
}

impl Framer {
    /// Create a framer using default link settings for the automatic timeout
    pub fn new(policy: FramingPolicy) -> Result<Self> {
        Self::with_link(policy, &LinkSettings::default())
    }

    /// Create a framer for a stream running over `link`
    ///
    /// Every policy parameter is checked here; a misconfigured policy never
    /// reaches the extraction code.
    pub fn with_link(policy: FramingPolicy, link: &LinkSettings) -> Result<Self> {
        policy.validate()?;
        let crc = policy.trailer().map(|t| Crc::new(t.model)).transpose()?;
        let quiet_interval = match &policy {
            FramingPolicy::Timeout {
                timeout: TimeoutSetting::Fixed(interval),
            } => *interval,
            FramingPolicy::Timeout {
                timeout: TimeoutSetting::Auto,
            } => link.byte_time()?,
            _ => Duration::ZERO,
        };

        tracing::debug!(
            policy = policy.name(),
            quiet_interval_us = quiet_interval.as_micros() as u64,
            "Framer created"
        );

        Ok(Self {
            policy,
            crc,
            quiet_interval,
            state: StreamState::default(),
            stats: FramerStats::default(),
        })
    }

    /// The active policy
    pub fn policy(&self) -> &FramingPolicy {
        &self.policy
    }

    /// Current transient state
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Lifetime counters
    pub fn stats(&self) -> &FramerStats {
        &self.stats
    }

    /// Interval of silence that ends a frame under the timeout policy
    pub fn quiet_interval(&self) -> Duration {
        self.quiet_interval
    }

    /// Whether the framer must be fed even when no bytes arrived
    ///
    /// Only the timeout policy completes frames on silence.
    pub fn needs_idle_poll(&self) -> bool {
        matches!(self.policy, FramingPolicy::Timeout { .. })
    }

    /// Discard buffered bytes and transient state
    pub fn reset(&mut self) {
        self.state = StreamState::default();
    }

    /// Append `bytes` and try to extract one frame
    pub fn feed(&mut self, bytes: &[u8]) -> Option<Frame> {
        self.feed_at(bytes, Instant::now())
    }

    /// Like [`Framer::feed`], with the arrival time supplied by the caller
    pub fn feed_at(&mut self, bytes: &[u8], now: Instant) -> Option<Frame> {
        self.stats.bytes_received += bytes.len() as u64;

        if matches!(self.policy, FramingPolicy::Timeout { .. }) {
            let frame = self.extract_timeout(bytes, now);
            if frame.is_some() {
                self.stats.frames_emitted += 1;
            }
            return frame;
        }

        self.state.buffer.extend_from_slice(bytes);
        match self.extract() {
            Extraction::Frame(frame) => Some(frame),
            Extraction::Dropped | Extraction::Pending => None,
        }
    }

    /// Extract every complete frame currently buffered
    ///
    /// Rejected candidates are skipped. The timeout policy never completes a
    /// frame here since it depends on elapsed time.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            match self.extract() {
                Extraction::Frame(frame) => frames.push(frame),
                Extraction::Dropped => continue,
                Extraction::Pending => break,
            }
        }
        frames
    }

    fn extract(&mut self) -> Extraction {
        let Framer {
            policy,
            crc,
            state,
            stats,
            ..
        } = self;

        let extraction = match policy {
            FramingPolicy::None => {
                if state.buffer.is_empty() {
                    Extraction::Pending
                } else {
                    let len = state.buffer.len();
                    Extraction::Frame(state.take(len))
                }
            }
            FramingPolicy::Carriage | FramingPolicy::LineFeed | FramingPolicy::CarriageLineFeed => {
                match policy.delimiter() {
                    Some(delimiter) => extract_delimited(state, delimiter),
                    None => Extraction::Pending,
                }
            }
            FramingPolicy::FixedLength { len } => extract_fixed(state, *len),
            FramingPolicy::Header(header) => extract_header(state, stats, header, None),
            FramingPolicy::Crc {
                trailer,
                message_len,
            } => {
                let total = message_len.saturating_add(trailer.length_adjustment());
                match extract_fixed(state, total) {
                    Extraction::Frame(candidate) => {
                        check_crc(stats, crc.as_ref(), trailer, candidate)
                    }
                    other => other,
                }
            }
            FramingPolicy::HeaderCrc { header, trailer } => {
                match extract_header(state, stats, header, Some(trailer)) {
                    Extraction::Frame(candidate) => {
                        check_crc(stats, crc.as_ref(), trailer, candidate)
                    }
                    other => other,
                }
            }
            FramingPolicy::Timeout { .. } => Extraction::Pending,
        };

        if let Extraction::Frame(ref frame) = extraction {
            stats.frames_emitted += 1;
            tracing::trace!(policy = policy.name(), len = frame.len(), "Frame extracted");
        }
        extraction
    }

    fn extract_timeout(&mut self, bytes: &[u8], now: Instant) -> Option<Frame> {
        let state = &mut self.state;
        if !bytes.is_empty() {
            state.buffer.extend_from_slice(bytes);
            state.last_arrival = Some(now);
            return None;
        }

        let last = state.last_arrival?;
        if now.saturating_duration_since(last) < self.quiet_interval {
            return None;
        }

        state.last_arrival = None;
        if state.buffer.is_empty() {
            return None;
        }
        let len = state.buffer.len();
        Some(state.take(len))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn extract_delimited(state: &mut StreamState, delimiter: &[u8]) -> Extraction {
    // A delimiter may straddle the already-scanned prefix and new bytes
    let start = state.scanned.saturating_sub(delimiter.len().saturating_sub(1));
    match find(&state.buffer[start..], delimiter) {
        Some(pos) => {
            let end = start + pos + delimiter.len();
            Extraction::Frame(state.take(end))
        }
        None => {
            state.scanned = state.buffer.len();
            Extraction::Pending
        }
    }
}

fn extract_fixed(state: &mut StreamState, len: usize) -> Extraction {
    if state.buffer.len() >= len {
        Extraction::Frame(state.take(len))
    } else {
        Extraction::Pending
    }
}

fn extract_header(
    state: &mut StreamState,
    stats: &mut FramerStats,
    header: &HeaderLayout,
    trailer: Option<&CrcTrailer>,
) -> Extraction {
    if !state.header_found {
        let start = &header.start_sequence;
        if start.is_empty() {
            if state.buffer.is_empty() {
                return Extraction::Pending;
            }
        } else {
            match find(&state.buffer, start) {
                Some(pos) => {
                    state.buffer.drain(..pos);
                    stats.bytes_discarded += pos as u64;
                }
                None => {
                    // Keep only a tail that could still begin the start sequence
                    let keep = start.len() - 1;
                    if state.buffer.len() > keep {
                        let discard = state.buffer.len() - keep;
                        state.buffer.drain(..discard);
                        stats.bytes_discarded += discard as u64;
                    }
                    return Extraction::Pending;
                }
            }
        }
        state.header_found = true;
    }

    let total = match state.current_msg_length {
        Some(total) => total,
        None => {
            if state.buffer.len() < header.header_size {
                return Extraction::Pending;
            }
            let field = &state.buffer
                [header.length_field_offset..header.length_field_offset + header.length_field_size];
            let raw = header.endianness.read_uint(field);

            let mut total = usize::try_from(raw).unwrap_or(usize::MAX);
            if !header.header_included_in_length {
                total = total.saturating_add(header.header_size);
            }
            if let Some(trailer) = trailer {
                total = total.saturating_add(trailer.length_adjustment());
            }

            if total < header.header_size || total == usize::MAX {
                // Drop the first byte so the search restarts past this header
                tracing::warn!(
                    length_field = raw,
                    header_size = header.header_size,
                    "Unusable header length, resynchronizing"
                );
                state.buffer.drain(..1);
                state.reset_header();
                stats.resyncs += 1;
                stats.bytes_discarded += 1;
                return Extraction::Dropped;
            }

            state.current_msg_length = Some(total);
            total
        }
    };

    if state.buffer.len() < total {
        return Extraction::Pending;
    }
    state.reset_header();
    Extraction::Frame(state.take(total))
}

fn check_crc(
    stats: &mut FramerStats,
    crc: Option<&Crc>,
    trailer: &CrcTrailer,
    mut candidate: Frame,
) -> Extraction {
    let crc_len = trailer.byte_len();
    let Some(crc) = crc else {
        return Extraction::Dropped;
    };
    if candidate.len() < crc_len {
        stats.crc_failures += 1;
        tracing::warn!(len = candidate.len(), crc_len, "Frame shorter than its CRC, dropped");
        return Extraction::Dropped;
    }

    let split = candidate.len() - crc_len;
    let expected = trailer.endianness.read_uint(&candidate[split..]);
    let computed = crc.checksum(&candidate[..split]);
    if computed != expected {
        stats.crc_failures += 1;
        tracing::warn!(
            expected = format!("0x{:X}", expected),
            computed = format!("0x{:X}", computed),
            "CRC mismatch, frame dropped"
        );
        return Extraction::Dropped;
    }

    candidate.truncate(split);
    Extraction::Frame(candidate)
}
