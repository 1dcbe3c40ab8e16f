//! A live stream: byte source, framer and optional preprocessor

use super::mock_source::MockSource;
use super::preprocessor::{self, Preprocessor};
use super::source::{spawn_reader, ByteSource};
use crate::config::{SourceConfig, StreamConfig, DEFAULT_CHUNK_SIZE};
use crate::error::{FrameError, Result, ResultExt, SensorVisError};
use crate::framing::{Frame, Framer, FramingPolicy};
use crate::parser::try_parse;
use crate::scripting::ExecutionContext;
use crate::types::{ParsedRecord, StreamStats, StreamStatus};
use std::time::Instant;

/// What became of one extracted frame
#[derive(Debug)]
pub enum FrameOutcome {
    /// The frame held a record
    Record(ParsedRecord),
    /// The frame was discarded; the error is always transient
    Dropped(SensorVisError),
}

/// Open the byte source described by `config`
pub fn open_source(config: &StreamConfig, policy: &FramingPolicy) -> Result<Box<dyn ByteSource>> {
    let source: Box<dyn ByteSource> = match &config.source {
        SourceConfig::Stdin => Box::new(spawn_reader(
            config.name.as_str(),
            std::io::stdin(),
            DEFAULT_CHUNK_SIZE,
        )?),
        SourceConfig::File { path, chunk_size } => {
            let file = std::fs::File::open(path).map_err(|e| {
                SensorVisError::transport(
                    &config.name,
                    format!("cannot open {}: {}", path.display(), e),
                )
            })?;
            Box::new(spawn_reader(config.name.as_str(), file, *chunk_size)?)
        }
        SourceConfig::Mock(mock) => Box::new(MockSource::new(
            config.name.as_str(),
            mock.clone(),
            policy.clone(),
        )?),
    };
    Ok(source)
}

/// One stream polled by the dispatcher
pub struct DataStream {
    name: String,
    source: Box<dyn ByteSource>,
    framer: Framer,
    preprocessor: Option<Box<dyn Preprocessor>>,
    status: StreamStatus,
    frame_index: u64,
}

impl DataStream {
    /// Create a stream from parts
    pub fn new(name: impl Into<String>, source: Box<dyn ByteSource>, framer: Framer) -> Self {
        Self {
            name: name.into(),
            source,
            framer,
            preprocessor: None,
            status: StreamStatus::Active,
            frame_index: 0,
        }
    }

    /// Run every frame through `preprocessor` before parsing
    pub fn with_preprocessor(mut self, preprocessor: Box<dyn Preprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    /// Build a stream from its configuration, opening the source
    pub fn open(config: &StreamConfig) -> Result<Self> {
        let build = || -> Result<Self> {
            let policy = config.framing.into_policy()?;
            let framer = Framer::with_link(policy.clone(), &config.link)?;
            let source = open_source(config, &policy)?;
            let mut stream = Self::new(config.name.clone(), source, framer);
            if let Some(pre) = &config.preprocessor {
                stream = stream.with_preprocessor(preprocessor::build(pre)?);
            }
            Ok(stream)
        };
        let stream = build().with_context(|| format!("Failed to open stream '{}'", config.name))?;

        tracing::info!(
            stream = %stream.name,
            policy = stream.framer.policy().name(),
            preprocessor = ?stream.preprocessor.as_ref().map(|p| p.describe()),
            "Stream opened"
        );
        Ok(stream)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &StreamStatus {
        &self.status
    }

    /// Whether the dispatcher still polls this stream
    pub fn is_active(&self) -> bool {
        self.status == StreamStatus::Active
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }

    /// Frames extracted so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Counters for statistics reports
    pub fn stats(&self) -> StreamStats {
        let framer = self.framer.stats();
        StreamStats {
            name: self.name.clone(),
            bytes_received: framer.bytes_received,
            frames_emitted: framer.frames_emitted,
            crc_failures: framer.crc_failures,
            resyncs: framer.resyncs,
            bytes_discarded: framer.bytes_discarded,
            buffered: self.framer.state().buffer().len(),
            faulted: !self.is_active(),
        }
    }

    /// Fetch new bytes and turn every completed frame into an outcome
    ///
    /// A transport error faults the stream and is returned; the stream is
    /// not polled again.
    pub fn poll(&mut self, started: Instant) -> Result<Vec<FrameOutcome>> {
        if !self.is_active() {
            return Ok(Vec::new());
        }

        let bytes = match self.fetch() {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(Vec::new()),
            Err(e) => {
                tracing::warn!(stream = %self.name, "Stream faulted: {}", e);
                self.status = StreamStatus::Faulted(e.to_string());
                return Err(e);
            }
        };

        let mut frames: Vec<Frame> = self.framer.feed(&bytes).into_iter().collect();
        frames.extend(self.framer.drain());

        Ok(frames
            .into_iter()
            .map(|frame| match self.process_frame(&frame, started) {
                Ok(record) => FrameOutcome::Record(record),
                Err(e) => FrameOutcome::Dropped(e),
            })
            .collect())
    }

    fn fetch(&mut self) -> Result<Option<Vec<u8>>> {
        if self.source.has_data_available()? {
            return self.source.read_available().map(Some);
        }
        if self.framer.needs_idle_poll() {
            return Ok(Some(Vec::new()));
        }
        Ok(None)
    }

    fn process_frame(&mut self, frame: &[u8], started: Instant) -> Result<ParsedRecord> {
        let ctx = ExecutionContext::new(started.elapsed().as_secs_f64(), self.frame_index);
        self.frame_index += 1;

        let text = match self.preprocessor.as_mut() {
            Some(pre) => pre.apply(frame, &ctx)?,
            None => std::str::from_utf8(frame)
                .map_err(|_| FrameError::NonUtf8)?
                .to_string(),
        };
        tracing::trace!(stream = %self.name, frame = %text.escape_debug(), "Frame");

        Ok(try_parse(&text)?)
    }
}

impl std::fmt::Debug for DataStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStream")
            .field("name", &self.name)
            .field("policy", &self.framer.policy().name())
            .field("status", &self.status)
            .field("frame_index", &self.frame_index)
            .finish()
    }
}
