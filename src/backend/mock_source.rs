//! Mock Byte Source for Testing
//!
//! Produces one brace-group record per period, wrapped in whatever framing
//! the stream uses, so a complete pipeline can run without hardware:
//!
//! ```text
//! {name: 'sim', variable: 0}
//! {name: 'sim', variable: 1}
//! ```
//!
//! # Patterns
//!
//! - [`MockPattern::Constant`] - Every field is `amplitude`
//! - [`MockPattern::Counter`] - Every field is the record index
//! - [`MockPattern::Sine`] - `amplitude * sin(2π f t)`, each further field a quarter period later
//!
//! Fixed-size policies (fixed length, standalone CRC) get the record padded
//! with spaces; a record that does not fit is skipped with a warning.

use super::source::ByteSource;
use crate::config::{MockPattern, MockSourceConfig};
use crate::error::{Result, SensorVisError};
use crate::framing::FramingPolicy;
use crate::parser::render;
use crate::types::{ParsedRecord, Value};
use std::time::{Duration, Instant};

/// Payload size a policy requires, when it requires one
fn fixed_payload_len(policy: &FramingPolicy) -> Option<usize> {
    match policy {
        FramingPolicy::FixedLength { len } => Some(*len),
        FramingPolicy::Crc {
            trailer,
            message_len,
        } => Some(message_len - (trailer.byte_len() - trailer.length_adjustment())),
        _ => None,
    }
}

/// A source emitting synthetic records at a fixed period
#[derive(Debug)]
pub struct MockSource {
    label: String,
    config: MockSourceConfig,
    policy: FramingPolicy,
    period: Duration,
    started: Instant,
    next_due: Instant,
    emitted: u64,
}

impl MockSource {
    /// Create a mock source for the stream `label` framed with `policy`
    pub fn new(
        label: impl Into<String>,
        config: MockSourceConfig,
        policy: FramingPolicy,
    ) -> Result<Self> {
        policy.validate()?;
        if config.fields.is_empty() {
            return Err(SensorVisError::Config(
                "mock source needs at least one field".into(),
            ));
        }
        let now = Instant::now();
        Ok(Self {
            label: label.into(),
            period: Duration::from_millis(config.period_ms),
            config,
            policy,
            started: now,
            next_due: now,
            emitted: 0,
        })
    }

    /// Records produced so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Generate the value of field number `index` at `elapsed_secs`
    fn generate_value(&self, index: usize, elapsed_secs: f64) -> Value {
        match self.config.pattern {
            MockPattern::Constant => Value::Float(self.config.amplitude),
            MockPattern::Counter => Value::Integer(self.emitted as i64),
            MockPattern::Sine => {
                let phase = index as f64 * std::f64::consts::FRAC_PI_2;
                let angle =
                    2.0 * std::f64::consts::PI * self.config.frequency_hz * elapsed_secs + phase;
                Value::Float(self.config.amplitude * angle.sin())
            }
        }
    }

    /// Render the next record as text
    pub fn next_record(&self) -> String {
        let elapsed = self.started.elapsed().as_secs_f64();
        let mut pairs = Vec::with_capacity(self.config.fields.len() + 1);
        pairs.push(("name".to_string(), Value::String(self.label.clone())));
        for (index, field) in self.config.fields.iter().enumerate() {
            pairs.push((field.clone(), self.generate_value(index, elapsed)));
        }
        render(&ParsedRecord::from_pairs(pairs))
    }

    fn frame_record(&self, record: String) -> Option<Vec<u8>> {
        let mut payload = record.into_bytes();
        if let Some(len) = fixed_payload_len(&self.policy) {
            if payload.len() > len {
                tracing::warn!(
                    stream = %self.label,
                    "Mock record of {} bytes does not fit a {}-byte frame, skipped",
                    payload.len(),
                    len
                );
                return None;
            }
            payload.resize(len, b' ');
        }
        match self.policy.encode(&payload) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::warn!(stream = %self.label, "Mock record not encodable: {}", e);
                None
            }
        }
    }
}

impl ByteSource for MockSource {
    fn has_data_available(&mut self) -> Result<bool> {
        Ok(Instant::now() >= self.next_due)
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let now = Instant::now();
        if now < self.next_due {
            return Ok(Vec::new());
        }

        let frame = self.frame_record(self.next_record());
        self.emitted += 1;

        // Skip missed periods instead of bursting to catch up
        self.next_due += self.period;
        if self.next_due < now {
            self.next_due = now + self.period;
        }

        Ok(frame.unwrap_or_default())
    }
}
