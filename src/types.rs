//! Core data types for SensorVis-RS
//!
//! This module contains the fundamental data structures shared by the parser,
//! the dispatch loop and the CLI.
//!
//! # Main Types
//!
//! - [`Value`] - A parsed field value (integer, float, string, bytes or a sequence)
//! - [`ParsedRecord`] - Ordered field/value pairs extracted from one frame
//! - [`Variable`] - A sink keyed by `(field, stream)` with bounded history and hooks
//! - [`DataPoint`] - A single timestamped value in a variable's history
//! - [`VariableUpdate`] - A delivered value, as sent to consumers of the backend
//!
//! # History
//!
//! Each variable keeps a ring of its most recent values ([`DEFAULT_HISTORY_LEN`]
//! by default). When the ring is full the oldest point is evicted.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Number of data points a variable retains unless configured otherwise
pub const DEFAULT_HISTORY_LEN: usize = 100;

/// A single field value extracted from a record
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Digit-only text
    Integer(i64),
    /// Anything that parses as a float
    Float(f64),
    /// Quoted or bare text, un-escaped
    String(String),
    /// Decoded `b"..."` base64 payload
    Bytes(Vec<u8>),
    /// Values of a key that repeats within one record
    Sequence(Vec<Value>),
}

/// Scalar kinds a variable can require of its values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Integer,
    Float,
    String,
    Bytes,
}

impl Value {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bytes(_) | Value::Sequence(_) => None,
        }
    }

    /// Name of the variant, for logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Sequence(_) => "sequence",
        }
    }

    /// Convert to `kind`, or `None` when no faithful conversion exists
    ///
    /// Sequences are converted element by element.
    pub fn coerce(self, kind: ValueKind) -> Option<Value> {
        match (self, kind) {
            (Value::Sequence(items), kind) => items
                .into_iter()
                .map(|item| item.coerce(kind))
                .collect::<Option<Vec<_>>>()
                .map(Value::Sequence),
            (v @ Value::Integer(_), ValueKind::Integer)
            | (v @ Value::Float(_), ValueKind::Float)
            | (v @ Value::String(_), ValueKind::String)
            | (v @ Value::Bytes(_), ValueKind::Bytes) => Some(v),
            (Value::Integer(i), ValueKind::Float) => Some(Value::Float(i as f64)),
            (Value::Float(f), ValueKind::Integer) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Some(Value::Integer(f as i64))
                } else {
                    None
                }
            }
            (Value::Integer(i), ValueKind::String) => Some(Value::String(i.to_string())),
            (Value::Float(f), ValueKind::String) => Some(Value::String(f.to_string())),
            (Value::String(s), ValueKind::Integer) => s.trim().parse().ok().map(Value::Integer),
            (Value::String(s), ValueKind::Float) => s.trim().parse().ok().map(Value::Float),
            (Value::String(s), ValueKind::Bytes) => Some(Value::Bytes(s.into_bytes())),
            (Value::Bytes(b), ValueKind::String) => String::from_utf8(b).ok().map(Value::String),
            (Value::Integer(_) | Value::Float(_), ValueKind::Bytes)
            | (Value::Bytes(_), ValueKind::Integer | ValueKind::Float) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "b\"{}\"", STANDARD.encode(b)),
            Value::Sequence(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            // JSON has no byte type; base64 mirrors the wire form
            Value::Bytes(b) => serializer.serialize_str(&STANDARD.encode(b)),
            Value::Sequence(items) => items.serialize(serializer),
        }
    }
}

/// Field/value pairs of one record, in first-seen order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRecord {
    fields: Vec<(String, Value)>,
}

impl ParsedRecord {
    /// Build a record from raw pairs, collapsing repeated keys
    ///
    /// Repeated keys become a [`Value::Sequence`] in arrival order; a key seen
    /// once keeps its bare value.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
        for (key, value) in pairs {
            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some((_, values)) => values.push(value),
                None => grouped.push((key, vec![value])),
            }
        }

        let fields = grouped
            .into_iter()
            .map(|(key, mut values)| {
                let value = if values.len() == 1 {
                    values.remove(0)
                } else {
                    Value::Sequence(values)
                };
                (key, value)
            })
            .collect();
        Self { fields }
    }

    /// Value of `field`
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(k, _)| k == field)
            .map(|(_, v)| v)
    }

    /// Iterate over fields in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl IntoIterator for ParsedRecord {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl Serialize for ParsedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Identity of a variable: a record field on a named stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableKey {
    /// Field name inside the record
    pub field: String,
    /// Name of the stream the record came from
    pub stream: String,
}

impl VariableKey {
    pub fn new(field: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            stream: stream.into(),
        }
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.field, self.stream)
    }
}

/// A single value with the time it was received
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Time since the dispatcher started
    pub timestamp: Duration,
    /// The delivered value
    pub value: Value,
}

impl DataPoint {
    pub fn new(timestamp: Duration, value: Value) -> Self {
        Self { timestamp, value }
    }
}

/// Running statistics over the numeric values in a variable's history
#[derive(Debug, Clone)]
pub struct IncrementalStats {
    /// Current count of numeric values
    pub count: u64,
    /// Running sum for average calculation
    pub sum: f64,
    /// Current minimum value
    pub min: f64,
    /// Current maximum value
    pub max: f64,
}

impl Default for IncrementalStats {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }
}

impl IncrementalStats {
    /// Add a new value to the statistics
    #[inline]
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Average of the tracked values
    #[inline]
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Statistics as a (min, max, avg) tuple
    pub fn as_tuple(&self) -> (f64, f64, f64) {
        if self.count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (self.min, self.max, self.average())
        }
    }

    /// Recompute from scratch over `points`
    pub fn recalculate(&mut self, points: &VecDeque<DataPoint>) {
        *self = Self::default();
        for value in points.iter().filter_map(|p| p.value.as_f64()) {
            self.push(value);
        }
    }
}

/// Callback invoked after every accepted value
pub type UpdateHook = Box<dyn FnMut(&Variable) + Send>;

/// A named sink for one field of one stream
pub struct Variable {
    key: VariableKey,
    kind: Option<ValueKind>,
    value: Option<Value>,
    history: VecDeque<DataPoint>,
    history_len: usize,
    stats: IncrementalStats,
    update_count: u64,
    hooks: Vec<UpdateHook>,
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("history", &self.history.len())
            .field("update_count", &self.update_count)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl Variable {
    /// Create a variable with the default history length
    pub fn new(key: VariableKey) -> Self {
        Self {
            key,
            kind: None,
            value: None,
            history: VecDeque::with_capacity(DEFAULT_HISTORY_LEN),
            history_len: DEFAULT_HISTORY_LEN,
            stats: IncrementalStats::default(),
            update_count: 0,
            hooks: Vec::new(),
        }
    }

    /// Require values of `kind`, coercing where possible
    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Keep at most `len` points (minimum one)
    pub fn with_history_len(mut self, len: usize) -> Self {
        self.history_len = len.max(1);
        while self.history.len() > self.history_len {
            self.history.pop_front();
        }
        self
    }

    /// Register a hook run synchronously after every accepted value
    pub fn subscribe(&mut self, hook: impl FnMut(&Variable) + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }

    pub fn key(&self) -> &VariableKey {
        &self.key
    }

    pub fn kind(&self) -> Option<ValueKind> {
        self.kind
    }

    /// Most recent value
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Retained points, oldest first
    pub fn history(&self) -> &VecDeque<DataPoint> {
        &self.history
    }

    /// Numeric statistics over the retained history
    pub fn stats(&self) -> &IncrementalStats {
        &self.stats
    }

    /// Values accepted since creation
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Accept a new value received at `timestamp`
    ///
    /// Returns the stored value, or `None` if it could not be coerced to the
    /// variable's kind, in which case nothing changes and no hook runs.
    pub fn push(&mut self, value: Value, timestamp: Duration) -> Option<&Value> {
        let value = match self.kind {
            Some(kind) => match value.coerce(kind) {
                Some(v) => v,
                None => {
                    tracing::debug!(variable = %self.key, ?kind, "Value not coercible, dropped");
                    return None;
                }
            },
            None => value,
        };

        if self.history.len() >= self.history_len {
            let evicted = self.history.pop_front();
            if evicted.and_then(|p| p.value.as_f64()).is_some() {
                self.stats.recalculate(&self.history);
            }
        }
        if let Some(v) = value.as_f64() {
            self.stats.push(v);
        }
        self.history.push_back(DataPoint::new(timestamp, value.clone()));
        self.value = Some(value);
        self.update_count += 1;

        let mut hooks = std::mem::take(&mut self.hooks);
        for hook in hooks.iter_mut() {
            hook(self);
        }
        self.hooks = hooks;

        self.value.as_ref()
    }

    /// Drop the history and current value, keeping hooks
    pub fn clear(&mut self) {
        self.history.clear();
        self.value = None;
        self.stats = IncrementalStats::default();
    }
}

/// A value delivered to a variable, as reported to backend consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableUpdate {
    /// Stream the record came from
    pub stream: String,
    /// Field name
    pub field: String,
    /// Seconds since the dispatcher started
    #[serde(rename = "t")]
    pub timestamp_secs: f64,
    /// Delivered value after coercion
    pub value: Value,
}

/// State of one stream's byte source
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamStatus {
    /// Polled every tick
    #[default]
    Active,
    /// The source failed; the stream is no longer polled
    Faulted(String),
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Active => write!(f, "Active"),
            StreamStatus::Faulted(reason) => write!(f, "Faulted: {}", reason),
        }
    }
}

/// Per-stream counters reported by the dispatcher
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamStats {
    pub name: String,
    pub bytes_received: u64,
    pub frames_emitted: u64,
    pub crc_failures: u64,
    pub resyncs: u64,
    pub bytes_discarded: u64,
    pub buffered: usize,
    pub faulted: bool,
}

/// Statistics about the dispatch loop
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionStats {
    /// Loop iterations completed
    pub ticks: u64,
    /// Records successfully parsed
    pub records_parsed: u64,
    /// Values pushed into registered variables
    pub updates_delivered: u64,
    /// Fields with no registered variable
    pub unmatched_fields: u64,
    /// Frames dropped after extraction (bad UTF-8, no record, bad base64)
    pub frames_dropped: u64,
    /// Frames dropped because the preprocessor failed
    pub preprocessor_failures: u64,
    /// Byte source failures
    pub transport_errors: u64,
    /// Number of messages dropped due to queue backpressure
    pub dropped_messages: u64,
    /// Per-stream framer counters
    pub streams: Vec<StreamStats>,
}

impl CollectionStats {
    /// Percentage of parsed-or-dropped frames that produced a record
    pub fn success_rate(&self) -> f64 {
        let total = self.records_parsed + self.frames_dropped + self.preprocessor_failures;
        if total == 0 {
            100.0
        } else {
            (self.records_parsed as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn key() -> VariableKey {
        VariableKey::new("temp", "sensor")
    }

    #[test]
    fn test_record_collapses_single_values() {
        let record = ParsedRecord::from_pairs(vec![
            ("a".to_string(), Value::Integer(1)),
            ("b".to_string(), Value::Integer(2)),
            ("a".to_string(), Value::Integer(3)),
        ]);
        assert_eq!(record.len(), 2);
        assert_eq!(
            record.get("a"),
            Some(&Value::Sequence(vec![Value::Integer(1), Value::Integer(3)]))
        );
        assert_eq!(record.get("b"), Some(&Value::Integer(2)));
        let keys: Vec<_> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_record_serializes_as_map() {
        let record = ParsedRecord::from_pairs(vec![
            ("x".to_string(), Value::Float(1.5)),
            ("raw".to_string(), Value::Bytes(b"hi".to_vec())),
        ]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"x":1.5,"raw":"aGk="}"#);
    }

    #[test]
    fn test_coercion() {
        assert_eq!(
            Value::Integer(3).coerce(ValueKind::Float),
            Some(Value::Float(3.0))
        );
        assert_eq!(
            Value::Float(4.0).coerce(ValueKind::Integer),
            Some(Value::Integer(4))
        );
        assert_eq!(Value::Float(4.5).coerce(ValueKind::Integer), None);
        assert_eq!(
            Value::String(" 12 ".into()).coerce(ValueKind::Integer),
            Some(Value::Integer(12))
        );
        assert_eq!(
            Value::Bytes(b"ok".to_vec()).coerce(ValueKind::String),
            Some(Value::String("ok".into()))
        );
        assert_eq!(Value::Bytes(vec![0xFF]).coerce(ValueKind::String), None);
        assert_eq!(
            Value::Sequence(vec![Value::Integer(1), Value::Integer(2)]).coerce(ValueKind::Float),
            Some(Value::Sequence(vec![Value::Float(1.0), Value::Float(2.0)]))
        );
    }

    #[test]
    fn test_variable_history_ring() {
        let mut var = Variable::new(key()).with_history_len(3);
        for i in 0..5 {
            var.push(Value::Integer(i), Duration::from_millis(i as u64));
        }
        assert_eq!(var.history().len(), 3);
        assert_eq!(var.history()[0].value, Value::Integer(2));
        assert_eq!(var.value(), Some(&Value::Integer(4)));
        assert_eq!(var.update_count(), 5);
        assert_eq!(var.stats().as_tuple(), (2.0, 4.0, 3.0));
    }

    #[test]
    fn test_default_history_len() {
        let mut var = Variable::new(key());
        for i in 0..150 {
            var.push(Value::Integer(i), Duration::ZERO);
        }
        assert_eq!(var.history().len(), DEFAULT_HISTORY_LEN);
    }

    #[test]
    fn test_variable_hooks_run_on_push() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut var = Variable::new(key());
        let sink = Arc::clone(&seen);
        var.subscribe(move |v| {
            sink.lock().unwrap().push(v.value().cloned());
        });

        var.push(Value::Float(1.0), Duration::ZERO);
        var.push(Value::Float(2.0), Duration::ZERO);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(Value::Float(1.0)), Some(Value::Float(2.0))]
        );
    }

    #[test]
    fn test_variable_rejects_uncoercible_value() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let mut var = Variable::new(key()).with_kind(ValueKind::Float);
        var.subscribe(move |_| *counter.lock().unwrap() += 1);

        assert!(var.push(Value::String("n/a".into()), Duration::ZERO).is_none());
        assert!(var.value().is_none());
        assert_eq!(*calls.lock().unwrap(), 0);

        assert_eq!(
            var.push(Value::Integer(7), Duration::ZERO),
            Some(&Value::Float(7.0))
        );
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_key_display() {
        assert_eq!(key().to_string(), "temp@sensor");
    }

    #[test]
    fn test_success_rate() {
        let stats = CollectionStats {
            records_parsed: 3,
            frames_dropped: 1,
            ..Default::default()
        };
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(CollectionStats::default().success_rate(), 100.0);
    }
}
