//! Stream registry and the dispatch tick
//!
//! The registry owns every live stream (unique by name) and every variable
//! (unique by `(field, stream)`). [`Dispatcher::tick`] polls each active
//! stream once and pushes parsed fields into the matching variables, in the
//! order frames were extracted. Fields without a variable are ignored.

use super::stream::{DataStream, FrameOutcome};
use crate::config::{AppConfig, StreamConfig, VariableConfig};
use crate::error::{Result, SensorVisError};
use crate::types::{CollectionStats, Variable, VariableKey, VariableUpdate};
use std::collections::BTreeMap;
use std::time::Instant;

/// Build a variable for `stream` from its configuration
pub fn variable_from_config(
    stream: &str,
    config: &VariableConfig,
    default_history: usize,
) -> Variable {
    let mut variable = Variable::new(VariableKey::new(config.field.clone(), stream))
        .with_history_len(config.history_len.unwrap_or(default_history));
    if let Some(kind) = config.kind {
        variable = variable.with_kind(kind);
    }
    variable
}

/// Live streams and the variables fed by them
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: BTreeMap<String, DataStream>,
    variables: BTreeMap<VariableKey, Variable>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream, rejecting a name already in use
    pub fn add_stream(&mut self, stream: DataStream) -> Result<()> {
        if self.streams.contains_key(stream.name()) {
            return Err(SensorVisError::DuplicateStream(stream.name().to_string()));
        }
        self.streams.insert(stream.name().to_string(), stream);
        Ok(())
    }

    /// Open a configured stream and register it with its variables
    pub fn add_stream_config(
        &mut self,
        config: &StreamConfig,
        default_history: usize,
    ) -> Result<()> {
        if self.streams.contains_key(&config.name) {
            return Err(SensorVisError::DuplicateStream(config.name.clone()));
        }
        crate::config::stream::validate_stream(config)?;
        for variable in &config.variables {
            let key = VariableKey::new(variable.field.clone(), config.name.clone());
            if self.variables.contains_key(&key) {
                return Err(SensorVisError::DuplicateVariable(key.to_string()));
            }
        }

        let stream = DataStream::open(config)?;
        self.add_stream(stream)?;
        for variable in &config.variables {
            let variable = variable_from_config(&config.name, variable, default_history);
            self.register_variable(variable)?;
        }
        Ok(())
    }

    /// Remove a stream; its variables stay registered
    pub fn remove_stream(&mut self, name: &str) -> Option<DataStream> {
        self.streams.remove(name)
    }

    pub fn stream(&self, name: &str) -> Option<&DataStream> {
        self.streams.get(name)
    }

    /// Streams in name order
    pub fn streams(&self) -> impl Iterator<Item = &DataStream> {
        self.streams.values()
    }

    /// Number of registered streams
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Number of streams still polled
    pub fn active_count(&self) -> usize {
        self.streams.values().filter(|s| s.is_active()).count()
    }

    /// Register a variable, rejecting a key already in use
    pub fn register_variable(&mut self, variable: Variable) -> Result<()> {
        if self.variables.contains_key(variable.key()) {
            return Err(SensorVisError::DuplicateVariable(variable.key().to_string()));
        }
        tracing::debug!(variable = %variable.key(), "Variable registered");
        self.variables.insert(variable.key().clone(), variable);
        Ok(())
    }

    pub fn unregister_variable(&mut self, key: &VariableKey) -> Option<Variable> {
        self.variables.remove(key)
    }

    pub fn variable(&self, key: &VariableKey) -> Option<&Variable> {
        self.variables.get(key)
    }

    pub fn variable_mut(&mut self, key: &VariableKey) -> Option<&mut Variable> {
        self.variables.get_mut(key)
    }

    /// Variables ordered by key
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    /// Drop the history of every variable
    pub fn clear_history(&mut self) {
        for variable in self.variables.values_mut() {
            variable.clear();
        }
    }
}

/// Result of one dispatch tick
#[derive(Debug, Default)]
pub struct TickReport {
    /// Values accepted by variables, in delivery order
    pub updates: Vec<VariableUpdate>,
    /// Frames discarded, with the stream they came from
    pub dropped: Vec<(String, SensorVisError)>,
    /// Streams whose source failed during this tick
    pub faults: Vec<(String, SensorVisError)>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.dropped.is_empty() && self.faults.is_empty()
    }
}

/// Polls every stream and delivers parsed fields to variables
#[derive(Debug)]
pub struct Dispatcher {
    registry: StreamRegistry,
    started: Instant,
    stats: CollectionStats,
}

impl Dispatcher {
    pub fn new(registry: StreamRegistry) -> Self {
        Self {
            registry,
            started: Instant::now(),
            stats: CollectionStats::default(),
        }
    }

    /// Open every configured stream; any failure is fatal
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let mut registry = StreamRegistry::new();
        for stream in &config.streams {
            registry.add_stream_config(stream, config.collection.history_len)?;
        }
        tracing::info!(streams = registry.len(), "Dispatcher ready");
        Ok(Self::new(registry))
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut StreamRegistry {
        &mut self.registry
    }

    /// When the dispatcher started; update timestamps are relative to it
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Poll every active stream once
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let StreamRegistry { streams, variables } = &mut self.registry;
        let stats = &mut self.stats;

        for (name, stream) in streams.iter_mut() {
            if !stream.is_active() {
                continue;
            }

            let outcomes = match stream.poll(self.started) {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    stats.transport_errors += 1;
                    report.faults.push((name.clone(), e));
                    continue;
                }
            };

            for outcome in outcomes {
                let record = match outcome {
                    FrameOutcome::Record(record) => record,
                    FrameOutcome::Dropped(e) => {
                        match &e {
                            SensorVisError::Preprocessor(_) | SensorVisError::Script(_) => {
                                stats.preprocessor_failures += 1;
                                tracing::warn!(stream = %name, "Preprocessor failed: {}", e);
                            }
                            _ => {
                                stats.frames_dropped += 1;
                                tracing::debug!(stream = %name, "Frame dropped: {}", e);
                            }
                        }
                        report.dropped.push((name.clone(), e));
                        continue;
                    }
                };

                stats.records_parsed += 1;
                let timestamp = self.started.elapsed();
                for (field, value) in record {
                    let key = VariableKey::new(field, name.as_str());
                    let Some(variable) = variables.get_mut(&key) else {
                        stats.unmatched_fields += 1;
                        continue;
                    };
                    if let Some(value) = variable.push(value, timestamp) {
                        stats.updates_delivered += 1;
                        report.updates.push(VariableUpdate {
                            stream: key.stream,
                            field: key.field,
                            timestamp_secs: timestamp.as_secs_f64(),
                            value: value.clone(),
                        });
                    }
                }
            }
        }

        stats.ticks += 1;
        report
    }

    /// Snapshot of the counters, including per-stream framer statistics
    pub fn stats(&self) -> CollectionStats {
        let mut stats = self.stats.clone();
        stats.streams = self.registry.streams().map(DataStream::stats).collect();
        stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut CollectionStats {
        &mut self.stats
    }
}
