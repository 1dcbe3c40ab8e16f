//! Per-stream configuration
//!
//! A stream names its byte source, the framing policy that carves frames out
//! of it, an optional preprocessor and the record fields it exposes as
//! variables.
//!
//! # Example
//!
//! ```toml
//! [[streams]]
//! name = "boiler"
//! source = { kind = "mock", pattern = "sine", fields = ["temp"] }
//! framing = { kind = "header_crc", header = { start_sequence = [0xAA, 0xBB], header_size = 4, length_field_offset = 2, length_field_size = 2 }, crc = { model = "CRC16-MODBUS" } }
//! variables = [{ field = "temp", kind = "float" }]
//! ```

use crate::crc::{lookup_preset, CrcModel};
use crate::error::{Result, SensorVisError};
use crate::framing::{
    CrcTrailer, Endianness, FramingPolicy, HeaderLayout, LinkSettings, TimeoutSetting,
};
use crate::types::ValueKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default read size of file sources
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Default emission period of mock sources in milliseconds
pub const DEFAULT_MOCK_PERIOD_MS: u64 = 100;

/// One stream: a byte source plus how to frame and parse it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Unique stream name, used in variable keys
    pub name: String,

    /// Where the bytes come from
    pub source: SourceConfig,

    /// Character framing of the link (drives the automatic timeout)
    #[serde(default)]
    pub link: LinkSettings,

    /// End-of-transmission policy
    #[serde(default)]
    pub framing: FramingConfig,

    /// Optional transform applied to each frame before parsing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprocessor: Option<PreprocessorConfig>,

    /// Fields to register as variables
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
}

impl StreamConfig {
    /// Stream with line-feed framing and no variables
    pub fn new(name: impl Into<String>, source: SourceConfig) -> Self {
        Self {
            name: name.into(),
            source,
            link: LinkSettings::default(),
            framing: FramingConfig::default(),
            preprocessor: None,
            variables: Vec::new(),
        }
    }

    pub fn with_framing(mut self, framing: FramingConfig) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_variable(mut self, variable: VariableConfig) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: PreprocessorConfig) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }
}

/// Byte source of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Standard input of the process
    Stdin,
    /// A file (or FIFO / character device) read in chunks
    File {
        path: PathBuf,
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
    },
    /// Synthetic records for demos and tests
    Mock(MockSourceConfig),
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Waveform of a mock source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MockPattern {
    /// Always `amplitude`
    Constant,
    /// 0, 1, 2, ...
    #[default]
    Counter,
    /// `amplitude * sin(2π f t)`
    Sine,
}

/// Settings of a mock source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockSourceConfig {
    #[serde(default)]
    pub pattern: MockPattern,

    /// Milliseconds between records
    #[serde(default = "default_mock_period_ms")]
    pub period_ms: u64,

    /// Numeric fields written into every record
    #[serde(default = "default_mock_fields")]
    pub fields: Vec<String>,

    #[serde(default = "default_amplitude")]
    pub amplitude: f64,

    #[serde(default = "default_frequency_hz")]
    pub frequency_hz: f64,
}

fn default_mock_period_ms() -> u64 {
    DEFAULT_MOCK_PERIOD_MS
}

fn default_mock_fields() -> Vec<String> {
    vec!["variable".to_string()]
}

fn default_amplitude() -> f64 {
    1.0
}

fn default_frequency_hz() -> f64 {
    1.0
}

impl Default for MockSourceConfig {
    fn default() -> Self {
        Self {
            pattern: MockPattern::default(),
            period_ms: DEFAULT_MOCK_PERIOD_MS,
            fields: default_mock_fields(),
            amplitude: 1.0,
            frequency_hz: 1.0,
        }
    }
}

/// A CRC given by preset name or by explicit parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CrcSpec {
    /// Name from the preset catalogue, e.g. `CRC16-MODBUS`
    Preset(String),
    /// Explicit model
    Model(CrcModel),
}

impl Default for CrcSpec {
    fn default() -> Self {
        CrcSpec::Model(CrcModel::default())
    }
}

impl CrcSpec {
    /// Resolve to a model, looking presets up by name
    pub fn resolve(&self) -> Result<CrcModel> {
        match self {
            CrcSpec::Preset(name) => lookup_preset(name),
            CrcSpec::Model(model) => {
                model.validate()?;
                Ok(*model)
            }
        }
    }
}

/// CRC trailer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrcConfig {
    #[serde(default)]
    pub model: CrcSpec,
    /// Whether the length (message length or header field) counts the CRC bytes
    #[serde(default = "default_true")]
    pub crc_included_in_length: bool,
    #[serde(default)]
    pub endianness: Endianness,
}

impl Default for CrcConfig {
    fn default() -> Self {
        Self {
            model: CrcSpec::default(),
            crc_included_in_length: true,
            endianness: Endianness::default(),
        }
    }
}

impl CrcConfig {
    fn to_trailer(&self) -> Result<CrcTrailer> {
        Ok(CrcTrailer {
            model: self.model.resolve()?,
            crc_included_in_length: self.crc_included_in_length,
            endianness: self.endianness,
        })
    }
}

/// Length-carrying header settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderConfig {
    #[serde(default)]
    pub start_sequence: Vec<u8>,
    pub header_size: usize,
    pub length_field_offset: usize,
    pub length_field_size: usize,
    #[serde(default = "default_true")]
    pub header_included_in_length: bool,
    #[serde(default)]
    pub endianness: Endianness,
}

fn default_true() -> bool {
    true
}

impl HeaderConfig {
    fn to_layout(&self) -> HeaderLayout {
        HeaderLayout {
            start_sequence: self.start_sequence.clone(),
            header_size: self.header_size,
            length_field_offset: self.length_field_offset,
            length_field_size: self.length_field_size,
            header_included_in_length: self.header_included_in_length,
            endianness: self.endianness,
        }
    }
}

/// Serialized form of a [`FramingPolicy`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FramingConfig {
    None,
    Carriage,
    #[default]
    LineFeed,
    CarriageLineFeed,
    FixedLength {
        len: usize,
    },
    Header {
        header: HeaderConfig,
    },
    Crc {
        #[serde(default)]
        crc: CrcConfig,
        message_len: usize,
    },
    HeaderCrc {
        header: HeaderConfig,
        #[serde(default)]
        crc: CrcConfig,
    },
    Timeout {
        /// Seconds of silence ending a frame; negative derives it from the link
        #[serde(default = "default_timeout_secs")]
        timeout_secs: f64,
    },
}

fn default_timeout_secs() -> f64 {
    -1.0
}

impl FramingConfig {
    /// Build and validate the runtime policy
    pub fn into_policy(&self) -> Result<FramingPolicy> {
        let policy = match self {
            FramingConfig::None => FramingPolicy::None,
            FramingConfig::Carriage => FramingPolicy::Carriage,
            FramingConfig::LineFeed => FramingPolicy::LineFeed,
            FramingConfig::CarriageLineFeed => FramingPolicy::CarriageLineFeed,
            FramingConfig::FixedLength { len } => FramingPolicy::FixedLength { len: *len },
            FramingConfig::Header { header } => FramingPolicy::Header(header.to_layout()),
            FramingConfig::Crc { crc, message_len } => FramingPolicy::Crc {
                trailer: crc.to_trailer()?,
                message_len: *message_len,
            },
            FramingConfig::HeaderCrc { header, crc } => FramingPolicy::HeaderCrc {
                header: header.to_layout(),
                trailer: crc.to_trailer()?,
            },
            FramingConfig::Timeout { timeout_secs } => FramingPolicy::Timeout {
                timeout: TimeoutSetting::from_secs_f64(*timeout_secs)?,
            },
        };
        policy.validate()?;
        Ok(policy)
    }
}

/// External transform applied to each frame before parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreprocessorConfig {
    /// Run `program args... <frame>` and parse its stdout
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Evaluate a Rhai script with `frame` and `bytes` in scope
    Script { script: String },
}

/// A record field exposed as a variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableConfig {
    /// Field name inside the record
    pub field: String,

    /// Kind values are coerced to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ValueKind>,

    /// History length overriding the collection default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_len: Option<usize>,
}

impl VariableConfig {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: None,
            history_len: None,
        }
    }

    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Check that a stream's settings are usable
pub(crate) fn validate_stream(stream: &StreamConfig) -> Result<()> {
    if stream.name.is_empty() {
        return Err(SensorVisError::Config("stream name must not be empty".into()));
    }
    let policy = stream
        .framing
        .into_policy()
        .map_err(|e| e.with_context(format!("stream '{}'", stream.name)))?;
    if matches!(
        policy,
        FramingPolicy::Timeout {
            timeout: TimeoutSetting::Auto
        }
    ) {
        stream.link.validate()?;
    }
    if let SourceConfig::File { chunk_size: 0, .. } = stream.source {
        return Err(SensorVisError::Config(format!(
            "stream '{}': chunk size must be positive",
            stream.name
        )));
    }

    let mut fields: Vec<&str> = Vec::with_capacity(stream.variables.len());
    for variable in &stream.variables {
        if fields.contains(&variable.field.as_str()) {
            return Err(SensorVisError::DuplicateVariable(format!(
                "{}@{}",
                variable.field, stream.name
            )));
        }
        fields.push(&variable.field);
    }
    Ok(())
}
