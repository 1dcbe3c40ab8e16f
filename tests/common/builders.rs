//! Test data builders for creating test objects

use sensorvis_rs::config::{
    FramingConfig, MockPattern, MockSourceConfig, SourceConfig, StreamConfig, VariableConfig,
};
use sensorvis_rs::types::ValueKind;

/// Builder for creating test stream configurations
pub struct StreamConfigBuilder {
    name: String,
    source: SourceConfig,
    framing: FramingConfig,
    variables: Vec<VariableConfig>,
}

impl StreamConfigBuilder {
    /// A mock counter stream emitting as fast as it is polled
    pub fn mock(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: SourceConfig::Mock(MockSourceConfig {
                pattern: MockPattern::Counter,
                period_ms: 0,
                ..Default::default()
            }),
            framing: FramingConfig::LineFeed,
            variables: Vec::new(),
        }
    }

    pub fn source(mut self, source: SourceConfig) -> Self {
        self.source = source;
        self
    }

    pub fn framing(mut self, framing: FramingConfig) -> Self {
        self.framing = framing;
        self
    }

    pub fn variable(mut self, field: &str) -> Self {
        self.variables.push(VariableConfig::new(field));
        self
    }

    pub fn typed_variable(mut self, field: &str, kind: ValueKind) -> Self {
        self.variables.push(VariableConfig::new(field).with_kind(kind));
        self
    }

    pub fn build(self) -> StreamConfig {
        let mut config = StreamConfig::new(self.name, self.source).with_framing(self.framing);
        config.variables = self.variables;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_builder() {
        let config = StreamConfigBuilder::mock("sim")
            .variable("variable")
            .typed_variable("level", ValueKind::Float)
            .build();

        assert_eq!(config.name, "sim");
        assert_eq!(config.variables.len(), 2);
        assert_eq!(config.variables[1].kind, Some(ValueKind::Float));
    }
}
