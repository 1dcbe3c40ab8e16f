//! Rhai Scripting Engine for Frame Preprocessors
//!
//! A stream may run each frame through a Rhai script before the record parser
//! sees it. The script receives the raw frame and returns the text to parse,
//! which lets binary or oddly formatted payloads be turned into brace-group
//! records without an external process.
//!
//! ## Scope
//!
//! - `frame` - The frame decoded as UTF-8 (invalid sequences replaced)
//! - `bytes` - The frame as a blob
//!
//! A script may instead define `fn preprocess(frame, bytes)`, which is then
//! called with the same two values.
//!
//! ## Context Functions
//!
//! - `time()` - Seconds since the dispatcher started
//! - `frame_index()` - Number of frames this stream produced before this one
//!
//! ## Byte Helpers
//!
//! - `hex(bytes)` - Lowercase hex string
//! - `read_u8(bytes, offset)`
//! - `read_u16_le(bytes, offset)` / `read_u16_be(bytes, offset)`
//! - `read_i16_le(bytes, offset)` / `read_i16_be(bytes, offset)`
//! - `read_u32_le(bytes, offset)` / `read_u32_be(bytes, offset)`
//! - `read_f32_le(bytes, offset)` / `read_f32_be(bytes, offset)`
//! - `record(map)` - Render a map as a `{key: value, ...}` record
//!
//! ## Return Value
//!
//! A string is parsed as is. A map is rendered as a record. Numbers are
//! converted to text. Returning nothing drops the frame.
//!
//! ## Example Scripts
//!
//! Decoding a little-endian sensor packet:
//! ```rhai
//! #{ temp: read_i16_le(bytes, 4) / 100.0, humidity: read_u8(bytes, 6) }
//! ```
//!
//! Rewriting `key=value` lines:
//! ```rhai
//! let body = frame;
//! body.trim();
//! body.replace("=", ": ");
//! "{" + body + "}"
//! ```

mod engine;

pub use engine::{ExecutionContext, ScriptContext, ScriptEngine, SharedScriptContext};

use crate::error::{Result, SensorVisError};
use rhai::{Engine, AST};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Name of the optional entry point of a preprocessor script
pub const ENTRY_POINT: &str = "preprocess";

/// A compiled preprocessor script
#[derive(Clone)]
pub struct CompiledScript {
    /// The compiled AST
    ast: AST,
    /// The original source code
    source: String,
    /// Name/identifier for this script
    name: String,
    /// Whether the script defines `preprocess(frame, bytes)`
    has_entry_point: bool,
}

impl CompiledScript {
    /// Get the source code of this script
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Get the name of this script
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn ast(&self) -> &AST {
        &self.ast
    }

    pub(crate) fn has_entry_point(&self) -> bool {
        self.has_entry_point
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("has_entry_point", &self.has_entry_point)
            .finish()
    }
}

/// Cache for compiled scripts to avoid recompilation
#[derive(Default)]
pub struct ScriptCache {
    /// Map from script source to compiled script
    cache: HashMap<String, CompiledScript>,
}

impl ScriptCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Get a cached script or compile and cache it
    pub fn get_or_compile(
        &mut self,
        engine: &Engine,
        name: &str,
        source: &str,
    ) -> Result<CompiledScript> {
        if let Some(script) = self.cache.get(source) {
            return Ok(script.clone());
        }

        let ast = engine
            .compile(source)
            .map_err(|e| SensorVisError::Script(format!("Compilation error: {}", e)))?;
        let has_entry_point = ast
            .iter_functions()
            .any(|f| f.name == ENTRY_POINT && f.params.len() == 2);

        let script = CompiledScript {
            ast,
            source: source.to_string(),
            name: name.to_string(),
            has_entry_point,
        };

        self.cache.insert(source.to_string(), script.clone());
        Ok(script)
    }

    /// Number of cached scripts
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Clear the cache
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Thread-safe script cache wrapper
pub type SharedScriptCache = Arc<RwLock<ScriptCache>>;

/// Create a new shared script cache
pub fn create_shared_cache() -> SharedScriptCache {
    Arc::new(RwLock::new(ScriptCache::new()))
}

/// Built-in preprocessor scripts for common payloads
pub mod builtins {
    /// Pass the frame through unchanged
    pub const PASSTHROUGH: &str = "frame";

    /// Wrap `key=value;key=value` lines into a record
    pub const KEY_EQUALS_VALUE: &str = r#"
let body = frame;
body.trim();
body.replace("=", ": ");
body.replace(";", ", ");
"{" + body + "}"
"#;

    /// Expose the whole frame as a hex string
    pub const HEX_DUMP: &str = r#"
#{ hex: hex(bytes), len: bytes.len() }
"#;

    /// Two little-endian signed 16-bit channels scaled by 1/100
    pub const I16_LE_PAIR: &str = r#"
fn preprocess(frame, bytes) {
    #{
        ch0: read_i16_le(bytes, 0) / 100.0,
        ch1: read_i16_le(bytes, 2) / 100.0,
    }
}
"#;

    /// List of all built-in scripts with names
    pub fn all() -> Vec<(&'static str, &'static str)> {
        vec![
            ("Passthrough", PASSTHROUGH),
            ("key=value", KEY_EQUALS_VALUE),
            ("Hex dump", HEX_DUMP),
            ("Two i16 LE channels", I16_LE_PAIR),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_cache() {
        let engine = Engine::new();
        let mut cache = ScriptCache::new();

        let script = "frame + \"!\"";
        let first = cache.get_or_compile(&engine, "test", script).unwrap();
        let second = cache.get_or_compile(&engine, "test", script).unwrap();

        assert_eq!(first.source(), second.source());
        assert_eq!(cache.len(), 1);
        assert!(!first.has_entry_point());
    }

    #[test]
    fn test_entry_point_detected() {
        let engine = Engine::new();
        let mut cache = ScriptCache::new();
        let script = cache
            .get_or_compile(&engine, "entry", builtins::I16_LE_PAIR)
            .unwrap();
        assert!(script.has_entry_point());
    }

    #[test]
    fn test_compile_error() {
        let engine = Engine::new();
        let mut cache = ScriptCache::new();
        assert!(matches!(
            cache.get_or_compile(&engine, "bad", "frame +"),
            Err(SensorVisError::Script(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_builtin_scripts_validate() {
        let engine = ScriptEngine::new();
        for (name, source) in builtins::all() {
            let result = engine.validate(source);
            assert!(
                result.is_ok(),
                "Built-in '{}' failed to compile: {:?}",
                name,
                result.err()
            );
        }
    }
}
