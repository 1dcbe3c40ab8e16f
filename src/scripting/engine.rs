//! Rhai Script Engine Implementation
//!
//! This module provides the engine that runs preprocessor scripts over frames.
//!
//! ## Dynamic Variables
//!
//! - `frame` / `bytes` - The current frame as text and as a blob
//! - `time()` - Seconds since the dispatcher started
//! - `frame_index()` - Frames produced by the stream before this one

use crate::error::{Result, SensorVisError};
use crate::parser::render;
use crate::scripting::{create_shared_cache, CompiledScript, SharedScriptCache, ENTRY_POINT};
use crate::types::{ParsedRecord, Value};
use rhai::{Blob, Dynamic, Engine, EvalAltResult, Map, Scope, FLOAT, INT};
use std::sync::{Arc, RwLock};

type FnResult<T> = std::result::Result<T, Box<EvalAltResult>>;

/// Execution context passed to scripts
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Time since the dispatcher started in seconds
    pub time_secs: f64,
    /// Frames the stream produced before this one
    pub frame_index: u64,
}

impl ExecutionContext {
    /// Create a new execution context
    pub fn new(time_secs: f64, frame_index: u64) -> Self {
        Self {
            time_secs,
            frame_index,
        }
    }
}

/// Shared script context read by the registered context functions
#[derive(Debug, Clone, Default)]
pub struct ScriptContext {
    context: ExecutionContext,
}

impl ScriptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, ctx: ExecutionContext) {
        self.context = ctx;
    }

    /// Current execution context
    pub fn current(&self) -> &ExecutionContext {
        &self.context
    }
}

/// Thread-safe shared script context
pub type SharedScriptContext = Arc<RwLock<ScriptContext>>;

/// The script engine running frame preprocessors
pub struct ScriptEngine {
    /// The Rhai engine instance
    engine: Engine,
    /// Cache of compiled scripts
    cache: SharedScriptCache,
    /// Shared context for dynamic variable access
    context: SharedScriptContext,
}

/// Copy `N` bytes starting at `offset`
fn bytes_at<const N: usize>(bytes: &[u8], offset: INT) -> FnResult<[u8; N]> {
    usize::try_from(offset)
        .ok()
        .and_then(|start| bytes.get(start..start.checked_add(N)?))
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or_else(|| {
            format!(
                "cannot read {} bytes at offset {} of a {}-byte frame",
                N,
                offset,
                bytes.len()
            )
            .into()
        })
}

/// Convert a script value into a record value
fn dynamic_to_value(value: Dynamic) -> Option<Value> {
    if let Ok(i) = value.as_int() {
        return Some(Value::Integer(i));
    }
    if let Ok(f) = value.as_float() {
        return Some(Value::Float(f));
    }
    if let Ok(b) = value.as_bool() {
        return Some(Value::Integer(b as i64));
    }
    if let Ok(c) = value.as_char() {
        return Some(Value::String(c.to_string()));
    }
    if value.is_string() {
        return value.into_string().ok().map(Value::String);
    }
    if value.is_blob() {
        return value.try_cast::<Blob>().map(Value::Bytes);
    }
    if value.is_array() {
        return value
            .try_cast::<rhai::Array>()?
            .into_iter()
            .map(dynamic_to_value)
            .collect::<Option<Vec<_>>>()
            .map(Value::Sequence);
    }
    None
}

/// Render a script map as record text
fn map_to_text(map: Map) -> std::result::Result<String, String> {
    let pairs = map
        .into_iter()
        .map(|(key, value)| {
            let type_name = value.type_name();
            dynamic_to_value(value)
                .map(|v| (key.to_string(), v))
                .ok_or_else(|| format!("field '{}' has unsupported type '{}'", key, type_name))
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;
    Ok(render(&ParsedRecord::from_pairs(pairs)))
}

impl ScriptEngine {
    /// Create a new script engine with default configuration
    pub fn new() -> Self {
        Self::with_cache(create_shared_cache())
    }

    /// Create a new script engine with a shared cache
    pub fn with_cache(cache: SharedScriptCache) -> Self {
        let context = Arc::new(RwLock::new(ScriptContext::new()));
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine, context.clone());

        Self {
            engine,
            cache,
            context,
        }
    }

    /// Configure the Rhai engine with built-in functions and safety limits
    fn configure_engine(engine: &mut Engine, context: SharedScriptContext) {
        // Set safety limits
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(100_000);
        engine.set_max_string_size(65_536);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(1_000);

        engine.register_type_with_name::<ScriptContext>("ScriptContext");

        {
            let ctx = context.clone();
            engine.register_fn("time", move || -> FLOAT {
                ctx.read().map(|c| c.context.time_secs).unwrap_or(0.0)
            });
        }
        {
            let ctx = context;
            engine.register_fn("frame_index", move || -> INT {
                ctx.read()
                    .map(|c| c.context.frame_index as INT)
                    .unwrap_or(0)
            });
        }

        // ===== Byte Helpers =====

        engine.register_fn("hex", |bytes: &mut Blob| -> String {
            bytes.iter().map(|b| format!("{:02x}", b)).collect()
        });

        engine.register_fn("read_u8", |bytes: &mut Blob, offset: INT| -> FnResult<INT> {
            Ok(bytes_at::<1>(bytes, offset)?[0] as INT)
        });
        engine.register_fn("read_u16_le", |bytes: &mut Blob, offset: INT| -> FnResult<INT> {
            Ok(u16::from_le_bytes(bytes_at(bytes, offset)?) as INT)
        });
        engine.register_fn("read_u16_be", |bytes: &mut Blob, offset: INT| -> FnResult<INT> {
            Ok(u16::from_be_bytes(bytes_at(bytes, offset)?) as INT)
        });
        engine.register_fn("read_i16_le", |bytes: &mut Blob, offset: INT| -> FnResult<INT> {
            Ok(i16::from_le_bytes(bytes_at(bytes, offset)?) as INT)
        });
        engine.register_fn("read_i16_be", |bytes: &mut Blob, offset: INT| -> FnResult<INT> {
            Ok(i16::from_be_bytes(bytes_at(bytes, offset)?) as INT)
        });
        engine.register_fn("read_u32_le", |bytes: &mut Blob, offset: INT| -> FnResult<INT> {
            Ok(u32::from_le_bytes(bytes_at(bytes, offset)?) as INT)
        });
        engine.register_fn("read_u32_be", |bytes: &mut Blob, offset: INT| -> FnResult<INT> {
            Ok(u32::from_be_bytes(bytes_at(bytes, offset)?) as INT)
        });
        engine.register_fn("read_f32_le", |bytes: &mut Blob, offset: INT| -> FnResult<FLOAT> {
            Ok(f32::from_le_bytes(bytes_at(bytes, offset)?) as FLOAT)
        });
        engine.register_fn("read_f32_be", |bytes: &mut Blob, offset: INT| -> FnResult<FLOAT> {
            Ok(f32::from_be_bytes(bytes_at(bytes, offset)?) as FLOAT)
        });

        engine.register_fn("record", |map: Map| -> FnResult<String> {
            map_to_text(map).map_err(Into::into)
        });

        // ===== Mathematical Functions =====

        engine.register_fn("abs", |x: FLOAT| x.abs());
        engine.register_fn("sqrt", |x: FLOAT| x.sqrt());
        engine.register_fn("pow", |x: FLOAT, y: FLOAT| x.powf(y));
        engine.register_fn("clamp", |x: FLOAT, min: FLOAT, max: FLOAT| x.clamp(min, max));
        engine.register_fn("pi", || std::f64::consts::PI);
        engine.register_fn(
            "map_range",
            |x: FLOAT, in_min: FLOAT, in_max: FLOAT, out_min: FLOAT, out_max: FLOAT| {
                (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
            },
        );
    }

    /// Compile a script and cache it
    pub fn compile(&self, name: &str, source: &str) -> Result<CompiledScript> {
        let mut cache = self.cache.write().map_err(|e| {
            SensorVisError::Script(format!("Failed to acquire cache lock: {}", e))
        })?;

        cache.get_or_compile(&self.engine, name, source)
    }

    /// Run a compiled script over `frame`, returning the text to parse
    pub fn transform(
        &self,
        script: &CompiledScript,
        frame: &[u8],
        ctx: ExecutionContext,
    ) -> Result<String> {
        {
            let mut context = self.context.write().map_err(|e| {
                SensorVisError::Script(format!("Failed to acquire context lock: {}", e))
            })?;
            context.update(ctx);
        }

        let text = String::from_utf8_lossy(frame).into_owned();
        let blob: Blob = frame.to_vec();

        let mut scope = Scope::new();
        scope.push("frame", text.clone());
        scope.push("bytes", blob.clone());

        let output = if script.has_entry_point() {
            self.engine
                .call_fn::<Dynamic>(&mut scope, script.ast(), ENTRY_POINT, (text, blob))
        } else {
            self.engine
                .eval_ast_with_scope::<Dynamic>(&mut scope, script.ast())
        }
        .map_err(|e| {
            SensorVisError::Script(format!("Execution error in '{}': {}", script.name(), e))
        })?;

        Self::output_to_text(output)
    }

    fn output_to_text(output: Dynamic) -> Result<String> {
        if output.is_unit() {
            return Err(SensorVisError::Script("script returned no output".into()));
        }
        if output.is_string() {
            return output
                .into_string()
                .map_err(|t| SensorVisError::Script(format!("unexpected output type '{}'", t)));
        }
        if output.is_map() {
            let type_name = output.type_name();
            let map = output.try_cast::<Map>().ok_or_else(|| {
                SensorVisError::Script(format!("unexpected output type '{}'", type_name))
            })?;
            return map_to_text(map).map_err(SensorVisError::Script);
        }
        if let Ok(i) = output.as_int() {
            return Ok(i.to_string());
        }
        if let Ok(f) = output.as_float() {
            return Ok(f.to_string());
        }
        Err(SensorVisError::Script(format!(
            "script returned unsupported type '{}'",
            output.type_name()
        )))
    }

    /// Compile and run a script in one step
    pub fn eval(&self, source: &str, frame: &[u8]) -> Result<String> {
        let script = self.compile("inline", source)?;
        self.transform(&script, frame, ExecutionContext::default())
    }

    /// Validate a script without executing it
    pub fn validate(&self, source: &str) -> Result<()> {
        self.engine
            .compile(source)
            .map(|_| ())
            .map_err(|e| SensorVisError::Script(format!("Validation error: {}", e)))
    }

    /// Clear the script cache
    pub fn clear_cache(&self) -> Result<()> {
        let mut cache = self.cache.write().map_err(|e| {
            SensorVisError::Script(format!("Failed to acquire cache lock: {}", e))
        })?;
        cache.clear();
        Ok(())
    }

    /// Get a reference to the underlying Rhai engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get a reference to the shared cache
    pub fn cache(&self) -> &SharedScriptCache {
        &self.cache
    }

    /// Get a reference to the shared context
    pub fn context(&self) -> &SharedScriptContext {
        &self.context
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("cache_size", &self.cache.read().map(|c| c.len()).ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::scripting::builtins;

    #[test]
    fn test_engine_creation() {
        let engine = ScriptEngine::new();
        assert!(engine.cache.read().unwrap().is_empty());
    }

    #[test]
    fn test_passthrough() {
        let engine = ScriptEngine::new();
        assert_eq!(
            engine.eval(builtins::PASSTHROUGH, b"{a: 1}").unwrap(),
            "{a: 1}"
        );
    }

    #[test]
    fn test_key_equals_value() {
        let engine = ScriptEngine::new();
        let out = engine
            .eval(builtins::KEY_EQUALS_VALUE, b"a=1;b=2\r\n")
            .unwrap();
        assert_eq!(out, "{a: 1, b: 2}");
    }

    #[test]
    fn test_hex_dump_renders_record() {
        let engine = ScriptEngine::new();
        let out = engine.eval(builtins::HEX_DUMP, &[0xAB, 0x01]).unwrap();
        let record = parse(&out).unwrap();
        assert_eq!(record.get("hex"), Some(&Value::String("ab01".into())));
        assert_eq!(record.get("len"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_entry_point_decodes_binary() {
        let engine = ScriptEngine::new();
        let frame = [0x10, 0x27, 0xF0, 0xD8];
        let out = engine.eval(builtins::I16_LE_PAIR, &frame).unwrap();
        let record = parse(&out).unwrap();
        assert_eq!(record.get("ch0"), Some(&Value::Float(100.0)));
        assert_eq!(record.get("ch1"), Some(&Value::Float(-100.0)));
    }

    #[test]
    fn test_read_helpers() {
        let engine = ScriptEngine::new();
        let frame = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(engine.eval("read_u8(bytes, 3)", &frame).unwrap(), "4");
        assert_eq!(engine.eval("read_u16_be(bytes, 0)", &frame).unwrap(), "258");
        assert_eq!(
            engine.eval("read_u32_le(bytes, 0)", &frame).unwrap(),
            0x0403_0201.to_string()
        );

        let float = 1.5f32.to_be_bytes();
        assert_eq!(engine.eval("read_f32_be(bytes, 0)", &float).unwrap(), "1.5");
    }

    #[test]
    fn test_read_out_of_range_is_script_error() {
        let engine = ScriptEngine::new();
        let err = engine.eval("read_u16_le(bytes, 3)", &[0, 1, 2]).unwrap_err();
        assert!(matches!(err, SensorVisError::Script(_)));
        assert!(err.is_transient());
        assert!(engine.eval("read_u8(bytes, -1)", &[0]).is_err());
    }

    #[test]
    fn test_record_helper() {
        let engine = ScriptEngine::new();
        let out = engine
            .eval("record(#{ t: 21, tag: \"ok\" }) + \"\\n\"", b"")
            .unwrap();
        assert_eq!(out, "{t: 21, tag: 'ok'}\n");
    }

    #[test]
    fn test_unit_output_is_error() {
        let engine = ScriptEngine::new();
        assert!(engine.eval("let x = 1;", b"").is_err());
    }

    #[test]
    fn test_context_functions() {
        let engine = ScriptEngine::new();
        let script = engine.compile("ctx", "time() * 2.0 + frame_index()").unwrap();
        let out = engine
            .transform(&script, b"", ExecutionContext::new(2.5, 3))
            .unwrap();
        assert_eq!(out, "8");
    }

    #[test]
    fn test_validation() {
        let engine = ScriptEngine::new();
        assert!(engine.validate("frame + \"x\"").is_ok());
        assert!(engine.validate("frame + ").is_err());
    }

    #[test]
    fn test_caching() {
        let engine = ScriptEngine::new();
        let _ = engine.compile("test", "frame").unwrap();
        let _ = engine.compile("test", "frame").unwrap();
        assert_eq!(engine.cache.read().unwrap().len(), 1);
        engine.clear_cache().unwrap();
        assert!(engine.cache.read().unwrap().is_empty());
    }
}
