//! Frame preprocessors
//!
//! A preprocessor turns a raw frame into the text handed to the record
//! parser. Failures only cost the current frame.

use crate::config::PreprocessorConfig;
use crate::error::{FrameError, Result, SensorVisError};
use crate::scripting::{CompiledScript, ExecutionContext, ScriptEngine};
use std::process::{Command, Stdio};

/// Transform applied to each frame before parsing
pub trait Preprocessor: Send {
    /// Produce the text to parse from `frame`
    fn apply(&mut self, frame: &[u8], ctx: &ExecutionContext) -> Result<String>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Build the preprocessor described by `config`
pub fn build(config: &PreprocessorConfig) -> Result<Box<dyn Preprocessor>> {
    match config {
        PreprocessorConfig::Command { program, args } => {
            if program.trim().is_empty() {
                return Err(SensorVisError::Config(
                    "preprocessor command must not be empty".into(),
                ));
            }
            Ok(Box::new(CommandPreprocessor::new(program.clone(), args.clone())))
        }
        PreprocessorConfig::Script { script } => Ok(Box::new(ScriptPreprocessor::new(script)?)),
    }
}

/// Runs `program args... <frame>` and returns its stdout
///
/// The frame is passed as a single argument (lossily decoded), never through
/// a shell. The call blocks the dispatch thread until the process exits.
#[derive(Debug, Clone)]
pub struct CommandPreprocessor {
    program: String,
    args: Vec<String>,
}

impl CommandPreprocessor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Preprocessor for CommandPreprocessor {
    fn apply(&mut self, frame: &[u8], _ctx: &ExecutionContext) -> Result<String> {
        let text = String::from_utf8_lossy(frame);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(text.as_ref())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                SensorVisError::Preprocessor(format!("failed to run '{}': {}", self.program, e))
            })?;

        if !output.stderr.is_empty() {
            return Err(SensorVisError::Preprocessor(format!(
                "'{}' wrote to stderr: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim_end()
            )));
        }
        if !output.status.success() {
            return Err(SensorVisError::Preprocessor(format!(
                "'{}' exited with {}",
                self.program, output.status
            )));
        }

        String::from_utf8(output.stdout).map_err(|_| FrameError::NonUtf8.into())
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Runs a Rhai script in-process
pub struct ScriptPreprocessor {
    engine: ScriptEngine,
    script: CompiledScript,
}

impl ScriptPreprocessor {
    /// Compile `source`, failing on syntax errors
    pub fn new(source: &str) -> Result<Self> {
        let engine = ScriptEngine::new();
        let script = engine
            .compile("preprocessor", source)
            .map_err(|e| SensorVisError::Config(format!("invalid preprocessor script: {}", e)))?;
        Ok(Self { engine, script })
    }
}

impl Preprocessor for ScriptPreprocessor {
    fn apply(&mut self, frame: &[u8], ctx: &ExecutionContext) -> Result<String> {
        self.engine.transform(&self.script, frame, ctx.clone())
    }

    fn describe(&self) -> String {
        "rhai script".to_string()
    }
}

impl std::fmt::Debug for ScriptPreprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptPreprocessor")
            .field("script", &self.script)
            .finish()
    }
}
