//! # SensorVis-RS: Sensor Telemetry Stream Core
//!
//! A headless core that turns continuous byte streams from sensors into named,
//! typed values. Bytes are cut into frames by a configurable framing policy,
//! frames are parsed into `{key: value, ...}` records, and record fields are
//! delivered to registered variables with bounded history.
//!
//! ## Architecture
//!
//! - **CRC**: Parameterized CRC engine with the 17 catalogued presets
//! - **Framing**: Incremental per-stream framer (delimiters, fixed length, length headers, CRC, timeout)
//! - **Parser**: Brace-group record parser with integer/float/string/binary coercion
//! - **Backend**: Stream registry and dispatch loop on a separate thread
//! - **Scripting**: Rhai-based frame preprocessors
//! - **Communication**: Crossbeam channels for thread-safe data transfer
//!
//! ## Configuration
//!
//! Stream definitions are read from `sensorvis.toml`, by default in the
//! platform-appropriate data directory under `dev.sensorvis.sensorvis-rs`:
//!
//! - **Linux**: `~/.local/share/dev.sensorvis.sensorvis-rs/`
//! - **macOS**: `~/Library/Application Support/dev.sensorvis.sensorvis-rs/`
//! - **Windows**: `%APPDATA%\dev.sensorvis.sensorvis-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use sensorvis_rs::{
//!     backend::{BackendMessage, DispatchBackend},
//!     config::AppConfig,
//! };
//!
//! fn main() -> sensorvis_rs::Result<()> {
//!     let config = AppConfig::load("sensorvis.toml")?;
//!     let (backend, handle) = DispatchBackend::new(config)?;
//!     let thread = backend.spawn()?;
//!
//!     while let Some(msg) = handle.recv_timeout(std::time::Duration::from_secs(1)) {
//!         if let BackendMessage::Updates(updates) = msg {
//!             for update in updates {
//!                 println!("{}@{} = {}", update.field, update.stream, update.value);
//!             }
//!         }
//!     }
//!
//!     handle.shutdown();
//!     thread.join().ok();
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod crc;
pub mod error;
pub mod framing;
pub mod parser;
pub mod scripting;
pub mod types;

// Re-export commonly used types
pub use backend::{DispatchBackend, DispatchHandle, Dispatcher, StreamRegistry};
pub use config::{AppConfig, StreamConfig};
pub use crc::{lookup_preset, Crc, CrcModel};
pub use error::{FrameError, Result, SensorVisError};
pub use framing::{Framer, FramingPolicy};
pub use parser::parse;
pub use scripting::{ExecutionContext, ScriptEngine};
pub use types::{ParsedRecord, Value, Variable, VariableKey};
