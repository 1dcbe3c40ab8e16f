//! Backend module running the dispatch loop
//!
//! Streams are polled on a dedicated thread. The owner talks to it through
//! crossbeam channels, so frame processing never blocks the caller.
//!
//! # Architecture
//!
//! - [`BackendCommand`] - Messages sent from the owner to the backend
//! - [`BackendMessage`] - Messages sent from the backend to the owner (updates, drops, faults)
//! - [`DispatchHandle`] - Owner-side handle for sending commands and receiving messages
//! - [`DispatchBackend`] - Main backend entry point that runs the worker
//!
//! # Components
//!
//! - [`ByteSource`] - Non-blocking access to a stream's bytes
//! - [`MockSource`] - Synthetic records for testing without hardware
//! - [`Preprocessor`] - External command or Rhai script applied to frames
//! - [`DataStream`] - One source with its framer and preprocessor
//! - [`StreamRegistry`] / [`Dispatcher`] - Live streams, variables and the dispatch tick
//! - [`BackendWorker`] - Main worker loop that processes commands and ticks the dispatcher
//!
//! # Example
//!
//! ```ignore
//! use sensorvis_rs::backend::{BackendMessage, DispatchBackend};
//! use sensorvis_rs::config::AppConfig;
//!
//! let (backend, handle) = DispatchBackend::new(AppConfig::sample())?;
//! let thread = backend.spawn()?;
//!
//! for msg in handle.drain() {
//!     if let BackendMessage::Updates(updates) = msg {
//!         // Handle new values
//!     }
//! }
//!
//! handle.shutdown();
//! thread.join().ok();
//! ```

pub mod mock_source;
pub mod preprocessor;
pub mod registry;
pub mod source;
pub mod stream;
pub mod worker;

pub use mock_source::MockSource;
pub use preprocessor::{CommandPreprocessor, Preprocessor, ScriptPreprocessor};
pub use registry::{Dispatcher, StreamRegistry, TickReport};
pub use source::{spawn_reader, ByteSource, ChannelSource, ChunkSender};
pub use stream::{DataStream, FrameOutcome};
pub use worker::BackendWorker;

use crate::config::{AppConfig, CollectionConfig, StreamConfig, VariableConfig};
use crate::error::Result;
use crate::types::{CollectionStats, VariableKey, VariableUpdate};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Capacity of the command channel
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Message sent from the owner to the backend
#[derive(Debug, Clone)]
pub enum BackendCommand {
    /// Open a stream and register its variables
    AddStream(StreamConfig),
    /// Stop polling a stream and drop it
    RemoveStream(String),
    /// Register a variable on a stream
    RegisterVariable {
        stream: String,
        config: VariableConfig,
    },
    /// Remove a variable
    UnregisterVariable(VariableKey),
    /// Clear the history of every variable
    ClearHistory,
    /// Set the delay between loop iterations in milliseconds
    SetPollDelay(u64),
    /// Request current statistics
    RequestStats,
    /// Shutdown the backend
    Shutdown,
}

/// Message sent from the backend to the owner
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Values delivered during one tick
    Updates(Vec<VariableUpdate>),
    /// A frame was discarded
    FrameDropped { stream: String, reason: String },
    /// A stream's source failed; it is no longer polled
    StreamFault { stream: String, reason: String },
    /// A stream was opened in response to [`BackendCommand::AddStream`]
    StreamAdded(String),
    /// A stream was removed
    StreamRemoved(String),
    /// A command could not be applied
    CommandRejected(String),
    /// Statistics update
    Stats(CollectionStats),
    /// Backend is shutting down
    Shutdown,
}

/// Owner-side handle of a [`DispatchBackend`]
pub struct DispatchHandle {
    /// Receiver for backend messages
    pub receiver: Receiver<BackendMessage>,
    /// Sender for commands to the backend
    pub command_sender: Sender<BackendCommand>,
}

impl DispatchHandle {
    /// Try to receive a message without blocking
    pub fn try_recv(&self) -> Option<BackendMessage> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for a message
    ///
    /// Returns `None` on timeout or once the backend has gone away.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BackendMessage> {
        match self.receiver.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Receive all pending messages
    pub fn drain(&self) -> Vec<BackendMessage> {
        self.receiver.try_iter().collect()
    }

    /// Send a command to the backend
    pub fn send_command(&self, cmd: BackendCommand) -> bool {
        self.command_sender.send(cmd).is_ok()
    }

    /// Open another stream
    pub fn add_stream(&self, config: StreamConfig) {
        let _ = self.command_sender.send(BackendCommand::AddStream(config));
    }

    /// Remove a stream
    pub fn remove_stream(&self, name: impl Into<String>) {
        let _ = self
            .command_sender
            .send(BackendCommand::RemoveStream(name.into()));
    }

    /// Register a variable on a stream
    pub fn register_variable(&self, stream: impl Into<String>, config: VariableConfig) {
        let _ = self.command_sender.send(BackendCommand::RegisterVariable {
            stream: stream.into(),
            config,
        });
    }

    /// Remove a variable
    pub fn unregister_variable(&self, key: VariableKey) {
        let _ = self
            .command_sender
            .send(BackendCommand::UnregisterVariable(key));
    }

    /// Clear collected history
    pub fn clear_history(&self) {
        let _ = self.command_sender.send(BackendCommand::ClearHistory);
    }

    /// Change the delay between loop iterations
    pub fn set_poll_delay(&self, ms: u64) {
        let _ = self.command_sender.send(BackendCommand::SetPollDelay(ms));
    }

    /// Ask for a statistics message
    pub fn request_stats(&self) {
        let _ = self.command_sender.send(BackendCommand::RequestStats);
    }

    /// Request shutdown
    pub fn shutdown(&self) {
        let _ = self.command_sender.send(BackendCommand::Shutdown);
    }
}

/// The dispatch backend that runs in a separate thread
pub struct DispatchBackend {
    /// Collection settings
    collection: CollectionConfig,
    /// Streams opened from the configuration
    dispatcher: Dispatcher,
    /// Receiver for commands from the owner
    command_receiver: Receiver<BackendCommand>,
    /// Sender for messages to the owner
    message_sender: Sender<BackendMessage>,
    /// Running flag
    running: Arc<AtomicBool>,
}

impl DispatchBackend {
    /// Open every configured stream and create the communication channels
    ///
    /// Configuration errors (bad framing, duplicate names, unopenable
    /// sources) are reported here rather than from the worker thread.
    pub fn new(config: AppConfig) -> Result<(Self, DispatchHandle)> {
        let dispatcher = Dispatcher::from_config(&config)?;

        let (cmd_tx, cmd_rx) = bounded(COMMAND_CHANNEL_CAPACITY);
        // Bounded for backpressure; the worker counts what it cannot deliver
        let (msg_tx, msg_rx) = bounded(config.collection.channel_buffer_size.max(1));

        let backend = Self {
            collection: config.collection,
            dispatcher,
            command_receiver: cmd_rx,
            message_sender: msg_tx,
            running: Arc::new(AtomicBool::new(true)),
        };

        let handle = DispatchHandle {
            receiver: msg_rx,
            command_sender: cmd_tx,
        };

        Ok((backend, handle))
    }

    /// Run the backend loop on the current thread
    pub fn run(self) {
        let mut worker = BackendWorker::new(
            self.collection,
            self.dispatcher,
            self.command_receiver,
            self.message_sender,
            self.running,
        );
        worker.run();
    }

    /// Run the backend loop on a new thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        Ok(std::thread::Builder::new()
            .name("sensorvis-dispatch".into())
            .spawn(move || self.run())?)
    }

    /// Get a handle to stop the backend
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}
