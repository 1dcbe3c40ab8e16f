//! Backend Worker Thread Implementation
//!
//! This module contains the main worker loop that runs in a separate thread
//! and drives the dispatcher. It communicates with its owner through
//! crossbeam channels.
//!
//! # Responsibilities
//!
//! - **Command processing**: Adds and removes streams and variables, changes the poll delay
//! - **Dispatch**: Runs one [`Dispatcher::tick`] per iteration and forwards the results
//! - **Statistics tracking**: Reports counters periodically and on request
//!
//! # Rate Limiting
//!
//! Each iteration is padded to the configured poll delay so the loop stays
//! responsive without spinning. The stop flag is checked once per iteration;
//! a tick in progress always completes.

use crate::backend::registry::{variable_from_config, Dispatcher, TickReport};
use crate::backend::{BackendCommand, BackendMessage};
use crate::config::CollectionConfig;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The backend worker that runs the dispatch loop
pub struct BackendWorker {
    /// Collection settings
    collection: CollectionConfig,
    /// Command receiver from the owner
    command_rx: Receiver<BackendCommand>,
    /// Message sender to the owner
    message_tx: Sender<BackendMessage>,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Streams, variables and counters
    dispatcher: Dispatcher,
    /// Delay between iterations
    poll_delay: Duration,
    /// Start of the current iteration, for rate limiting
    last_poll_time: Instant,
    /// Last time stats were sent
    last_stats_time: Instant,
}

impl BackendWorker {
    /// Create a new backend worker
    pub fn new(
        collection: CollectionConfig,
        dispatcher: Dispatcher,
        command_rx: Receiver<BackendCommand>,
        message_tx: Sender<BackendMessage>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let poll_delay = Duration::from_millis(collection.poll_delay_ms);
        Self {
            collection,
            command_rx,
            message_tx,
            running,
            dispatcher,
            poll_delay,
            last_poll_time: Instant::now(),
            last_stats_time: Instant::now(),
        }
    }

    /// Run the main worker loop
    pub fn run(&mut self) {
        tracing::info!(
            streams = self.dispatcher.registry().len(),
            poll_delay_ms = self.poll_delay.as_millis() as u64,
            "Backend worker started"
        );

        while self.running.load(Ordering::SeqCst) {
            self.process_commands();

            let report = self.dispatcher.tick();
            self.forward(report);

            if self.collection.stats_interval_ms > 0
                && self.last_stats_time.elapsed()
                    >= Duration::from_millis(self.collection.stats_interval_ms)
            {
                self.send_stats();
                self.last_stats_time = Instant::now();
            }

            self.rate_limit();
        }

        self.send_stats();
        let _ = self.message_tx.send(BackendMessage::Shutdown);
        tracing::info!("Backend worker stopped");
    }

    /// Process pending commands
    fn process_commands(&mut self) {
        loop {
            match self.command_rx.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    /// Handle a single command
    fn handle_command(&mut self, cmd: BackendCommand) {
        match cmd {
            BackendCommand::AddStream(config) => {
                let name = config.name.clone();
                match self
                    .dispatcher
                    .registry_mut()
                    .add_stream_config(&config, self.collection.history_len)
                {
                    Ok(()) => self.try_send_message(BackendMessage::StreamAdded(name)),
                    Err(e) => self.reject(e.to_string()),
                }
            }
            BackendCommand::RemoveStream(name) => {
                match self.dispatcher.registry_mut().remove_stream(&name) {
                    Some(_) => {
                        tracing::info!(stream = %name, "Stream removed");
                        self.try_send_message(BackendMessage::StreamRemoved(name));
                    }
                    None => self.reject(format!("no stream named '{}'", name)),
                }
            }
            BackendCommand::RegisterVariable { stream, config } => {
                let variable = variable_from_config(&stream, &config, self.collection.history_len);
                if let Err(e) = self.dispatcher.registry_mut().register_variable(variable) {
                    self.reject(e.to_string());
                }
            }
            BackendCommand::UnregisterVariable(key) => {
                if self
                    .dispatcher
                    .registry_mut()
                    .unregister_variable(&key)
                    .is_none()
                {
                    self.reject(format!("no variable {}", key));
                }
            }
            BackendCommand::ClearHistory => {
                self.dispatcher.registry_mut().clear_history();
            }
            BackendCommand::SetPollDelay(ms) => {
                self.poll_delay = Duration::from_millis(ms);
            }
            BackendCommand::RequestStats => {
                self.send_stats();
            }
            BackendCommand::Shutdown => {
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Forward the results of one tick
    fn forward(&mut self, report: TickReport) {
        if !report.updates.is_empty() {
            self.try_send_message(BackendMessage::Updates(report.updates));
        }
        for (stream, error) in report.dropped {
            self.try_send_message(BackendMessage::FrameDropped {
                stream,
                reason: error.to_string(),
            });
        }
        for (stream, error) in report.faults {
            self.try_send_message(BackendMessage::StreamFault {
                stream,
                reason: error.to_string(),
            });
        }
    }

    fn reject(&mut self, reason: String) {
        tracing::warn!("Command rejected: {}", reason);
        self.try_send_message(BackendMessage::CommandRejected(reason));
    }

    /// Rate limit the loop
    fn rate_limit(&mut self) {
        if self.poll_delay.is_zero() {
            std::thread::yield_now();
        } else {
            let elapsed = self.last_poll_time.elapsed();
            if elapsed < self.poll_delay {
                std::thread::sleep(self.poll_delay - elapsed);
            }
        }
        self.last_poll_time = Instant::now();
    }

    /// Send statistics (using try_send for backpressure)
    fn send_stats(&mut self) {
        let stats = self.dispatcher.stats();
        self.try_send_message(BackendMessage::Stats(stats));
    }

    /// Try to send a message, tracking dropped messages if queue is full
    ///
    /// Uses try_send() to avoid blocking. If the queue is full, the message
    /// is dropped and the dropped_messages counter is incremented.
    fn try_send_message(&mut self, msg: BackendMessage) {
        if self.message_tx.try_send(msg).is_err() {
            self.dispatcher.stats_mut().dropped_messages += 1;
        }
    }
}
