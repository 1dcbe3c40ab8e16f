//! Mock construction helpers

use sensorvis_rs::backend::{
    BackendMessage, ChannelSource, ChunkSender, DataStream, DispatchHandle,
};
use sensorvis_rs::framing::{Framer, FramingPolicy};
use sensorvis_rs::types::VariableUpdate;
use std::time::Instant;

/// A stream fed by hand through the returned sender
pub fn channel_stream(name: &str, policy: FramingPolicy) -> (ChunkSender, DataStream) {
    let (tx, source) = ChannelSource::new(name, 64);
    let framer = Framer::new(policy).expect("valid test policy");
    (tx, DataStream::new(name, Box::new(source), framer))
}

/// Feed `chunks` one by one and collect every emitted frame
pub fn feed_chunks<'a>(
    framer: &mut Framer,
    chunks: impl IntoIterator<Item = &'a [u8]>,
) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    for chunk in chunks {
        frames.extend(framer.feed(chunk));
        frames.extend(framer.drain());
    }
    frames
}

/// Collect updates from the backend until `count` arrived or the timeout expired
pub fn collect_updates(
    handle: &DispatchHandle,
    count: usize,
    timeout: std::time::Duration,
) -> Vec<VariableUpdate> {
    let deadline = Instant::now() + timeout;
    let mut updates = Vec::new();
    while updates.len() < count && Instant::now() < deadline {
        if let Some(BackendMessage::Updates(batch)) =
            handle.recv_timeout(std::time::Duration::from_millis(20))
        {
            updates.extend(batch);
        }
    }
    updates
}

/// Wait for the first message matching `pred`
pub fn wait_for(
    handle: &DispatchHandle,
    timeout: std::time::Duration,
    pred: impl Fn(&BackendMessage) -> bool,
) -> Option<BackendMessage> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(msg) = handle.recv_timeout(std::time::Duration::from_millis(20)) {
            if pred(&msg) {
                return Some(msg);
            }
        }
    }
    None
}
