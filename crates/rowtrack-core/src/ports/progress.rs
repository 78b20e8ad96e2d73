//! Progress sink port.
//!
//! The processor reports every lifecycle event through this port, so callers
//! decide how progress is surfaced (terminal, channel, nowhere).

use tokio::sync::mpsc;

use crate::events::ProcessorEvent;

/// Port for receiving processor events.
///
/// `emit` is called from worker threads and must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProcessorEvent);

    /// Clone this sink into a boxed trait object.
    fn clone_box(&self) -> Box<dyn ProgressSink>;
}

/// Discards every event.
#[derive(Debug, Clone, Default)]
pub struct NoopProgressSink;

impl NoopProgressSink {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ProgressSink for NoopProgressSink {
    fn emit(&self, _event: ProcessorEvent) {
        // Intentionally do nothing
    }

    fn clone_box(&self) -> Box<dyn ProgressSink> {
        Box::new(self.clone())
    }
}

/// Forwards events into an unbounded tokio channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::UnboundedSender<ProcessorEvent>,
}

impl ChannelProgressSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProcessorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: ProcessorEvent) {
        let _ = self.tx.send(event);
    }

    fn clone_box(&self) -> Box<dyn ProgressSink> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TaskKind;

    #[test]
    fn test_channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelProgressSink::new();
        let boxed = sink.clone_box();
        boxed.emit(ProcessorEvent::started("a", TaskKind::Channel));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_name(), "task_started");
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelProgressSink::new();
        drop(rx);
        sink.emit(ProcessorEvent::PoolResized { from: 1, to: 2 });
    }
}
