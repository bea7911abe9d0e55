//! Diagnostic sinks for commit failures.
//!
//! A sink is told about every commit attempt that rolled back. Recording is
//! fire-and-forget: a sink cannot fail the commit.

use std::sync::{Arc, Mutex, PoisonError};

/// Receives a message for every unexpected failure.
pub trait DiagnosticSink: Send + Sync {
    /// Record one failure.
    fn record(&self, message: &str);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn record(&self, message: &str) {
        self(message);
    }
}

/// Default sink: emits each failure as a `tracing` error event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, message: &str) {
        tracing::error!(target: "rowkeep::diagnostics", "{message}");
    }
}

/// Sink that keeps every message in memory. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages recorded so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded messages.
    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_clones_share_messages() {
        let sink = MemorySink::new();
        let observer = sink.clone();

        sink.record("first");
        sink.record("second");

        assert_eq!(observer.messages(), vec!["first", "second"]);
        assert_eq!(observer.len(), 2);
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let sink = move |_: &str| *counter.lock().unwrap() += 1;

        sink.record("boom");
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn tracing_sink_does_not_panic_without_subscriber() {
        TracingSink.record("no subscriber installed");
    }
}
