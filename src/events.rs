//! Per-image call history.
//!
//! Every dispatched call that produces an image is recorded on that image as
//! a [`CallEvent`]; a derived image first inherits the history of its source.
//! A failed call is recorded on its source image instead. The result reads
//! like a replay script:
//!
//! ```text
//! pngload_buffer(buffer=<blob 1234 bytes>)
//! embed(in=<image 64x48 rgb8>, x=10, y=10, width=100, height=100)
//! ```

use crate::options::OptionSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Immutable record of one dispatched call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    operation: String,
    arguments: Vec<String>,
    failure: Option<String>,
}

impl CallEvent {
    /// Snapshot the input arguments of `options`, in set order.
    pub fn new(operation: &str, options: &OptionSet<'_>) -> Self {
        Self::from_rendered(operation, options.render_inputs())
    }

    pub(crate) fn from_rendered(operation: &str, arguments: Vec<String>) -> Self {
        Self {
            operation: operation.to_string(),
            arguments,
            failure: None,
        }
    }

    pub(crate) fn failed(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Rendered `name=value` input arguments.
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Diagnostic text if the call failed.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.arguments.join(", "))
    }
}

/// Append-only list of call events. Entries are shared, never edited.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<Arc<CallEvent>>>,
}

impl EventLog {
    pub fn push(&self, event: Arc<CallEvent>) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn extend(&self, events: &[Arc<CallEvent>]) {
        if events.is_empty() {
            return;
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(events.iter().cloned());
    }

    /// The full history, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<CallEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionValue;
    use crate::value::Slot;

    #[test]
    fn renders_inputs_in_set_order() {
        let out: Slot<f64> = Slot::new();
        let options = OptionSet::new([
            OptionValue::input_int("x", 10),
            OptionValue::output_double("out", &out),
            OptionValue::input_string("kernel", "linear"),
        ]);
        let event = CallEvent::new("resize", &options);
        assert_eq!(event.to_string(), "resize(x=10, kernel=\"linear\")");
        assert_eq!(event.failure(), None);
    }

    #[test]
    fn empty_argument_list() {
        let event = CallEvent::new("noop", &OptionSet::default());
        assert_eq!(event.to_string(), "noop()");
    }

    #[test]
    fn log_appends_in_order() {
        let log = EventLog::default();
        let first = Arc::new(CallEvent::from_rendered("a", vec![]));
        let second = Arc::new(CallEvent::from_rendered("b", vec![]));
        log.push(Arc::clone(&first));
        log.extend(&[Arc::clone(&second), Arc::clone(&first)]);

        let names: Vec<String> = log
            .snapshot()
            .iter()
            .map(|e| e.operation().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "a"]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn failed_event_keeps_message() {
        let event = CallEvent::from_rendered("jpegload", vec![]).failed("not a JPEG");
        assert_eq!(event.failure(), Some("not a JPEG"));
    }
}
