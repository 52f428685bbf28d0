use crate::models::error::EmitError;
use crate::models::events::EventPayload;

/// Host-side receiver of pipeline events.
///
/// Called from the session's worker thread and from the thread driving the
/// session controller, never from the device callback. Delivery is
/// fire-and-forget: return `EmitError::Busy` to have an audio frame retried,
/// any other error drops it.
pub trait EventSink: Send + Sync {
    fn emit(&self, event_name: &str, payload: &EventPayload) -> Result<(), EmitError>;
}

impl<F> EventSink for F
where
    F: Fn(&str, &EventPayload) -> Result<(), EmitError> + Send + Sync,
{
    fn emit(&self, event_name: &str, payload: &EventPayload) -> Result<(), EmitError> {
        self(event_name, payload)
    }
}
