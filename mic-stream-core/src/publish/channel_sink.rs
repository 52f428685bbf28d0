use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::models::error::EmitError;
use crate::models::events::EventPayload;
use crate::traits::event_sink::EventSink;

/// One event as received from a `ChannelSink`.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkEvent {
    pub name: String,
    pub payload: EventPayload,
}

/// `EventSink` that forwards events into a channel the host drains.
///
/// A full bounded channel reports `Busy`, so the publisher holds audio
/// frames back instead of losing them. A dropped receiver reports `Closed`.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<SinkEvent>,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<SinkEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }

    pub fn unbounded() -> (Self, Receiver<SinkEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event_name: &str, payload: &EventPayload) -> Result<(), EmitError> {
        let event = SinkEvent {
            name: event_name.to_string(),
            payload: payload.clone(),
        };
        self.tx.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => EmitError::Busy,
            TrySendError::Disconnected(_) => EmitError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::error::StreamError;
    use crate::models::events::{WarningPayload, WARNING_EVENT};

    fn warning() -> EventPayload {
        EventPayload::Warning(WarningPayload::from_error(&StreamError::PoolExhausted, None))
    }

    #[test]
    fn forwards_name_and_payload() {
        let (sink, rx) = ChannelSink::unbounded();
        sink.emit(WARNING_EVENT, &warning()).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name, WARNING_EVENT);
        assert_eq!(event.payload, warning());
    }

    #[test]
    fn full_channel_is_busy() {
        let (sink, rx) = ChannelSink::bounded(1);
        sink.emit(WARNING_EVENT, &warning()).unwrap();

        assert_eq!(sink.emit(WARNING_EVENT, &warning()), Err(EmitError::Busy));
        rx.try_recv().unwrap();
        assert!(sink.emit(WARNING_EVENT, &warning()).is_ok());
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let (sink, rx) = ChannelSink::bounded(4);
        drop(rx);
        assert_eq!(sink.emit(WARNING_EVENT, &warning()), Err(EmitError::Closed));
    }
}
