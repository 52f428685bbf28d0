pub mod channel_sink;
pub mod event_publisher;
