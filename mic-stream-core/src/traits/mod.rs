pub mod event_sink;
pub mod input_device;
