//! Streams a synthetic 440 Hz tone through a session and prints each event.
//!
//! ```text
//! RUST_LOG=debug cargo run -p mic-stream-core --example synthetic_stream
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mic_stream_core::{ChannelSink, StreamSession, SyntheticInputDevice};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let (device, control) = SyntheticInputDevice::new();
    let (sink, events) = ChannelSink::bounded(64);
    let mut session = StreamSession::new(device, Arc::new(sink));

    session.start_with(&json!({
        "sampleRate": 16000,
        "bitsPerSample": 16,
        "channels": 1,
        "bufferSize": 1600,
        "bufferCount": 3
    }))?;

    for _ in 0..10 {
        while control.enqueued() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        control.fill_next()?;
        for event in events.try_iter() {
            println!("{} {}", event.name, serde_json::to_string(&event.payload)?);
        }
    }

    session.stop()?;
    for event in events.try_iter() {
        println!("{} {}", event.name, serde_json::to_string(&event.payload)?);
    }
    if let Some(summary) = session.last_summary() {
        println!("{}", serde_json::to_string_pretty(summary)?);
    }
    Ok(())
}
