//! End-to-end streaming scenarios
//!
//! Drives `StreamSession` with the synthetic input device and checks what a
//! host sink observes: frame order, payload shape, warnings, and lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde_json::{json, Value};

use mic_stream_core::{
    AudioDataPayload, CaptureEngine, ChannelSink, EmitError, EncodedData, EventPayload,
    FillNotification, FrameEncoder, FrameEncoding, SessionSlot, SessionState, SinkEvent,
    SlotState, StreamConfiguration, StreamError, StreamSession, SyntheticControl,
    SyntheticInputDevice, AUDIO_DATA_EVENT, ERROR_EVENT,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn session_with_sink(
    sink: Arc<dyn mic_stream_core::EventSink>,
) -> (StreamSession<SyntheticInputDevice>, SyntheticControl) {
    init_logging();
    let (device, control) = SyntheticInputDevice::new();
    let session = StreamSession::with_session_slot(device, sink, SessionSlot::new());
    (session, control)
}

fn session() -> (
    StreamSession<SyntheticInputDevice>,
    SyntheticControl,
    Receiver<SinkEvent>,
) {
    let (sink, events) = ChannelSink::unbounded();
    let (session, control) = session_with_sink(Arc::new(sink));
    (session, control, events)
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Fill the next buffer once the worker has handed one back to the device.
fn fill(control: &SyntheticControl) {
    wait_until("an enqueued buffer", || control.enqueued() > 0);
    control.fill_next().unwrap();
}

fn fill_with(control: &SyntheticControl, bytes: &[u8]) {
    wait_until("an enqueued buffer", || control.enqueued() > 0);
    control.fill_next_with(bytes).unwrap();
}

fn audio(events: &[SinkEvent]) -> Vec<AudioDataPayload> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::AudioData(data) => {
                assert_eq!(e.name, AUDIO_DATA_EVENT);
                Some(data.clone())
            }
            _ => None,
        })
        .collect()
}

fn warnings(events: &[SinkEvent]) -> Vec<(&'static str, Option<u64>)> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Warning(w) => Some((w.code, w.sequence)),
            _ => None,
        })
        .collect()
}

fn pcm_ramp(frames: usize) -> Vec<u8> {
    (0..frames as i16)
        .flat_map(|i| (i * 7 - 300).to_le_bytes())
        .collect()
}

#[test]
fn five_fills_at_16khz_publish_sequences_0_to_4() {
    let (mut session, control, events) = session();
    let options = json!({
        "sampleRate": 16000,
        "bitsPerSample": 16,
        "channels": 1,
        "bufferSize": 4096,
        "bufferCount": 3
    });

    assert_eq!(session.start_with(&options).unwrap(), SessionState::Running);
    for _ in 0..5 {
        fill(&control);
    }
    assert_eq!(session.stop().unwrap(), SessionState::Idle);

    let received: Vec<SinkEvent> = events.try_iter().collect();
    let frames = audio(&received);
    assert_eq!(
        frames.iter().map(|f| f.sequence).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4]
    );
    for frame in &frames {
        assert_eq!(frame.sample_rate, 16000);
        assert_eq!(frame.bits_per_sample, 16);
        assert_eq!(frame.channels, 1);
        assert_eq!(frame.encoding, FrameEncoding::Base64);
    }
    // 4096 frames at 16 kHz is 256 ms per buffer.
    assert_eq!(frames[4].timestamp_ms, 1024);

    // A sixth notification arriving after stop is dropped silently.
    let stale = control.last_filled().unwrap();
    control.notify(FillNotification {
        buffer_id: stale,
        filled_len: 8192,
        timestamp: Duration::from_millis(1280),
    });
    thread::sleep(Duration::from_millis(20));
    assert!(events.try_recv().is_err());
    assert_eq!(session.state(), SessionState::Idle);

    let summary = session.last_summary().unwrap();
    assert_eq!(summary.frames_published, 5);
    assert!((summary.duration_secs - 1.28).abs() < 1e-9);
    assert_eq!(summary.diagnostics.stale_notifications, 0);
}

#[test]
fn many_fills_arrive_in_fill_order_and_decode_bit_exact() {
    let (mut session, control, events) = session();
    session
        .start_with(&json!({
            "sampleRate": 16000,
            "bitsPerSample": 16,
            "channels": 1,
            "bufferSize": 64,
            "bufferCount": 2
        }))
        .unwrap();

    let pcm = pcm_ramp(64);
    for _ in 0..40 {
        fill_with(&control, &pcm);
    }
    session.stop().unwrap();

    let received: Vec<SinkEvent> = events.try_iter().collect();
    let frames = audio(&received);
    assert_eq!(frames.len(), 40);
    assert!(frames.windows(2).all(|w| w[0].sequence < w[1].sequence));
    for frame in &frames {
        let decoded = FrameEncoder::decode(&frame.encoded_data, frame.encoding).unwrap();
        assert_eq!(decoded, pcm);
    }
    assert!(warnings(&received).is_empty());
    assert_eq!(session.diagnostics().underruns, 0);
}

#[test]
fn start_while_running_is_rejected_and_state_unchanged() {
    let (mut session, _control, _events) = session();
    let options = json!({ "sampleRate": 16000, "bitsPerSample": 16, "channels": 1 });
    session.start_with(&options).unwrap();
    let id = session.session_id();

    assert_eq!(session.start(), Err(StreamError::SessionAlreadyActive));
    assert_eq!(session.start_with(&options), Err(StreamError::SessionAlreadyActive));
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.session_id(), id);
}

#[test]
fn second_controller_cannot_claim_the_same_slot() {
    init_logging();
    let slot = SessionSlot::new();
    let options = json!({ "sampleRate": 16000, "bitsPerSample": 16, "channels": 1 });

    let (first_device, _first) = SyntheticInputDevice::new();
    let (first_sink, _first_events) = ChannelSink::unbounded();
    let mut first = StreamSession::with_session_slot(first_device, Arc::new(first_sink), slot.clone());

    let (second_device, second_control) = SyntheticInputDevice::new();
    let (second_sink, _second_events) = ChannelSink::unbounded();
    let mut second = StreamSession::with_session_slot(second_device, Arc::new(second_sink), slot.clone());

    first.start_with(&options).unwrap();
    assert_eq!(second.start_with(&options), Err(StreamError::SessionAlreadyActive));
    assert_eq!(second.state(), SessionState::Idle);
    assert_eq!(second_control.open_count(), 0);

    first.stop().unwrap();
    assert!(!slot.is_claimed());
    assert_eq!(second.start().unwrap(), SessionState::Running);
}

#[test]
fn pool_of_k_underruns_on_fill_k_plus_one() {
    init_logging();
    let config = StreamConfiguration {
        sample_rate: 16000,
        buffer_size: 256,
        buffer_count: 3,
        ..Default::default()
    };
    // No worker: filled buffers are never released.
    let engine = CaptureEngine::new(&config);
    let (mut device, control) = SyntheticInputDevice::new();
    engine.start(&mut device).unwrap();

    for _ in 0..3 {
        control.fill_next().unwrap();
    }
    let err = control.fill_next().unwrap_err();

    assert_eq!(err, StreamError::BufferUnderrun { dropped_bytes: 512 });
    assert_eq!(engine.pool().count(SlotState::Encoding), 3);
    assert_eq!(engine.pool().count(SlotState::Free), 0);
}

#[test]
fn malformed_fill_is_dropped_with_warning_and_capture_continues() {
    let (mut session, control, events) = session();
    session
        .start_with(&json!({
            "sampleRate": 16000,
            "bitsPerSample": 16,
            "channels": 2,
            "bufferSize": 128
        }))
        .unwrap();

    // Seven bytes cannot hold whole 16-bit stereo frames.
    fill_with(&control, &[1, 2, 3, 4, 5, 6, 7]);
    fill(&control);
    fill(&control);
    session.stop().unwrap();

    let received: Vec<SinkEvent> = events.try_iter().collect();
    assert_eq!(warnings(&received), vec![("encode_error", Some(0))]);
    assert_eq!(
        audio(&received).iter().map(|f| f.sequence).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.diagnostics().encode_failures, 1);
}

/// Accepts everything except audio while `busy` is set.
#[derive(Default)]
struct SaturatedSink {
    busy: AtomicBool,
    events: Mutex<Vec<(String, EventPayload)>>,
}

impl mic_stream_core::EventSink for SaturatedSink {
    fn emit(&self, event_name: &str, payload: &EventPayload) -> Result<(), EmitError> {
        if matches!(payload, EventPayload::AudioData(_)) && self.busy.load(Ordering::SeqCst) {
            return Err(EmitError::Busy);
        }
        self.events.lock().push((event_name.to_string(), payload.clone()));
        Ok(())
    }
}

#[test]
fn saturated_sink_drops_oldest_frames_beyond_queue_depth() {
    let sink = Arc::new(SaturatedSink::default());
    sink.busy.store(true, Ordering::SeqCst);
    let (mut session, control) = session_with_sink(sink.clone());
    session
        .start_with(&json!({
            "sampleRate": 16000,
            "bitsPerSample": 16,
            "channels": 1,
            "bufferSize": 64,
            "publishQueueDepth": 2
        }))
        .unwrap();

    for _ in 0..5 {
        fill(&control);
    }
    wait_until("three dropped frames", || {
        session.diagnostics().frames_dropped_backpressure == 3
    });
    sink.busy.store(false, Ordering::SeqCst);
    session.stop().unwrap();

    let events = sink.events.lock();
    let dropped: Vec<Option<u64>> = events
        .iter()
        .filter_map(|(_, payload)| match payload {
            EventPayload::Warning(w) if w.code == "publish_backpressure" => Some(w.sequence),
            _ => None,
        })
        .collect();
    assert_eq!(dropped, vec![Some(0), Some(1), Some(2)]);

    let delivered: Vec<u64> = events
        .iter()
        .filter_map(|(_, payload)| match payload {
            EventPayload::AudioData(data) => Some(data.sequence),
            _ => None,
        })
        .collect();
    assert_eq!(delivered, vec![3, 4]);
}

#[test]
fn device_fault_requires_reset_before_restart() {
    let (mut session, control, events) = session();
    let options = json!({ "sampleRate": 16000, "bitsPerSample": 16, "channels": 1, "bufferSize": 64 });
    session.start_with(&options).unwrap();
    fill(&control);

    control.fault("device unplugged");
    wait_until("error state", || session.state().is_error());

    let error = StreamError::DeviceError("device unplugged".into());
    assert_eq!(session.state(), SessionState::Error(error.clone()));
    assert!(matches!(session.start(), Err(StreamError::InvalidState(_))));
    assert_eq!(session.stop().unwrap(), SessionState::Error(error));

    let received: Vec<SinkEvent> = events.try_iter().collect();
    let fatal: Vec<&SinkEvent> = received.iter().filter(|e| e.name == ERROR_EVENT).collect();
    assert_eq!(fatal.len(), 1);
    assert_eq!(
        serde_json::to_value(&fatal[0].payload).unwrap()["code"],
        json!("device_error")
    );

    assert_eq!(session.reset().unwrap(), SessionState::Idle);
    assert!(!control.is_started());
    assert_eq!(session.start().unwrap(), SessionState::Running);
    assert_eq!(control.open_count(), 2);
    fill(&control);
    session.stop().unwrap();
    assert_eq!(session.last_summary().unwrap().frames_published, 1);
}

#[test]
fn paused_fills_publish_nothing_and_sequences_stay_contiguous() {
    let (mut session, control, events) = session();
    session
        .start_with(&json!({ "sampleRate": 16000, "bitsPerSample": 16, "channels": 1, "bufferSize": 64 }))
        .unwrap();

    fill(&control);
    session.pause().unwrap();
    fill(&control);
    fill(&control);
    session.resume().unwrap();
    fill(&control);
    session.stop().unwrap();

    let received: Vec<SinkEvent> = events.try_iter().collect();
    assert_eq!(
        audio(&received).iter().map(|f| f.sequence).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert_eq!(session.diagnostics().paused_fills, 2);
}

#[test]
fn stale_notification_from_previous_session_is_ignored() {
    let (mut session, control, events) = session();
    let options = json!({ "sampleRate": 16000, "bitsPerSample": 16, "channels": 1, "bufferSize": 64 });

    session.start_with(&options).unwrap();
    fill(&control);
    let old = control.last_filled().unwrap();
    session.stop().unwrap();

    session.start().unwrap();
    let _ = events.try_iter().count();
    control.notify(FillNotification {
        buffer_id: old,
        filled_len: 128,
        timestamp: Duration::ZERO,
    });
    fill(&control);
    session.stop().unwrap();

    let received: Vec<SinkEvent> = events.try_iter().collect();
    assert_eq!(
        audio(&received).iter().map(|f| f.sequence).collect::<Vec<_>>(),
        vec![0]
    );
    assert_eq!(session.diagnostics().stale_notifications, 1);
}

#[test]
fn wav_frames_are_self_contained_files() {
    let (mut session, control, events) = session();
    session
        .start_with(&json!({
            "sampleRate": 22050,
            "bitsPerChannel": 16,
            "channelsPerFrame": 1,
            "bufferSize": 32,
            "encoding": "wav"
        }))
        .unwrap();

    let pcm = pcm_ramp(32);
    fill_with(&control, &pcm);
    session.stop().unwrap();

    let received: Vec<SinkEvent> = events.try_iter().collect();
    let frames = audio(&received);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].encoding, FrameEncoding::Wav);
    assert!(matches!(frames[0].encoded_data, EncodedData::Text(_)));
    assert_eq!(
        FrameEncoder::decode(&frames[0].encoded_data, FrameEncoding::Wav).unwrap(),
        pcm
    );
}

#[test]
fn flac_frames_decode_to_the_captured_pcm() {
    let (mut session, control, events) = session();
    session
        .start_with(&json!({
            "sampleRate": 16000,
            "bitsPerSample": 16,
            "channels": 1,
            "bufferSize": 1024,
            "encoding": "flac"
        }))
        .unwrap();

    let pcm = pcm_ramp(1024);
    fill_with(&control, &pcm);
    fill(&control);
    session.stop().unwrap();

    let received: Vec<SinkEvent> = events.try_iter().collect();
    let frames = audio(&received);
    assert_eq!(frames.len(), 2);
    for frame in &frames {
        assert_eq!(frame.encoding, FrameEncoding::Flac);
        assert!(frame.encoded_data.len() < 2048 * 4 / 3);
    }
    assert_eq!(
        FrameEncoder::decode(&frames[0].encoded_data, FrameEncoding::Flac).unwrap(),
        pcm
    );
    assert_eq!(
        FrameEncoder::decode(&frames[1].encoded_data, FrameEncoding::Flac)
            .unwrap()
            .len(),
        2048
    );
}

#[test]
fn stop_with_fills_in_flight_publishes_nothing_afterwards() {
    for _ in 0..50 {
        let (mut session, control, events) = session();
        session
            .start_with(&json!({
                "sampleRate": 16000,
                "bitsPerSample": 16,
                "channels": 1,
                "bufferSize": 64,
                "bufferCount": 3
            }))
            .unwrap();

        let filling = Arc::new(AtomicBool::new(true));
        let filler = {
            let control = control.clone();
            let filling = Arc::clone(&filling);
            thread::spawn(move || {
                while filling.load(Ordering::Acquire) {
                    let _ = control.fill_next();
                    thread::yield_now();
                }
            })
        };

        wait_until("the first fill", || control.last_filled().is_some());
        assert_eq!(session.stop().unwrap(), SessionState::Idle);
        let before: Vec<SinkEvent> = events.try_iter().collect();

        thread::sleep(Duration::from_millis(2));
        filling.store(false, Ordering::Release);
        filler.join().unwrap();

        let after: Vec<SinkEvent> = events.try_iter().collect();
        assert!(audio(&after).is_empty());

        let sequences: Vec<u64> = audio(&before).iter().map(|f| f.sequence).collect();
        assert!(!sequences.is_empty());
        assert_eq!(sequences, (0..sequences.len() as u64).collect::<Vec<_>>());
        assert_eq!(session.state(), SessionState::Idle);
    }
}

#[test]
fn fault_racing_stop_leaves_last_announced_state_current() {
    for _ in 0..200 {
        let (mut session, control, events) = session();
        session
            .start_with(&json!({ "sampleRate": 16000, "bitsPerSample": 16, "channels": 1, "bufferSize": 64 }))
            .unwrap();

        let faulting = control.clone();
        let fault = thread::spawn(move || faulting.fault("gone"));
        session.stop().unwrap();
        fault.join().unwrap();

        let last = events
            .try_iter()
            .filter_map(|e| match e.payload {
                EventPayload::State(state) => Some(state.state),
                _ => None,
            })
            .last();
        assert_eq!(last, Some(session.state().name()));
    }
}

#[test]
fn audio_payload_serializes_with_host_field_names() {
    let (mut session, control, events) = session();
    session
        .start_with(&json!({ "sampleRate": 16000, "bitsPerSample": 16, "channels": 1, "bufferSize": 4 }))
        .unwrap();
    fill_with(&control, &[0, 0, 255, 127, 0, 128, 1, 0]);
    session.stop().unwrap();

    let received: Vec<SinkEvent> = events.try_iter().collect();
    let value: Value = received
        .iter()
        .find(|e| e.name == AUDIO_DATA_EVENT)
        .map(|e| serde_json::to_value(&e.payload).unwrap())
        .unwrap();

    assert_eq!(
        value,
        json!({
            "encodedData": "AAD/fwCAAQA=",
            "sampleRate": 16000,
            "bitsPerSample": 16,
            "channels": 1,
            "sequence": 0,
            "timestampMs": 0,
            "encoding": "base64"
        })
    );
}

#[test]
fn invalid_options_never_leave_idle() {
    let (mut session, control, _events) = session();

    let missing = session.start_with(&json!({ "sampleRate": 16000, "channels": 1 }));
    assert!(matches!(missing, Err(StreamError::InvalidConfig(_))));

    let bad_rate = session.start_with(&json!({ "sampleRate": 1000, "bitsPerSample": 16, "channels": 1 }));
    assert!(matches!(bad_rate, Err(StreamError::InvalidConfig(_))));

    let bad_count = session.start_with(&json!({
        "sampleRate": 16000,
        "bitsPerSample": 16,
        "channels": 1,
        "bufferCount": 0
    }));
    assert!(matches!(bad_count, Err(StreamError::InvalidConfig(_))));

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(control.open_count(), 0);
}
