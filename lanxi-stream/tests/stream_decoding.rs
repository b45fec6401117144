// End-to-end tests: wire bytes in, amplitude gauges out
use lanxi_stream::{
    replay, run_session, MetricsSink, RecordingSink, SessionEnd, StreamConfig, StreamError,
    StreamSession, AMPLITUDE_MAX, AMPLITUDE_MIN,
};
use std::io::{Cursor, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SIGNAL_DATA: u16 = 1;
const DATA_QUALITY: u16 = 2;
const INTERPRETATION: u16 = 8;
const AUX_SEQUENCE: u16 = 11;

/// Build one frame; the time family is 2^0, so `time_count` is in seconds
fn frame(message_type: u16, time_count: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(28 + payload.len());
    out.extend_from_slice(b"BK");
    out.extend_from_slice(&28u16.to_le_bytes());
    out.extend_from_slice(&message_type.to_le_bytes());
    out.extend_from_slice(&0i16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(&time_count.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn scale_factor(channel: u16, factor: f64) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&channel.to_le_bytes());
    payload.extend_from_slice(&2u16.to_le_bytes());
    payload.extend_from_slice(&0i16.to_le_bytes());
    payload.extend_from_slice(&8u16.to_le_bytes());
    payload.extend_from_slice(&factor.to_le_bytes());
    payload
}

fn signal_data(groups: &[(u16, &[i32])]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(groups.len() as u16).to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    for (channel, values) in groups {
        payload.extend_from_slice(&channel.to_le_bytes());
        payload.extend_from_slice(&(values.len() as u16).to_le_bytes());
        for value in values.iter() {
            payload.extend_from_slice(&(*value as u32 & 0xFF_FFFF).to_le_bytes()[..3]);
        }
    }
    payload
}

fn data_quality(channel: u16, flags: u16) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&1u16.to_le_bytes());
    payload.extend_from_slice(&channel.to_le_bytes());
    payload.extend_from_slice(&flags.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload
}

fn capture(frames: &[Vec<u8>]) -> Vec<u8> {
    frames.concat()
}

#[test]
fn test_end_to_end_scaled_extrema() {
    let bytes = capture(&[
        frame(INTERPRETATION, 0, &scale_factor(1, 0.01)),
        frame(SIGNAL_DATA, 0, &signal_data(&[(1, &[100, -200, 300])])),
    ]);

    let sink = RecordingSink::new();
    let report = replay(Cursor::new(bytes), &StreamConfig::new(), &sink);

    assert!(report.end.is_clean());
    assert_eq!(sink.latest(AMPLITUDE_MIN, 1), Some(-2.0));
    assert_eq!(sink.latest(AMPLITUDE_MAX, 1), Some(3.0));

    let publications = sink.publications();
    assert_eq!(publications.len(), 2);
    assert_eq!(publications[0].labels.device_id, "lanxi-01");
    assert_eq!(publications[0].labels.location, "lab-1");
    assert_eq!(publications[0].labels.channel, "1");
}

#[test]
fn test_samples_before_scale_factor_never_published() {
    let bytes = capture(&[
        frame(SIGNAL_DATA, 0, &signal_data(&[(1, &[-5000, 5000])])),
        frame(INTERPRETATION, 0, &scale_factor(1, 1.0)),
        frame(SIGNAL_DATA, 0, &signal_data(&[(1, &[7])])),
    ]);

    let sink = RecordingSink::new();
    let report = replay(Cursor::new(bytes), &StreamConfig::new(), &sink);

    assert_eq!(report.stats.samples_dropped, 2);
    assert_eq!(sink.latest(AMPLITUDE_MIN, 1), Some(7.0));
    assert_eq!(sink.latest(AMPLITUDE_MAX, 1), Some(7.0));
}

#[test]
fn test_unknown_and_quality_frames_do_not_disturb_stream() {
    let bytes = capture(&[
        frame(INTERPRETATION, 0, &scale_factor(2, 0.5)),
        frame(AUX_SEQUENCE, 0, &[0xAA; 40]),
        frame(DATA_QUALITY, 0, &data_quality(2, 0x02)),
        frame(SIGNAL_DATA, 0, &signal_data(&[(2, &[-4, 10])])),
    ]);

    let sink = RecordingSink::new();
    let report = replay(Cursor::new(bytes), &StreamConfig::new(), &sink);

    assert!(report.end.is_clean());
    assert_eq!(report.stats.unknown_frames, 1);
    assert_eq!(report.stats.overloads, 1);
    assert_eq!(sink.latest(AMPLITUDE_MIN, 2), Some(-2.0));
    assert_eq!(sink.latest(AMPLITUDE_MAX, 2), Some(5.0));
}

#[test]
fn test_malformed_frame_skipped_without_losing_framing() {
    // Declares 5 samples but carries 1
    let mut short = Vec::new();
    short.extend_from_slice(&1u16.to_le_bytes());
    short.extend_from_slice(&0u16.to_le_bytes());
    short.extend_from_slice(&1u16.to_le_bytes());
    short.extend_from_slice(&5u16.to_le_bytes());
    short.extend_from_slice(&[0x10, 0x00, 0x00]);

    let bytes = capture(&[
        frame(INTERPRETATION, 0, &scale_factor(1, 1.0)),
        frame(SIGNAL_DATA, 0, &short),
        frame(SIGNAL_DATA, 0, &signal_data(&[(1, &[3, -3])])),
    ]);

    let sink = RecordingSink::new();
    let report = replay(Cursor::new(bytes), &StreamConfig::new(), &sink);

    assert!(report.end.is_clean());
    assert_eq!(report.stats.malformed_frames, 1);
    assert_eq!(report.stats.frames, 3);
    assert_eq!(sink.latest(AMPLITUDE_MIN, 1), Some(-3.0));
    assert_eq!(sink.latest(AMPLITUDE_MAX, 1), Some(3.0));
}

#[test]
fn test_multi_channel_groups() {
    let bytes = capture(&[
        frame(INTERPRETATION, 0, &[scale_factor(1, 1.0), scale_factor(3, 2.0)].concat()),
        frame(SIGNAL_DATA, 0, &signal_data(&[(1, &[1, 2]), (3, &[-1, 4]), (9, &[100])])),
    ]);

    let sink = RecordingSink::new();
    let report = replay(Cursor::new(bytes), &StreamConfig::new(), &sink);

    assert_eq!(report.stats.samples_accepted, 4);
    assert_eq!(report.stats.samples_dropped, 1);
    assert_eq!(sink.latest(AMPLITUDE_MAX, 1), Some(2.0));
    assert_eq!(sink.latest(AMPLITUDE_MIN, 3), Some(-2.0));
    assert_eq!(sink.latest(AMPLITUDE_MAX, 3), Some(8.0));
    assert_eq!(sink.latest(AMPLITUDE_MAX, 9), None);
}

#[test]
fn test_replay_flushes_on_stream_time() {
    let bytes = capture(&[
        frame(INTERPRETATION, 0, &scale_factor(1, 1.0)),
        frame(SIGNAL_DATA, 0, &signal_data(&[(1, &[-1, 1])])),
        frame(SIGNAL_DATA, 2, &signal_data(&[(1, &[-9, 9])])),
    ]);

    let sink = RecordingSink::new();
    let report = replay(Cursor::new(bytes.clone()), &StreamConfig::new(), &sink);
    assert_eq!(report.flushes, 2);

    let values: Vec<f64> = sink.publications().iter().map(|p| p.value).collect();
    assert_eq!(values, vec![-1.0, 1.0, -9.0, 9.0]);

    // Same capture, same output
    let again = RecordingSink::new();
    replay(Cursor::new(bytes), &StreamConfig::new(), &again);
    assert_eq!(sink.publications(), again.publications());
}

#[test]
fn test_torn_frame_is_fatal() {
    let mut bytes = capture(&[
        frame(INTERPRETATION, 0, &scale_factor(1, 1.0)),
        frame(SIGNAL_DATA, 0, &signal_data(&[(1, &[5])])),
    ]);
    bytes.truncate(bytes.len() - 2);

    let sink = RecordingSink::new();
    let report = replay(Cursor::new(bytes), &StreamConfig::new(), &sink);

    assert!(matches!(report.end, SessionEnd::Failed(StreamError::FrameRead(_))));
    assert_eq!(report.stats.frames, 1);
}

#[test]
fn test_lost_framing_is_fatal() {
    let mut bytes = frame(INTERPRETATION, 0, &scale_factor(1, 1.0));
    bytes.extend_from_slice(&[0u8; 28]);

    let sink = RecordingSink::new();
    let report = replay(Cursor::new(bytes), &StreamConfig::new(), &sink);
    assert!(matches!(report.end, SessionEnd::Failed(StreamError::InvalidHeader(_))));
}

#[test]
fn test_oversized_payload_rejected() {
    let bytes = frame(AUX_SEQUENCE, 0, &[0u8; 64]);
    let config = StreamConfig::new().with_max_payload_len(32);

    let sink = RecordingSink::new();
    let report = replay(Cursor::new(bytes), &config, &sink);
    assert!(matches!(report.end, SessionEnd::Failed(StreamError::InvalidHeader(_))));
}

#[test]
fn test_session_stops_flushing_when_stream_closes() {
    let bytes = capture(&[
        frame(INTERPRETATION, 0, &scale_factor(1, 1.0)),
        frame(SIGNAL_DATA, 0, &signal_data(&[(1, &[1])])),
    ]);

    let sink = Arc::new(RecordingSink::new());
    let config = StreamConfig::new().with_flush_interval(Duration::from_millis(10));
    let report = run_session(
        Cursor::new(bytes),
        &config,
        Arc::clone(&sink) as Arc<dyn MetricsSink>,
    );
    assert!(report.end.is_clean());

    let count = sink.publications().len();
    assert_eq!(report.flush.published as usize * 2, count);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(sink.publications().len(), count);
}

#[test]
fn test_tcp_session_closed_by_handle() {
    let _ = env_logger::builder().is_test(true).try_init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let bytes = capture(&[
            frame(INTERPRETATION, 0, &scale_factor(1, 0.01)),
            frame(SIGNAL_DATA, 0, &signal_data(&[(1, &[100, -200, 300])])),
        ]);
        socket.write_all(&bytes).unwrap();
        // Hold the connection open until the client goes away
        let mut buf = [0u8; 1];
        let _ = std::io::Read::read(&mut socket, &mut buf);
    });

    let config = StreamConfig::new()
        .with_device("lanxi-02", "rig")
        .with_flush_interval(Duration::from_millis(10));
    let (session, closer) = StreamSession::connect("127.0.0.1", port, config).unwrap();

    let sink = Arc::new(RecordingSink::new());
    let session_sink = Arc::clone(&sink) as Arc<dyn MetricsSink>;
    let client = std::thread::spawn(move || session.run(session_sink));

    let deadline = Instant::now() + Duration::from_secs(5);
    while sink.latest(AMPLITUDE_MAX, 1).is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    closer.close();
    let report = client.join().unwrap();
    server.join().unwrap();

    assert_eq!(report.stats.frames, 2);
    assert_eq!(sink.latest(AMPLITUDE_MIN, 1), Some(-2.0));
    assert_eq!(sink.latest(AMPLITUDE_MAX, 1), Some(3.0));
    assert_eq!(sink.publications()[0].labels.device_id, "lanxi-02");
}
