//! Fake LAN-XI module for lifecycle and orchestration tests

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Calls = Arc<Mutex<Vec<String>>>;

/// Recorded by [`stream_source`] once the client has closed the socket
pub const STREAM_CLOSED: &str = "stream closed";

pub struct FakeOptions {
    /// Port reported by the socket destination endpoint
    pub stream_port: u16,
    /// Paths answered with 500
    pub failing: &'static [&'static str],
    /// Paths that never answer in time
    pub stalling: &'static [&'static str],
    /// Hold `PUT /rest/rec/measurements/stop` until the stream is closed
    pub await_stream_close: bool,
    pub calls: Calls,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            stream_port: 17001,
            failing: &[],
            stalling: &[],
            await_stream_close: false,
            calls: Calls::default(),
        }
    }
}

fn recorded(calls: &Calls, entry: &str) -> bool {
    calls.lock().unwrap().iter().any(|c| c == entry)
}

/// Serve the module's REST API on a loopback port, recording every call
pub fn fake_module(opts: FakeOptions) -> SocketAddr {
    let opts = Arc::new(opts);

    let make_service = make_service_fn(move |_conn| {
        let opts = Arc::clone(&opts);
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let opts = Arc::clone(&opts);
                async move {
                    let path = req.uri().path().to_string();

                    if opts.await_stream_close && path == "/rest/rec/measurements/stop" {
                        for _ in 0..200 {
                            if recorded(&opts.calls, STREAM_CLOSED) {
                                break;
                            }
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }

                    opts.calls
                        .lock()
                        .unwrap()
                        .push(format!("{} {}", req.method(), path));

                    if opts.stalling.contains(&path.as_str()) {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }

                    let mut response = if path == "/rest/rec/destination/socket" {
                        Response::new(Body::from(format!(r#"{{"tcpPort": {}}}"#, opts.stream_port)))
                    } else {
                        Response::new(Body::empty())
                    };
                    if opts.failing.contains(&path.as_str()) {
                        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        *response.body_mut() = Body::from("recorder busy");
                    }
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_service);
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

/// Measurement socket: accepts one client and writes `frames` to it
///
/// With `hold_open` the socket stays open until the client closes it;
/// otherwise it is closed right after the frames. Either way
/// [`STREAM_CLOSED`] is recorded once the connection is gone.
pub fn stream_source(calls: Calls, frames: Vec<u8>, hold_open: bool) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    std::thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        conn.write_all(&frames).unwrap();
        if hold_open {
            let mut buf = [0u8; 64];
            while let Ok(n) = conn.read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
        }
        drop(conn);
        calls.lock().unwrap().push(STREAM_CLOSED.to_string());
    });

    port
}

/// One frame with the default time family
pub fn frame(message_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(28 + payload.len());
    out.extend_from_slice(b"BK");
    out.extend_from_slice(&28u16.to_le_bytes());
    out.extend_from_slice(&message_type.to_le_bytes());
    out.extend_from_slice(&0i16.to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Scale factor for `channel`, then one signal block of `values` on it
pub fn calibrated_samples(channel: u16, factor: f64, values: &[i32]) -> Vec<u8> {
    let mut interpretation = Vec::new();
    interpretation.extend_from_slice(&channel.to_le_bytes());
    interpretation.extend_from_slice(&2u16.to_le_bytes());
    interpretation.extend_from_slice(&0i16.to_le_bytes());
    interpretation.extend_from_slice(&8u16.to_le_bytes());
    interpretation.extend_from_slice(&factor.to_le_bytes());

    let mut signal = Vec::new();
    signal.extend_from_slice(&1u16.to_le_bytes());
    signal.extend_from_slice(&0u16.to_le_bytes());
    signal.extend_from_slice(&channel.to_le_bytes());
    signal.extend_from_slice(&(values.len() as u16).to_le_bytes());
    for value in values {
        signal.extend_from_slice(&(*value as u32 & 0xFF_FFFF).to_le_bytes()[..3]);
    }

    [frame(8, &interpretation), frame(1, &signal)].concat()
}

/// Poll `condition` for up to five seconds
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
