//! Measurement orchestration
//!
//! Start the recording, stream until shutdown, then tear down in order:
//! close the measurement socket, wait for the session, run the stop
//! sequence. Shutdown is honoured at every stage, including while the
//! start sequence or the socket connect is still in flight.

use crate::lifecycle::LanxiClient;
use lanxi_stream::{
    MetricsSink, SessionEnd, SessionReport, StreamCloser, StreamConfig, StreamSession,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};

/// Where the measurement socket lives and how the session runs
#[derive(Debug, Clone)]
pub struct StreamTarget {
    pub host: String,
    pub config: StreamConfig,
    pub connect_timeout: Duration,
}

struct ActiveStream {
    closer: StreamCloser,
    task: JoinHandle<SessionReport>,
}

/// Start the recording, connect and run the session on a blocking thread
async fn start_stream(
    client: &LanxiClient,
    target: &StreamTarget,
    sink: Arc<dyn MetricsSink>,
) -> Option<ActiveStream> {
    let port = match client.start().await {
        Ok(port) => port,
        Err(e) => {
            log::error!("{:#}", e);
            return None;
        }
    };

    let host = target.host.clone();
    let config = target.config.clone();
    let timeout = target.connect_timeout;
    let connected = tokio::task::spawn_blocking(move || {
        StreamSession::connect_timeout(&host, port, config, timeout)
    })
    .await;

    let (session, closer) = match connected {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            log::error!("{}", e);
            return None;
        }
        Err(e) => {
            log::error!("Stream connect task failed: {}", e);
            return None;
        }
    };

    let task = tokio::task::spawn_blocking(move || session.run(sink));
    log::info!("Streaming from port {}", port);
    Some(ActiveStream { closer, task })
}

/// Drive one measurement until `shutdown` resolves
///
/// If the session ends on its own, the recording is left running and the
/// call keeps waiting for `shutdown`. The stop sequence always runs, after
/// the socket is closed. Returns the session's report if a session ran.
pub async fn run_measurement<F>(
    client: &LanxiClient,
    target: &StreamTarget,
    sink: Arc<dyn MetricsSink>,
    shutdown: F,
) -> Option<SessionReport>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut active = None;
    let mut signalled = tokio::select! {
        started = start_stream(client, target, sink) => {
            active = started;
            false
        }
        _ = &mut shutdown => {
            log::info!("Shutdown requested while starting the measurement");
            true
        }
    };

    let mut report = None;
    if !signalled {
        if let Some(stream) = active.as_mut() {
            let finished = tokio::select! {
                _ = &mut shutdown => {
                    signalled = true;
                    None
                }
                joined = &mut stream.task => Some(joined),
            };
            if let Some(joined) = finished {
                report = log_session_end(joined);
                active = None;
            }
        }
    }

    if !signalled {
        log::info!("No active stream; serving liveness until shutdown");
        (&mut shutdown).await;
    }

    log::info!("Shutting down");

    if let Some(stream) = active {
        stream.closer.close();
        report = log_session_end(stream.task.await);
    }

    let failures = client.stop().await;
    if failures > 0 {
        log::warn!("Stop sequence finished with {} failed steps", failures);
    }

    report
}

fn log_session_end(joined: Result<SessionReport, JoinError>) -> Option<SessionReport> {
    let report = match joined {
        Ok(report) => report,
        Err(e) => {
            log::error!("Stream session task failed: {}", e);
            return None;
        }
    };

    match &report.end {
        SessionEnd::Closed => log::info!(
            "Stream session ended: connection closed after {} frames",
            report.stats.frames
        ),
        SessionEnd::Failed(e) => log::error!(
            "Stream session ended after {} frames: {}",
            report.stats.frames,
            e
        ),
    }
    if let Some(last) = report.stats.last_stream_time {
        log::info!("Last frame at stream time {}", last);
    }

    Some(report)
}
