//! Liveness probe: periodic ICMP ping against the module

use crate::metrics::PrometheusMetrics;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;

/// Pings the module and mirrors the result into `lanxi_alive`
pub struct LivenessMonitor {
    host: String,
    device_id: String,
    location: String,
    interval: Duration,
    timeout: Duration,
    metrics: PrometheusMetrics,
    last: Option<bool>,
}

impl LivenessMonitor {
    pub fn new(
        host: impl Into<String>,
        device_id: impl Into<String>,
        location: impl Into<String>,
        interval: Duration,
        timeout: Duration,
        metrics: PrometheusMetrics,
    ) -> Self {
        Self {
            host: host.into(),
            device_id: device_id.into(),
            location: location.into(),
            interval,
            timeout,
            metrics,
            last: None,
        }
    }

    /// Probe until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let alive = ping(&self.host, self.timeout).await;
                    self.record(alive);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::debug!("Liveness probe stopped");
    }

    /// Publish one probe result; returns true if the state changed
    fn record(&mut self, alive: bool) -> bool {
        self.metrics.set_alive(&self.device_id, &self.location, alive);

        let changed = self.last != Some(alive);
        self.last = Some(alive);

        match (alive, changed) {
            (true, true) => log::info!("LAN-XI module {} is reachable", self.host),
            (false, true) => log::error!("LAN-XI module {} is unreachable", self.host),
            (false, false) => log::debug!("LAN-XI module {} still unreachable", self.host),
            (true, false) => {}
        }

        changed
    }
}

fn ping_command(host: &str, timeout: Duration) -> Command {
    let mut cmd = Command::new("ping");
    cmd.arg("-c")
        .arg("1")
        .arg("-W")
        .arg(timeout.as_secs().max(1).to_string())
        .arg(host)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Single ICMP echo; any failure to run `ping` counts as down
pub async fn ping(host: &str, timeout: Duration) -> bool {
    match ping_command(host, timeout).status().await {
        Ok(status) => status.success(),
        Err(e) => {
            log::warn!("Failed to run ping: {}", e);
            false
        }
    }
}
