//! Recording lifecycle over the module's REST API
//!
//! Start: open → create → query streaming port → start measurement.
//! Stop: stop measurement → finish → close.

use anyhow::{bail, Context, Result};
use reqwest::{Client, Method};
use serde::Deserialize;
use std::time::Duration;

/// Streaming destination as reported by the module
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocketDestination {
    tcp_port: u16,
}

/// REST client for one LAN-XI module
pub struct LanxiClient {
    client: Client,
    base_url: String,
}

impl LanxiClient {
    /// `host` may carry an explicit port (`host:port`)
    pub fn new(host: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: format!("http://{}", host),
        })
    }

    /// Send one request; non-2xx statuses are errors carrying the body
    async fn call(&self, method: Method, path: &str) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("{} {}", method, url);

        let response = self
            .client
            .request(method.clone(), &url)
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, path))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("{} {}: failed to read response", method, path))?;

        if !status.is_success() {
            bail!("{} {} returned {}: {}", method, path, status, body.trim());
        }
        Ok(body)
    }

    pub async fn open_recorder(&self) -> Result<()> {
        self.call(Method::PUT, "/rest/rec/open").await.map(|_| ())
    }

    pub async fn create_recording(&self) -> Result<()> {
        self.call(Method::PUT, "/rest/rec/create").await.map(|_| ())
    }

    /// TCP port the module streams measurement data on
    pub async fn streaming_port(&self) -> Result<u16> {
        let body = self.call(Method::GET, "/rest/rec/destination/socket").await?;
        let destination: SocketDestination = serde_json::from_str(&body)
            .with_context(|| format!("Unexpected socket destination response: {}", body))?;
        Ok(destination.tcp_port)
    }

    pub async fn start_measurement(&self) -> Result<()> {
        self.call(Method::POST, "/rest/rec/measurements").await.map(|_| ())
    }

    pub async fn stop_measurement(&self) -> Result<()> {
        self.call(Method::PUT, "/rest/rec/measurements/stop")
            .await
            .map(|_| ())
    }

    pub async fn finish_recording(&self) -> Result<()> {
        self.call(Method::PUT, "/rest/rec/finish").await.map(|_| ())
    }

    pub async fn close_recorder(&self) -> Result<()> {
        self.call(Method::PUT, "/rest/rec/close").await.map(|_| ())
    }

    /// Run the start sequence and return the streaming port
    pub async fn start(&self) -> Result<u16> {
        self.open_recorder().await.context("Failed to open recorder")?;
        log::info!("Recorder opened");

        self.create_recording()
            .await
            .context("Failed to create recording")?;
        log::info!("Recording created");

        let port = self
            .streaming_port()
            .await
            .context("Failed to query streaming port")?;
        log::info!("Streaming port: {}", port);

        self.start_measurement()
            .await
            .context("Failed to start measurement")?;
        log::info!("Measurement started");

        Ok(port)
    }

    /// Run the stop sequence; every step is attempted even if one fails
    ///
    /// Returns the number of failed steps.
    pub async fn stop(&self) -> usize {
        let mut failures = 0;

        log::info!("Stopping measurement");
        if let Err(e) = self.stop_measurement().await {
            log::error!("Failed to stop measurement: {:#}", e);
            failures += 1;
        }

        log::info!("Finishing recording");
        if let Err(e) = self.finish_recording().await {
            log::error!("Failed to finish recording: {:#}", e);
            failures += 1;
        }

        log::info!("Closing recorder");
        if let Err(e) = self.close_recorder().await {
            log::error!("Failed to close recorder: {:#}", e);
            failures += 1;
        }

        failures
    }
}
