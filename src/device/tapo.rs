pub(crate) mod connection;
pub(crate) mod crypto;
pub(crate) mod klap;
mod metrics;
pub(crate) mod passthrough;
pub(crate) mod report;

use crate::device::error::DeviceError;
use crate::device::DeviceConfig;
use connection::TapoConnection;
use metrics::TapoMetrics;
use reqwest::cookie::Jar;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, CONNECTION, CONTENT_TYPE, HOST, REFERER,
    USER_AGENT,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) use metrics::Families;

pub(crate) const DEFAULT_PORT: u16 = 80;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const RESPONSE_READ_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(300);

/// A Tapo device, its long-lived protocol session and registered metrics.
pub struct Device {
    config: DeviceConfig,
    connection: TapoConnection,
    metrics: TapoMetrics,
}

impl Device {
    pub fn new(
        email: &str,
        password: &str,
        config: &DeviceConfig,
        port: u16,
        families: &Families,
    ) -> Self {
        Self {
            config: config.clone(),
            connection: TapoConnection::new(email, password, &config.ip, port),
            metrics: TapoMetrics::new(families, config),
        }
    }

    pub async fn poll_and_update_metrics(&mut self) -> Result<(), DeviceError> {
        let result = self.try_poll().await;
        if result.is_err() {
            // The next tick starts from a fresh handshake.
            self.connection.forget_keys_and_session();
        }
        result
    }

    async fn try_poll(&mut self) -> Result<(), DeviceError> {
        let started = Instant::now();
        let info = self.connection.get_device_info().await?;
        let mut status = report::device_status_from_info(&info)?;
        if self.config.model.has_energy_monitoring() {
            let usage = self.connection.get_energy_usage().await?;
            status.energy_meter = Some(report::energy_meter_from_usage(&usage)?);
        }
        status.scrape_duration = started.elapsed();
        tracing::debug!(
            device = %self.config.name,
            duration_ms = status.scrape_duration.as_millis() as u64,
            "polled tapo device"
        );
        self.metrics.update(&status);
        Ok(())
    }

    pub fn reset_metrics_to_rogue_values(&mut self) {
        self.metrics.reset_to_rogue_values();
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
}

/// HTTP client shared by both protocol variants: one keep-alive connection
/// per device, the headers the firmware expects, and the session cookie jar.
pub(crate) fn http_client(jar: &Arc<Jar>, ip: &str, port: u16) -> Result<reqwest::Client, DeviceError> {
    let mut headers = HeaderMap::new();
    headers.insert(REFERER, HeaderValue::from_str(&format!("http://{ip}:{port}"))?);
    headers.insert(
        HeaderName::from_static("requestbyapp"),
        HeaderValue::from_static("true"),
    );
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=UTF-8"),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONNECTION, HeaderValue::from_static("Keep-Alive"));
    // Bare IP, without the port the URL authority would carry.
    headers.insert(HOST, HeaderValue::from_str(ip)?);
    headers.insert(USER_AGENT, HeaderValue::from_static("okhttp/3.12.13"));
    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .cookie_provider(jar.clone())
        .timeout(HTTP_TIMEOUT)
        .read_timeout(RESPONSE_READ_TIMEOUT)
        .pool_idle_timeout(IDLE_CONNECTION_TIMEOUT)
        .pool_max_idle_per_host(1)
        .build()?)
}

/// Unwraps a `{"error_code": …, "result": …}` envelope; a missing
/// `error_code` is tolerated, a non-zero one is not.
pub(crate) fn result_from_response(value: &Value) -> Result<Value, DeviceError> {
    if let Some(code) = value.get("error_code").and_then(Value::as_i64) {
        if code != 0 {
            return Err(DeviceError::ErrorCode(code));
        }
    }
    value
        .get("result")
        .cloned()
        .ok_or(DeviceError::MissingField("result"))
}
