pub(crate) mod codec;
mod metrics;
mod net;
mod report;
#[cfg(test)]
mod tests;

use crate::device::error::DeviceError;
use crate::device::DeviceConfig;
use metrics::KasaMetrics;
use net::DeviceConnection;
use report::PeriodicDeviceReport;
use std::time::Instant;

pub(crate) use metrics::Families;

pub(crate) const DEFAULT_PORT: u16 = 9999;

const SYS_INFO_BODY: &str = r#"{"system":{"get_sysinfo":null}}"#;
const EMETER_REALTIME_SHORT_BODY: &str = r#"{"emeter":{"get_realtime":{}}}"#;
const EMETER_REALTIME_QUALIFIED_BODY: &str =
    r#"{"smartlife.iot.common.emeter":{"get_realtime":{}}}"#;
const LIGHT_DETAILS_BODY: &str =
    r#"{"smartlife.iot.smartbulb.lightingservice":{"get_light_details":{}}}"#;

/// A Kasa device and its registered metrics. The TCP connection is opened
/// fresh for every poll and dropped at the end of it.
pub struct Device {
    config: DeviceConfig,
    port: u16,
    metrics: KasaMetrics,
}

impl Device {
    pub fn new(config: &DeviceConfig, port: u16, families: &Families) -> Self {
        Self {
            config: config.clone(),
            port,
            metrics: KasaMetrics::new(families, config),
        }
    }

    pub async fn poll_and_update_metrics(&mut self) -> Result<(), DeviceError> {
        let report = extract_all_data(&self.config, self.port).await?;
        tracing::debug!(
            device = %self.config.name,
            duration_ms = report.scrape_duration.as_millis() as u64,
            "polled kasa device"
        );
        self.metrics.update(&report);
        Ok(())
    }

    pub fn reset_metrics_to_rogue_values(&mut self) {
        self.metrics.reset_to_rogue_values();
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }
}

fn emeter_query_body(config: &DeviceConfig) -> Option<&'static str> {
    if !config.model.supports_emeter() {
        return None;
    }
    if config.model.is_light() {
        Some(EMETER_REALTIME_QUALIFIED_BODY)
    } else {
        Some(EMETER_REALTIME_SHORT_BODY)
    }
}

async fn extract_all_data(
    config: &DeviceConfig,
    port: u16,
) -> Result<PeriodicDeviceReport, DeviceError> {
    let started = Instant::now();
    let mut connection = DeviceConnection::open(&config.ip, port).await?;

    // Every Kasa device answers the sysinfo query; the rest are capability
    // dependent.
    let sys_info = connection.query(SYS_INFO_BODY).await?;
    let emeter = match emeter_query_body(config) {
        Some(body) => Some(connection.query(body).await?),
        None => None,
    };
    let light_details = if config.model.is_light() {
        Some(connection.query(LIGHT_DETAILS_BODY).await?)
    } else {
        None
    };

    let mut report = report::build(
        config.model,
        &sys_info,
        emeter.as_deref(),
        light_details.as_deref(),
    )?;
    report.scrape_duration = started.elapsed();
    Ok(report)
}
