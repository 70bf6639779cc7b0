use crate::device::DeviceConfig;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

/// Sentinel written to a gauge when a scrape failed or the reading is absent.
/// Booleans, durations and non-negative counters sit above this value in
/// healthy data, so `-1.0` is unambiguous.
pub const ROGUE_BELOW_RANGE: f64 = -1.0;

/// Sentinel for Wi-Fi RSSI, which is negative (or zero) in healthy data.
pub const ROGUE_ABOVE_RANGE: f64 = 1.0;

pub type FloatGauge = Gauge<f64, AtomicU64>;

/// Shared gauge family keyed by the per-device label set. Each metric name
/// is registered exactly once; every device owns one series in it.
pub type GaugeFamily = Family<CommonLabels, FloatGauge>;

/// The constant label set every metric of a device carries.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CommonLabels {
    pub dev_room: String,
    pub dev_name: String,
    pub dev_ip: String,
    pub dev_full_name: String,
    pub is_light: String,
}

impl CommonLabels {
    pub fn from_config(config: &DeviceConfig) -> Self {
        let full_name = format!("{} {}", config.room, config.name)
            .trim()
            .to_string();
        Self {
            dev_room: config.room.clone(),
            dev_name: config.name.clone(),
            dev_ip: config.ip.clone(),
            dev_full_name: full_name,
            is_light: config.model.is_light().to_string(),
        }
    }
}

pub fn set_series(family: &GaugeFamily, labels: &CommonLabels, value: f64) {
    family.get_or_create(labels).set(value);
}

pub fn set_series_bool(family: &GaugeFamily, labels: &CommonLabels, value: bool) {
    set_series(family, labels, if value { 1.0 } else { 0.0 });
}

pub fn set_series_int(family: &GaugeFamily, labels: &CommonLabels, value: i64) {
    set_series(family, labels, value as f64);
}

pub fn set_series_duration_seconds(family: &GaugeFamily, labels: &CommonLabels, value: Duration) {
    set_series(family, labels, value.as_secs_f64());
}
