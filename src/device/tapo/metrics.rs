use super::report::DeviceStatus;
use crate::device::{DeviceConfig, Model};
use crate::metrics::{
    set_series, set_series_bool, set_series_duration_seconds, set_series_int, CommonLabels,
    FloatGauge, GaugeFamily, ROGUE_ABOVE_RANGE, ROGUE_BELOW_RANGE,
};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct InfoLabels {
    dev_room: String,
    dev_name: String,
    dev_ip: String,
    dev_full_name: String,
    is_light: String,
    alias: String,
    device_id: String,
    firmware_version: String,
    hardware_id: String,
    mac_address: String,
    model_name: String,
    oem_id: String,
    device_type: String,
}

impl InfoLabels {
    fn new(common: &CommonLabels, status: &DeviceStatus) -> Self {
        Self {
            dev_room: common.dev_room.clone(),
            dev_name: common.dev_name.clone(),
            dev_ip: common.dev_ip.clone(),
            dev_full_name: common.dev_full_name.clone(),
            is_light: common.is_light.clone(),
            alias: status.common.alias.clone(),
            device_id: status.common.device_id.clone(),
            firmware_version: status.common.firmware_version.clone(),
            hardware_id: status.common.hardware_id.clone(),
            mac_address: status.common.mac.clone(),
            model_name: status.common.model_name.clone(),
            oem_id: status.common.oem_id.clone(),
            device_type: status.common.device_type.clone(),
        }
    }
}

/// One family per metric name, registered once under the `tapo` prefix and
/// shared by every Tapo device.
#[derive(Clone, Default)]
pub(crate) struct Families {
    info: Family<InfoLabels, FloatGauge>,
    overheated: GaugeFamily,
    wifi_rssi: GaugeFamily,
    signal_level: GaugeFamily,
    device_turned_on: GaugeFamily,
    on_time: GaugeFamily,
    brightness: GaugeFamily,
    colour_temperature: GaugeFamily,
    hue: GaugeFamily,
    saturation: GaugeFamily,
    power_milliwatts: GaugeFamily,
    today_energy_watt_hours: GaugeFamily,
    month_energy_watt_hours: GaugeFamily,
}

impl Families {
    pub(crate) fn register(registry: &mut Registry) -> Self {
        let registry = registry.sub_registry_with_prefix("tapo");
        let families = Self::default();
        registry.register("device_info", "Static device identity", families.info.clone());
        registry.register(
            "overheated_bool",
            "Whether the device reports overheating",
            families.overheated.clone(),
        );
        registry.register(
            "wifi_rssi_db",
            "Wi-Fi signal strength",
            families.wifi_rssi.clone(),
        );
        registry.register(
            "signal_level",
            "Coarse Wi-Fi signal level",
            families.signal_level.clone(),
        );
        registry.register(
            "device_turned_on_bool",
            "Whether the relay or lamp is on",
            families.device_turned_on.clone(),
        );
        registry.register(
            "switched_on_time_seconds",
            "How long the relay has been on",
            families.on_time.clone(),
        );
        registry.register(
            "bulb_brightness_percent",
            "Current lamp brightness",
            families.brightness.clone(),
        );
        registry.register(
            "bulb_colour_temperature_kelvin",
            "Current white colour temperature",
            families.colour_temperature.clone(),
        );
        registry.register("bulb_hue", "Current lamp hue", families.hue.clone());
        registry.register(
            "bulb_saturation_percent",
            "Current lamp saturation",
            families.saturation.clone(),
        );
        registry.register(
            "em_power_mw",
            "Instantaneous power draw",
            families.power_milliwatts.clone(),
        );
        registry.register(
            "em_today_energy_wh",
            "Energy consumed today",
            families.today_energy_watt_hours.clone(),
        );
        registry.register(
            "em_month_energy_wh",
            "Energy consumed this month",
            families.month_energy_watt_hours.clone(),
        );
        families
    }
}

/// One Tapo device's view of the shared families.
pub(crate) struct TapoMetrics {
    model: Model,
    labels: CommonLabels,
    families: Families,
    last_info: Option<InfoLabels>,
}

impl TapoMetrics {
    pub(crate) fn new(families: &Families, config: &DeviceConfig) -> Self {
        let mut metrics = Self {
            model: config.model,
            labels: CommonLabels::from_config(config),
            families: families.clone(),
            last_info: None,
        };
        metrics.reset_to_rogue_values();
        metrics
    }

    pub(crate) fn update(&mut self, status: &DeviceStatus) {
        set_series_bool(&self.families.overheated, &self.labels, status.common.overheated);
        set_series_int(&self.families.wifi_rssi, &self.labels, status.common.wifi_rssi);
        set_series_int(
            &self.families.signal_level,
            &self.labels,
            status.common.signal_level,
        );
        if let Some(plug) = &status.switch_info {
            set_series_bool(&self.families.device_turned_on, &self.labels, plug.relay_on);
            set_series_duration_seconds(&self.families.on_time, &self.labels, plug.on_time);
        }
        if let Some(bulb) = &status.bulb_info {
            set_series_bool(&self.families.device_turned_on, &self.labels, bulb.light_on);
            set_series_int(&self.families.brightness, &self.labels, bulb.brightness);
            set_series_int(
                &self.families.colour_temperature,
                &self.labels,
                bulb.colour_temperature,
            );
            set_series_int(&self.families.hue, &self.labels, bulb.hue);
            set_series_int(&self.families.saturation, &self.labels, bulb.saturation);
        }
        if let Some(meter) = &status.energy_meter {
            set_series_int(
                &self.families.power_milliwatts,
                &self.labels,
                meter.power_milliwatts,
            );
            set_series_int(
                &self.families.today_energy_watt_hours,
                &self.labels,
                meter.today_energy_watt_hours,
            );
            set_series_int(
                &self.families.month_energy_watt_hours,
                &self.labels,
                meter.month_energy_watt_hours,
            );
        }
        if let Some(previous) = self.last_info.take() {
            self.families.info.remove(&previous);
        }
        let info = InfoLabels::new(&self.labels, status);
        self.families.info.get_or_create(&info).set(1.0);
        self.last_info = Some(info);
    }

    pub(crate) fn reset_to_rogue_values(&mut self) {
        if let Some(previous) = self.last_info.take() {
            self.families.info.remove(&previous);
        }
        set_series(&self.families.overheated, &self.labels, ROGUE_BELOW_RANGE);
        set_series(&self.families.wifi_rssi, &self.labels, ROGUE_ABOVE_RANGE);
        set_series(&self.families.signal_level, &self.labels, ROGUE_BELOW_RANGE);
        set_series(&self.families.device_turned_on, &self.labels, ROGUE_BELOW_RANGE);
        if self.model.is_switch() {
            set_series(&self.families.on_time, &self.labels, ROGUE_BELOW_RANGE);
        }
        if self.model.is_light() {
            set_series(&self.families.brightness, &self.labels, ROGUE_BELOW_RANGE);
            set_series(
                &self.families.colour_temperature,
                &self.labels,
                ROGUE_BELOW_RANGE,
            );
            set_series(&self.families.hue, &self.labels, ROGUE_BELOW_RANGE);
            set_series(&self.families.saturation, &self.labels, ROGUE_BELOW_RANGE);
        }
        if self.model.has_energy_monitoring() {
            set_series(&self.families.power_milliwatts, &self.labels, ROGUE_BELOW_RANGE);
            set_series(
                &self.families.today_energy_watt_hours,
                &self.labels,
                ROGUE_BELOW_RANGE,
            );
            set_series(
                &self.families.month_energy_watt_hours,
                &self.labels,
                ROGUE_BELOW_RANGE,
            );
        }
    }
}
