use super::report::PeriodicDeviceReport;
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
    model_description: String,
    oem_id: String,
    device_type: String,
}

impl InfoLabels {
    fn new(common: &CommonLabels, report: &PeriodicDeviceReport) -> Self {
        Self {
            dev_room: common.dev_room.clone(),
            dev_name: common.dev_name.clone(),
            dev_ip: common.dev_ip.clone(),
            dev_full_name: common.dev_full_name.clone(),
            is_light: common.is_light.clone(),
            alias: report.common.alias.clone(),
            device_id: report.common.device_id.clone(),
            firmware_version: report.common.firmware_version.clone(),
            hardware_id: report.common.hardware_id.clone(),
            mac_address: report.common.mac.clone(),
            model_name: report.common.model_name.clone(),
            model_description: report.common.model_description.clone(),
            oem_id: report.common.oem_id.clone(),
            device_type: report.common.device_type.clone(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BulbInfoLabels {
    dev_room: String,
    dev_name: String,
    dev_ip: String,
    dev_full_name: String,
    is_light: String,
    is_dimmable: String,
    is_colour: String,
    is_variable_temp: String,
    beam_angle: String,
    min_voltage: String,
    max_voltage: String,
    wattage: String,
    incandescent_equiv: String,
    max_lumens: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ModeLabels {
    dev_room: String,
    dev_name: String,
    dev_ip: String,
    dev_full_name: String,
    is_light: String,
    mode: String,
}

impl ModeLabels {
    fn new(common: &CommonLabels, mode: &str) -> Self {
        Self {
            dev_room: common.dev_room.clone(),
            dev_name: common.dev_name.clone(),
            dev_ip: common.dev_ip.clone(),
            dev_full_name: common.dev_full_name.clone(),
            is_light: common.is_light.clone(),
            mode: mode.to_string(),
        }
    }
}

/// One family per metric name, registered once under the `kasa` prefix and
/// shared by every Kasa device. Each device owns the series keyed by its
/// own label set.
#[derive(Clone, Default)]
pub(crate) struct Families {
    info: Family<InfoLabels, FloatGauge>,
    active_mode: Family<ModeLabels, FloatGauge>,
    bulb_info: Family<BulbInfoLabels, FloatGauge>,
    bulb_mode: Family<ModeLabels, FloatGauge>,
    wifi_rssi: GaugeFamily,
    device_turned_on: GaugeFamily,
    led_turned_on: GaugeFamily,
    on_time: GaugeFamily,
    is_updating: GaugeFamily,
    brightness: GaugeFamily,
    colour_temperature: GaugeFamily,
    hue: GaugeFamily,
    saturation: GaugeFamily,
    power_milliwatts: GaugeFamily,
    voltage_millivolts: GaugeFamily,
    current_milliamps: GaugeFamily,
    total_watt_hours: GaugeFamily,
}

impl Families {
    pub(crate) fn register(registry: &mut Registry) -> Self {
        let registry = registry.sub_registry_with_prefix("kasa");
        let families = Self::default();
        registry.register("device_info", "Static device identity", families.info.clone());
        registry.register(
            "active_mode",
            "Mode the device is operating in",
            families.active_mode.clone(),
        );
        registry.register(
            "bulb_info",
            "Static lamp characteristics",
            families.bulb_info.clone(),
        );
        registry.register(
            "bulb_mode",
            "Mode the lamp is lit in",
            families.bulb_mode.clone(),
        );
        registry.register(
            "wifi_rssi_db",
            "Wi-Fi signal strength",
            families.wifi_rssi.clone(),
        );
        registry.register(
            "device_turned_on_bool",
            "Whether the relay or lamp is on",
            families.device_turned_on.clone(),
        );
        registry.register(
            "led_turned_on_bool",
            "Whether the status LED is lit",
            families.led_turned_on.clone(),
        );
        registry.register(
            "switched_on_time_seconds",
            "How long the relay has been on",
            families.on_time.clone(),
        );
        registry.register(
            "is_updating_bool",
            "Whether a firmware update is in progress",
            families.is_updating.clone(),
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
            "em_total_energy_wh",
            "Lifetime energy consumed",
            families.total_watt_hours.clone(),
        );
        registry.register(
            "em_current_ma",
            "Instantaneous current draw",
            families.current_milliamps.clone(),
        );
        registry.register(
            "em_voltage_mv",
            "Instantaneous mains voltage",
            families.voltage_millivolts.clone(),
        );
        families
    }
}

/// One Kasa device's view of the shared families. Remembers the label sets
/// it last emitted on the info/mode families so they can be withdrawn
/// before re-emission and on reset.
pub(crate) struct KasaMetrics {
    model: Model,
    labels: CommonLabels,
    families: Families,
    last_info: Option<InfoLabels>,
    last_bulb_info: Option<BulbInfoLabels>,
    last_active_mode: Option<ModeLabels>,
    last_bulb_mode: Option<ModeLabels>,
}

impl KasaMetrics {
    pub(crate) fn new(families: &Families, config: &DeviceConfig) -> Self {
        let mut metrics = Self {
            model: config.model,
            labels: CommonLabels::from_config(config),
            families: families.clone(),
            last_info: None,
            last_bulb_info: None,
            last_active_mode: None,
            last_bulb_mode: None,
        };
        metrics.reset_to_rogue_values();
        metrics
    }

    pub(crate) fn update(&mut self, report: &PeriodicDeviceReport) {
        set_series_int(&self.families.wifi_rssi, &self.labels, report.common.wifi_rssi);
        if let Some(plug) = &report.switch_info {
            set_series_bool(&self.families.device_turned_on, &self.labels, plug.relay_on);
            set_series_bool(&self.families.led_turned_on, &self.labels, plug.led_on);
            set_series_duration_seconds(&self.families.on_time, &self.labels, plug.on_time);
            set_series_bool(&self.families.is_updating, &self.labels, plug.updating);
        }
        if let Some(bulb) = &report.light_info {
            set_series_bool(&self.families.device_turned_on, &self.labels, bulb.is_on);
            set_series_int(&self.families.brightness, &self.labels, bulb.brightness);
            if self.model.is_light_variable_temperature() {
                set_series_int(
                    &self.families.colour_temperature,
                    &self.labels,
                    bulb.colour_temperature,
                );
            }
            if self.model.is_light_coloured() {
                set_series_int(&self.families.hue, &self.labels, bulb.hue);
                set_series_int(&self.families.saturation, &self.labels, bulb.saturation);
            }
            if let Some(previous) = self.last_bulb_info.take() {
                self.families.bulb_info.remove(&previous);
            }
            let bulb_info = BulbInfoLabels {
                dev_room: self.labels.dev_room.clone(),
                dev_name: self.labels.dev_name.clone(),
                dev_ip: self.labels.dev_ip.clone(),
                dev_full_name: self.labels.dev_full_name.clone(),
                is_light: self.labels.is_light.clone(),
                is_dimmable: bulb.is_dimmable.to_string(),
                is_colour: bulb.is_colour.to_string(),
                is_variable_temp: bulb.is_variable_colour_temperature.to_string(),
                beam_angle: bulb.lamp_beam_angle.to_string(),
                min_voltage: bulb.min_voltage.to_string(),
                max_voltage: bulb.max_voltage.to_string(),
                wattage: bulb.wattage.to_string(),
                incandescent_equiv: bulb.incandescent_equivalent.to_string(),
                max_lumens: bulb.max_lumens.to_string(),
            };
            self.families.bulb_info.get_or_create(&bulb_info).set(1.0);
            self.last_bulb_info = Some(bulb_info);

            if let Some(previous) = self.last_bulb_mode.take() {
                self.families.bulb_mode.remove(&previous);
            }
            let bulb_mode = ModeLabels::new(&self.labels, &bulb.mode);
            self.families.bulb_mode.get_or_create(&bulb_mode).set(1.0);
            self.last_bulb_mode = Some(bulb_mode);
        }
        if let Some(meter) = &report.energy_meter {
            if self.model.has_power_monitoring() {
                set_series_int(
                    &self.families.power_milliwatts,
                    &self.labels,
                    meter.power_milliwatts,
                );
            }
            if self.model.has_total_energy_monitoring() {
                if let Some(total) = meter.total_energy_watt_hours {
                    set_series_int(&self.families.total_watt_hours, &self.labels, total);
                }
            }
            if self.model.has_current_and_voltage_monitoring() {
                if let Some(current) = meter.current_milliamps {
                    set_series_int(&self.families.current_milliamps, &self.labels, current);
                }
                if let Some(voltage) = meter.voltage_millivolts {
                    set_series_int(&self.families.voltage_millivolts, &self.labels, voltage);
                }
            }
        }
        if let Some(previous) = self.last_info.take() {
            self.families.info.remove(&previous);
        }
        let info = InfoLabels::new(&self.labels, report);
        self.families.info.get_or_create(&info).set(1.0);
        self.last_info = Some(info);

        if let Some(previous) = self.last_active_mode.take() {
            self.families.active_mode.remove(&previous);
        }
        let active_mode = ModeLabels::new(&self.labels, &report.common.active_mode);
        self.families.active_mode.get_or_create(&active_mode).set(1.0);
        self.last_active_mode = Some(active_mode);
    }

    pub(crate) fn reset_to_rogue_values(&mut self) {
        if let Some(previous) = self.last_info.take() {
            self.families.info.remove(&previous);
        }
        if let Some(previous) = self.last_bulb_info.take() {
            self.families.bulb_info.remove(&previous);
        }
        if let Some(previous) = self.last_active_mode.take() {
            self.families.active_mode.remove(&previous);
        }
        if let Some(previous) = self.last_bulb_mode.take() {
            self.families.bulb_mode.remove(&previous);
        }
        set_series(&self.families.wifi_rssi, &self.labels, ROGUE_ABOVE_RANGE);
        set_series(&self.families.device_turned_on, &self.labels, ROGUE_BELOW_RANGE);
        if self.model.is_switch() {
            set_series(&self.families.led_turned_on, &self.labels, ROGUE_BELOW_RANGE);
            set_series(&self.families.on_time, &self.labels, ROGUE_BELOW_RANGE);
            set_series(&self.families.is_updating, &self.labels, ROGUE_BELOW_RANGE);
        }
        if self.model.is_light() {
            set_series(&self.families.brightness, &self.labels, ROGUE_BELOW_RANGE);
            if self.model.is_light_variable_temperature() {
                set_series(
                    &self.families.colour_temperature,
                    &self.labels,
                    ROGUE_BELOW_RANGE,
                );
            }
            if self.model.is_light_coloured() {
                set_series(&self.families.hue, &self.labels, ROGUE_BELOW_RANGE);
                set_series(&self.families.saturation, &self.labels, ROGUE_BELOW_RANGE);
            }
        }
        if self.model.has_power_monitoring() {
            set_series(&self.families.power_milliwatts, &self.labels, ROGUE_BELOW_RANGE);
        }
        if self.model.has_total_energy_monitoring() {
            set_series(&self.families.total_watt_hours, &self.labels, ROGUE_BELOW_RANGE);
        }
        if self.model.has_current_and_voltage_monitoring() {
            set_series(&self.families.current_milliamps, &self.labels, ROGUE_BELOW_RANGE);
            set_series(&self.families.voltage_millivolts, &self.labels, ROGUE_BELOW_RANGE);
        }
    }
}
