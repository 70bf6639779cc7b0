use crate::device::error::DeviceError;
use crate::device::Model;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Everything one poll of a Kasa device yields. The optional parts are
/// present exactly when the model's capabilities require them.
#[derive(Debug, Default)]
pub(crate) struct PeriodicDeviceReport {
    pub common: Common,
    pub switch_info: Option<SmartPlugInfo>,
    pub light_info: Option<SmartBulbInfo>,
    pub energy_meter: Option<EnergyMeterInfo>,
    pub scrape_duration: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct Common {
    pub active_mode: String,
    pub alias: String,
    pub model_description: String,
    pub device_id: String,
    pub firmware_version: String,
    pub hardware_id: String,
    pub oem_id: String,
    pub mac: String,
    pub model_name: String,
    pub wifi_rssi: i64,
    pub device_type: String,
}

#[derive(Debug)]
pub(crate) struct SmartPlugInfo {
    pub relay_on: bool,
    pub led_on: bool,
    pub on_time: Duration,
    pub updating: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SmartBulbInfo {
    pub is_on: bool,
    pub is_dimmable: bool,
    pub is_colour: bool,
    pub is_variable_colour_temperature: bool,
    pub mode: String,
    pub hue: i64,
    pub saturation: i64,
    pub colour_temperature: i64,
    pub brightness: i64,
    pub lamp_beam_angle: i64,
    pub min_voltage: i64,
    pub max_voltage: i64,
    pub wattage: i64,
    pub incandescent_equivalent: i64,
    pub max_lumens: i64,
}

#[derive(Debug)]
pub(crate) struct EnergyMeterInfo {
    pub voltage_millivolts: Option<i64>,
    pub current_milliamps: Option<i64>,
    pub power_milliwatts: i64,
    pub total_energy_watt_hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PlugSysInfo {
    active_mode: String,
    alias: String,
    dev_name: String,
    #[serde(rename = "deviceId")]
    device_id: String,
    #[serde(rename = "hwId")]
    hardware_id: String,
    #[serde(rename = "sw_ver")]
    software_version: String,
    #[serde(rename = "oemId")]
    oem_id: String,
    mac: String,
    model: String,
    rssi: i64,
    #[serde(rename = "type")]
    device_type: String,
    relay_state: i64,
    led_off: i64,
    on_time: i64,
    updating: i64,
}

#[derive(Debug, Deserialize)]
struct BulbSysInfo {
    active_mode: String,
    alias: String,
    description: String,
    #[serde(rename = "deviceId")]
    device_id: String,
    #[serde(rename = "hwId")]
    hardware_id: String,
    #[serde(rename = "sw_ver")]
    software_version: String,
    #[serde(rename = "oemId")]
    oem_id: String,
    mic_mac: String,
    model: String,
    rssi: i64,
    #[serde(rename = "mic_type")]
    device_type: String,
    is_dimmable: i64,
    is_color: i64,
    is_variable_color_temp: i64,
    light_state: LightState,
}

/// When the bulb is off the colour fields move under `dft_on_state`, which
/// is not a current reading and is ignored.
#[derive(Debug, Deserialize)]
struct LightState {
    on_off: i64,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    hue: Option<i64>,
    #[serde(default)]
    saturation: Option<i64>,
    #[serde(default)]
    color_temp: Option<i64>,
    #[serde(default)]
    brightness: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct EmeterRealtime {
    power_mw: i64,
    #[serde(default)]
    voltage_mv: Option<i64>,
    #[serde(default)]
    current_ma: Option<i64>,
    #[serde(default)]
    total_wh: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LightDetails {
    lamp_beam_angle: i64,
    min_voltage: i64,
    max_voltage: i64,
    wattage: i64,
    incandescent_equivalent: i64,
    max_lumens: i64,
}

pub(crate) fn build(
    model: Model,
    sys_info: &[u8],
    emeter: Option<&[u8]>,
    light_details: Option<&[u8]>,
) -> Result<PeriodicDeviceReport, DeviceError> {
    let mut report = PeriodicDeviceReport::default();
    append_device_info(model, sys_info, &mut report)?;
    if let Some(emeter) = emeter {
        append_emeter_info(model, emeter, &mut report)?;
    }
    if let Some(light_details) = light_details {
        append_lamp_info(light_details, &mut report)?;
    }
    Ok(report)
}

fn append_device_info(
    model: Model,
    payload: &[u8],
    report: &mut PeriodicDeviceReport,
) -> Result<(), DeviceError> {
    let value: Value = serde_json::from_slice(payload)?;
    let data = section(&value, "system", "get_sysinfo")?;
    if model.is_light() {
        let info: BulbSysInfo = serde_json::from_value(data.clone())?;
        let is_on = info.light_state.on_off == 1;
        report.common = Common {
            active_mode: info.active_mode,
            alias: info.alias,
            model_description: info.description,
            device_id: info.device_id,
            firmware_version: info.software_version,
            hardware_id: info.hardware_id,
            oem_id: info.oem_id,
            mac: info.mic_mac,
            model_name: info.model,
            wifi_rssi: info.rssi,
            device_type: info.device_type,
        };
        report.light_info = Some(SmartBulbInfo {
            is_on,
            is_dimmable: info.is_dimmable == 1,
            is_colour: info.is_color == 1,
            is_variable_colour_temperature: info.is_variable_color_temp == 1,
            mode: info.light_state.mode.filter(|_| is_on).unwrap_or_default(),
            hue: current_reading(is_on, info.light_state.hue),
            saturation: current_reading(is_on, info.light_state.saturation),
            colour_temperature: current_reading(is_on, info.light_state.color_temp),
            brightness: current_reading(is_on, info.light_state.brightness),
            ..SmartBulbInfo::default()
        });
    } else {
        let info: PlugSysInfo = serde_json::from_value(data.clone())?;
        report.common = Common {
            active_mode: info.active_mode,
            alias: info.alias,
            model_description: info.dev_name,
            device_id: info.device_id,
            firmware_version: info.software_version,
            hardware_id: info.hardware_id,
            oem_id: info.oem_id,
            mac: info.mac.replace(':', ""),
            model_name: info.model,
            wifi_rssi: info.rssi,
            device_type: info.device_type,
        };
        report.switch_info = Some(SmartPlugInfo {
            relay_on: info.relay_state == 1,
            led_on: info.led_off == 0,
            on_time: Duration::from_secs(info.on_time.max(0) as u64),
            updating: info.updating != 0,
        });
    }
    Ok(())
}

fn current_reading(is_on: bool, value: Option<i64>) -> i64 {
    if is_on {
        value.unwrap_or(0)
    } else {
        0
    }
}

fn append_emeter_info(
    model: Model,
    payload: &[u8],
    report: &mut PeriodicDeviceReport,
) -> Result<(), DeviceError> {
    let value: Value = serde_json::from_slice(payload)?;
    let data = section(&value, emeter_section(model), "get_realtime")?;
    let realtime: EmeterRealtime = serde_json::from_value(data.clone())?;
    report.energy_meter = Some(EnergyMeterInfo {
        voltage_millivolts: realtime.voltage_mv,
        current_milliamps: realtime.current_ma,
        power_milliwatts: realtime.power_mw,
        total_energy_watt_hours: realtime.total_wh,
    });
    Ok(())
}

fn emeter_section(model: Model) -> &'static str {
    if model.is_light() {
        "smartlife.iot.common.emeter"
    } else {
        "emeter"
    }
}

fn append_lamp_info(payload: &[u8], report: &mut PeriodicDeviceReport) -> Result<(), DeviceError> {
    let value: Value = serde_json::from_slice(payload)?;
    let data = section(
        &value,
        "smartlife.iot.smartbulb.lightingservice",
        "get_light_details",
    )?;
    let details: LightDetails = serde_json::from_value(data.clone())?;
    let light_info = report.light_info.get_or_insert_with(SmartBulbInfo::default);
    light_info.lamp_beam_angle = details.lamp_beam_angle;
    light_info.min_voltage = details.min_voltage;
    light_info.max_voltage = details.max_voltage;
    light_info.wattage = details.wattage;
    light_info.incandescent_equivalent = details.incandescent_equivalent;
    light_info.max_lumens = details.max_lumens;
    Ok(())
}

/// Extracts `value[outer][inner]` and enforces a zero `err_code`.
fn section<'a>(
    value: &'a Value,
    outer: &'static str,
    inner: &'static str,
) -> Result<&'a Value, DeviceError> {
    let data = value
        .get(outer)
        .and_then(|nested| nested.get(inner))
        .ok_or(DeviceError::MissingField(outer))?;
    match data.get("err_code").and_then(Value::as_i64) {
        Some(0) => Ok(data),
        Some(code) => Err(DeviceError::ErrorCode(code)),
        None => Err(DeviceError::MissingField("err_code")),
    }
}
