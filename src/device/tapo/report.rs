use crate::device::error::DeviceError;
use base64::prelude::{Engine, BASE64_STANDARD};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const PLUG_DEVICE_TYPE: &str = "SMART.TAPOPLUG";
const BULB_DEVICE_TYPE: &str = "SMART.TAPOBULB";

/// One poll's worth of Tapo device state.
#[derive(Debug)]
pub(crate) struct DeviceStatus {
    pub common: Common,
    pub switch_info: Option<SmartPlugInfo>,
    pub bulb_info: Option<SmartBulbInfo>,
    pub energy_meter: Option<EnergyMeterInfo>,
    pub scrape_duration: Duration,
}

#[derive(Debug)]
pub(crate) struct Common {
    pub alias: String,
    pub device_id: String,
    pub firmware_version: String,
    pub hardware_id: String,
    pub mac: String,
    pub model_name: String,
    pub oem_id: String,
    pub overheated: bool,
    pub wifi_rssi: i64,
    pub signal_level: i64,
    pub device_type: String,
}

#[derive(Debug)]
pub(crate) struct SmartPlugInfo {
    pub relay_on: bool,
    pub on_time: Duration,
}

#[derive(Debug)]
pub(crate) struct SmartBulbInfo {
    pub light_on: bool,
    pub brightness: i64,
    pub colour_temperature: i64,
    pub hue: i64,
    pub saturation: i64,
}

#[derive(Debug)]
pub(crate) struct EnergyMeterInfo {
    pub power_milliwatts: i64,
    pub today_energy_watt_hours: i64,
    pub month_energy_watt_hours: i64,
}

#[derive(Debug, Deserialize)]
struct DeviceInfoResult {
    nickname: String,
    device_id: String,
    fw_ver: String,
    hw_id: String,
    mac: String,
    model: String,
    oem_id: String,
    // Older firmware reports a boolean, 2024 firmware a status string.
    #[serde(default)]
    overheated: Option<bool>,
    #[serde(default)]
    overheat_status: Option<String>,
    rssi: i64,
    signal_level: i64,
    #[serde(rename = "type")]
    device_type: String,
    #[serde(default)]
    device_on: Option<bool>,
    #[serde(default)]
    on_time: Option<i64>,
    #[serde(default)]
    brightness: Option<i64>,
    #[serde(default)]
    color_temp: Option<i64>,
    #[serde(default)]
    hue: Option<i64>,
    #[serde(default)]
    saturation: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct EnergyUsageResult {
    current_power: i64,
    today_energy: i64,
    month_energy: i64,
}

pub(crate) fn device_status_from_info(result: &Value) -> Result<DeviceStatus, DeviceError> {
    let info: DeviceInfoResult = serde_json::from_value(result.clone())?;
    let overheated = match (info.overheated, info.overheat_status.as_deref()) {
        (Some(flag), _) => flag,
        (None, Some(status)) => status != "normal",
        (None, None) => false,
    };
    let mut status = DeviceStatus {
        common: Common {
            alias: decode_nickname(&info.nickname)?,
            device_id: info.device_id,
            firmware_version: info.fw_ver,
            hardware_id: info.hw_id,
            mac: normalize_mac(&info.mac),
            model_name: info.model,
            oem_id: info.oem_id,
            overheated,
            wifi_rssi: info.rssi,
            signal_level: info.signal_level,
            device_type: info.device_type.clone(),
        },
        switch_info: None,
        bulb_info: None,
        energy_meter: None,
        scrape_duration: Duration::ZERO,
    };
    match info.device_type.as_str() {
        PLUG_DEVICE_TYPE => {
            status.switch_info = Some(SmartPlugInfo {
                relay_on: info.device_on.unwrap_or(false),
                on_time: Duration::from_secs(info.on_time.unwrap_or(0).max(0) as u64),
            });
        }
        BULB_DEVICE_TYPE => {
            status.bulb_info = Some(SmartBulbInfo {
                light_on: info.device_on.unwrap_or(false),
                brightness: info.brightness.unwrap_or(0),
                colour_temperature: info.color_temp.unwrap_or(0),
                hue: info.hue.unwrap_or(0),
                saturation: info.saturation.unwrap_or(0),
            });
        }
        _ => {}
    }
    Ok(status)
}

pub(crate) fn energy_meter_from_usage(result: &Value) -> Result<EnergyMeterInfo, DeviceError> {
    let usage: EnergyUsageResult = serde_json::from_value(result.clone())?;
    Ok(EnergyMeterInfo {
        power_milliwatts: usage.current_power,
        today_energy_watt_hours: usage.today_energy,
        month_energy_watt_hours: usage.month_energy,
    })
}

/// Nicknames come over the wire Base64-encoded.
fn decode_nickname(nickname: &str) -> Result<String, DeviceError> {
    let bytes = BASE64_STANDARD.decode(nickname)?;
    String::from_utf8(bytes)
        .map(|alias| alias.trim().to_string())
        .map_err(|_| DeviceError::InvalidField("nickname"))
}

fn normalize_mac(mac: &str) -> String {
    mac.chars().filter(|c| c.is_ascii_hexdigit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p110_info() -> Value {
        json!({
            "device_id": "802111122223333444455556666777788889999A",
            "fw_ver": "1.0.7 Build 210629 Rel.174901",
            "hw_ver": "1.0",
            "type": "SMART.TAPOPLUG",
            "model": "P110",
            "mac": "AA-BB-CC-11-22-33",
            "hw_id": "999888777666555444333222111000AA",
            "fw_id": "00000000000000000000000000000000",
            "oem_id": "A3B2C1A3B2C1A3B2C1A3B2C1A3B2C1A3",
            "device_on": true,
            "on_time": 2386,
            "overheated": false,
            "nickname": "RnJpZGdlIEZyZWV6ZXIg",
            "signal_level": 2,
            "rssi": -56,
        })
    }

    #[test]
    fn plug_info_decodes_nickname_and_mac() {
        let status = device_status_from_info(&p110_info()).expect("valid status");
        assert_eq!(status.common.alias, "Fridge Freezer");
        assert_eq!(status.common.mac, "AABBCC112233");
        assert!(!status.common.overheated);
        let plug = status.switch_info.expect("plug info");
        assert!(plug.relay_on);
        assert_eq!(plug.on_time, Duration::from_secs(2386));
        assert!(status.bulb_info.is_none());
    }

    #[test]
    fn overheat_status_string_is_understood() {
        let mut info = p110_info();
        info.as_object_mut().unwrap().remove("overheated");
        info.as_object_mut()
            .unwrap()
            .insert("overheat_status".to_string(), json!("overheated"));
        let status = device_status_from_info(&info).expect("valid status");
        assert!(status.common.overheated);
    }

    #[test]
    fn bulb_info_carries_colour_state() {
        let info = json!({
            "device_id": "L900",
            "fw_ver": "1.0.0",
            "type": "SMART.TAPOBULB",
            "model": "L900-5",
            "mac": "5C:A6:E6:FE:BE:0B",
            "hw_id": "HW",
            "oem_id": "OEM",
            "device_on": true,
            "brightness": 80,
            "color_temp": 0,
            "hue": 240,
            "saturation": 100,
            "nickname": "U3RyaXA=",
            "signal_level": 3,
            "rssi": -40,
        });
        let status = device_status_from_info(&info).expect("valid status");
        assert_eq!(status.common.mac, "5CA6E6FEBE0B");
        let bulb = status.bulb_info.expect("bulb info");
        assert!(bulb.light_on);
        assert_eq!(bulb.hue, 240);
        assert_eq!(bulb.brightness, 80);
    }

    #[test]
    fn energy_usage_maps_to_milliwatts_and_watt_hours() {
        let usage = json!({
            "current_power": 2529,
            "local_time": "2022-09-20 03:05:19",
            "month_energy": 5203,
            "today_energy": 67,
            "today_runtime": 181,
        });
        let meter = energy_meter_from_usage(&usage).expect("valid meter");
        assert_eq!(meter.power_milliwatts, 2529);
        assert_eq!(meter.today_energy_watt_hours, 67);
        assert_eq!(meter.month_energy_watt_hours, 5203);
    }
}
