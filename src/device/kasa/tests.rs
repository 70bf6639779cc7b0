use super::codec;
use super::{Device, Families};
use crate::device::{DeviceConfig, Model};
use crate::metrics::testutil::{
    descriptor_count, has_series, render, sample_value, series_value,
};
use crate::metrics::{ROGUE_ABOVE_RANGE, ROGUE_BELOW_RANGE};
use prometheus_client::registry::Registry;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn device_config(model: Model) -> DeviceConfig {
    named_device_config("Test Device", model)
}

fn named_device_config(name: &str, model: Model) -> DeviceConfig {
    DeviceConfig {
        name: name.to_string(),
        room: "Room".to_string(),
        ip: "127.0.0.1".to_string(),
        model,
    }
}

/// Serves one connection, answering each expected request with the paired
/// response, both Linkie-framed.
async fn spawn_mock_device(conversation: Vec<(&'static str, &'static str)>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        for (expected_request, response) in conversation {
            let mut header = [0u8; 4];
            stream.read_exact(&mut header).await.unwrap();
            let body_len = u32::from_be_bytes(header) as usize;
            let mut frame = header.to_vec();
            frame.resize(4 + body_len, 0);
            stream.read_exact(&mut frame[4..]).await.unwrap();
            let request = codec::unscramble(&frame).unwrap();
            assert_eq!(String::from_utf8(request).unwrap(), expected_request);
            stream
                .write_all(&codec::scramble(response.as_bytes()))
                .await
                .unwrap();
        }
    });
    port
}

/// Like `spawn_mock_device`, but the first connection is dropped without a
/// reply before the conversation is served on the second one.
async fn spawn_flaky_mock_device(conversation: Vec<(&'static str, &'static str)>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
        let (mut stream, _) = listener.accept().await.unwrap();
        for (_, response) in conversation {
            let mut header = [0u8; 4];
            stream.read_exact(&mut header).await.unwrap();
            let body_len = u32::from_be_bytes(header) as usize;
            let mut body = vec![0u8; body_len];
            stream.read_exact(&mut body).await.unwrap();
            stream
                .write_all(&codec::scramble(response.as_bytes()))
                .await
                .unwrap();
        }
    });
    port
}

const HS110_SYSINFO: &str = r#"{"system":{"get_sysinfo":{"err_code":0,"type":"IOT.SMARTPLUGSWITCH","model":"HS110(UK)","mac":"D8:0D:17:6C:7D:47","relay_state":1,"on_time":100,"updating":0,"led_off":0,"active_mode":"none","alias":"Desk","dev_name":"Smart Plug w/EM","deviceId":"ABCD","hwId":"EEEE","sw_ver":"1","oemId":"OEM","rssi":-42}}}"#;

const HS110_EMETER: &str = r#"{"emeter":{"get_realtime":{"err_code":0,"voltage_mv":240000,"current_ma":500,"power_mw":120000,"total_wh":10}}}"#;

const KL130B_SYSINFO: &str = r#"{"system":{"get_sysinfo":{"err_code":0,"sw_ver":"1.0.12 Build 210329 Rel.141126","model":"KL130B(UN)","deviceId":"801211B9312B531B26C449346D30572D1DCE005F","oemId":"E45F76AD3AF13E60B58D6F68739CD7E4","hwId":"1E97141B9F0E939BD8F9679F0B6167C8","rssi":-44,"alias":"Living Room Ceiling Light","description":"Smart Wi-Fi LED Bulb with Color Changing","mic_type":"IOT.SMARTBULB","mic_mac":"C0C9E379178C","dev_state":"normal","active_mode":"none","is_dimmable":1,"is_color":1,"is_variable_color_temp":1,"light_state":{"on_off":1,"mode":"normal","hue":120,"saturation":100,"color_temp":2700,"brightness":75}}}}"#;

const KL130B_EMETER: &str = r#"{"smartlife.iot.common.emeter":{"get_realtime":{"err_code":0,"power_mw":9800,"total_wh":123}}}"#;

const KL130B_LIGHT_DETAILS: &str = r#"{"smartlife.iot.smartbulb.lightingservice":{"get_light_details":{"lamp_beam_angle":220,"min_voltage":220,"max_voltage":240,"wattage":10,"incandescent_equivalent":60,"max_lumens":800,"color_rendering_index":80,"err_code":0}}}"#;

#[tokio::test]
async fn healthy_hs110_poll_populates_every_gauge() {
    let port = spawn_mock_device(vec![
        (super::SYS_INFO_BODY, HS110_SYSINFO),
        (super::EMETER_REALTIME_SHORT_BODY, HS110_EMETER),
    ])
    .await;

    let config = device_config(Model::KasaHs110);
    let mut registry = Registry::default();
    let families = Families::register(&mut registry);
    let mut device = Device::new(&config, port, &families);
    device.poll_and_update_metrics().await.expect("poll succeeds");

    let exposition = render(&registry);
    assert_eq!(
        sample_value(&exposition, "kasa_device_turned_on_bool"),
        Some(1.0)
    );
    assert_eq!(
        sample_value(&exposition, "kasa_switched_on_time_seconds"),
        Some(100.0)
    );
    assert_eq!(sample_value(&exposition, "kasa_em_power_mw"), Some(120000.0));
    assert_eq!(
        sample_value(&exposition, "kasa_em_voltage_mv"),
        Some(240000.0)
    );
    assert_eq!(sample_value(&exposition, "kasa_em_current_ma"), Some(500.0));
    assert_eq!(
        sample_value(&exposition, "kasa_em_total_energy_wh"),
        Some(10.0)
    );
    assert_eq!(sample_value(&exposition, "kasa_wifi_rssi_db"), Some(-42.0));
    assert!(exposition.contains(r#"mac_address="D80D176C7D47""#));
    assert!(exposition.contains(r#"alias="Desk""#));
}

#[tokio::test]
async fn kl130b_poll_issues_all_three_queries_and_fills_bulb_gauges() {
    let port = spawn_mock_device(vec![
        (super::SYS_INFO_BODY, KL130B_SYSINFO),
        (super::EMETER_REALTIME_QUALIFIED_BODY, KL130B_EMETER),
        (super::LIGHT_DETAILS_BODY, KL130B_LIGHT_DETAILS),
    ])
    .await;

    let config = device_config(Model::KasaKl130b);
    let mut registry = Registry::default();
    let families = Families::register(&mut registry);
    let mut device = Device::new(&config, port, &families);
    device.poll_and_update_metrics().await.expect("poll succeeds");

    let exposition = render(&registry);
    assert_eq!(
        sample_value(&exposition, "kasa_device_turned_on_bool"),
        Some(1.0)
    );
    assert_eq!(
        sample_value(&exposition, "kasa_bulb_brightness_percent"),
        Some(75.0)
    );
    assert_eq!(
        sample_value(&exposition, "kasa_bulb_colour_temperature_kelvin"),
        Some(2700.0)
    );
    assert_eq!(sample_value(&exposition, "kasa_bulb_hue"), Some(120.0));
    assert_eq!(
        sample_value(&exposition, "kasa_bulb_saturation_percent"),
        Some(100.0)
    );
    assert_eq!(sample_value(&exposition, "kasa_em_power_mw"), Some(9800.0));
    assert_eq!(
        sample_value(&exposition, "kasa_em_total_energy_wh"),
        Some(123.0)
    );
    assert!(exposition.contains(r#"mode="normal""#));
    assert!(exposition.contains(r#"max_lumens="800""#));
    assert!(exposition.contains(r#"is_light="true""#));
    // KL130B reports no voltage or current.
    assert!(!has_series(&exposition, "kasa_em_voltage_mv", r#"dev_name="Test Device""#));
}

#[tokio::test]
async fn gauges_recover_from_rogue_values_on_the_next_successful_poll() {
    let port = spawn_flaky_mock_device(vec![
        (super::SYS_INFO_BODY, HS110_SYSINFO),
        (super::EMETER_REALTIME_SHORT_BODY, HS110_EMETER),
    ])
    .await;

    let config = device_config(Model::KasaHs110);
    let mut registry = Registry::default();
    let families = Families::register(&mut registry);
    let mut device = Device::new(&config, port, &families);

    device
        .poll_and_update_metrics()
        .await
        .expect_err("first poll fails");
    device.reset_metrics_to_rogue_values();
    let exposition = render(&registry);
    assert_eq!(
        sample_value(&exposition, "kasa_em_power_mw"),
        Some(ROGUE_BELOW_RANGE)
    );
    assert_eq!(
        sample_value(&exposition, "kasa_wifi_rssi_db"),
        Some(ROGUE_ABOVE_RANGE)
    );

    device
        .poll_and_update_metrics()
        .await
        .expect("second poll succeeds");
    let exposition = render(&registry);
    assert_eq!(sample_value(&exposition, "kasa_em_power_mw"), Some(120000.0));
    assert_eq!(sample_value(&exposition, "kasa_wifi_rssi_db"), Some(-42.0));
    assert_eq!(
        sample_value(&exposition, "kasa_device_turned_on_bool"),
        Some(1.0)
    );
}

#[tokio::test]
async fn unreachable_device_resets_gauges_to_rogue_values() {
    // Bind then drop, so the port is very likely closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = device_config(Model::KasaHs110);
    let mut registry = Registry::default();
    let families = Families::register(&mut registry);
    let mut device = Device::new(&config, port, &families);
    device
        .poll_and_update_metrics()
        .await
        .expect_err("poll fails against a closed port");
    device.reset_metrics_to_rogue_values();

    let exposition = render(&registry);
    assert_eq!(
        sample_value(&exposition, "kasa_device_turned_on_bool"),
        Some(ROGUE_BELOW_RANGE)
    );
    assert_eq!(
        sample_value(&exposition, "kasa_wifi_rssi_db"),
        Some(ROGUE_ABOVE_RANGE)
    );
    assert_eq!(
        sample_value(&exposition, "kasa_em_power_mw"),
        Some(ROGUE_BELOW_RANGE)
    );
    assert_eq!(
        sample_value(&exposition, "kasa_switched_on_time_seconds"),
        Some(ROGUE_BELOW_RANGE)
    );
    assert!(!exposition.contains("mac_address="));
}

#[test]
fn per_device_series_follow_the_capability_table() {
    let mut registry = Registry::default();
    let families = Families::register(&mut registry);
    let models = [
        ("HS100", Model::KasaHs100),
        ("HS110", Model::KasaHs110),
        ("KL110B", Model::KasaKl110b),
        ("KL130B", Model::KasaKl130b),
    ];
    let _devices: Vec<Device> = models
        .iter()
        .map(|(name, model)| Device::new(&named_device_config(name, *model), 9999, &families))
        .collect();

    let exposition = render(&registry);
    for (name, model) in models {
        let fragment = format!(r#"dev_name="{name}""#);
        assert_eq!(
            has_series(&exposition, "kasa_em_power_mw", &fragment),
            model.has_power_monitoring(),
            "{model:?}"
        );
        assert_eq!(
            has_series(&exposition, "kasa_em_total_energy_wh", &fragment),
            model.has_total_energy_monitoring(),
            "{model:?}"
        );
        assert_eq!(
            has_series(&exposition, "kasa_em_voltage_mv", &fragment),
            model.has_current_and_voltage_monitoring(),
            "{model:?}"
        );
        assert_eq!(
            has_series(&exposition, "kasa_bulb_brightness_percent", &fragment),
            model.is_light(),
            "{model:?}"
        );
        assert_eq!(
            has_series(&exposition, "kasa_bulb_hue", &fragment),
            model.is_light_coloured(),
            "{model:?}"
        );
        assert_eq!(
            has_series(&exposition, "kasa_led_turned_on_bool", &fragment),
            model.is_switch(),
            "{model:?}"
        );
    }
}

#[tokio::test]
async fn a_fleet_of_same_family_devices_emits_each_descriptor_once() {
    let first_port = spawn_mock_device(vec![
        (super::SYS_INFO_BODY, HS110_SYSINFO),
        (super::EMETER_REALTIME_SHORT_BODY, HS110_EMETER),
    ])
    .await;
    let second_port = spawn_mock_device(vec![
        (super::SYS_INFO_BODY, HS110_SYSINFO),
        (super::EMETER_REALTIME_SHORT_BODY, HS110_EMETER),
    ])
    .await;

    let mut registry = Registry::default();
    let families = Families::register(&mut registry);
    let mut kettle = Device::new(
        &named_device_config("Kettle", Model::KasaHs110),
        first_port,
        &families,
    );
    let mut desk = Device::new(
        &named_device_config("Work Desk Power", Model::KasaHs110),
        second_port,
        &families,
    );
    kettle.poll_and_update_metrics().await.expect("poll succeeds");
    desk.poll_and_update_metrics().await.expect("poll succeeds");

    let exposition = render(&registry);
    for name in [
        "kasa_wifi_rssi_db",
        "kasa_device_turned_on_bool",
        "kasa_em_power_mw",
        "kasa_device_info",
        "kasa_active_mode",
    ] {
        assert_eq!(descriptor_count(&exposition, name), 1, "{name}");
    }
    assert_eq!(
        series_value(&exposition, "kasa_em_power_mw", r#"dev_name="Kettle""#),
        Some(120000.0)
    );
    assert_eq!(
        series_value(
            &exposition,
            "kasa_em_power_mw",
            r#"dev_name="Work Desk Power""#
        ),
        Some(120000.0)
    );
}
