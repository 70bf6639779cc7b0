use crate::device::{DeviceConfig, Family, Model};
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Prometheus exporter polling Kasa and Tapo smart plugs and bulbs over
/// the local network.
#[derive(Debug, Parser)]
#[command(name = "homepower-exporter", version)]
pub struct Args {
    /// Path to the JSON device manifest
    #[arg(long, env = "HOMEPOWER_DEVICES_PATH", default_value = "devices.json")]
    devices_path: String,

    /// Bind address for the metrics endpoint
    #[arg(long, env = "HOMEPOWER_HTTP_BIND", default_value = "0.0.0.0:9981")]
    http_bind: String,

    /// Seconds between polls of each device
    #[arg(long, env = "HOMEPOWER_POLL_INTERVAL_SECONDS", default_value_t = 10)]
    poll_interval_seconds: u64,

    /// Upper bound on the extra random delay added to every tick
    #[arg(long, env = "HOMEPOWER_POLL_JITTER_MS", default_value_t = 2000)]
    poll_jitter_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub devices: Vec<DeviceConfig>,
    pub tapo_credentials: Option<Credentials>,
    pub http_bind: String,
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self> {
        let raw = std::fs::read_to_string(&args.devices_path)
            .with_context(|| format!("could not read device manifest '{}'", args.devices_path))?;
        let manifest = parse_manifest(&raw)?;
        if manifest.devices.is_empty() {
            bail!("device manifest '{}' lists no devices", args.devices_path);
        }

        // Environment credentials take precedence over the manifest's.
        let tapo_credentials = credentials_from_env().or(manifest.tapo_credentials);
        let needs_tapo = manifest
            .devices
            .iter()
            .any(|device| device.model.family() == Family::Tapo);
        if needs_tapo && tapo_credentials.is_none() {
            bail!(
                "tapo credentials are required when tapo devices are configured; \
                 set TAPO_EMAIL and TAPO_PASSWORD or add a 'tapo' section to the manifest"
            );
        }

        Ok(Self {
            devices: manifest.devices,
            tapo_credentials,
            http_bind: args.http_bind,
            poll_interval: Duration::from_secs(args.poll_interval_seconds),
            poll_jitter: Duration::from_millis(args.poll_jitter_ms),
        })
    }
}

#[derive(Debug)]
pub(crate) struct Manifest {
    pub devices: Vec<DeviceConfig>,
    pub tapo_credentials: Option<Credentials>,
}

pub(crate) fn parse_manifest(raw: &str) -> Result<Manifest> {
    #[derive(Debug, Deserialize)]
    struct DeviceFromFile {
        name: String,
        #[serde(default)]
        room: String,
        ip: String,
        model: String,
    }
    #[derive(Debug, Deserialize)]
    struct CredentialsFromFile {
        email: String,
        password: String,
    }
    #[derive(Debug, Deserialize)]
    struct ManifestFile {
        devices: Vec<DeviceFromFile>,
        #[serde(default)]
        tapo: Option<CredentialsFromFile>,
    }

    let parsed: ManifestFile =
        serde_json::from_str(raw).context("could not parse device manifest")?;
    let devices = parsed
        .devices
        .into_iter()
        .map(|device| {
            let model = Model::parse(&device.model).ok_or_else(|| {
                anyhow!(
                    "unknown device model '{}' for device '{}'",
                    device.model,
                    device.name
                )
            })?;
            Ok(DeviceConfig {
                name: device.name,
                room: device.room,
                ip: device.ip,
                model,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Manifest {
        devices,
        tapo_credentials: parsed.tapo.map(|tapo| Credentials {
            email: tapo.email,
            password: tapo.password,
        }),
    })
}

fn credentials_from_env() -> Option<Credentials> {
    let email = env_optional("TAPO_EMAIL")?;
    let password = env_optional("TAPO_PASSWORD")?;
    Some(Credentials { email, password })
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_with_known_models_parses() {
        let manifest = r#"{
            "devices": [
                {"name": "Kettle", "room": "Kitchen", "ip": "192.168.1.63", "model": "HS110"},
                {"name": "Strip", "ip": "192.168.1.56", "model": "L900"}
            ],
            "tapo": {"email": "test@example.com", "password": "test_password"}
        }"#;
        let manifest = parse_manifest(manifest).expect("manifest parses");
        assert_eq!(manifest.devices.len(), 2);
        assert_eq!(manifest.devices[0].model, Model::KasaHs110);
        assert_eq!(manifest.devices[1].model, Model::TapoL900);
        assert_eq!(manifest.devices[1].room, "");
        let credentials = manifest.tapo_credentials.expect("credentials present");
        assert_eq!(credentials.email, "test@example.com");
    }

    #[test]
    fn manifest_without_credentials_parses() {
        let manifest = r#"{
            "devices": [
                {"name": "Kettle", "room": "Kitchen", "ip": "192.168.1.63", "model": "HS110"}
            ]
        }"#;
        let manifest = parse_manifest(manifest).expect("manifest parses");
        assert!(manifest.tapo_credentials.is_none());
    }

    #[test]
    fn manifest_with_unknown_model_fails_startup() {
        let manifest = r#"{
            "devices": [
                {"name": "Mystery", "room": "Loft", "ip": "192.168.1.99", "model": "HS200"}
            ]
        }"#;
        let err = parse_manifest(manifest).expect_err("unknown model must fail");
        assert!(err.to_string().contains("HS200"));
    }

    #[test]
    fn malformed_manifest_fails_startup() {
        assert!(parse_manifest("{").is_err());
        assert!(parse_manifest(r#"{"devices": [{"name": "x"}]}"#).is_err());
    }
}
