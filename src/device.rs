pub mod error;
pub mod kasa;
pub mod tapo;

use crate::config::Credentials;
use crate::metrics::CommonLabels;
use anyhow::{Context, Result};
use error::DeviceError;
use prometheus_client::registry::Registry;

/// Every device model the exporter knows how to scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    KasaHs100,
    KasaHs110,
    KasaKl50b,
    KasaKl110b,
    KasaKl130b,
    TapoL900,
    TapoP100,
    TapoP110,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Kasa,
    Tapo,
}

impl Model {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "HS100" => Some(Self::KasaHs100),
            "HS110" => Some(Self::KasaHs110),
            "KL50B" => Some(Self::KasaKl50b),
            "KL110B" => Some(Self::KasaKl110b),
            "KL130B" => Some(Self::KasaKl130b),
            "L900" => Some(Self::TapoL900),
            "P100" => Some(Self::TapoP100),
            "P110" => Some(Self::TapoP110),
            _ => None,
        }
    }

    pub fn family(self) -> Family {
        match self {
            Self::KasaHs100 | Self::KasaHs110 | Self::KasaKl50b | Self::KasaKl110b
            | Self::KasaKl130b => Family::Kasa,
            Self::TapoL900 | Self::TapoP100 | Self::TapoP110 => Family::Tapo,
        }
    }

    pub fn is_light(self) -> bool {
        matches!(
            self,
            Self::KasaKl50b | Self::KasaKl110b | Self::KasaKl130b | Self::TapoL900
        )
    }

    pub fn is_switch(self) -> bool {
        matches!(
            self,
            Self::KasaHs100 | Self::KasaHs110 | Self::TapoP100 | Self::TapoP110
        )
    }

    pub fn has_power_monitoring(self) -> bool {
        matches!(
            self,
            Self::KasaHs110 | Self::KasaKl50b | Self::KasaKl110b | Self::KasaKl130b
        )
    }

    pub fn has_total_energy_monitoring(self) -> bool {
        matches!(self, Self::KasaHs110 | Self::KasaKl50b | Self::KasaKl130b)
    }

    pub fn has_current_and_voltage_monitoring(self) -> bool {
        matches!(self, Self::KasaHs110 | Self::KasaKl50b)
    }

    pub fn is_light_coloured(self) -> bool {
        matches!(self, Self::KasaKl130b | Self::TapoL900)
    }

    pub fn is_light_variable_temperature(self) -> bool {
        matches!(self, Self::KasaKl130b | Self::TapoL900)
    }

    /// Kasa devices answering the realtime e-meter query.
    pub fn supports_emeter(self) -> bool {
        self.has_power_monitoring()
            || self.has_total_energy_monitoring()
            || self.has_current_and_voltage_monitoring()
    }

    /// Tapo devices answering `get_energy_usage`.
    pub fn has_energy_monitoring(self) -> bool {
        matches!(self, Self::TapoP110)
    }
}

/// Static per-device configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    pub room: String,
    pub ip: String,
    pub model: Model,
}

/// The shared metric families, one set per vendor family. Each set is
/// registered on first use, so an inventory without (say) Tapo devices
/// never exposes the `tapo_` names.
#[derive(Default)]
pub struct DeviceFamilies {
    kasa: Option<kasa::Families>,
    tapo: Option<tapo::Families>,
}

/// Driver dispatch. One per configured device, owned by its poller task.
pub enum DeviceDriver {
    Kasa(kasa::Device),
    Tapo(tapo::Device),
}

impl DeviceDriver {
    pub fn new(
        config: &DeviceConfig,
        credentials: Option<&Credentials>,
        families: &mut DeviceFamilies,
        registry: &mut Registry,
    ) -> Result<Self> {
        match config.model.family() {
            Family::Kasa => {
                let families = families
                    .kasa
                    .get_or_insert_with(|| kasa::Families::register(registry));
                Ok(Self::Kasa(kasa::Device::new(
                    config,
                    kasa::DEFAULT_PORT,
                    families,
                )))
            }
            Family::Tapo => {
                let credentials = credentials.with_context(|| {
                    format!("tapo credentials are required to poll '{}'", config.name)
                })?;
                let families = families
                    .tapo
                    .get_or_insert_with(|| tapo::Families::register(registry));
                Ok(Self::Tapo(tapo::Device::new(
                    &credentials.email,
                    &credentials.password,
                    config,
                    tapo::DEFAULT_PORT,
                    families,
                )))
            }
        }
    }

    pub async fn poll_and_update_metrics(&mut self) -> Result<(), DeviceError> {
        match self {
            Self::Kasa(device) => device.poll_and_update_metrics().await,
            Self::Tapo(device) => device.poll_and_update_metrics().await,
        }
    }

    pub fn reset_metrics_to_rogue_values(&mut self) {
        match self {
            Self::Kasa(device) => device.reset_metrics_to_rogue_values(),
            Self::Tapo(device) => device.reset_metrics_to_rogue_values(),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        match self {
            Self::Kasa(device) => device.config(),
            Self::Tapo(device) => device.config(),
        }
    }

    pub fn common_metric_labels(&self) -> CommonLabels {
        CommonLabels::from_config(self.config())
    }
}
