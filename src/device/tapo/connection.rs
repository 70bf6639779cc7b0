use super::klap::KlapConnection;
use super::passthrough::PassthroughConnection;
use crate::device::error::DeviceError;
use serde_json::Value;

pub(crate) enum Variant {
    Klap(KlapConnection),
    Passthrough(PassthroughConnection),
}

/// Picks the protocol variant lazily on first use: KLAP if its key exchange
/// succeeds, otherwise the legacy passthrough protocol. The choice is pinned
/// for the lifetime of the connection.
pub(crate) struct TapoConnection {
    email: String,
    password: String,
    ip: String,
    port: u16,
    variant: Option<Variant>,
}

impl TapoConnection {
    pub(crate) fn new(email: &str, password: &str, ip: &str, port: u16) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
            ip: ip.to_string(),
            port,
            variant: None,
        }
    }

    async fn choose(&mut self) -> Result<Variant, DeviceError> {
        let mut klap =
            KlapConnection::new(&self.email, &self.password, &self.ip, self.port)?;
        match klap.do_key_exchange().await {
            Ok(()) => Ok(Variant::Klap(klap)),
            Err(err) => {
                tracing::debug!(
                    device = %self.ip,
                    error = %err,
                    "klap key exchange failed, falling back to passthrough"
                );
                let passthrough =
                    PassthroughConnection::new(&self.email, &self.password, &self.ip, self.port)?;
                Ok(Variant::Passthrough(passthrough))
            }
        }
    }

    async fn variant(&mut self) -> Result<&mut Variant, DeviceError> {
        if self.variant.is_none() {
            let variant = self.choose().await?;
            self.variant = Some(variant);
        }
        self.variant.as_mut().ok_or(DeviceError::NotLoggedIn)
    }

    pub(crate) async fn get_device_info(&mut self) -> Result<Value, DeviceError> {
        match self.variant().await? {
            Variant::Klap(connection) => connection.get_device_info().await,
            Variant::Passthrough(connection) => connection.get_device_info().await,
        }
    }

    pub(crate) async fn get_energy_usage(&mut self) -> Result<Value, DeviceError> {
        match self.variant().await? {
            Variant::Klap(connection) => connection.get_energy_usage().await,
            Variant::Passthrough(connection) => connection.get_energy_usage().await,
        }
    }

    pub(crate) fn forget_keys_and_session(&mut self) {
        match &mut self.variant {
            Some(Variant::Klap(connection)) => connection.forget_keys_and_session(),
            Some(Variant::Passthrough(connection)) => connection.forget_keys_and_session(),
            None => {}
        }
    }

    #[cfg(test)]
    pub(crate) fn pinned_variant(&self) -> Option<&Variant> {
        self.variant.as_ref()
    }
}
