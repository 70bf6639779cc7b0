use super::crypto;
use crate::device::error::DeviceError;
use rand::RngCore;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const SEED_BYTES: usize = 16;
const SIGNATURE_BYTES: usize = 32;
const HANDSHAKE1_RESPONSE_BYTES: usize = SEED_BYTES + SIGNATURE_BYTES;

// Devices drop the session if the second handshake step or the first
// request arrives too quickly after the previous one.
const HANDSHAKE1_SETTLE: Duration = Duration::from_millis(250);
const HANDSHAKE2_SETTLE: Duration = Duration::from_millis(500);

const GET_DEVICE_INFO_BODY: &str = r#"{"method":"get_device_info"}"#;
const GET_ENERGY_USAGE_BODY: &str = r#"{"method":"get_energy_usage"}"#;

/// Symmetric material derived from `localSeed ‖ remoteSeed ‖ authHash`.
pub(crate) struct EncryptionContext {
    key: [u8; 16],
    iv: [u8; 12],
    signature_prefix: [u8; 28],
    pub(crate) sequence_number: i32,
}

impl EncryptionContext {
    pub(crate) fn derive(local_remote_auth: &[u8]) -> Self {
        let key_hash = crypto::sha256_digest(&prefixed(b"lsk", local_remote_auth));
        let iv_hash = crypto::sha256_digest(&prefixed(b"iv", local_remote_auth));
        let sig_hash = crypto::sha256_digest(&prefixed(b"ldk", local_remote_auth));

        let mut key = [0u8; 16];
        key.copy_from_slice(&key_hash[..16]);
        let mut iv = [0u8; 12];
        iv.copy_from_slice(&iv_hash[..12]);
        let mut signature_prefix = [0u8; 28];
        signature_prefix.copy_from_slice(&sig_hash[..28]);
        let mut sequence_bytes = [0u8; 4];
        sequence_bytes.copy_from_slice(&iv_hash[28..32]);

        Self {
            key,
            iv,
            signature_prefix,
            sequence_number: i32::from_be_bytes(sequence_bytes),
        }
    }

    /// 16-byte CBC nonce: the derived IV extended with the sequence number.
    fn nonce(&self) -> [u8; 16] {
        let mut nonce = [0u8; 16];
        nonce[..12].copy_from_slice(&self.iv);
        nonce[12..].copy_from_slice(&(self.sequence_number as u32).to_be_bytes());
        nonce
    }

    fn sign(&self, ciphertext: &[u8]) -> [u8; 32] {
        let mut buffer = Vec::with_capacity(32 + ciphertext.len());
        buffer.extend_from_slice(&self.signature_prefix);
        buffer.extend_from_slice(&(self.sequence_number as u32).to_be_bytes());
        buffer.extend_from_slice(ciphertext);
        crypto::sha256_digest(&buffer)
    }

    /// Advances the sequence and produces `signature ‖ ciphertext`.
    pub(crate) fn encrypt(&mut self, payload: &[u8]) -> Vec<u8> {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        let ciphertext = crypto::aes128_cbc_encrypt_pkcs7(&self.key, &self.nonce(), payload);
        let mut body = Vec::with_capacity(SIGNATURE_BYTES + ciphertext.len());
        body.extend_from_slice(&self.sign(&ciphertext));
        body.extend_from_slice(&ciphertext);
        body
    }

    /// The leading 32 bytes are the server's signature over the ciphertext;
    /// the remainder decrypts under the nonce of the current sequence.
    pub(crate) fn decrypt(&self, body: &[u8]) -> Result<Vec<u8>, DeviceError> {
        if body.len() < SIGNATURE_BYTES {
            return Err(DeviceError::TruncatedResponse(body.len()));
        }
        crypto::aes128_cbc_decrypt_pkcs7(&self.key, &self.nonce(), &body[SIGNATURE_BYTES..])
    }
}

fn prefixed(prefix: &[u8], buffer: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + buffer.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(buffer);
    out
}

/// KLAP protocol session: seed handshake, then sequence-numbered signed
/// AES-CBC request bodies.
pub(crate) struct KlapConnection {
    auth_hash: [u8; 32],
    base_url: String,
    session_url: Url,
    client: reqwest::Client,
    jar: Arc<Jar>,
    local_seed: Option<[u8; SEED_BYTES]>,
    remote_seed: Option<[u8; SEED_BYTES]>,
    encryption: Option<EncryptionContext>,
}

impl KlapConnection {
    pub(crate) fn new(
        email: &str,
        password: &str,
        ip: &str,
        port: u16,
    ) -> Result<Self, DeviceError> {
        let jar = Arc::new(Jar::default());
        let client = super::http_client(&jar, ip, port)?;
        let base_url = format!("http://{ip}:{port}");
        let session_url = Url::parse(&format!("{base_url}/app/request"))?;
        Ok(Self {
            auth_hash: crypto::auth_hash(email, password),
            base_url,
            session_url,
            client,
            jar,
            local_seed: None,
            remote_seed: None,
            encryption: None,
        })
    }

    pub(crate) async fn do_key_exchange(&mut self) -> Result<(), DeviceError> {
        let mut local_seed = [0u8; SEED_BYTES];
        rand::thread_rng().fill_bytes(&mut local_seed);
        self.local_seed = Some(local_seed);

        let response = self
            .client
            .post(format!("{}/app/handshake1", self.base_url))
            .body(local_seed.to_vec())
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(DeviceError::UnexpectedStatus(response.status()));
        }
        let body = response.bytes().await?;
        if body.len() != HANDSHAKE1_RESPONSE_BYTES {
            return Err(DeviceError::ShortHandshake {
                expected: HANDSHAKE1_RESPONSE_BYTES,
                actual: body.len(),
            });
        }
        let mut remote_seed = [0u8; SEED_BYTES];
        remote_seed.copy_from_slice(&body[..SEED_BYTES]);

        let mut local_remote_auth = Vec::with_capacity(SEED_BYTES * 2 + 32);
        local_remote_auth.extend_from_slice(&local_seed);
        local_remote_auth.extend_from_slice(&remote_seed);
        local_remote_auth.extend_from_slice(&self.auth_hash);
        let expected = crypto::sha256_digest(&local_remote_auth);
        if expected != body[SEED_BYTES..] {
            return Err(DeviceError::HandshakeHashMismatch);
        }
        self.remote_seed = Some(remote_seed);
        tokio::time::sleep(HANDSHAKE1_SETTLE).await;

        let mut confirmation = Vec::with_capacity(SEED_BYTES * 2 + 32);
        confirmation.extend_from_slice(&remote_seed);
        confirmation.extend_from_slice(&local_seed);
        confirmation.extend_from_slice(&self.auth_hash);
        let payload = crypto::sha256_digest(&confirmation);
        let response = self
            .client
            .post(format!("{}/app/handshake2", self.base_url))
            .body(payload.to_vec())
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(DeviceError::UnexpectedStatus(response.status()));
        }

        self.encryption = Some(EncryptionContext::derive(&local_remote_auth));
        tokio::time::sleep(HANDSHAKE2_SETTLE).await;
        tracing::debug!(device = %self.base_url, "klap handshake complete");
        Ok(())
    }

    pub(crate) fn has_exchanged_keys(&self) -> bool {
        self.has_valid_session_cookie()
            && self.local_seed.is_some()
            && self.remote_seed.is_some()
            && self.encryption.is_some()
    }

    fn has_valid_session_cookie(&self) -> bool {
        match self.jar.cookies(&self.session_url) {
            Some(header) => header
                .to_str()
                .map(|cookies| cookies.contains("TP_SESSIONID="))
                .unwrap_or(false),
            None => false,
        }
    }

    pub(crate) fn forget_keys_and_session(&mut self) {
        self.jar
            .add_cookie_str("TP_SESSIONID=; Max-Age=0", &self.session_url);
        self.local_seed = None;
        self.remote_seed = None;
        self.encryption = None;
    }

    pub(crate) async fn get_device_info(&mut self) -> Result<Value, DeviceError> {
        self.make_api_call(GET_DEVICE_INFO_BODY).await
    }

    pub(crate) async fn get_energy_usage(&mut self) -> Result<Value, DeviceError> {
        self.make_api_call(GET_ENERGY_USAGE_BODY).await
    }

    async fn make_api_call(&mut self, payload: &str) -> Result<Value, DeviceError> {
        let result = self.try_api_call(payload).await;
        if result.is_err() {
            self.forget_keys_and_session();
        }
        result
    }

    async fn try_api_call(&mut self, payload: &str) -> Result<Value, DeviceError> {
        if !self.has_exchanged_keys() {
            tracing::debug!(device = %self.base_url, "session not established, running key exchange");
            self.do_key_exchange().await?;
        }
        let encryption = self.encryption.as_mut().ok_or(DeviceError::NotLoggedIn)?;
        let body = encryption.encrypt(payload.as_bytes());
        let sequence = encryption.sequence_number;

        let response = self
            .client
            .post(format!("{}/app/request", self.base_url))
            .query(&[("seq", sequence.to_string())])
            .body(body)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(DeviceError::UnexpectedStatus(response.status()));
        }
        let encrypted = response.bytes().await?;
        let encryption = self.encryption.as_ref().ok_or(DeviceError::NotLoggedIn)?;
        let cleartext = encryption.decrypt(&encrypted)?;
        let value: Value = serde_json::from_slice(&cleartext)?;
        super::result_from_response(&value)
    }
}
