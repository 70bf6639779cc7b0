use super::crypto;
use crate::device::error::DeviceError;
use base64::prelude::{Engine, BASE64_STANDARD};
use chrono::Utc;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::StatusCode;
use rsa::Pkcs1v15Encrypt;
use serde_json::{json, Value};
use std::sync::Arc;
use url::Url;

const HANDSHAKE_PAYLOAD_BYTES: usize = 32;

/// The legacy "securePassthrough" protocol: an RSA-sealed AES key exchange
/// followed by AES-CBC JSON-in-JSON envelopes and a token-in-URL login.
pub(crate) struct PassthroughConnection {
    hashed_email: String,
    password: String,
    app_url: String,
    session_url: Url,
    client: reqwest::Client,
    jar: Arc<Jar>,
    cbc_key: Option<[u8; 16]>,
    cbc_iv: Option<[u8; 16]>,
    token_url: Option<String>,
}

impl PassthroughConnection {
    pub(crate) fn new(
        email: &str,
        password: &str,
        ip: &str,
        port: u16,
    ) -> Result<Self, DeviceError> {
        let jar = Arc::new(Jar::default());
        let client = super::http_client(&jar, ip, port)?;
        let app_url = format!("http://{ip}:{port}/app");
        let session_url = Url::parse(&app_url)?;
        Ok(Self {
            hashed_email: crypto::hash_username(email),
            password: password.to_string(),
            app_url,
            session_url,
            client,
            jar,
            cbc_key: None,
            cbc_iv: None,
            token_url: None,
        })
    }

    fn device_post_url(&self) -> &str {
        self.token_url.as_deref().unwrap_or(&self.app_url)
    }

    /// One outer POST. The outer envelope must carry a zero `error_code`.
    async fn exchange(&self, body: &Value) -> Result<Value, DeviceError> {
        let response = self
            .client
            .post(self.device_post_url())
            .json(body)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(DeviceError::UnexpectedStatus(response.status()));
        }
        let value: Value = response.json().await?;
        let code = value
            .get("error_code")
            .and_then(Value::as_i64)
            .ok_or(DeviceError::MissingField("error_code"))?;
        if code != 0 {
            return Err(DeviceError::ErrorCode(code));
        }
        value
            .get("result")
            .cloned()
            .ok_or(DeviceError::MissingField("result"))
    }

    fn cipher_material(&self) -> Result<([u8; 16], [u8; 16]), DeviceError> {
        match (self.cbc_key, self.cbc_iv) {
            (Some(key), Some(iv)) => Ok((key, iv)),
            _ => Err(DeviceError::NotLoggedIn),
        }
    }

    fn marshal_passthrough_payload(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, DeviceError> {
        let mut inner = serde_json::Map::new();
        inner.insert("method".to_string(), json!(method));
        inner.insert(
            "requestTimeMils".to_string(),
            json!(Utc::now().timestamp_millis()),
        );
        if let Some(params) = params {
            inner.insert("params".to_string(), params);
        }
        let cleartext = serde_json::to_vec(&Value::Object(inner))?;
        let (key, iv) = self.cipher_material()?;
        let request = BASE64_STANDARD.encode(crypto::aes128_cbc_encrypt_pkcs7(&key, &iv, &cleartext));
        Ok(json!({
            "method": "securePassthrough",
            "params": { "request": request },
        }))
    }

    fn unmarshal_passthrough_response(&self, result: &Value) -> Result<Value, DeviceError> {
        let response = result
            .get("response")
            .and_then(Value::as_str)
            .ok_or(DeviceError::MissingField("response"))?;
        let ciphertext = BASE64_STANDARD.decode(response)?;
        let (key, iv) = self.cipher_material()?;
        let cleartext = crypto::aes128_cbc_decrypt_pkcs7(&key, &iv, &ciphertext)?;
        let value: Value = serde_json::from_slice(&cleartext)?;
        super::result_from_response(&value)
    }

    pub(crate) async fn do_key_exchange(&mut self) -> Result<(), DeviceError> {
        self.logout();
        let private_key = crypto::new_rsa_keypair()?;
        let public_key_pem = crypto::pem_public_key(&private_key)?;

        let body = json!({
            "method": "handshake",
            "requestTimeMils": 0,
            "params": { "key": public_key_pem },
        });
        let result = self.exchange(&body).await?;

        let sealed = result
            .get("key")
            .and_then(Value::as_str)
            .ok_or(DeviceError::MissingField("key"))?;
        let sealed = BASE64_STANDARD.decode(sealed)?;
        let cleartext = private_key.decrypt(Pkcs1v15Encrypt, &sealed)?;
        if cleartext.len() != HANDSHAKE_PAYLOAD_BYTES {
            return Err(DeviceError::HandshakePayloadLength(cleartext.len()));
        }
        let mut key = [0u8; 16];
        key.copy_from_slice(&cleartext[..16]);
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&cleartext[16..]);
        self.cbc_key = Some(key);
        self.cbc_iv = Some(iv);
        Ok(())
    }

    pub(crate) async fn do_login(&mut self) -> Result<(), DeviceError> {
        if !self.has_exchanged_keys() {
            self.do_key_exchange().await?;
        }
        self.logout();

        let params = json!({
            "username": BASE64_STANDARD.encode(self.hashed_email.as_bytes()),
            "password": BASE64_STANDARD.encode(self.password.as_bytes()),
        });
        let body = self.marshal_passthrough_payload("login_device", Some(params))?;
        let result = self.exchange(&body).await?;
        let response = self.unmarshal_passthrough_response(&result)?;
        let token = response
            .get("token")
            .and_then(Value::as_str)
            .ok_or(DeviceError::MissingField("token"))?;
        self.token_url = Some(format!("{}?token={token}", self.app_url));
        Ok(())
    }

    pub(crate) fn has_exchanged_keys(&self) -> bool {
        self.has_valid_session_cookie() && self.cbc_key.is_some() && self.cbc_iv.is_some()
    }

    pub(crate) fn is_logged_in(&self) -> bool {
        self.has_exchanged_keys() && self.token_url.is_some()
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

    fn logout(&mut self) {
        self.token_url = None;
    }

    pub(crate) fn forget_keys_and_session(&mut self) {
        self.logout();
        self.jar
            .add_cookie_str("TP_SESSIONID=; Max-Age=0", &self.session_url);
        self.cbc_key = None;
        self.cbc_iv = None;
    }

    pub(crate) async fn get_device_info(&mut self) -> Result<Value, DeviceError> {
        self.make_api_call("get_device_info").await
    }

    pub(crate) async fn get_energy_usage(&mut self) -> Result<Value, DeviceError> {
        self.make_api_call("get_energy_usage").await
    }

    async fn make_api_call(&mut self, method: &str) -> Result<Value, DeviceError> {
        let result = self.try_api_call(method).await;
        if result.is_err() {
            self.forget_keys_and_session();
        }
        result
    }

    async fn try_api_call(&mut self, method: &str) -> Result<Value, DeviceError> {
        if !self.is_logged_in() {
            tracing::debug!(device = %self.app_url, "not logged in, logging in before api call");
            self.do_login().await?;
        }
        let body = self.marshal_passthrough_payload(method, None)?;
        let result = self.exchange(&body).await?;
        self.unmarshal_passthrough_response(&result)
    }
}
