use thiserror::Error;

/// Everything that can go wrong while scraping a single device. Errors are
/// surfaced to the poller task, counted, and never terminate the task.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("could not connect to device: {0}")]
    Connect(#[source] std::io::Error),

    #[error("i/o error talking to device: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for device")]
    Timeout,

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("expected status code 200, got {0}")]
    UnexpectedStatus(reqwest::StatusCode),

    #[error("invalid device url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("response of {0} bytes is too short to contain a length header")]
    ShortResponse(usize),

    #[error("header declares a body of {declared} bytes but {actual} bytes were received")]
    FrameLengthMismatch { declared: usize, actual: usize },

    #[error("expected handshake response of {expected} bytes but got {actual}")]
    ShortHandshake { expected: usize, actual: usize },

    #[error("handshake response hash did not match expected credentials")]
    HandshakeHashMismatch,

    #[error("expected key exchange payload to be 32 bytes, but it was {0} bytes")]
    HandshakePayloadLength(usize),

    #[error("encrypted response of {0} bytes is shorter than its signature")]
    TruncatedResponse(usize),

    #[error("invalid padding")]
    InvalidPadding,

    #[error("rsa operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("could not encode public key: {0}")]
    PublicKeyEncoding(#[from] rsa::pkcs8::spki::Error),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("device returned error code {0}")]
    ErrorCode(i64),

    #[error("response is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{0}' could not be decoded")]
    InvalidField(&'static str),

    #[error("could not decode response json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not logged in")]
    NotLoggedIn,
}
