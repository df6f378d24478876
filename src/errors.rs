//! Unified error type for callback crypto, signatures and payment helpers.
//!
//! Program logic should match on the variant, never on the rendered message.
//! Signature and identity failures are distinct variants so a callback
//! handler can answer with 401 instead of 400.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Computed signature differs from the one supplied with the request
    #[error("signature mismatch")]
    InvalidSignature,

    /// Decrypted payload was addressed to another Official Account / Mini Program
    #[error("appid mismatch: expected {expected}, got {actual}")]
    InvalidAppId { expected: String, actual: String },

    /// Decrypted payload was addressed to another WeCom corporation
    #[error("corpid mismatch: expected {expected}, got {actual}")]
    InvalidCorpId { expected: String, actual: String },

    #[error("invalid aes key: {0}")]
    InvalidKey(String),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("crypto error")]
    Crypto,

    #[error("bad message format: {0}")]
    BadFormat(&'static str),

    #[error("utf8 decode error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("xml error: {0}")]
    Xml(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// True for failures caused by a forged or misrouted request rather than
    /// a malformed one.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Error::InvalidSignature | Error::InvalidAppId { .. } | Error::InvalidCorpId { .. }
        )
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Xml(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
