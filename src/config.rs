//! Callback configuration: Token, EncodingAESKey and the bound receiver id.
//!
//! Values come from the admin console (Developer Config / 接收消息 page). The
//! receiver id is the AppID for Official Accounts, Mini Programs and Open
//! Platform components, or the CorpID for WeCom.

use serde::Deserialize;
use std::env;

use crate::errors::{Error, Result};
use crate::keygen::verify_encoding_aes_key;

pub const ENV_TOKEN: &str = "WECHAT_TOKEN";
pub const ENV_ENCODING_AES_KEY: &str = "WECHAT_ENCODING_AES_KEY";
pub const ENV_RECEIVER_ID: &str = "WECHAT_RECEIVER_ID";
pub const ENV_RECEIVER_KIND: &str = "WECHAT_RECEIVER_KIND";

/// Whose identity the decrypted tail is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverKind {
    /// Official Account / Mini Program / Open Platform (AppID)
    #[default]
    App,
    /// WeCom (CorpID, or SuiteID for third-party apps)
    Corp,
}

impl std::str::FromStr for ReceiverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "app" | "mp" | "oa" => Ok(ReceiverKind::App),
            "corp" | "wecom" | "work" => Ok(ReceiverKind::Corp),
            other => Err(Error::InvalidConfig(format!("unknown receiver kind: {other}"))),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct CallbackConfig {
    pub token: String,
    pub encoding_aes_key: String,
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub receiver_kind: ReceiverKind,
}

impl std::fmt::Debug for CallbackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackConfig")
            .field("token", &"[redacted]")
            .field("encoding_aes_key", &"[redacted]")
            .field("receiver_id", &self.receiver_id)
            .field("receiver_kind", &self.receiver_kind)
            .finish()
    }
}

impl CallbackConfig {
    /// Validate and build a config.
    ///
    /// - token: 1..=32 ASCII letters or digits
    /// - encoding_aes_key: 43 chars, decodes to 32 bytes after appending '='
    pub fn new(token: String, encoding_aes_key: String) -> Result<Self> {
        let config = Self {
            token,
            encoding_aes_key,
            receiver_id: None,
            receiver_kind: ReceiverKind::App,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_receiver_id(mut self, receiver_id: impl Into<String>) -> Self {
        self.receiver_id = Some(receiver_id.into());
        self
    }

    pub fn with_receiver_kind(mut self, kind: ReceiverKind) -> Self {
        self.receiver_kind = kind;
        self
    }

    /// Checks applied by [`CallbackConfig::new`]; call it after deserializing.
    pub fn validate(&self) -> Result<()> {
        if self.token.is_empty() || self.token.len() > 32 {
            return Err(Error::InvalidConfig(format!(
                "token must be 1..=32 characters, got {}",
                self.token.len()
            )));
        }
        if !self.token.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::InvalidConfig(
                "token must contain only letters and digits".into(),
            ));
        }
        if !verify_encoding_aes_key(&self.encoding_aes_key) {
            return Err(Error::InvalidConfig(
                "encoding_aes_key must be 43 characters of base64 decoding to 32 bytes".into(),
            ));
        }
        if matches!(&self.receiver_id, Some(id) if id.trim().is_empty()) {
            return Err(Error::InvalidConfig("receiver_id must not be blank".into()));
        }
        Ok(())
    }

    /// Read `WECHAT_TOKEN`, `WECHAT_ENCODING_AES_KEY`, and the optional
    /// `WECHAT_RECEIVER_ID` / `WECHAT_RECEIVER_KIND`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| Error::InvalidConfig(format!("{name} is not set")))
        };
        let mut config = Self::new(required(ENV_TOKEN)?, required(ENV_ENCODING_AES_KEY)?)?;
        if let Some(id) = lookup(ENV_RECEIVER_ID).filter(|s| !s.trim().is_empty()) {
            config = config.with_receiver_id(id.trim());
        }
        if let Some(kind) = lookup(ENV_RECEIVER_KIND) {
            config = config.with_receiver_kind(kind.parse()?);
        }
        Ok(config)
    }
}
