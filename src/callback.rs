//! Callback message crypto for WeChat Official Accounts, Mini Programs,
//! Open Platform components and WeCom.
//!
//! Features:
//! - Signature verification (SHA1 over sorted parts) before any decryption
//! - AES-256-CBC encrypt/decrypt using the 43-char EncodingAESKey
//! - Receiver binding: the decrypted tail must match the configured AppID/CorpID
//! - XML and JSON envelope handling for both directions
//!
//! ```ignore
//! use wxcrypto_rs::callback::MessageCrypto;
//!
//! let crypto = MessageCrypto::official_account(token, encoding_aes_key, appid)?;
//! let xml = crypto.decrypt_message(&body, &q.msg_signature, &q.timestamp, &q.nonce)?;
//! let reply = crypto.encrypt_message("<xml>...</xml>", &nonce, None)?;
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, instrument, warn};

use crate::config::{CallbackConfig, ReceiverKind};
use crate::errors::{Error, Result};
use crate::prpcrypt::PrpCrypt;
use crate::signature::{sha1_signature, verify_msg_signature, verify_url_signature};
use crate::xml;

/// Detected callback wrapper format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackFormat {
    Xml,
    Json,
}

pub fn detect_format(body: &[u8]) -> CallbackFormat {
    let s = std::str::from_utf8(body).unwrap_or_default().trim_start();
    if s.starts_with('{') || s.starts_with('[') {
        CallbackFormat::Json
    } else {
        CallbackFormat::Xml
    }
}

/// Extract Encrypt field from an XML body (supports CDATA or plain text).
pub fn extract_encrypt_from_xml(body: &str) -> Result<String> {
    xml::parse(body)?
        .remove("Encrypt")
        .filter(|s| !s.is_empty())
        .ok_or(Error::MissingField("Encrypt"))
}

/// Extract Encrypt/encrypt field from a JSON body.
pub fn extract_encrypt_from_json(body: &str) -> Result<String> {
    let v: serde_json::Value = serde_json::from_str(body)?;
    v.get("Encrypt")
        .or_else(|| v.get("encrypt"))
        .and_then(|x| x.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(Error::MissingField("Encrypt"))
}

/// Extract the encrypted payload from either wrapper.
pub fn extract_encrypt(body: &str) -> Result<String> {
    match detect_format(body.as_bytes()) {
        CallbackFormat::Xml => extract_encrypt_from_xml(body),
        CallbackFormat::Json => extract_encrypt_from_json(body),
    }
}

/// One-shot decryption without signature checks.
///
/// - expected_receiver_id: optional corp_id/app_id to verify against the decrypted tail
pub fn decrypt_b64_message(
    encoding_aes_key: &str,
    cipher_b64: &str,
    expected_receiver_id: Option<&str>,
    kind: ReceiverKind,
) -> Result<String> {
    let decrypted = PrpCrypt::from_encoding_aes_key(encoding_aes_key)?.decrypt(cipher_b64)?;
    bind_receiver(expected_receiver_id, &decrypted.receiver_id, kind)?;
    Ok(decrypted.message)
}

fn bind_receiver(expected: Option<&str>, actual: &str, kind: ReceiverKind) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    if expected == actual {
        return Ok(());
    }
    warn!(
        expected = %redact(expected),
        actual = %redact(actual),
        "receiver id mismatch"
    );
    let (expected, actual) = (expected.to_string(), actual.to_string());
    Err(match kind {
        ReceiverKind::App => Error::InvalidAppId { expected, actual },
        ReceiverKind::Corp => Error::InvalidCorpId { expected, actual },
    })
}

/// `wx49f0ab532d5d035a` -> `wx***5a`
pub(crate) fn redact(id: &str) -> String {
    if id.len() <= 4 || !id.is_ascii() {
        "***".to_string()
    } else {
        format!("{}***{}", &id[..2], &id[id.len() - 2..])
    }
}

fn now_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
        .to_string()
}

/// Signs, verifies, encrypts and decrypts callback payloads for one
/// Token / EncodingAESKey / receiver triple.
#[derive(Clone)]
pub struct MessageCrypto {
    token: String,
    cipher: PrpCrypt,
    receiver_id: Option<String>,
    kind: ReceiverKind,
}

impl std::fmt::Debug for MessageCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCrypto")
            .field("receiver_id", &self.receiver_id.as_deref().map(redact))
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl MessageCrypto {
    /// `receiver_id = None` accepts payloads addressed to any receiver.
    pub fn new(
        token: impl Into<String>,
        encoding_aes_key: &str,
        receiver_id: Option<String>,
        kind: ReceiverKind,
    ) -> Result<Self> {
        Ok(Self {
            token: token.into(),
            cipher: PrpCrypt::from_encoding_aes_key(encoding_aes_key)?,
            receiver_id,
            kind,
        })
    }

    /// Official Account / Mini Program / Open Platform component, bound to `app_id`.
    pub fn official_account(
        token: impl Into<String>,
        encoding_aes_key: &str,
        app_id: impl Into<String>,
    ) -> Result<Self> {
        Self::new(
            token,
            encoding_aes_key,
            Some(app_id.into()),
            ReceiverKind::App,
        )
    }

    /// WeCom application or Kf account, bound to `corp_id`.
    pub fn wecom(
        token: impl Into<String>,
        encoding_aes_key: &str,
        corp_id: impl Into<String>,
    ) -> Result<Self> {
        Self::new(
            token,
            encoding_aes_key,
            Some(corp_id.into()),
            ReceiverKind::Corp,
        )
    }

    pub fn from_config(config: &CallbackConfig) -> Result<Self> {
        config.validate()?;
        Self::new(
            config.token.clone(),
            &config.encoding_aes_key,
            config.receiver_id.clone(),
            config.receiver_kind,
        )
    }

    pub fn receiver_id(&self) -> Option<&str> {
        self.receiver_id.as_deref()
    }

    pub fn kind(&self) -> ReceiverKind {
        self.kind
    }

    /// The `msg_signature` WeChat would attach to `encrypt`.
    pub fn signature(&self, timestamp: &str, nonce: &str, encrypt: &str) -> String {
        sha1_signature(&[&self.token, timestamp, nonce, encrypt])
    }

    /// WeCom-style URL verification: check `msg_signature` over `echostr`,
    /// decrypt it, and return the plaintext to echo back.
    #[instrument(level = "debug", skip(self, signature, echostr))]
    pub fn check_signature(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        echostr: &str,
    ) -> Result<String> {
        self.verify(signature, timestamp, nonce, echostr)?;
        self.decrypt_bound(echostr)
    }

    /// Plain-mode URL verification: returns `echostr` unchanged when the
    /// `signature` over (token, timestamp, nonce) matches.
    pub fn verify_plain_url(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        echostr: &str,
    ) -> Result<String> {
        if verify_url_signature(&self.token, timestamp, nonce, signature) {
            Ok(echostr.to_string())
        } else {
            debug!("plain url signature mismatch");
            Err(Error::InvalidSignature)
        }
    }

    /// Encrypt a reply and wrap it in the XML envelope.
    ///
    /// `timestamp` defaults to the current unix time.
    #[instrument(level = "debug", skip(self, msg))]
    pub fn encrypt_message(&self, msg: &str, nonce: &str, timestamp: Option<&str>) -> Result<String> {
        let (encrypt, signature, timestamp) = self.seal(msg, nonce, timestamp)?;
        Ok(xml::envelope(&encrypt, &signature, &timestamp, nonce))
    }

    /// JSON envelope variant for callbacks configured in JSON mode.
    #[instrument(level = "debug", skip(self, msg))]
    pub fn encrypt_message_json(
        &self,
        msg: &str,
        nonce: &str,
        timestamp: Option<&str>,
    ) -> Result<String> {
        let (encrypt, signature, timestamp) = self.seal(msg, nonce, timestamp)?;
        let ts: serde_json::Value = timestamp
            .parse::<u64>()
            .map(Into::into)
            .unwrap_or_else(|_| timestamp.clone().into());
        Ok(serde_json::json!({
            "encrypt": encrypt,
            "msgsignature": signature,
            "timestamp": ts,
            "nonce": nonce,
        })
        .to_string())
    }

    /// Verify and decrypt a POST body (XML or JSON wrapper).
    #[instrument(level = "debug", skip(self, body, signature))]
    pub fn decrypt_message(
        &self,
        body: &str,
        signature: &str,
        timestamp: &str,
        nonce: &str,
    ) -> Result<String> {
        let encrypt = extract_encrypt(body)?;
        self.verify(signature, timestamp, nonce, &encrypt)?;
        self.decrypt_bound(&encrypt)
    }

    fn seal(
        &self,
        msg: &str,
        nonce: &str,
        timestamp: Option<&str>,
    ) -> Result<(String, String, String)> {
        let timestamp = timestamp.map(str::to_string).unwrap_or_else(now_timestamp);
        let receiver = self.receiver_id.as_deref().unwrap_or_default();
        let encrypt = self.cipher.encrypt(msg, receiver)?;
        let signature = self.signature(&timestamp, nonce, &encrypt);
        Ok((encrypt, signature, timestamp))
    }

    fn verify(&self, signature: &str, timestamp: &str, nonce: &str, encrypt: &str) -> Result<()> {
        if verify_msg_signature(&self.token, timestamp, nonce, encrypt, signature) {
            Ok(())
        } else {
            debug!("msg_signature mismatch");
            Err(Error::InvalidSignature)
        }
    }

    fn decrypt_bound(&self, encrypt: &str) -> Result<String> {
        let decrypted = self.cipher.decrypt(encrypt)?;
        bind_receiver(
            self.receiver_id.as_deref(),
            &decrypted.receiver_id,
            self.kind,
        )?;
        Ok(decrypted.message)
    }
}
