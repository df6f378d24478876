//! Mini Program encrypted data (`wx.getUserProfile`, `getPhoneNumber`, ...).
//!
//! AES-128-CBC keyed by the login `session_key`, IV supplied by the client,
//! PKCS#7 padded JSON whose `watermark.appid` must name this Mini Program.

use aes::Aes128;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use tracing::{instrument, warn};

use crate::callback::redact;
use crate::errors::{Error, Result};
use crate::keygen::BASE64_LENIENT;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

#[derive(Clone)]
pub struct WxaCrypto {
    session_key: [u8; 16],
    app_id: String,
}

impl std::fmt::Debug for WxaCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WxaCrypto")
            .field("app_id", &redact(&self.app_id))
            .finish_non_exhaustive()
    }
}

impl WxaCrypto {
    /// `session_key` as returned by `jscode2session` (base64 of 16 bytes).
    pub fn new(session_key: &str, app_id: impl Into<String>) -> Result<Self> {
        Ok(Self {
            session_key: decode_16(session_key, "session_key")?,
            app_id: app_id.into(),
        })
    }

    /// Decrypt `encryptedData` with its `iv` and check the watermark.
    #[instrument(level = "debug", skip_all)]
    pub fn decrypt_data(&self, encrypted_data: &str, iv: &str) -> Result<serde_json::Value> {
        let iv = decode_16(iv, "iv")?;
        let mut buf = BASE64_LENIENT.decode(encrypted_data.trim())?;
        let plain = Aes128CbcDec::new(&self.session_key.into(), &iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| Error::Crypto)?;

        let value: serde_json::Value = serde_json::from_slice(plain)?;
        let actual = value
            .get("watermark")
            .and_then(|w| w.get("appid"))
            .and_then(|a| a.as_str())
            .ok_or(Error::MissingField("watermark.appid"))?;
        if actual != self.app_id {
            warn!(expected = %redact(&self.app_id), actual = %redact(actual), "watermark appid mismatch");
            return Err(Error::InvalidAppId {
                expected: self.app_id.clone(),
                actual: actual.to_string(),
            });
        }
        Ok(value)
    }

    /// Inverse of [`WxaCrypto::decrypt_data`]; returns base64 ciphertext.
    pub fn encrypt_data(&self, plaintext: &[u8], iv: &str) -> Result<String> {
        let iv = decode_16(iv, "iv")?;
        let cipher = Aes128CbcEnc::new(&self.session_key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        Ok(BASE64.encode(cipher))
    }
}

fn decode_16(s: &str, what: &str) -> Result<[u8; 16]> {
    let raw = BASE64_LENIENT.decode(s.trim())?;
    raw.as_slice()
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("{what} must decode to 16 bytes, got {}", raw.len())))
}
