//! SHA1 signatures over sorted parts.
//!
//! Every WeChat callback and JS-SDK signature is the lowercase hex SHA1 of a
//! set of strings sorted lexicographically and joined (by nothing for
//! callbacks, by `&` for JS-SDK config).

use sha1::{Digest, Sha1};

use crate::errors::{Error, Result};

/// Accumulates parts and signs them in sorted order.
#[derive(Debug, Clone, Default)]
pub struct Signer {
    delimiter: String,
    data: Vec<String>,
}

impl Signer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
            data: Vec::new(),
        }
    }

    pub fn add_data<I, S>(&mut self, parts: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data.extend(parts.into_iter().map(Into::into));
        self
    }

    /// Lowercase hex SHA1 of the sorted, joined parts.
    pub fn signature(&self) -> String {
        let mut v: Vec<&str> = self.data.iter().map(String::as_str).collect();
        v.sort_unstable();
        hex::encode(Sha1::digest(v.join(self.delimiter.as_str()).as_bytes()))
    }
}

/// Compute SHA1 signature by sorting parts lexicographically and concatenating.
pub fn sha1_signature(parts: &[&str]) -> String {
    let mut signer = Signer::new();
    signer.add_data(parts.iter().copied());
    signer.signature()
}

/// Compare two byte strings without short-circuiting on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Hex signatures are compared case-insensitively.
pub(crate) fn hex_signature_eq(computed: &str, supplied: &str) -> bool {
    let supplied = supplied.trim().to_ascii_lowercase();
    constant_time_eq(computed.as_bytes(), supplied.as_bytes())
}

/// Verify URL signature (no encrypt parameter).
pub fn verify_url_signature(token: &str, timestamp: &str, nonce: &str, signature: &str) -> bool {
    hex_signature_eq(&sha1_signature(&[token, timestamp, nonce]), signature)
}

/// Verify message signature (includes encrypt parameter).
pub fn verify_msg_signature(
    token: &str,
    timestamp: &str,
    nonce: &str,
    encrypt: &str,
    signature: &str,
) -> bool {
    hex_signature_eq(
        &sha1_signature(&[token, timestamp, nonce, encrypt]),
        signature,
    )
}

/// `Result` flavour of [`verify_url_signature`].
pub fn check_signature(token: &str, signature: &str, timestamp: &str, nonce: &str) -> Result<()> {
    if verify_url_signature(token, timestamp, nonce, signature) {
        Ok(())
    } else {
        Err(Error::InvalidSignature)
    }
}

/// JS-SDK `wx.config` signature.
pub fn jsapi_signature(noncestr: &str, ticket: &str, timestamp: &str, url: &str) -> String {
    let mut signer = Signer::with_delimiter("&");
    signer.add_data([
        format!("noncestr={noncestr}"),
        format!("jsapi_ticket={ticket}"),
        format!("timestamp={timestamp}"),
        format!("url={url}"),
    ]);
    signer.signature()
}

/// Card ext / card sign: the raw values (api_ticket, card_id, timestamp, ...) signed as-is.
pub fn card_signature<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut signer = Signer::new();
    signer.add_data(values);
    signer.signature()
}

/// Mini Program `wx.getUserInfo` signature: sha1(raw_data + session_key).
pub fn check_wxa_signature(session_key: &str, raw_data: &str, client_signature: &str) -> Result<()> {
    let mut hasher = Sha1::new();
    hasher.update(raw_data.as_bytes());
    hasher.update(session_key.as_bytes());
    let computed = hex::encode(hasher.finalize());
    if hex_signature_eq(&computed, client_signature) {
        Ok(())
    } else {
        Err(Error::InvalidSignature)
    }
}
