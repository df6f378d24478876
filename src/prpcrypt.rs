//! AES-256-CBC payload cipher for callback messages.
//!
//! Key = base64(EncodingAESKey + "="), IV = first 16 bytes of the key.
//! The plaintext layout is:
//! 16B random | 4B big-endian msg_len | msg(msg_len) | receiver_id
//! padded to a multiple of 32 bytes with [`crate::pkcs7`].

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::keygen::{random_string, BASE64_LENIENT};
use crate::pkcs7;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const RANDOM_LEN: usize = 16;
const HEADER_LEN: usize = RANDOM_LEN + 4;

/// Result of a successful decryption. The receiver id is returned as-is;
/// binding it to an expected AppID/CorpID is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    pub message: String,
    pub receiver_id: String,
}

#[derive(Clone)]
pub struct PrpCrypt {
    key: [u8; 32],
}

impl std::fmt::Debug for PrpCrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrpCrypt { key: [redacted] }")
    }
}

impl PrpCrypt {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive the key from the 43-char EncodingAESKey shown in the admin console.
    pub fn from_encoding_aes_key(encoding_aes_key: &str) -> Result<Self> {
        Ok(Self::new(decode_aes_key(encoding_aes_key)?))
    }

    /// Encrypt `msg` for `receiver_id` with a fresh random prefix.
    pub fn encrypt(&self, msg: &str, receiver_id: &str) -> Result<String> {
        let mut prefix = [0u8; RANDOM_LEN];
        prefix.copy_from_slice(random_string(RANDOM_LEN).as_bytes());
        self.encrypt_with_nonce(&prefix, msg, receiver_id)
    }

    /// Deterministic variant of [`PrpCrypt::encrypt`] with a caller-supplied prefix.
    pub fn encrypt_with_nonce(
        &self,
        prefix: &[u8; 16],
        msg: &str,
        receiver_id: &str,
    ) -> Result<String> {
        let msg_len = u32::try_from(msg.len()).map_err(|_| Error::BadFormat("message too long"))?;

        let mut plain = Vec::with_capacity(HEADER_LEN + msg.len() + receiver_id.len());
        plain.extend_from_slice(prefix);
        plain.extend_from_slice(&msg_len.to_be_bytes());
        plain.extend_from_slice(msg.as_bytes());
        plain.extend_from_slice(receiver_id.as_bytes());

        let mut buf = pkcs7::pad(&plain);
        let len = buf.len();
        let cipher = Aes256CbcEnc::new_from_slices(&self.key, &self.key[..16])
            .map_err(|_| Error::InvalidKey("bad key or iv length".into()))?
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|_| Error::Crypto)?;
        Ok(BASE64.encode(cipher))
    }

    /// Decrypt the base64 `Encrypt` field of a callback.
    pub fn decrypt(&self, cipher_b64: &str) -> Result<Decrypted> {
        let mut buf = BASE64_LENIENT.decode(normalize_b64(cipher_b64))?;
        if buf.is_empty() {
            return Err(Error::BadFormat("empty ciphertext"));
        }

        let plain = Aes256CbcDec::new_from_slices(&self.key, &self.key[..16])
            .map_err(|_| Error::InvalidKey("bad key or iv length".into()))?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| Error::Crypto)?;
        let plain = pkcs7::unpad(plain);

        if plain.len() < HEADER_LEN {
            return Err(Error::BadFormat("payload shorter than header"));
        }
        let content = &plain[RANDOM_LEN..];
        let msg_len = u32::from_be_bytes([content[0], content[1], content[2], content[3]]) as usize;
        let rest = &content[4..];
        if rest.len() < msg_len {
            debug!(msg_len, available = rest.len(), "length field exceeds payload");
            return Err(Error::BadFormat("length field exceeds payload"));
        }

        let message = String::from_utf8(rest[..msg_len].to_vec())?;
        let receiver_id = String::from_utf8(rest[msg_len..].to_vec())?;
        Ok(Decrypted {
            message,
            receiver_id,
        })
    }
}

/// Decode EncodingAESKey (43 chars, a trailing '=' is tolerated).
pub fn decode_aes_key(encoding_aes_key: &str) -> Result<[u8; 32]> {
    let trimmed = encoding_aes_key.trim().trim_end_matches('=');
    if trimmed.len() != 43 {
        return Err(Error::InvalidKey(format!(
            "expected 43 characters, got {}",
            trimmed.len()
        )));
    }
    let key = BASE64_LENIENT.decode(format!("{trimmed}="))?;
    key.as_slice()
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("decoded to {} bytes", key.len())))
}

/// Accept the URL-safe alphabet and stray whitespace some proxies introduce.
fn normalize_b64(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "kWxPEV2UEDyxWpmPdKC3F4dgPDmOvfKX1HGnEUDS1aR";
    const MSG: &str = "<xml><ToUserName><![CDATA[gh_1]]></ToUserName><FromUserName><![CDATA[oUser]]></FromUserName><CreateTime>1411525903</CreateTime><MsgType><![CDATA[text]]></MsgType><Content><![CDATA[hello]]></Content><MsgId>1234567890123456</MsgId></xml>";
    const CIPHER: &str = "t4NQRjl+HRoGXBnck05w3Cpt4AUHy7lvjkdSVNgYNlOoUtLQplSAGEZUQ68eZPwM3XqXIdrhd8tm5Q6D014UIQzKb6QP3rWoroZpA21WWUJYpwzxTyf03Z4d0TSpuBYkEiZBOcsw2vvT7PtROzjZp3Yn1l8l3OeGhddnd8MbaaNhNe5440643ZqFQnS9e8ht++iqNlKiqUYM1JdnSeXVlIEpEnqDG7O+fhTPPtNfSVWMJhtrhUwCtmu4T/3U6UdTthTrQ0TM1N7ct3RXHZsbz3yhqEKl7Q3NIC9W5sxi8zQ4/0+m8Q4sRP7Z8Ic2Dpcqi4/xcOdqYLi48a60Nt/Vg8RXAE78XisCgpofGNdFW7W4mCt6fEwrPuIh9VZQeUTJ";

    fn crypt() -> PrpCrypt {
        PrpCrypt::from_encoding_aes_key(KEY).expect("key")
    }

    #[test]
    fn encrypts_to_known_vector() {
        let out = crypt()
            .encrypt_with_nonce(b"aaaaaaaaaaaaaaaa", MSG, "wx49f0ab532d5d035a")
            .expect("encrypt");
        assert_eq!(out, CIPHER);
    }

    #[test]
    fn decrypts_known_vector() {
        let d = crypt().decrypt(CIPHER).expect("decrypt");
        assert_eq!(d.message, MSG);
        assert_eq!(d.receiver_id, "wx49f0ab532d5d035a");
    }

    #[test]
    fn random_prefix_changes_ciphertext() {
        let c = crypt();
        let a = c.encrypt("same", "wx1").expect("a");
        let b = c.encrypt("same", "wx1").expect("b");
        assert_ne!(a, b);
        assert_eq!(c.decrypt(&a).expect("a").message, "same");
        assert_eq!(c.decrypt(&b).expect("b").message, "same");
    }

    #[test]
    fn empty_receiver_id_is_allowed() {
        let d = crypt()
            .decrypt("/thvx59ZpJm+0LkNxZ/ikQSRE4KjvHNfswKbdStwUFc=")
            .expect("decrypt");
        assert_eq!(d.message, "hi");
        assert_eq!(d.receiver_id, "");
    }

    #[test]
    fn tolerates_url_safe_and_unpadded_input() {
        let url_safe = CIPHER
            .replace('+', "-")
            .replace('/', "_")
            .trim_end_matches('=')
            .to_string();
        assert_eq!(crypt().decrypt(&url_safe).expect("decrypt").message, MSG);
    }

    #[test]
    fn rejects_length_field_beyond_payload() {
        let err = crypt()
            .decrypt("LQxZOXN+p6Td+0gDSDtMKlvfyLdNaMGGqzDYvlCrWJ8=")
            .unwrap_err();
        assert!(matches!(err, Error::BadFormat(_)));
    }

    #[test]
    fn rejects_partial_blocks_and_garbage() {
        assert!(matches!(
            crypt().decrypt("AAAAAAAAAAAAAAAAAAAA").unwrap_err(),
            Error::Crypto
        ));
        assert!(matches!(
            crypt().decrypt("***").unwrap_err(),
            Error::Base64(_)
        ));
        assert!(matches!(
            crypt().decrypt("").unwrap_err(),
            Error::BadFormat(_)
        ));
    }

    #[test]
    fn wrong_key_does_not_yield_message() {
        let other = PrpCrypt::new([7u8; 32]);
        assert!(matches!(
            other.decrypt(CIPHER).unwrap_err(),
            Error::BadFormat("length field exceeds payload")
        ));
    }

    fn seal_raw(c: &PrpCrypt, plain: &[u8]) -> String {
        let mut buf = pkcs7::pad(plain);
        let len = buf.len();
        let out = Aes256CbcEnc::new_from_slices(c.key.as_slice(), &c.key[..16])
            .expect("cipher")
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .expect("encrypt")
            .to_vec();
        BASE64.encode(out)
    }

    #[test]
    fn rejects_layout_shorter_than_header() {
        let c = crypt();
        let err = c.decrypt(&seal_raw(&c, b"aaaaaaaaaaaaaaaa")).unwrap_err();
        assert!(matches!(err, Error::BadFormat("payload shorter than header")));
    }

    #[test]
    fn rejects_non_utf8_message() {
        let c = crypt();
        let mut plain = b"aaaaaaaaaaaaaaaa".to_vec();
        plain.extend_from_slice(&2u32.to_be_bytes());
        plain.extend_from_slice(&[0xff, 0xfe]);
        plain.extend_from_slice(b"wx1");
        let err = c.decrypt(&seal_raw(&c, &plain)).unwrap_err();
        assert!(matches!(err, Error::Utf8(_)));
    }

    #[test]
    fn key_length_is_checked() {
        assert!(matches!(
            decode_aes_key("abc").unwrap_err(),
            Error::InvalidKey(_)
        ));
        assert!(decode_aes_key(&format!("{KEY}=")).is_ok());
    }
}
