//! Credential and nonce generation for callback configuration.
//!
//! - Token: an alphanumeric string (default 32 chars; max 32), used for SHA1 signature verification.
//! - EncodingAESKey: a 43-character Base64 string (letters/digits only, no padding) that decodes to 32 bytes
//!   when appending a single '='. Used to derive the AES-256 key for callback payloads.
//! - Nonces and the 16-byte random prefix of every encrypted payload.

use base64::{
    alphabet,
    engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD as BASE64},
    engine::DecodePaddingMode,
    Engine,
};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};

/// Standard alphabet, lenient on padding and trailing bits.
///
/// Keys issued by the admin consoles frequently carry non-zero trailing bits
/// in their 43rd character, which the strict engine rejects.
pub(crate) const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Generate an alphanumeric Token of given length (default 32; allowed 1..=32).
pub fn generate_token(len: usize) -> String {
    let len = if len == 0 || len > 32 { 32 } else { len };
    random_string(len)
}

/// Generate a 43-character EncodingAESKey (alphanumeric only) derived from 32 random bytes.
///
/// The console only accepts "英文或数字", so Base64 output containing `+` or `/`
/// is rejected and resampled.
pub fn generate_encoding_aes_key() -> String {
    loop {
        let mut key_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut key_bytes);

        let b64 = BASE64.encode(key_bytes);
        let trimmed = b64.trim_end_matches('=');
        if trimmed.len() == 43 && trimmed.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return trimmed.to_string();
        }
    }
}

/// Verify the provided EncodingAESKey format:
/// - exactly 43 characters
/// - Base64-decodes to 32 bytes after appending '='
pub fn verify_encoding_aes_key(key: &str) -> bool {
    if key.len() != 43 {
        return false;
    }
    match BASE64_LENIENT.decode(format!("{key}=")) {
        Ok(bytes) => bytes.len() == 32,
        Err(_) => false,
    }
}

/// Alphanumeric random string, used for nonces and payload prefixes.
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
