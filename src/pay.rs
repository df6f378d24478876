//! WeChat Pay (v2 API) signing, XML payloads and refund notifications.
//!
//! Request/notify parameters are signed as `k1=v1&k2=v2...&key=API_KEY`
//! (keys sorted, empty values skipped), hashed with MD5 or HMAC-SHA256
//! and rendered as uppercase hex.

use std::collections::BTreeMap;

use aes::Aes256;
use base64::Engine;
use ecb::cipher::block_padding::Pkcs7;
use ecb::cipher::{BlockDecryptMut, KeyInit};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha2::Sha256;
use tracing::{debug, instrument};

use crate::errors::{Error, Result};
use crate::keygen::BASE64_LENIENT;
use crate::signature::hex_signature_eq;
use crate::xml;

type HmacSha256 = Hmac<Sha256>;
type Aes256EcbDec = ecb::Decryptor<Aes256>;

pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignType {
    #[default]
    Md5,
    HmacSha256,
}

impl SignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignType::Md5 => "MD5",
            SignType::HmacSha256 => "HMAC-SHA256",
        }
    }

    /// Anything other than `HMAC-SHA256` falls back to MD5.
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("HMAC-SHA256") => SignType::HmacSha256,
            _ => SignType::Md5,
        }
    }
}

/// `k=v` pairs for non-empty values sorted by key, `&`-joined, with
/// `key=<api_key>` appended.
pub fn format_url(params: &Params, api_key: Option<&str>) -> String {
    let mut parts: Vec<String> = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    if let Some(key) = api_key {
        parts.push(format!("key={key}"));
    }
    parts.join("&")
}

pub fn calculate_signature(params: &Params, api_key: &str, sign_type: SignType) -> Result<String> {
    let url = format_url(params, Some(api_key));
    let digest = match sign_type {
        SignType::Md5 => hex::encode_upper(Md5::digest(url.as_bytes())),
        SignType::HmacSha256 => {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(api_key.as_bytes())
                .map_err(|_| Error::InvalidKey("hmac key".into()))?;
            mac.update(url.as_bytes());
            hex::encode_upper(mac.finalize().into_bytes())
        }
    };
    Ok(digest)
}

/// Check the `sign` parameter of a request or notification.
///
/// The algorithm follows the `sign_type` parameter when present.
#[instrument(level = "debug", skip_all)]
pub fn check_signature(params: &Params, api_key: &str) -> Result<()> {
    let mut unsigned = params.clone();
    let supplied = unsigned.remove("sign").ok_or(Error::MissingField("sign"))?;
    let sign_type = SignType::from_param(unsigned.get("sign_type").map(String::as_str));
    let computed = calculate_signature(&unsigned, api_key, sign_type)?;
    // upper-hex on both sides
    if hex_signature_eq(&computed.to_ascii_lowercase(), &supplied) {
        Ok(())
    } else {
        debug!(sign_type = sign_type.as_str(), "pay signature mismatch");
        Err(Error::InvalidSignature)
    }
}

/// Render sorted params as a Pay request body. Digits-only values are bare,
/// everything else goes in CDATA; `sign` is appended last when given.
pub fn dict_to_xml(params: &Params, sign: Option<&str>) -> String {
    let mut out = String::from("<xml>");
    for (k, v) in params {
        if k == "sign" {
            continue;
        }
        if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) {
            out.push_str(&format!("<{k}>{v}</{k}>"));
        } else {
            out.push_str(&xml::cdata_element(k, v));
        }
    }
    if let Some(sign) = sign {
        out.push_str(&xml::cdata_element("sign", sign));
    }
    out.push_str("</xml>");
    out
}

/// Sign `params` and render the request body in one step.
pub fn signed_xml(params: &Params, api_key: &str, sign_type: SignType) -> Result<String> {
    let mut params = params.clone();
    if sign_type == SignType::HmacSha256 {
        params.insert("sign_type".into(), sign_type.as_str().into());
    }
    let sign = calculate_signature(&params, api_key, sign_type)?;
    Ok(dict_to_xml(&params, Some(&sign)))
}

pub fn xml_to_dict(body: &str) -> Result<Params> {
    xml::parse(body)
}

/// Parameters for `WeixinJSBridge.invoke('getBrandWCPayRequest', ...)`.
pub fn jsapi_pay_params(
    app_id: &str,
    prepay_id: &str,
    api_key: &str,
    sign_type: SignType,
    nonce_str: &str,
    timestamp: &str,
) -> Result<Params> {
    let mut params = Params::new();
    params.insert("appId".into(), app_id.into());
    params.insert("timeStamp".into(), timestamp.into());
    params.insert("nonceStr".into(), nonce_str.into());
    params.insert("package".into(), format!("prepay_id={prepay_id}"));
    params.insert("signType".into(), sign_type.as_str().into());
    let sign = calculate_signature(&params, api_key, sign_type)?;
    params.insert("paySign".into(), sign);
    Ok(params)
}

/// Decrypts the `req_info` field of refund notifications.
#[derive(Clone)]
pub struct RefundCrypto {
    key: [u8; 32],
}

impl std::fmt::Debug for RefundCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RefundCrypto { key: [redacted] }")
    }
}

impl RefundCrypto {
    /// Key = lowercase hex MD5 of the merchant API key (32 ASCII bytes).
    pub fn new(api_key: &str) -> Self {
        let hex_key = hex::encode(Md5::digest(api_key.as_bytes()));
        let mut key = [0u8; 32];
        key.copy_from_slice(hex_key.as_bytes());
        Self { key }
    }

    /// AES-256-ECB + PKCS#7; returns the inner `<root>` fields.
    pub fn decrypt_req_info(&self, req_info: &str) -> Result<Params> {
        let mut buf = BASE64_LENIENT.decode(req_info.trim())?;
        let plain = <Aes256EcbDec as KeyInit>::new(&self.key.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| Error::Crypto)?;
        let text = String::from_utf8(plain.to_vec())?;
        xml::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const API_KEY: &str = "192006250b4c09247ec02edce69f6a2d";

    fn sample() -> Params {
        [
            ("appid", "wxd930ea5d5a258f4f"),
            ("mch_id", "10000100"),
            ("device_info", "1000"),
            ("body", "test"),
            ("nonce_str", "ibuaiVcKdpRxkhJA"),
            ("sign_type", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn format_url_skips_empty_values() {
        assert_eq!(
            format_url(&sample(), Some(API_KEY)),
            "appid=wxd930ea5d5a258f4f&body=test&device_info=1000&mch_id=10000100&nonce_str=ibuaiVcKdpRxkhJA&key=192006250b4c09247ec02edce69f6a2d"
        );
    }

    #[test]
    fn md5_and_hmac_vectors() {
        assert_eq!(
            calculate_signature(&sample(), API_KEY, SignType::Md5).expect("md5"),
            "9A0A8659F005D6984697E2CA0A9CF3B7"
        );
        assert_eq!(
            calculate_signature(&sample(), API_KEY, SignType::HmacSha256).expect("hmac"),
            "6A9AE1657590FD6257D693A078E1C3E4BB6BA4DC30B23E0EE2496E54170DACD6"
        );
    }

    #[test]
    fn check_signature_follows_sign_type() {
        let mut p = sample();
        p.insert("sign".into(), "9A0A8659F005D6984697E2CA0A9CF3B7".into());
        assert!(check_signature(&p, API_KEY).is_ok());

        p.insert("sign".into(), "9a0a8659f005d6984697e2ca0a9cf3b7".into());
        assert!(check_signature(&p, API_KEY).is_ok());

        p.insert("sign".into(), "00".into());
        assert!(matches!(
            check_signature(&p, API_KEY),
            Err(Error::InvalidSignature)
        ));

        p.remove("sign");
        assert!(matches!(
            check_signature(&p, API_KEY),
            Err(Error::MissingField("sign"))
        ));
    }

    #[test]
    fn signed_xml_verifies_after_parse() {
        let body = signed_xml(&sample(), API_KEY, SignType::HmacSha256).expect("xml");
        assert!(body.contains("<mch_id>10000100</mch_id>"));
        assert!(body.contains("<body><![CDATA[test]]></body>"));
        assert!(body.ends_with("]]></sign></xml>"));
        let parsed = xml_to_dict(&body).expect("parse");
        assert_eq!(parsed["sign_type"], "HMAC-SHA256");
        check_signature(&parsed, API_KEY).expect("valid");
    }

    #[test]
    fn jsapi_pay_sign_vector() {
        let p = jsapi_pay_params(
            "wxd930ea5d5a258f4f",
            "wx201410272009395522657a690389285100",
            API_KEY,
            SignType::Md5,
            "5K8264ILTKCH16CQ",
            "1414561699",
        )
        .expect("params");
        assert_eq!(p["package"], "prepay_id=wx201410272009395522657a690389285100");
        assert_eq!(p["paySign"], "8B13E2AECDE312E1CEE2CFF428DCAEF6");
    }

    #[test]
    fn refund_req_info_vector() {
        let req_info = "WBzGpzQuNpcFxIlFjUUD9BZv+lpBMzd2SHiKCkwfALWid5G8ZvfOussfMIHLbKJmBhUUBzKEtuVKVTb11meMYkf/sdsYHx+3/Q8gkqdQrcYxHA6rlNTzoOZZOwotMnuXjv+Gcd8C/KSvoi8OnTM0op0QVGSY+Q9OWdWdmwmJnIhvYec7FaGDbpMuFsCVoL3tZSjdwZhoVNVwBb78Z6z3Ag==";
        let fields = RefundCrypto::new(API_KEY)
            .decrypt_req_info(req_info)
            .expect("decrypt");
        assert_eq!(fields["out_refund_no"], "R1");
        assert_eq!(fields["refund_fee"], "100");
        assert_eq!(fields["refund_status"], "SUCCESS");

        assert!(RefundCrypto::new("wrong").decrypt_req_info(req_info).is_err());
    }

    #[test]
    fn sign_type_parsing() {
        assert_eq!(SignType::from_param(Some("hmac-sha256")), SignType::HmacSha256);
        assert_eq!(SignType::from_param(Some("MD5")), SignType::Md5);
        assert_eq!(SignType::from_param(None), SignType::Md5);
    }
}
