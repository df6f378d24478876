//! Minimal XML helpers for the flat `<xml>` documents WeChat exchanges.
//!
//! Callback bodies, passive replies and Pay v2 payloads are all one root
//! element with leaf children. Nested containers (`ScanCodeInfo`,
//! `SendPicsInfo`, ...) are flattened: each leaf is keyed by its own name.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::errors::{Error, Result};

/// Parse a flat XML document into `name -> text`. Later duplicates win.
pub fn parse(xml: &str) -> Result<BTreeMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = BTreeMap::new();
    let mut stack: Vec<String> = Vec::new();
    let mut saw_root = false;
    // true until the current element receives its first text event
    let mut fresh = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8(e.name().as_ref().to_vec())?;
                saw_root = true;
                fresh = true;
                stack.push(name);
            }
            Event::Empty(e) => {
                if stack.is_empty() {
                    saw_root = true;
                } else {
                    let name = String::from_utf8(e.name().as_ref().to_vec())?;
                    out.insert(name, String::new());
                }
                fresh = false;
            }
            Event::End(_) => {
                // `<Content></Content>` never sees a text event
                if fresh && stack.len() >= 2 {
                    push_text(&mut out, &stack, "", true);
                }
                fresh = false;
                stack.pop();
            }
            Event::Text(t) => {
                if stack.len() >= 2 {
                    let text = t
                        .unescape()
                        .map_err(|e| Error::Xml(e.to_string()))?
                        .into_owned();
                    push_text(&mut out, &stack, &text, fresh);
                    fresh = false;
                }
            }
            Event::CData(c) => {
                if stack.len() >= 2 {
                    let text = String::from_utf8(c.into_inner().into_owned())?;
                    push_text(&mut out, &stack, &text, fresh);
                    fresh = false;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(Error::Xml("document has no root element".into()));
    }
    if !stack.is_empty() {
        return Err(Error::Xml(format!("unclosed element <{}>", stack.join("/"))));
    }
    Ok(out)
}

// A CDATA split across sections (`]]]]><![CDATA[>`) arrives as several events.
fn push_text(out: &mut BTreeMap<String, String>, stack: &[String], text: &str, fresh: bool) {
    let Some(name) = stack.last() else {
        return;
    };
    if fresh {
        out.insert(name.clone(), text.to_string());
    } else {
        out.entry(name.clone()).or_default().push_str(text);
    }
}

/// Wrap `s` in a CDATA section, splitting any embedded `]]>`.
pub fn cdata(s: &str) -> String {
    format!("<![CDATA[{}]]>", s.replace("]]>", "]]]]><![CDATA[>"))
}

/// `<name><![CDATA[value]]></name>`
pub fn cdata_element(name: &str, value: &str) -> String {
    format!("<{name}>{}</{name}>", cdata(value))
}

/// Escape text for a bare (non-CDATA) element.
pub fn escape(s: &str) -> String {
    quick_xml::escape::escape(s).into_owned()
}

/// Encrypted reply envelope sent back to the WeChat server.
pub fn envelope(encrypt: &str, signature: &str, timestamp: &str, nonce: &str) -> String {
    format!(
        "<xml>\n{}\n{}\n<TimeStamp>{}</TimeStamp>\n{}\n</xml>",
        cdata_element("Encrypt", encrypt),
        cdata_element("MsgSignature", signature),
        escape(timestamp),
        cdata_element("Nonce", nonce),
    )
}
