//! Typed view of decrypted inbound callback XML.
//!
//! Parse with [`parse_message`]; anything not modelled here is kept as an
//! `Unknown` variant carrying the raw field map.

use std::collections::BTreeMap;

use tracing::debug;

use crate::callback::MessageCrypto;
use crate::errors::{Error, Result};
use crate::xml;

/// Fields shared by every message and event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// FromUserName: openid / userid of the sender
    pub source: String,
    /// ToUserName: the account that received it
    pub target: String,
    pub create_time: i64,
    /// MsgId, absent for most events
    pub id: Option<i64>,
    /// WeCom application id
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: MessageHeader,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text {
        content: String,
    },
    Image {
        media_id: String,
        pic_url: String,
    },
    Voice {
        media_id: String,
        format: String,
        recognition: Option<String>,
    },
    Video {
        media_id: String,
        thumb_media_id: String,
    },
    ShortVideo {
        media_id: String,
        thumb_media_id: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
        scale: i64,
        label: String,
    },
    Link {
        title: String,
        description: String,
        url: String,
    },
    Event(EventKind),
    Unknown {
        msg_type: String,
        raw: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Subscribe,
    /// Subscribed by scanning a parametric QR code
    SubscribeScan { scene_id: String, ticket: String },
    Unsubscribe,
    /// Already-subscribed user scanned a parametric QR code
    Scan { scene_id: String, ticket: String },
    Location {
        latitude: f64,
        longitude: f64,
        precision: f64,
    },
    Click { key: String },
    View { url: String, menu_id: Option<String> },
    TemplateSendJobFinish { status: String },
    /// WeCom Kf: new messages are waiting for `kf/sync_msg`
    KfMsgOrEvent { token: String, open_kfid: String },
    Unknown {
        event: String,
        raw: BTreeMap<String, String>,
    },
}

impl Message {
    pub fn msg_type(&self) -> &str {
        match &self.kind {
            MessageKind::Text { .. } => "text",
            MessageKind::Image { .. } => "image",
            MessageKind::Voice { .. } => "voice",
            MessageKind::Video { .. } => "video",
            MessageKind::ShortVideo { .. } => "shortvideo",
            MessageKind::Location { .. } => "location",
            MessageKind::Link { .. } => "link",
            MessageKind::Event(_) => "event",
            MessageKind::Unknown { msg_type, .. } => msg_type,
        }
    }
}

struct Fields(BTreeMap<String, String>);

impl Fields {
    fn take(&mut self, name: &'static str) -> String {
        self.0.remove(name).unwrap_or_default()
    }

    fn take_opt(&mut self, name: &'static str) -> Option<String> {
        self.0.remove(name).filter(|s| !s.is_empty())
    }

    fn num<T: std::str::FromStr + Default>(&mut self, name: &'static str) -> T {
        self.take(name).trim().parse().unwrap_or_default()
    }
}

/// Parse decrypted callback XML.
pub fn parse_message(body: &str) -> Result<Message> {
    let mut f = Fields(xml::parse(body)?);
    let msg_type = f
        .take_opt("MsgType")
        .ok_or(Error::MissingField("MsgType"))?
        .to_ascii_lowercase();

    let header = MessageHeader {
        source: f.take("FromUserName"),
        target: f.take("ToUserName"),
        create_time: f.num("CreateTime"),
        id: f.take_opt("MsgId").and_then(|s| s.trim().parse().ok()),
        agent_id: f.take_opt("AgentID"),
    };

    let kind = match msg_type.as_str() {
        "text" => MessageKind::Text {
            content: f.take("Content"),
        },
        "image" => MessageKind::Image {
            media_id: f.take("MediaId"),
            pic_url: f.take("PicUrl"),
        },
        "voice" => MessageKind::Voice {
            media_id: f.take("MediaId"),
            format: f.take("Format"),
            recognition: f.take_opt("Recognition"),
        },
        "video" => MessageKind::Video {
            media_id: f.take("MediaId"),
            thumb_media_id: f.take("ThumbMediaId"),
        },
        "shortvideo" => MessageKind::ShortVideo {
            media_id: f.take("MediaId"),
            thumb_media_id: f.take("ThumbMediaId"),
        },
        "location" => MessageKind::Location {
            latitude: f.num("Location_X"),
            longitude: f.num("Location_Y"),
            scale: f.num("Scale"),
            label: f.take("Label"),
        },
        "link" => MessageKind::Link {
            title: f.take("Title"),
            description: f.take("Description"),
            url: f.take("Url"),
        },
        "event" => MessageKind::Event(parse_event(&mut f)),
        _ => {
            debug!(%msg_type, "unmodelled message type");
            MessageKind::Unknown {
                msg_type,
                raw: f.0,
            }
        }
    };

    Ok(Message { header, kind })
}

fn parse_event(f: &mut Fields) -> EventKind {
    let event = f.take("Event");
    match event.to_ascii_lowercase().as_str() {
        "subscribe" => match f.take_opt("EventKey") {
            Some(key) if key.starts_with("qrscene_") => EventKind::SubscribeScan {
                scene_id: key["qrscene_".len()..].to_string(),
                ticket: f.take("Ticket"),
            },
            _ => EventKind::Subscribe,
        },
        "unsubscribe" => EventKind::Unsubscribe,
        "scan" => EventKind::Scan {
            scene_id: f.take("EventKey"),
            ticket: f.take("Ticket"),
        },
        "location" => EventKind::Location {
            latitude: f.num("Latitude"),
            longitude: f.num("Longitude"),
            precision: f.num("Precision"),
        },
        "click" => EventKind::Click {
            key: f.take("EventKey"),
        },
        "view" => EventKind::View {
            url: f.take("EventKey"),
            menu_id: f.take_opt("MenuId"),
        },
        "templatesendjobfinish" => EventKind::TemplateSendJobFinish {
            status: f.take("Status"),
        },
        "kf_msg_or_event" => EventKind::KfMsgOrEvent {
            token: f.take("Token"),
            open_kfid: f.take("OpenKfId"),
        },
        _ => EventKind::Unknown {
            event,
            raw: std::mem::take(&mut f.0),
        },
    }
}

impl MessageCrypto {
    /// Verify, decrypt and parse a POST body in one call.
    pub fn decrypt_and_parse(
        &self,
        body: &str,
        signature: &str,
        timestamp: &str,
        nonce: &str,
    ) -> Result<Message> {
        let plain = self.decrypt_message(body, signature, timestamp, nonce)?;
        parse_message(&plain)
    }
}
