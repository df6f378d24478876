//! Passive replies rendered as callback response XML.
//!
//! A passive reply is the body returned to a POST callback. In safe mode it
//! must be encrypted with [`MessageCrypto::encrypt_reply`]; answering with
//! [`EMPTY_REPLY`] acknowledges the message without replying.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::callback::MessageCrypto;
use crate::errors::Result;
use crate::keygen::random_string;
use crate::message::Message;
use crate::xml::{cdata_element, escape};

/// Acknowledge without replying.
pub const EMPTY_REPLY: &str = "success";

/// News replies carry at most eight articles.
pub const MAX_ARTICLES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub title: String,
    pub description: String,
    pub pic_url: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Music {
    pub title: String,
    pub description: String,
    pub music_url: String,
    pub hq_music_url: String,
    pub thumb_media_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyKind {
    Text { content: String },
    Image { media_id: String },
    Voice { media_id: String },
    Video {
        media_id: String,
        title: String,
        description: String,
    },
    Music(Music),
    News(Vec<Article>),
    /// Hand the conversation to the customer service system, optionally to one account
    TransferCustomerService { kf_account: Option<String> },
}

impl ReplyKind {
    pub fn text(content: impl Into<String>) -> Self {
        ReplyKind::Text {
            content: content.into(),
        }
    }

    fn msg_type(&self) -> &'static str {
        match self {
            ReplyKind::Text { .. } => "text",
            ReplyKind::Image { .. } => "image",
            ReplyKind::Voice { .. } => "voice",
            ReplyKind::Video { .. } => "video",
            ReplyKind::Music(_) => "music",
            ReplyKind::News(_) => "news",
            ReplyKind::TransferCustomerService { .. } => "transfer_customer_service",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// FromUserName: the account replying
    pub source: String,
    /// ToUserName: the user being answered
    pub target: String,
    pub create_time: i64,
    pub kind: ReplyKind,
}

impl Reply {
    /// Reply to `message`, swapping its source and target.
    pub fn to(message: &Message, kind: ReplyKind) -> Self {
        Self {
            source: message.header.target.clone(),
            target: message.header.source.clone(),
            create_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or_default(),
            kind,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("<xml>\n");
        for line in [
            cdata_element("ToUserName", &self.target),
            cdata_element("FromUserName", &self.source),
            format!("<CreateTime>{}</CreateTime>", self.create_time),
            cdata_element("MsgType", self.kind.msg_type()),
        ] {
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str(&render_body(&self.kind));
        out.push_str("</xml>");
        out
    }
}

fn render_body(kind: &ReplyKind) -> String {
    match kind {
        ReplyKind::Text { content } => format!("{}\n", cdata_element("Content", content)),
        ReplyKind::Image { media_id } => {
            format!("<Image>{}</Image>\n", cdata_element("MediaId", media_id))
        }
        ReplyKind::Voice { media_id } => {
            format!("<Voice>{}</Voice>\n", cdata_element("MediaId", media_id))
        }
        ReplyKind::Video {
            media_id,
            title,
            description,
        } => format!(
            "<Video>{}{}{}</Video>\n",
            cdata_element("MediaId", media_id),
            cdata_element("Title", title),
            cdata_element("Description", description),
        ),
        ReplyKind::Music(m) => format!(
            "<Music>{}{}{}{}{}</Music>\n",
            cdata_element("Title", &m.title),
            cdata_element("Description", &m.description),
            cdata_element("MusicUrl", &m.music_url),
            cdata_element("HQMusicUrl", &m.hq_music_url),
            cdata_element("ThumbMediaId", &m.thumb_media_id),
        ),
        ReplyKind::News(articles) => {
            if articles.len() > MAX_ARTICLES {
                warn!(
                    count = articles.len(),
                    "news reply truncated to {MAX_ARTICLES} articles"
                );
            }
            let items: Vec<&Article> = articles.iter().take(MAX_ARTICLES).collect();
            let mut s = format!("<ArticleCount>{}</ArticleCount>\n<Articles>\n", items.len());
            for a in items {
                s.push_str(&format!(
                    "<item>{}{}{}{}</item>\n",
                    cdata_element("Title", &a.title),
                    cdata_element("Description", &a.description),
                    cdata_element("PicUrl", &a.pic_url),
                    cdata_element("Url", &a.url),
                ));
            }
            s.push_str("</Articles>\n");
            s
        }
        ReplyKind::TransferCustomerService { kf_account } => match kf_account {
            Some(account) => format!(
                "<TransInfo><KfAccount>{}</KfAccount></TransInfo>\n",
                escape(account)
            ),
            None => String::new(),
        },
    }
}

impl MessageCrypto {
    /// Render and encrypt a reply with a fresh nonce and the current time.
    pub fn encrypt_reply(&self, reply: &Reply) -> Result<String> {
        self.encrypt_message(&reply.render(), &random_string(16), None)
    }
}
