#![doc = r#"
wxcrypto-rs

Callback message crypto for WeChat (Official Account, Mini Program, Open
Platform) and WeCom (WeChat Work), plus the signature schemes around it.

Included:
- callback: verify/decrypt inbound payloads and encrypt replies (XML or JSON envelopes)
- prpcrypt / pkcs7: the AES-256-CBC cipher and its 32-byte padding
- signature: sorted-SHA1 signing for callbacks, JS-SDK and cards
- message / reply: typed inbound messages and passive reply rendering
- wxa: Mini Program encrypted data
- pay: WeChat Pay v2 signing and refund notification decryption
- keygen / config: credential generation and validation

Quick usage:

```ignore
use wxcrypto_rs::{MessageCrypto, Reply, ReplyKind};

let crypto = MessageCrypto::wecom(token, encoding_aes_key, corp_id)?;

// GET: URL verification
let echo = crypto.check_signature(&q.msg_signature, &q.timestamp, &q.nonce, &q.echostr)?;

// POST: inbound message
let msg = crypto.decrypt_and_parse(&body, &q.msg_signature, &q.timestamp, &q.nonce)?;
let reply = Reply::to(&msg, ReplyKind::text("hello"));
let envelope = crypto.encrypt_reply(&reply)?;
```
"#]

pub mod callback;
pub mod config;
pub mod errors;
pub mod keygen;
pub mod message;
pub mod pay;
pub mod pkcs7;
pub mod prpcrypt;
pub mod reply;
pub mod signature;
pub mod wxa;
pub mod xml;

#[cfg(feature = "server")]
pub mod server;

pub use callback::MessageCrypto;
pub use config::{CallbackConfig, ReceiverKind};
pub use errors::{Error, Result};
pub use message::{parse_message, EventKind, Message, MessageKind};
pub use reply::{Reply, ReplyKind, EMPTY_REPLY};
