//! Reference callback endpoint built on axum.
//!
//! - GET  /health   - Health check endpoint
//! - GET  /callback - URL verification (encrypted `echostr` or plain signature)
//! - POST /callback - Verify, decrypt and parse; text messages get an echo reply
//!
//! Enabled with the `server` feature; the `wxcrypto-callback` binary wires it
//! to a listener.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::callback::MessageCrypto;
use crate::errors::Error;
use crate::message::{parse_message, Message, MessageKind};
use crate::reply::{Reply, ReplyKind, EMPTY_REPLY};

/// Query parameters WeChat appends to the callback URL.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub msg_signature: Option<String>,
    pub timestamp: String,
    pub nonce: String,
    #[serde(default)]
    pub echostr: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub crypto: Arc<MessageCrypto>,
}

pub fn router(crypto: MessageCrypto) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/callback", get(verify_url).post(handle_callback))
        .with_state(AppState {
            crypto: Arc::new(crypto),
        })
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

fn error_response(e: &Error) -> Response {
    if e.is_auth_failure() {
        warn!(error = %e, "rejected callback");
        (StatusCode::UNAUTHORIZED, e.to_string()).into_response()
    } else {
        error!(error = %e, "malformed callback");
        (StatusCode::BAD_REQUEST, e.to_string()).into_response()
    }
}

async fn verify_url(State(state): State<AppState>, Query(q): Query<CallbackQuery>) -> Response {
    let Some(echostr) = q.echostr.as_deref() else {
        return (StatusCode::BAD_REQUEST, "missing echostr").into_response();
    };
    let result = match (&q.msg_signature, &q.signature) {
        (Some(msg_sig), _) => state
            .crypto
            .check_signature(msg_sig, &q.timestamp, &q.nonce, echostr),
        (None, Some(sig)) => state
            .crypto
            .verify_plain_url(sig, &q.timestamp, &q.nonce, echostr),
        (None, None) => return (StatusCode::BAD_REQUEST, "missing signature").into_response(),
    };
    match result {
        Ok(echo) => {
            info!("callback url verified");
            (StatusCode::OK, echo).into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn handle_callback(
    State(state): State<AppState>,
    Query(q): Query<CallbackQuery>,
    body: String,
) -> Response {
    let crypto = &state.crypto;
    let (message, encrypted) = match (&q.msg_signature, &q.signature) {
        (Some(msg_sig), _) => (
            crypto.decrypt_and_parse(&body, msg_sig, &q.timestamp, &q.nonce),
            true,
        ),
        (None, Some(sig)) => (
            crypto
                .verify_plain_url(sig, &q.timestamp, &q.nonce, "")
                .and_then(|_| parse_message(&body)),
            false,
        ),
        (None, None) => return (StatusCode::BAD_REQUEST, "missing signature").into_response(),
    };
    let message = match message {
        Ok(m) => m,
        Err(e) => return error_response(&e),
    };

    info!(
        msg_type = message.msg_type(),
        create_time = message.header.create_time,
        "callback message received"
    );

    let Some(reply) = reply_for(&message) else {
        return (StatusCode::OK, EMPTY_REPLY).into_response();
    };
    if !encrypted {
        return (StatusCode::OK, reply.render()).into_response();
    }
    match crypto.encrypt_reply(&reply) {
        Ok(envelope) => (StatusCode::OK, envelope).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encrypt reply");
            (StatusCode::OK, EMPTY_REPLY).into_response()
        }
    }
}

fn reply_for(message: &Message) -> Option<Reply> {
    match &message.kind {
        MessageKind::Text { content } => Some(Reply::to(
            message,
            ReplyKind::text(format!("received: {content}")),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::sha1_signature;
    use crate::xml;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    const TOKEN: &str = "123456";
    const KEY: &str = "kWxPEV2UEDyxWpmPdKC3F4dgPDmOvfKX1HGnEUDS1aR";
    const CORP_ID: &str = "ww1436e0e65a779aee";
    const ECHOSTR: &str = "c+euLfIj+oKrry6ojyRWCn1fGf909XtUtPIfOCidWEOvNA0rYZXJ5x575aJoEFqFha6nuAUpPgO5i2/WykjWUw==";
    const ECHO_SIGNATURE: &str = "dec4660011dfdda7130c79966ee332c0fbee23df";

    fn crypto() -> MessageCrypto {
        MessageCrypto::wecom(TOKEN, KEY, CORP_ID).expect("crypto")
    }

    fn encode(s: &str) -> String {
        s.replace('+', "%2B").replace('/', "%2F").replace('=', "%3D")
    }

    async fn body_string(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), 1 << 20).await.expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn health_ok() {
        let resp = router(crypto())
            .oneshot(Request::get("/health").body(Body::empty()).expect("req"))
            .await
            .expect("resp");
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn encrypted_url_verification() {
        let uri = format!(
            "/callback?msg_signature={ECHO_SIGNATURE}&timestamp=1411525903&nonce=461056294&echostr={}",
            encode(ECHOSTR)
        );
        let resp = router(crypto())
            .oneshot(Request::get(uri).body(Body::empty()).expect("req"))
            .await
            .expect("resp");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "4264231990");
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let uri = format!(
            "/callback?msg_signature=00&timestamp=1411525903&nonce=461056294&echostr={}",
            encode(ECHOSTR)
        );
        let resp = router(crypto())
            .oneshot(Request::get(uri).body(Body::empty()).expect("req"))
            .await
            .expect("resp");
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn plain_url_verification() {
        let sig = sha1_signature(&[TOKEN, "1411525903", "461056294"]);
        let uri = format!(
            "/callback?signature={sig}&timestamp=1411525903&nonce=461056294&echostr=hello"
        );
        let resp = router(crypto())
            .oneshot(Request::get(uri).body(Body::empty()).expect("req"))
            .await
            .expect("resp");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "hello");
    }

    #[tokio::test]
    async fn encrypted_text_message_gets_encrypted_reply() {
        let c = crypto();
        let inner = "<xml><ToUserName><![CDATA[ww1436e0e65a779aee]]></ToUserName><FromUserName><![CDATA[zhangsan]]></FromUserName><CreateTime>1348831860</CreateTime><MsgType><![CDATA[text]]></MsgType><Content><![CDATA[ping]]></Content><MsgId>1</MsgId><AgentID>1</AgentID></xml>";
        let body = c
            .encrypt_message(inner, "n1", Some("1348831860"))
            .expect("encrypt");
        let sig = xml::parse(&body).expect("xml")["MsgSignature"].clone();

        let uri = format!("/callback?msg_signature={sig}&timestamp=1348831860&nonce=n1");
        let resp = router(c.clone())
            .oneshot(Request::post(uri).body(Body::from(body)).expect("req"))
            .await
            .expect("resp");
        assert_eq!(resp.status(), StatusCode::OK);

        let envelope = body_string(resp).await;
        let f = xml::parse(&envelope).expect("xml");
        let plain = c
            .decrypt_message(&envelope, &f["MsgSignature"], &f["TimeStamp"], &f["Nonce"])
            .expect("decrypt");
        let reply = xml::parse(&plain).expect("xml");
        assert_eq!(reply["ToUserName"], "zhangsan");
        assert_eq!(reply["Content"], "received: ping");
    }

    #[tokio::test]
    async fn events_are_acknowledged() {
        let c = crypto();
        let inner = "<xml><MsgType>event</MsgType><Event>kf_msg_or_event</Event><Token>t</Token><OpenKfId>wk1</OpenKfId></xml>";
        let body = c.encrypt_message(inner, "n2", Some("1")).expect("encrypt");
        let sig = xml::parse(&body).expect("xml")["MsgSignature"].clone();
        let uri = format!("/callback?msg_signature={sig}&timestamp=1&nonce=n2");
        let resp = router(c)
            .oneshot(Request::post(uri).body(Body::from(body)).expect("req"))
            .await
            .expect("resp");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, EMPTY_REPLY);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let sig = sha1_signature(&[TOKEN, "1", "n3", "x"]);
        let uri = format!("/callback?msg_signature={sig}&timestamp=1&nonce=n3");
        let resp = router(crypto())
            .oneshot(Request::post(uri).body(Body::from("<xml>")).expect("req"))
            .await
            .expect("resp");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
