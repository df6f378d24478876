//! WeChat / WeCom callback server
//!
//! Running:
//! ```bash
//! WECHAT_TOKEN=your_callback_token \
//! WECHAT_ENCODING_AES_KEY=your_43_char_aes_key \
//! WECHAT_RECEIVER_ID=your_appid_or_corpid \
//! WECHAT_RECEIVER_KIND=corp \
//! cargo run --features server --bin wxcrypto-callback
//! ```
//!
//! Values may also live in a `.env` file. `CALLBACK_ADDR` overrides the
//! listen address (default 127.0.0.1:3000).

use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wxcrypto_rs::callback::MessageCrypto;
use wxcrypto_rs::config::CallbackConfig;
use wxcrypto_rs::server;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = CallbackConfig::from_env().context("load callback config")?;
    if config.receiver_id.is_none() {
        warn!("WECHAT_RECEIVER_ID not set; payloads for any receiver will be accepted");
    }
    let crypto = MessageCrypto::from_config(&config).context("init message crypto")?;

    let addr: SocketAddr = env::var("CALLBACK_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()
        .context("parse CALLBACK_ADDR")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, kind = ?config.receiver_kind, "callback server listening");

    axum::serve(listener, server::router(crypto))
        .await
        .context("serve")?;
    Ok(())
}
