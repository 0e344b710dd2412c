//! h2c (HTTP/2 over Cleartext) 升级器
//!
//! 处理 HTTP/1.1 → HTTP/2 的明文升级握手：校验并解码 `HTTP2-Settings`、
//! 把触发升级的请求翻译成 HTTP/2 伪头部形式、写出固定的 101 响应，
//! 然后把连接交给处于前言等待状态的 HTTP/2 引擎。

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::error::{ProtocolError, ProtocolResult};
use crate::server::config::ServerConfig;
use crate::server::http1_parser::{HeaderSet, Prologue};
use crate::server::http2_connection::Http2Connection;
use crate::server::http2_settings::Http2Settings;
use crate::server::upgrade::{ProtocolUpgrader, UpgradeOutcome, UpgradeProvider};
use crate::server::{ConnectionContext, ConnectionState};
use crate::utils::logger::{debug, info};

/// 协议切换响应，前提满足后原样写出
pub const H2C_SWITCHING_PROTOCOLS: &[u8] =
    b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: h2c\r\n\r\n";

/// 升级时不得带入 HTTP/2 头部集的连接级头部
const CONNECTION_SPECIFIC_HEADERS: &[&str] = &[
    "connection",
    "upgrade",
    "http2-settings",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
];

/// h2c 升级器
pub struct H2cUpgrader;

impl H2cUpgrader {
    /// 把 HTTP/1.1 请求行 + 头部翻译成 HTTP/2 伪头部集
    ///
    /// `:authority` 来自被移除的 `Host` 头部；连接级头部一并剥除。
    fn translate_headers(
        ctx: &ConnectionContext,
        prologue: &Prologue,
        headers: &mut HeaderSet,
    ) -> HeaderSet {
        let mut translated = HeaderSet::new();
        translated.append(":method", prologue.method.clone());
        translated.append(":path", prologue.raw_target());
        translated.append(":scheme", ctx.scheme());
        if let Some(host) = headers.remove("host").into_iter().next() {
            translated.append(":authority", host);
        }
        for (name, value) in headers.iter() {
            if CONNECTION_SPECIFIC_HEADERS
                .iter()
                .any(|h| name.eq_ignore_ascii_case(h))
            {
                continue;
            }
            translated.append(name.to_ascii_lowercase(), value);
        }
        translated
    }
}

#[async_trait]
impl ProtocolUpgrader for H2cUpgrader {
    fn supported_protocols(&self) -> &[&str] {
        &["h2c"]
    }

    async fn upgrade(
        &self,
        mut ctx: ConnectionContext,
        prologue: &Prologue,
        headers: &mut HeaderSet,
    ) -> ProtocolResult<UpgradeOutcome> {
        let remote_addr = ctx.remote_addr();
        debug!(
            "🔄 [h2c] 升级请求 ({}): {} {} {}",
            ConnectionState::Upgrading,
            remote_addr,
            prologue.method,
            prologue.raw_target()
        );

        // HTTP2-Settings 是硬性前提：缺失或重复都是致命的协议错误
        let settings_values = headers.get_all("http2-settings");
        let encoded = match settings_values.as_slice() {
            [] => return Err(ProtocolError::MissingUpgradeHeader("HTTP2-Settings")),
            [v] => (*v).to_string(),
            _ => {
                return Err(ProtocolError::InvalidUpgradeHeader(
                    "重复的 HTTP2-Settings 头部".to_string(),
                ))
            }
        };

        let payload = URL_SAFE_NO_PAD.decode(encoded.as_bytes()).map_err(|e| {
            ProtocolError::InvalidUpgradeHeader(format!("HTTP2-Settings 不是合法 base64url: {}", e))
        })?;
        let peer_settings = Http2Settings::parse(&payload)?;

        let translated = Self::translate_headers(&ctx, prologue, headers);
        let first_request = prologue.upgraded("2.0");

        ctx.writer.write_all(H2C_SWITCHING_PROTOCOLS).await?;
        ctx.writer.flush().await?;
        info!(
            "✅ [h2c] 已切换协议，等待客户端前言 ({}): {}",
            ConnectionState::PrefaceExpected,
            remote_addr
        );

        Ok(UpgradeOutcome::Upgraded(Box::new(Http2Connection::upgraded(
            ctx,
            peer_settings,
            (first_request, translated),
        ))))
    }
}

/// h2c 升级器工厂
pub struct H2cUpgradeProvider;

impl UpgradeProvider for H2cUpgradeProvider {
    fn config_keys(&self) -> &[&str] {
        &["h2c"]
    }

    fn create(&self, _config: &ServerConfig) -> Arc<dyn ProtocolUpgrader> {
        Arc::new(H2cUpgrader)
    }
}
