//! WebSocket 升级器
//!
//! 通用升级器契约的第二个实现：校验 `Sec-WebSocket-Key`、按配置的
//! Origin 白名单过滤、写出带 `Sec-WebSocket-Accept` 的 101 响应。
//! decline 路径严格无副作用：不写字节、不动头部，请求回落到普通
//! HTTP/1.1 处理。帧层收发由上层协作者接管。

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha1::{Digest, Sha1};

use crate::error::ProtocolResult;
use crate::server::config::ServerConfig;
use crate::server::http1_parser::{HeaderSet, Prologue};
use crate::server::upgrade::{ProtocolUpgrader, UpgradeOutcome, UpgradeProvider};
use crate::server::{ConnectionContext, ConnectionState, ProtocolEngine, ProtocolType};
use crate::utils::logger::{debug, info};

/// RFC 6455 规定的固定 GUID
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// 计算 `Sec-WebSocket-Accept` 值
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// WebSocket 升级器
pub struct WebSocketUpgrader {
    /// 允许的 Origin 列表，空表示不限制
    allowed_origins: Vec<String>,
}

impl WebSocketUpgrader {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self { allowed_origins }
    }

    fn origin_allowed(&self, headers: &HeaderSet) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        match headers.get("origin") {
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin)),
            None => false,
        }
    }
}

#[async_trait]
impl ProtocolUpgrader for WebSocketUpgrader {
    fn supported_protocols(&self) -> &[&str] {
        &["websocket"]
    }

    async fn upgrade(
        &self,
        mut ctx: ConnectionContext,
        prologue: &Prologue,
        headers: &mut HeaderSet,
    ) -> ProtocolResult<UpgradeOutcome> {
        let remote_addr = ctx.remote_addr();

        let Some(key) = headers.get("sec-websocket-key") else {
            debug!("↩️ [WebSocket] 缺少 Sec-WebSocket-Key，decline: {}", remote_addr);
            return Ok(UpgradeOutcome::Declined(ctx));
        };
        if !self.origin_allowed(headers) {
            debug!(
                "↩️ [WebSocket] Origin 不在白名单内，decline: {} (origin: {:?})",
                remote_addr,
                headers.get("origin")
            );
            return Ok(UpgradeOutcome::Declined(ctx));
        }

        let accept = accept_key(key);
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            accept
        );
        ctx.writer.write_all(response.as_bytes()).await?;
        ctx.writer.flush().await?;
        info!(
            "✅ [WebSocket] 已切换协议 ({}): {} {}",
            ConnectionState::Established,
            remote_addr,
            prologue.raw_target()
        );

        Ok(UpgradeOutcome::Upgraded(Box::new(WebSocketConnection::new(
            ctx,
            prologue.clone(),
            headers.clone(),
        ))))
    }
}

/// WebSocket 升级器工厂，Origin 白名单来自配置
pub struct WebSocketUpgradeProvider;

impl UpgradeProvider for WebSocketUpgradeProvider {
    fn config_keys(&self) -> &[&str] {
        &["websocket.allowed-origins"]
    }

    fn create(&self, config: &ServerConfig) -> Arc<dyn ProtocolUpgrader> {
        Arc::new(WebSocketUpgrader::new(
            config.websocket_allowed_origins().to_vec(),
        ))
    }
}

/// WebSocket 连接引擎
///
/// 握手已完成，引擎直接处于 `Established`；把握手请求交给注册的
/// 接收器后，帧层读写由协作者接管。
pub struct WebSocketConnection {
    ctx: ConnectionContext,
    handshake: (Prologue, HeaderSet),
}

impl WebSocketConnection {
    pub fn new(ctx: ConnectionContext, prologue: Prologue, headers: HeaderSet) -> Self {
        Self {
            ctx,
            handshake: (prologue, headers),
        }
    }
}

#[async_trait]
impl ProtocolEngine for WebSocketConnection {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::WebSocket
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Established
    }

    async fn serve(mut self: Box<Self>) -> ProtocolResult<()> {
        let remote_addr = self.ctx.remote_addr();
        let (prologue, headers) = &self.handshake;
        match self.ctx.router().sink(ProtocolType::WebSocket) {
            Some(sink) => {
                sink.handle(prologue, headers, &mut self.ctx.writer).await?;
            }
            None => {
                debug!("ℹ️ [WebSocket] 未注册 WebSocket 接收器: {}", remote_addr);
            }
        }
        // 帧层由上层协作者接管
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::http1_parser::parse_prologue;
    use crate::server::router::ConnectionRouter;
    use crate::server::stream_buffer::{ConnectionReader, ConnectionWriter};
    use tokio::io::AsyncReadExt;

    fn test_ctx(
        writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send>,
    ) -> ConnectionContext {
        ConnectionContext::new(
            "127.0.0.1:40000".parse().unwrap(),
            ConnectionReader::new(Box::new(tokio::io::empty())),
            ConnectionWriter::new(writer),
            None,
            Arc::new(ConnectionRouter::new()),
            Arc::new(ServerConfig::default()),
        )
    }

    fn ws_request(origin: Option<&str>) -> (Prologue, HeaderSet) {
        let prologue = parse_prologue(b"GET /chat HTTP/1.1").unwrap();
        let mut headers = HeaderSet::new();
        headers.append("Host", "example.com");
        headers.append("Upgrade", "websocket");
        headers.append("Connection", "Upgrade");
        headers.append("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==");
        headers.append("Sec-WebSocket-Version", "13");
        if let Some(o) = origin {
            headers.append("Origin", o);
        }
        (prologue, headers)
    }

    #[test]
    fn test_accept_key_rfc_vector() {
        // RFC 6455 §1.3 示例
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[tokio::test]
    async fn test_handshake_writes_accept() {
        let (mut client, server) = tokio::io::duplex(4096);

        let (prologue, mut headers) = ws_request(None);
        let outcome = WebSocketUpgrader::new(Vec::new())
            .upgrade(test_ctx(Box::new(server)), &prologue, &mut headers)
            .await
            .unwrap();

        let engine = match outcome {
            UpgradeOutcome::Upgraded(engine) => engine,
            UpgradeOutcome::Declined(_) => panic!("不应 decline"),
        };
        assert_eq!(engine.protocol(), ProtocolType::WebSocket);
        assert_eq!(engine.state(), ConnectionState::Established);

        // 引擎（连同写入端）释放后客户端才能读到 EOF
        drop(engine);
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[tokio::test]
    async fn test_decline_is_side_effect_free() {
        let (mut client, server) = tokio::io::duplex(4096);

        // Origin 不在白名单：decline 不写字节、不改头部
        let (prologue, mut headers) = ws_request(Some("https://evil.example"));
        let before = headers.clone();
        let outcome = WebSocketUpgrader::new(vec!["https://good.example".to_string()])
            .upgrade(test_ctx(Box::new(server)), &prologue, &mut headers)
            .await
            .unwrap();

        let ctx = match outcome {
            UpgradeOutcome::Declined(ctx) => ctx,
            UpgradeOutcome::Upgraded(_) => panic!("应当 decline"),
        };
        assert_eq!(headers, before);

        drop(ctx);
        let mut written = Vec::new();
        client.read_to_end(&mut written).await.unwrap();
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_declines() {
        let (prologue, mut headers) = ws_request(None);
        headers.remove("sec-websocket-key");
        let outcome = WebSocketUpgrader::new(Vec::new())
            .upgrade(test_ctx(Box::new(tokio::io::sink())), &prologue, &mut headers)
            .await
            .unwrap();
        assert!(matches!(outcome, UpgradeOutcome::Declined(_)));
    }
}
