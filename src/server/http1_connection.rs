//! HTTP/1.1 连接引擎
//!
//! 解析请求头部区，携带 `Upgrade` 头部的请求先咨询升级注册表：
//! 命中且握手成功则整个连接移交给新引擎，本引擎不再触碰套接字；
//! decline 或令牌未注册时按普通请求处理。普通请求交给路由表中的
//! HTTP/1.1 接收器，没有接收器时回以 404。

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProtocolResult;
use crate::server::http1_parser::read_request_head;
use crate::server::upgrade::{UpgradeOutcome, UpgradeRegistry};
use crate::server::{ConnectionContext, ConnectionState, ProtocolEngine, ProtocolType};
use crate::utils::logger::{debug, info, warn};

/// 没有注册 HTTP/1.1 接收器时的兜底响应
const NOT_FOUND_RESPONSE: &[u8] = b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n";

/// HTTP/1.1 连接引擎
pub struct Http1Connection {
    ctx: ConnectionContext,
    upgraders: Arc<UpgradeRegistry>,
}

impl Http1Connection {
    pub fn new(ctx: ConnectionContext, upgraders: Arc<UpgradeRegistry>) -> Self {
        Self { ctx, upgraders }
    }
}

#[async_trait]
impl ProtocolEngine for Http1Connection {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Http1_1
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Http1
    }

    async fn serve(self: Box<Self>) -> ProtocolResult<()> {
        let this = *self;
        let upgraders = this.upgraders;
        let mut ctx = this.ctx;
        let remote_addr = ctx.remote_addr();
        // 读取端在解析期间被独占借用，配置先拷出来
        let config = ctx.config().clone();
        debug!(
            "🌐 [HTTP/1.1] 引擎接管连接 ({}): {}",
            ConnectionState::Http1,
            remote_addr
        );

        loop {
            // 请求之间对端正常关闭属于干净结束
            if ctx.reader.available() == 0 {
                if ctx.reader.is_eof() || ctx.reader.fill().await? == 0 {
                    debug!("🔌 [HTTP/1.1] 连接关闭: {}", remote_addr);
                    return Ok(());
                }
            }

            let (prologue, mut headers) = read_request_head(&mut ctx.reader, &config).await?;
            debug!(
                "📥 [HTTP/1.1] 请求: {} {} ({})",
                prologue.method,
                prologue.raw_target(),
                remote_addr
            );

            if let Some(token) = headers.get("upgrade").map(str::to_string) {
                if let Some(upgrader) = upgraders.find(&token) {
                    info!(
                        "🔄 [HTTP/1.1] 升级请求 ({}): {} → {:?}",
                        ConnectionState::Upgrading,
                        remote_addr,
                        token
                    );
                    match upgrader.upgrade(ctx, &prologue, &mut headers).await {
                        Ok(UpgradeOutcome::Upgraded(engine)) => {
                            // 自此连接完全属于新引擎，这里不得再解析任何字节
                            return engine.serve().await;
                        }
                        Ok(UpgradeOutcome::Declined(returned)) => {
                            debug!(
                                "↩️ [HTTP/1.1] 升级被 decline，按普通请求处理: {}",
                                remote_addr
                            );
                            ctx = returned;
                        }
                        Err(e) => {
                            warn!(
                                "❌ [HTTP/1.1] 升级握手失败，关闭连接 ({}): {} ({})",
                                ConnectionState::Closed,
                                remote_addr,
                                e
                            );
                            return Err(e);
                        }
                    }
                } else {
                    debug!(
                        "ℹ️ [HTTP/1.1] 未注册的升级令牌 {:?}，按普通请求处理: {}",
                        token, remote_addr
                    );
                }
            }

            match ctx.router().sink(ProtocolType::Http1_1) {
                Some(sink) => {
                    sink.handle(&prologue, &headers, &mut ctx.writer).await?;
                    ctx.writer.flush().await?;
                }
                None => {
                    ctx.writer.write_all(NOT_FOUND_RESPONSE).await?;
                    ctx.writer.flush().await?;
                }
            }

            let close_requested = headers
                .get("connection")
                .map(|v| v.eq_ignore_ascii_case("close"))
                .unwrap_or(false);
            // 请求体不在本层解析范围内：带体的请求处理完即关闭，
            // 避免把体字节误读成下一个请求头
            let has_body = headers
                .get("content-length")
                .map(|v| v != "0")
                .unwrap_or(false)
                || headers.contains("transfer-encoding");
            if close_requested || has_body {
                debug!("🔌 [HTTP/1.1] 本请求后关闭连接: {}", remote_addr);
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::ServerConfig;
    use crate::server::h2c_upgrade::H2cUpgrader;
    use crate::server::router::ConnectionRouter;
    use crate::server::stream_buffer::{ConnectionReader, ConnectionWriter};
    use tokio::io::AsyncReadExt;

    fn engine_over(
        request: &[u8],
        writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send>,
        upgraders: UpgradeRegistry,
    ) -> Http1Connection {
        let ctx = ConnectionContext::new(
            "127.0.0.1:40000".parse().unwrap(),
            ConnectionReader::with_prefix(Box::new(tokio::io::empty()), request),
            ConnectionWriter::new(writer),
            None,
            Arc::new(ConnectionRouter::new()),
            Arc::new(ServerConfig::default()),
        );
        Http1Connection::new(ctx, Arc::new(upgraders))
    }

    #[tokio::test]
    async fn test_unknown_upgrade_token_falls_through() {
        let (mut client, server) = tokio::io::duplex(4096);

        // 未注册的令牌：不换引擎、不报错，走普通处理（这里是兜底 404）
        let request = b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: carrier-pigeon\r\nConnection: close\r\n\r\n";
        let engine = engine_over(request, Box::new(server), UpgradeRegistry::new());
        Box::new(engine).serve().await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn test_declined_upgrade_served_normally() {
        use crate::server::websocket_upgrade::WebSocketUpgrader;

        let mut registry = UpgradeRegistry::new();
        registry.insert(Arc::new(WebSocketUpgrader::new(Vec::new())));

        let (mut client, server) = tokio::io::duplex(4096);

        // 令牌已注册但缺少 Sec-WebSocket-Key：升级器 decline，
        // 请求回落到普通处理（这里是兜底 404），连接不报错
        let request =
            b"GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: close\r\n\r\n";
        let engine = engine_over(request, Box::new(server), registry);
        Box::new(engine).serve().await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn test_missing_h2c_settings_closes_connection() {
        let mut registry = UpgradeRegistry::new();
        registry.insert(Arc::new(H2cUpgrader));

        // 注册了 h2c 但请求缺少 HTTP2-Settings：致命，不回退
        let request = b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: h2c\r\nConnection: Upgrade\r\n\r\n";
        let engine = engine_over(request, Box::new(tokio::io::sink()), registry);
        assert!(Box::new(engine).serve().await.is_err());
    }

    #[tokio::test]
    async fn test_plain_request_served_then_eof() {
        let (mut client, server) = tokio::io::duplex(4096);

        let request = b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n";
        let engine = engine_over(request, Box::new(server), UpgradeRegistry::new());
        // 预读数据处理完后底层流 EOF，连接干净结束
        Box::new(engine).serve().await.unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }
}
