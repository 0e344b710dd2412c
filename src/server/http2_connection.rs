//! HTTP/2 连接引擎（选型与移交层）
//!
//! 两条路径汇入同一个引擎：prior-knowledge 直连与 h2c 升级产物。
//! 两者都从 `PrefaceExpected` 状态开始——套接字上接下来的 24 字节
//! 必须是标准客户端连接前言，不匹配立即拆除连接。前言之后的帧层
//! 处理（SETTINGS/HEADERS/流控）由上层协作者接管，不在本 crate 职责内。

use async_trait::async_trait;

use crate::error::{ProtocolError, ProtocolResult};
use crate::server::http1_parser::{HeaderSet, Prologue};
use crate::server::http2_settings::Http2Settings;
use crate::server::protocol_detector::HTTP2_PREFACE;
use crate::server::{ConnectionContext, ConnectionState, ProtocolEngine, ProtocolType};
use crate::utils::logger::{debug, info, warn};

/// HTTP/2 连接引擎
pub struct Http2Connection {
    ctx: ConnectionContext,
    state: ConnectionState,
    peer_settings: Http2Settings,
    /// h2c 升级时由触发升级的请求合成的首个流（客户端不会重发）
    first_request: Option<(Prologue, HeaderSet)>,
}

impl Http2Connection {
    /// prior-knowledge 路径：嗅探确认前言后创建，前言字节仍在缓冲中
    pub fn prior_knowledge(ctx: ConnectionContext) -> Self {
        Self {
            ctx,
            state: ConnectionState::PrefaceExpected,
            peer_settings: Http2Settings::default(),
            first_request: None,
        }
    }

    /// h2c 升级路径：携带已解码的对端设置与合成的首个请求
    pub fn upgraded(
        ctx: ConnectionContext,
        peer_settings: Http2Settings,
        first_request: (Prologue, HeaderSet),
    ) -> Self {
        Self {
            ctx,
            state: ConnectionState::PrefaceExpected,
            peer_settings,
            first_request: Some(first_request),
        }
    }

    pub fn peer_settings(&self) -> &Http2Settings {
        &self.peer_settings
    }

    /// 校验并消费 24 字节客户端连接前言
    async fn expect_preface(&mut self) -> ProtocolResult<()> {
        let remote_addr = self.ctx.remote_addr();
        if let Err(e) = self.ctx.reader.fill_until(HTTP2_PREFACE.len()).await {
            self.state = ConnectionState::Closed;
            return Err(e);
        }

        let got = &self.ctx.reader.peeked()[..HTTP2_PREFACE.len()];
        if got != HTTP2_PREFACE.as_slice() {
            warn!(
                "❌ [HTTP/2] 连接前言不匹配，拆除连接: {} (收到: {})",
                remote_addr,
                hex::encode(got)
            );
            self.state = ConnectionState::Closed;
            return Err(ProtocolError::PrefaceMismatch);
        }

        self.ctx.reader.advance(HTTP2_PREFACE.len());
        self.state = ConnectionState::Established;
        info!(
            "✅ [HTTP/2] 连接前言校验通过 ({}): {}",
            ConnectionState::Established,
            remote_addr
        );
        Ok(())
    }
}

#[async_trait]
impl ProtocolEngine for Http2Connection {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Http2
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    async fn serve(mut self: Box<Self>) -> ProtocolResult<()> {
        let remote_addr = self.ctx.remote_addr();
        debug!(
            "🔧 [HTTP/2] 引擎接管连接 ({}): {}",
            self.state, remote_addr
        );
        debug!("🔧 [HTTP/2] 对端初始设置: {:?}", self.peer_settings);

        self.expect_preface().await?;

        // 升级触发请求就是第一个 HTTP/2 流
        if let Some((prologue, headers)) = self.first_request.take() {
            match self.ctx.router().sink(ProtocolType::Http2) {
                Some(sink) => {
                    debug!(
                        "📥 [HTTP/2] 分发升级合成的首个请求: {} {}",
                        prologue.method,
                        prologue.raw_target()
                    );
                    sink.handle(&prologue, &headers, &mut self.ctx.writer).await?;
                }
                None => {
                    debug!("ℹ️ [HTTP/2] 未注册 HTTP/2 接收器，丢弃首个请求: {}", remote_addr);
                }
            }
        }

        // 自此帧层由上层协作者接管
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::ServerConfig;
    use crate::server::router::ConnectionRouter;
    use crate::server::stream_buffer::{ConnectionReader, ConnectionWriter};
    use std::sync::Arc;

    fn ctx_over(data: &[u8]) -> ConnectionContext {
        ConnectionContext::new(
            "127.0.0.1:40000".parse().unwrap(),
            ConnectionReader::with_prefix(Box::new(tokio::io::empty()), data),
            ConnectionWriter::new(Box::new(tokio::io::sink())),
            None,
            Arc::new(ConnectionRouter::new()),
            Arc::new(ServerConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_preface_accepted() {
        let conn = Http2Connection::prior_knowledge(ctx_over(HTTP2_PREFACE));
        assert_eq!(conn.state(), ConnectionState::PrefaceExpected);
        assert!(Box::new(conn).serve().await.is_ok());
    }

    #[tokio::test]
    async fn test_preface_mismatch_is_fatal() {
        let conn = Http2Connection::prior_knowledge(ctx_over(b"PRI * HTTP/2.0\r\n\r\nXX\r\n\r\n"));
        assert!(matches!(
            Box::new(conn).serve().await,
            Err(ProtocolError::PrefaceMismatch)
        ));
    }

    #[test]
    fn test_upgraded_carries_peer_settings() {
        use crate::server::http1_parser::parse_prologue;

        // 0x3=100
        let settings = Http2Settings::parse(&[0x00, 0x03, 0x00, 0x00, 0x00, 0x64]).unwrap();
        let prologue = parse_prologue(b"GET / HTTP/1.1").unwrap();
        let conn = Http2Connection::upgraded(
            ctx_over(HTTP2_PREFACE),
            settings,
            (prologue.upgraded("2.0"), HeaderSet::new()),
        );
        // 升级握手解出来的对端设置对帧层协作者可见
        assert_eq!(conn.peer_settings().max_concurrent_streams, Some(100));
        assert_eq!(conn.peer_settings().initial_window_size, None);
        assert_eq!(conn.state(), ConnectionState::PrefaceExpected);
    }

    #[tokio::test]
    async fn test_eof_before_preface_closes() {
        let conn = Http2Connection::prior_knowledge(ctx_over(&HTTP2_PREFACE[..10]));
        assert!(matches!(
            Box::new(conn).serve().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }
}
