//! 协议协商服务器模块
//!
//! 单端口多协议入口：新连接先经过嗅探器选定协议引擎，
//! HTTP/1.1 引擎再按 `Upgrade` 头部把连接移交给升级后的引擎。
//! 每个连接自始至终只属于一个任务，移交发生在同一任务内，无需加锁。

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;

use crate::error::{ProtocolError, ProtocolResult};
use crate::utils::logger::{debug, info, warn, error};

pub mod config;
pub mod stream_buffer;
pub mod http1_parser;
pub mod protocol_detector;
pub mod router;
pub mod upgrade;
pub mod http1_connection;
pub mod http2_settings;
pub mod http2_connection;
pub mod h2c_upgrade;
pub mod websocket_upgrade;
pub mod listener;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use stream_buffer::{ConnectionReader, ConnectionWriter};
pub use http1_parser::{HeaderSet, Prologue};
pub use protocol_detector::{
    negotiate, Http11Detector, Http2PriorKnowledgeDetector, ProtocolDetector, SupportDecision,
    HTTP2_PREFACE,
};
pub use router::{ConnectionRouter, RequestSink};
pub use upgrade::{ProtocolUpgrader, UpgradeOutcome, UpgradeProvider, UpgradeRegistry};
pub use http1_connection::Http1Connection;
pub use http2_settings::Http2Settings;
pub use http2_connection::Http2Connection;
pub use h2c_upgrade::{H2cUpgradeProvider, H2cUpgrader};
pub use websocket_upgrade::{WebSocketUpgradeProvider, WebSocketUpgrader};
pub use listener::{Listener, ListenerBuilder};

/// 连接承载的协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolType {
    Http1_1,
    Http2,
    WebSocket,
    Unknown,
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolType::Http1_1 => write!(f, "HTTP/1.1"),
            ProtocolType::Http2 => write!(f, "HTTP/2"),
            ProtocolType::WebSocket => write!(f, "WebSocket"),
            ProtocolType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// 连接生命周期状态
///
/// `Sniffing -> {Http1 | PrefaceExpected}`；HTTP/1.1 连接在升级请求上进入
/// `Upgrading`，升级产物与 prior-knowledge 连接一样先处于 `PrefaceExpected`，
/// 前言校验通过后 `Established`。任何阶段的协议违例都直接进入 `Closed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Sniffing,
    Http1,
    Upgrading,
    PrefaceExpected,
    Established,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Sniffing => "SNIFFING",
            ConnectionState::Http1 => "HTTP1",
            ConnectionState::Upgrading => "UPGRADING",
            ConnectionState::PrefaceExpected => "PREFACE_EXPECTED",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::Closed => "CLOSED",
        };
        write!(f, "{}", s)
    }
}

/// 由外部 TLS 终结层提供的协商事实
#[derive(Debug, Clone, Default)]
pub struct TlsInfo {
    /// ALPN 协商结果
    pub alpn: Option<String>,
    /// SNI 服务器名
    pub server_name: Option<String>,
}

/// 每连接上下文
///
/// 连接的全部可变状态：读写端、TLS 信息、协议路由表。生命周期内只有
/// 一个所有者，升级时整体按值移交给新引擎，原引擎不得再触碰套接字。
pub struct ConnectionContext {
    remote_addr: SocketAddr,
    pub reader: ConnectionReader,
    pub writer: ConnectionWriter,
    tls: Option<TlsInfo>,
    router: Arc<ConnectionRouter>,
    config: Arc<ServerConfig>,
}

impl ConnectionContext {
    pub fn new(
        remote_addr: SocketAddr,
        reader: ConnectionReader,
        writer: ConnectionWriter,
        tls: Option<TlsInfo>,
        router: Arc<ConnectionRouter>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            remote_addr,
            reader,
            writer,
            tls,
            router,
            config,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn tls(&self) -> Option<&TlsInfo> {
        self.tls.as_ref()
    }

    /// 请求的 scheme：TLS 终结过的连接为 https，明文为 http
    ///
    /// h2c 升级的 `:scheme` 伪头部由此得出，而不是写死 "http"，
    /// 这样前置 TLS 代理的场景也能拿到正确的 scheme。
    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "https"
        } else {
            "http"
        }
    }

    pub fn router(&self) -> &Arc<ConnectionRouter> {
        &self.router
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// 协议引擎：选型确认后独占连接的余生
#[async_trait]
pub trait ProtocolEngine: Send {
    /// 引擎承载的协议
    fn protocol(&self) -> ProtocolType;

    /// 引擎当前的连接状态
    fn state(&self) -> ConnectionState;

    /// 接管连接并开始读取，直到连接结束或移交给下一个引擎
    async fn serve(self: Box<Self>) -> ProtocolResult<()>;
}

/// 处理一条已接受的 TCP 连接
pub async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    listener: Arc<Listener>,
) -> ProtocolResult<()> {
    let (r, w) = stream.into_split();
    handle_connection_io(Box::new(r), Box::new(w), remote_addr, None, listener).await
}

/// 处理一条任意字节流上的连接（TLS 终结层走这个入口并附带 `TlsInfo`）
pub async fn handle_connection_io(
    read: Box<dyn AsyncRead + Unpin + Send>,
    write: Box<dyn AsyncWrite + Unpin + Send>,
    remote_addr: SocketAddr,
    tls: Option<TlsInfo>,
    listener: Arc<Listener>,
) -> ProtocolResult<()> {
    debug!("🔗 [协商] 新连接 ({}): {}", ConnectionState::Sniffing, remote_addr);

    let ctx = ConnectionContext::new(
        remote_addr,
        ConnectionReader::new(read),
        ConnectionWriter::new(write),
        tls,
        listener.router().clone(),
        listener.config().clone(),
    );

    let timeout = Duration::from_millis(listener.config().detect_timeout_ms());
    let engine = match tokio::time::timeout(timeout, negotiate(listener.detectors(), ctx)).await {
        Ok(Ok(engine)) => engine,
        Ok(Err(e)) => {
            debug!("🚫 [协商] 协议识别失败，丢弃连接: {} ({})", remote_addr, e);
            return Err(e);
        }
        Err(_) => {
            // 超时丢弃，不发送任何响应：此时尚无协议上下文可承载错误
            warn!("🚫 [协商] 协议识别超时，疑似慢速攻击，丢弃连接: {}", remote_addr);
            return Err(ProtocolError::DetectTimeout);
        }
    };

    engine.serve().await
}

/// 启动监听循环，直到 Ctrl+C
pub async fn run_server(listener: Arc<Listener>, addr: SocketAddr) -> ProtocolResult<()> {
    let tcp_listener = TcpListener::bind(addr).await?;
    info!(
        "🚀 协议协商服务器已启动: {} (ALPN 支持: {:?})",
        addr,
        listener.supported_application_protocols()
    );

    let accept_loop = async {
        loop {
            let (stream, remote_addr) = tcp_listener.accept().await?;
            let listener = listener.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, remote_addr, listener).await {
                    match err {
                        ProtocolError::ConnectionClosed | ProtocolError::DetectTimeout => {
                            debug!("🔌 [协商] 连接提前结束: {} ({})", remote_addr, err);
                        }
                        other => {
                            error!("❌ [协商] 连接处理失败: {} ({})", remote_addr, other);
                        }
                    }
                }
            });
        }
        // 循环不会正常退出，下面仅用于统一返回类型
        #[allow(unreachable_code)]
        Ok::<(), ProtocolError>(())
    };

    tokio::select! {
        result = accept_loop => result,
        _ = signal::ctrl_c() => {
            info!("🛑 收到 Ctrl+C 信号，正在关闭服务器...");
            Ok(())
        }
    }
}
