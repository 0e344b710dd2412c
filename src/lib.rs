//! # RAT Protocol
//!
//! 🚀 单端口多协议协商层：同一个监听端口上同时承载 HTTP/1.1、
//! HTTP/2 (prior-knowledge 与 h2c 升级) 和 WebSocket。
//!
//! ## 核心特性
//!
//! - 🔍 **非破坏性嗅探**: 只 peek 不消费，嗅探失败可换下一个嗅探器重试
//! - 🔄 **连接内升级**: `Upgrade` 头部驱动的引擎移交，所有权按值转移
//! - 🛡️ **慢速攻击防护**: 协议判定有时限，超时直接丢弃连接
//! - 📝 **结构化日志**: 基于 rat_logger 的高性能日志
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use rat_protocol::server::{Listener, run_server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = Listener::builder().build();
//!     run_server(listener, "127.0.0.1:8080".parse()?).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod server;
pub mod utils;

pub use error::{ProtocolError, ProtocolResult};
pub use server::{
    ConnectionContext, ConnectionState, Listener, ListenerBuilder, ProtocolEngine, ProtocolType,
    ServerConfig,
};
