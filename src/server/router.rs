//! 协议路由表
//!
//! 业务路由不属于本 crate，这里只提供按协议类型查找请求接收器的最小
//! 表结构：启动时注册一次，之后跨连接任务只读共享。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProtocolResult;
use crate::server::http1_parser::{HeaderSet, Prologue};
use crate::server::stream_buffer::ConnectionWriter;
use crate::server::ProtocolType;

/// 请求接收器：引擎完成协议层工作后，把结构化的请求交到这里
#[async_trait]
pub trait RequestSink: Send + Sync {
    async fn handle(
        &self,
        prologue: &Prologue,
        headers: &HeaderSet,
        writer: &mut ConnectionWriter,
    ) -> ProtocolResult<()>;
}

/// 按协议类型查找请求接收器的路由表
#[derive(Default)]
pub struct ConnectionRouter {
    sinks: HashMap<ProtocolType, Arc<dyn RequestSink>>,
}

impl ConnectionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, protocol: ProtocolType, sink: Arc<dyn RequestSink>) {
        self.sinks.insert(protocol, sink);
    }

    pub fn sink(&self, protocol: ProtocolType) -> Option<Arc<dyn RequestSink>> {
        self.sinks.get(&protocol).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}
