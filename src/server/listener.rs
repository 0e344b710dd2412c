//! 监听器装配
//!
//! 把配置、嗅探器、升级注册表和协议路由表装配成一个只读的
//! `Listener`，所有连接任务共享同一个 `Arc<Listener>`。装配只在
//! 启动时发生一次，运行期不再改动。

use std::sync::Arc;

use crate::server::config::ServerConfig;
use crate::server::protocol_detector::{
    Http11Detector, Http2PriorKnowledgeDetector, ProtocolDetector,
};
use crate::server::router::{ConnectionRouter, RequestSink};
use crate::server::upgrade::{UpgradeProvider, UpgradeRegistry};
use crate::server::ProtocolType;
use crate::utils::logger::info;

/// 启动时装配完成的共享监听器状态
pub struct Listener {
    config: Arc<ServerConfig>,
    router: Arc<ConnectionRouter>,
    detectors: Vec<Arc<dyn ProtocolDetector>>,
    upgraders: Arc<UpgradeRegistry>,
}

impl Listener {
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder::new()
    }

    /// 嗅探器，按固定优先级排列（前言类协议在前）
    pub fn detectors(&self) -> &[Arc<dyn ProtocolDetector>] {
        &self.detectors
    }

    pub fn router(&self) -> &Arc<ConnectionRouter> {
        &self.router
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    pub fn upgraders(&self) -> &Arc<UpgradeRegistry> {
        &self.upgraders
    }

    /// 可向 TLS 终结层通告的 ALPN 协议标识
    pub fn supported_application_protocols(&self) -> Vec<&'static str> {
        vec!["h2", "http/1.1"]
    }
}

/// `Listener` 的装配器
///
/// 默认装载 h2c 升级器与 HTTP/2 prior-knowledge + HTTP/1.1 两个嗅探器；
/// 额外的升级协议（如 WebSocket）通过 `upgrade_provider` 挂接。
pub struct ListenerBuilder {
    config: ServerConfig,
    router: ConnectionRouter,
    providers: Vec<Box<dyn UpgradeProvider>>,
    extra_detectors: Vec<Arc<dyn ProtocolDetector>>,
}

impl ListenerBuilder {
    pub fn new() -> Self {
        use crate::server::h2c_upgrade::H2cUpgradeProvider;
        Self {
            config: ServerConfig::default(),
            router: ConnectionRouter::new(),
            providers: vec![Box::new(H2cUpgradeProvider)],
            extra_detectors: Vec::new(),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// 注册某协议的请求接收器
    pub fn sink(mut self, protocol: ProtocolType, sink: Arc<dyn RequestSink>) -> Self {
        self.router.register(protocol, sink);
        self
    }

    /// 挂接一个升级协议的 provider
    pub fn upgrade_provider(mut self, provider: Box<dyn UpgradeProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// 在默认嗅探器之前插入自定义嗅探器
    pub fn detector(mut self, detector: Arc<dyn ProtocolDetector>) -> Self {
        self.extra_detectors.push(detector);
        self
    }

    pub fn build(self) -> Arc<Listener> {
        let config = Arc::new(self.config);
        let upgraders = Arc::new(UpgradeRegistry::from_providers(&self.providers, &config));

        let mut detectors = self.extra_detectors;
        detectors.push(Arc::new(Http2PriorKnowledgeDetector));
        detectors.push(Arc::new(Http11Detector::new(
            config.max_prologue_length(),
            upgraders.clone(),
        )));

        info!(
            "🔧 [装配] 监听器就绪: {} 个嗅探器, 升级令牌 {:?}",
            detectors.len(),
            upgraders.tokens()
        );

        Arc::new(Listener {
            config,
            router: Arc::new(self.router),
            detectors,
            upgraders,
        })
    }
}

impl Default for ListenerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
