//! 服务器配置
//!
//! 监听器启动时构造一次，之后以 `Arc` 只读共享给所有连接处理任务。

/// 协议协商层配置
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 请求行最大长度（字节）
    ///
    /// 同时约束 HTTP/1.1 嗅探器：缓冲超过该长度仍未出现换行时，
    /// 乐观地按 HTTP/1.1 接管，让请求以明确的协议级错误收场而不是挂死。
    max_prologue_length: usize,
    /// 单个请求头部区（请求行 + 所有头部）的最大字节数
    max_header_bytes: usize,
    /// 协议识别阶段的读取超时（毫秒），超时直接丢弃连接
    detect_timeout_ms: u64,
    /// WebSocket 升级允许的 Origin 列表，空表示不限制
    websocket_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_prologue_length: 4096,
            max_header_bytes: 16 * 1024,
            detect_timeout_ms: 1000,
            websocket_allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    pub fn max_prologue_length(&self) -> usize {
        self.max_prologue_length
    }

    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    pub fn detect_timeout_ms(&self) -> u64 {
        self.detect_timeout_ms
    }

    pub fn websocket_allowed_origins(&self) -> &[String] {
        &self.websocket_allowed_origins
    }
}

/// `ServerConfig` 构建器
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self { config: ServerConfig::default() }
    }

    pub fn max_prologue_length(mut self, len: usize) -> Self {
        self.config.max_prologue_length = len;
        self
    }

    pub fn max_header_bytes(mut self, len: usize) -> Self {
        self.config.max_header_bytes = len;
        self
    }

    pub fn detect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.detect_timeout_ms = ms;
        self
    }

    pub fn websocket_allowed_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.websocket_allowed_origins.push(origin.into());
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
