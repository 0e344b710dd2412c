//! 协议协商错误类型
//!
//! 统一的错误定义：协议识别、升级握手、连接前言校验等阶段的失败
//! 都收敛到 `ProtocolError`，由连接入口层决定是否直接丢弃连接。

use thiserror::Error;

/// 协议协商与升级过程中的错误
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 对端在协议识别或握手完成前关闭了连接
    #[error("连接在协商完成前关闭")]
    ConnectionClosed,

    /// 协议识别阶段读取超时（疑似慢速攻击）
    #[error("协议识别超时")]
    DetectTimeout,

    /// 所有已注册的嗅探器都明确拒绝了该连接
    #[error("无法识别的协议")]
    UnsupportedProtocol,

    /// 请求行格式错误
    #[error("请求行格式错误: {0}")]
    MalformedPrologue(String),

    /// 请求头格式错误
    #[error("请求头格式错误: {0}")]
    MalformedHeader(String),

    /// 请求头部分超过配置上限
    #[error("请求头超过大小限制: {0} 字节")]
    HeaderSectionTooLarge(usize),

    /// 升级请求缺少必需的头部（如 h2c 缺少 HTTP2-Settings）
    #[error("升级请求缺少必需头部: {0}")]
    MissingUpgradeHeader(&'static str),

    /// 升级请求头部内容无效（无法解码或语义非法）
    #[error("升级请求头部无效: {0}")]
    InvalidUpgradeHeader(String),

    /// HTTP/2 SETTINGS 载荷无效
    #[error("SETTINGS 载荷无效: {0}")]
    InvalidSettings(String),

    /// HTTP/2 连接前言与固定序列不匹配
    #[error("HTTP/2 连接前言不匹配")]
    PrefaceMismatch,
}

/// 统一的 Result 别名
pub type ProtocolResult<T> = Result<T, ProtocolError>;
