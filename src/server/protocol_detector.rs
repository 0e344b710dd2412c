//! 协议嗅探器
//!
//! 对新连接的首批字节做协议识别。嗅探只读不消费，同一缓冲可被多个
//! 嗅探器反复检视；每个嗅探器要么声明固定的判定字节数，要么按分隔符
//! 扫描到配置上限，绝不为无法判定的结论提前吃掉字节。

use std::sync::Arc;

use crate::error::{ProtocolError, ProtocolResult};
use crate::server::http1_connection::Http1Connection;
use crate::server::http2_connection::Http2Connection;
use crate::server::upgrade::UpgradeRegistry;
use crate::server::{ConnectionContext, ProtocolEngine, ProtocolType};
use crate::utils::logger::{debug, warn};

/// HTTP/2 连接前言，prior-knowledge 识别与升级后校验共用
pub const HTTP2_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// 嗅探判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportDecision {
    /// 该嗅探器认领此连接
    Supported,
    /// 明确不是该协议
    Unsupported,
    /// 字节还不够，继续缓冲后重试
    Unknown,
}

/// 协议嗅探器契约
pub trait ProtocolDetector: Send + Sync {
    /// 嗅探器对应的协议类型
    fn protocol(&self) -> ProtocolType;

    /// 判定所需的前瞻字节数；0 表示按分隔符扫描（以配置上限为界）
    fn bytes_to_identify(&self) -> usize;

    /// 检视缓冲区的只读视图并给出判定
    ///
    /// 不得消费字节；在声明的字节数到齐之前必须返回 `Unknown`。
    fn supports(&self, data: &[u8]) -> SupportDecision;

    /// TLS ALPN 协商中该引擎也会认领的协议标记
    fn supported_application_protocols(&self) -> &'static [&'static str];

    /// 选型确认后创建接管连接的引擎
    fn connection(&self, ctx: ConnectionContext) -> Box<dyn ProtocolEngine>;
}

/// HTTP/2 prior-knowledge 嗅探器
///
/// 前 24 字节与连接前言完全一致才认领，定长判定，没有 Unknown 以外的
/// 中间状态；前言之后是什么不影响结论。
pub struct Http2PriorKnowledgeDetector;

impl ProtocolDetector for Http2PriorKnowledgeDetector {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Http2
    }

    fn bytes_to_identify(&self) -> usize {
        HTTP2_PREFACE.len()
    }

    fn supports(&self, data: &[u8]) -> SupportDecision {
        if data.len() < HTTP2_PREFACE.len() {
            return SupportDecision::Unknown;
        }
        if &data[..HTTP2_PREFACE.len()] == HTTP2_PREFACE.as_slice() {
            SupportDecision::Supported
        } else {
            SupportDecision::Unsupported
        }
    }

    fn supported_application_protocols(&self) -> &'static [&'static str] {
        &["h2"]
    }

    fn connection(&self, ctx: ConnectionContext) -> Box<dyn ProtocolEngine> {
        Box::new(Http2Connection::prior_knowledge(ctx))
    }
}

/// HTTP/1.1 嗅探器
///
/// 扫描第一个 `\n`：去掉行尾 `\r` 后以 ` HTTP/1.1` 结尾即认领。
/// 缓冲超过请求行上限仍无换行时乐观认领，把连接交给 HTTP/1.1 引擎
/// 以协议级错误收场，而不是让嗅探阶段无限等待。
pub struct Http11Detector {
    max_prologue_length: usize,
    upgraders: Arc<UpgradeRegistry>,
}

impl Http11Detector {
    pub fn new(max_prologue_length: usize, upgraders: Arc<UpgradeRegistry>) -> Self {
        Self {
            max_prologue_length,
            upgraders,
        }
    }
}

impl ProtocolDetector for Http11Detector {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Http1_1
    }

    fn bytes_to_identify(&self) -> usize {
        0
    }

    fn supports(&self, data: &[u8]) -> SupportDecision {
        match data.iter().position(|&b| b == b'\n') {
            Some(i) => {
                let mut line = &data[..i];
                if line.last() == Some(&b'\r') {
                    line = &line[..line.len() - 1];
                }
                if line.ends_with(b" HTTP/1.1") {
                    SupportDecision::Supported
                } else {
                    SupportDecision::Unsupported
                }
            }
            None => {
                if data.len() > self.max_prologue_length {
                    SupportDecision::Supported
                } else {
                    SupportDecision::Unknown
                }
            }
        }
    }

    fn supported_application_protocols(&self) -> &'static [&'static str] {
        &["http/1.1"]
    }

    fn connection(&self, ctx: ConnectionContext) -> Box<dyn ProtocolEngine> {
        Box::new(Http1Connection::new(ctx, self.upgraders.clone()))
    }
}

/// 按固定优先级顺序协商出协议引擎
///
/// 第一个返回 `Supported` 的嗅探器获胜；全部 `Unsupported` 视为协议
/// 错误关闭连接；仍有 `Unknown` 时补充字节后重试，对端在判定前关闭
/// 则以 `ConnectionClosed` 结束。
pub async fn negotiate(
    detectors: &[Arc<dyn ProtocolDetector>],
    mut ctx: ConnectionContext,
) -> ProtocolResult<Box<dyn ProtocolEngine>> {
    let remote_addr = ctx.remote_addr();
    loop {
        let mut any_unknown = false;
        for detector in detectors {
            match detector.supports(ctx.reader.peeked()) {
                SupportDecision::Supported => {
                    debug!(
                        "✅ [协商] 命中协议 {}: {} (已缓冲 {} 字节)",
                        detector.protocol(),
                        remote_addr,
                        ctx.reader.available()
                    );
                    return Ok(detector.connection(ctx));
                }
                SupportDecision::Unknown => any_unknown = true,
                SupportDecision::Unsupported => {}
            }
        }

        if !any_unknown {
            warn!("🚫 [协商] 所有嗅探器均拒绝，关闭连接: {}", remote_addr);
            return Err(ProtocolError::UnsupportedProtocol);
        }
        if ctx.reader.fill().await? == 0 {
            debug!("🔌 [协商] 对端在协议判定前关闭: {}", remote_addr);
            return Err(ProtocolError::ConnectionClosed);
        }
    }
}
