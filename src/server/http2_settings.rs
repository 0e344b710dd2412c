//! HTTP/2 SETTINGS 载荷编解码
//!
//! h2c 升级时 `HTTP2-Settings` 头部携带的是 SETTINGS 帧的载荷
//! （不含 9 字节帧头）：若干 6 字节表项，2 字节标识符 + 4 字节值，
//! 均为网络字节序。

use crate::error::{ProtocolError, ProtocolResult};

pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// 对端初始设置
///
/// 未出现的表项保持 `None`（使用协议默认值）；未知标识符按规范忽略。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Http2Settings {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<u32>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
}

impl Http2Settings {
    /// 解析 SETTINGS 帧载荷
    pub fn parse(payload: &[u8]) -> ProtocolResult<Self> {
        if payload.len() % 6 != 0 {
            return Err(ProtocolError::InvalidSettings(format!(
                "载荷长度 {} 不是 6 的倍数",
                payload.len()
            )));
        }

        let mut settings = Http2Settings::default();
        for entry in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([entry[0], entry[1]]);
            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
            match id {
                SETTINGS_HEADER_TABLE_SIZE => settings.header_table_size = Some(value),
                SETTINGS_ENABLE_PUSH => settings.enable_push = Some(value),
                SETTINGS_MAX_CONCURRENT_STREAMS => settings.max_concurrent_streams = Some(value),
                SETTINGS_INITIAL_WINDOW_SIZE => settings.initial_window_size = Some(value),
                SETTINGS_MAX_FRAME_SIZE => settings.max_frame_size = Some(value),
                SETTINGS_MAX_HEADER_LIST_SIZE => settings.max_header_list_size = Some(value),
                _ => {} // 未知标识符忽略
            }
        }
        Ok(settings)
    }

    /// 编码为 SETTINGS 帧载荷（只输出已设置的表项，按标识符顺序）
    pub fn encode(&self) -> Vec<u8> {
        let entries = [
            (SETTINGS_HEADER_TABLE_SIZE, self.header_table_size),
            (SETTINGS_ENABLE_PUSH, self.enable_push),
            (SETTINGS_MAX_CONCURRENT_STREAMS, self.max_concurrent_streams),
            (SETTINGS_INITIAL_WINDOW_SIZE, self.initial_window_size),
            (SETTINGS_MAX_FRAME_SIZE, self.max_frame_size),
            (SETTINGS_MAX_HEADER_LIST_SIZE, self.max_header_list_size),
        ];
        let mut payload = Vec::new();
        for (id, value) in entries {
            if let Some(v) = value {
                payload.extend_from_slice(&id.to_be_bytes());
                payload.extend_from_slice(&v.to_be_bytes());
            }
        }
        payload
    }
}
