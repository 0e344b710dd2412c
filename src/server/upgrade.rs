//! 升级注册表与升级器契约
//!
//! HTTP/1.1 引擎在请求携带 `Upgrade` 头部时查询注册表：命中则由升级器
//! 执行协议专属握手并交出新引擎，未命中按普通请求处理。注册表在启动
//! 时由 provider 列表静态构建，运行期只读。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProtocolResult;
use crate::server::config::ServerConfig;
use crate::server::http1_parser::{HeaderSet, Prologue};
use crate::server::{ConnectionContext, ProtocolEngine};
use crate::utils::logger::debug;

/// 升级尝试的结果
pub enum UpgradeOutcome {
    /// 握手完成，新引擎接管连接（上下文所有权已随之转移）
    Upgraded(Box<dyn ProtocolEngine>),
    /// 升级器放弃本次升级，原样归还连接上下文
    ///
    /// decline 必须无副作用：不写任何字节，不改动头部。
    Declined(ConnectionContext),
}

/// 协议升级器契约
#[async_trait]
pub trait ProtocolUpgrader: Send + Sync {
    /// 应答的升级令牌集合（一个升级器可以认领多个版本变体）
    fn supported_protocols(&self) -> &[&str];

    /// 执行协议专属握手
    ///
    /// 失败（`Err`）对连接是致命的：调用方直接关闭连接，客户端需重连。
    async fn upgrade(
        &self,
        ctx: ConnectionContext,
        prologue: &Prologue,
        headers: &mut HeaderSet,
    ) -> ProtocolResult<UpgradeOutcome>;
}

/// 升级器工厂：声明配置键并按配置产出绑定好的升级器
pub trait UpgradeProvider: Send + Sync {
    /// 该协议在配置中使用的键（用于查找协议专属配置）
    fn config_keys(&self) -> &[&str];

    /// 创建绑定到给定配置的升级器
    fn create(&self, config: &ServerConfig) -> Arc<dyn ProtocolUpgrader>;
}

/// 升级令牌 → 升级器的注册表
///
/// 查找键为小写化后的 `Upgrade` 头部值：注册令牌按原样作为键
/// （约定使用小写），传入值先 trim 再 ASCII 小写化，因此 `H2C`
/// 会命中 `h2c`，而 `h2` 永远不会。
pub struct UpgradeRegistry {
    upgraders: HashMap<String, Arc<dyn ProtocolUpgrader>>,
}

impl UpgradeRegistry {
    pub fn new() -> Self {
        Self {
            upgraders: HashMap::new(),
        }
    }

    /// 从 provider 列表构建注册表（服务启动时调用一次）
    pub fn from_providers(providers: &[Box<dyn UpgradeProvider>], config: &ServerConfig) -> Self {
        let mut registry = Self::new();
        for provider in providers {
            debug!("🔧 [升级] 装载升级器，配置键: {:?}", provider.config_keys());
            registry.insert(provider.create(config));
        }
        registry
    }

    /// 注册一个升级器，其每个令牌各占一个表项
    pub fn insert(&mut self, upgrader: Arc<dyn ProtocolUpgrader>) {
        for token in upgrader.supported_protocols() {
            self.upgraders.insert((*token).to_string(), upgrader.clone());
        }
    }

    /// 按令牌精确查找；传入值先 trim 并 ASCII 小写化
    pub fn find(&self, token: &str) -> Option<Arc<dyn ProtocolUpgrader>> {
        let key = token.trim().to_ascii_lowercase();
        self.upgraders.get(&key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.upgraders.is_empty()
    }

    pub fn tokens(&self) -> Vec<&str> {
        self.upgraders.keys().map(|k| k.as_str()).collect()
    }
}

impl Default for UpgradeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::h2c_upgrade::H2cUpgrader;

    #[test]
    fn test_exact_token_lookup() {
        let mut registry = UpgradeRegistry::new();
        registry.insert(Arc::new(H2cUpgrader));

        assert!(registry.find("h2c").is_some());
        // 子串不命中
        assert!(registry.find("h2").is_none());
        assert!(registry.find("h2c2").is_none());
        // 文档化的大小写归一：传入值小写化后查找
        assert!(registry.find("H2C").is_some());
        assert!(registry.find(" h2c ").is_some());
        assert!(registry.find("carrier-pigeon").is_none());
    }
}
