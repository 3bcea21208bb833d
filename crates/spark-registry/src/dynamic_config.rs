//! 动态配置中心边界契约。
//!
//! # 教案式说明
//! - **意图（Why）**：应用级与服务级覆盖规则存放在外部配置中心，变更以事件形式推送；
//! - **契约（What）**：
//!   - `get_config` 返回原始载荷，不存在时为 `Ok(None)`；
//!   - 监听器回调应快速返回，不得长期阻塞配置中心的通知线程；
//!   - 删除事件的 `content` 为 `None`，避免泄漏旧值；
//! - **扩展（How）**：未接入配置中心的宿主可直接使用 [`NoopDynamicConfiguration`]。

use std::sync::Arc;

use crate::error::Result;

/// 配置变更类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigChangeType {
    Added,
    Modified,
    Deleted,
}

/// 一次配置变更事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigChangedEvent {
    pub key: String,
    pub group: String,
    pub content: Option<String>,
    pub change_type: ConfigChangeType,
}

impl ConfigChangedEvent {
    pub fn modified(key: impl Into<String>, group: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            group: group.into(),
            content: Some(content.into()),
            change_type: ConfigChangeType::Modified,
        }
    }

    pub fn deleted(key: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            group: group.into(),
            content: None,
            change_type: ConfigChangeType::Deleted,
        }
    }
}

/// 配置变更回调接口。
pub trait ConfigurationListener: Send + Sync + 'static {
    fn process(&self, event: &ConfigChangedEvent);
}

/// 动态配置中心客户端。
pub trait DynamicConfiguration: Send + Sync + 'static {
    fn add_listener(&self, key: &str, group: &str, listener: Arc<dyn ConfigurationListener>);

    fn remove_listener(&self, key: &str, group: &str, listener: &Arc<dyn ConfigurationListener>);

    fn get_config(&self, key: &str, group: &str) -> Result<Option<String>>;
}

/// 空实现：不推送任何事件，所有键都不存在。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDynamicConfiguration;

impl DynamicConfiguration for NoopDynamicConfiguration {
    fn add_listener(&self, _key: &str, _group: &str, _listener: Arc<dyn ConfigurationListener>) {}

    fn remove_listener(&self, _key: &str, _group: &str, _listener: &Arc<dyn ConfigurationListener>) {}

    fn get_config(&self, _key: &str, _group: &str) -> Result<Option<String>> {
        Ok(None)
    }
}
