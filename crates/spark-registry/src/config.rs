//! 注册协议运行选项。
//!
//! # 教案式说明
//! - **意图（Why）**：应用名、配置分组与优雅下线等待时间需要由宿主配置文件统一提供；
//! - **契约（What）**：所有字段都有默认值，TOML 中缺省的键沿用默认；未知键视为错误，
//!   避免拼写错误被静默忽略。

use std::time::Duration;

use serde::Deserialize;

use crate::constants::DEFAULT_CONFIG_GROUP;
use crate::error::{RegistryError, Result};

/// 默认优雅下线等待时间（毫秒）。
pub const DEFAULT_SERVER_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryOptions {
    /// 本进程的应用名；存在时订阅应用级覆盖规则。
    pub application: Option<String>,
    /// 动态配置中心中覆盖规则所在的分组。
    pub config_group: String,
    /// 注销后关闭网络导出前的等待时间。
    pub server_shutdown_timeout_ms: u64,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            application: None,
            config_group: DEFAULT_CONFIG_GROUP.to_owned(),
            server_shutdown_timeout_ms: DEFAULT_SERVER_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl RegistryOptions {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| RegistryError::Config {
            detail: err.to_string(),
        })
    }

    #[must_use]
    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    #[must_use]
    pub fn with_server_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.server_shutdown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn server_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.server_shutdown_timeout_ms)
    }
}
