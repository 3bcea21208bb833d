//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为服务目录与注册协议对外暴露的错误语义提供集中定义；
//! - 区分“跳过单个提供者”“配置解析失败”“调用期禁止访问”等类别，方便运维告警与调用方决策。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 `thiserror::Error`，并通过 [`RegistryError::code`] 暴露稳定错误码；
//! - 对账过程中的内部错误只记日志，不会作为调用失败向外传播，唯一例外是 [`RegistryError::Forbidden`]。

use thiserror::Error;

/// 注册目录错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合地址解析、拨号、导出、覆盖规则解析与注册中心往返等关键路径的异常；
/// - **契约 (What)**：
///   - 所有变体均 `Send + Sync + 'static`，可安全跨线程传播；
///   - `Forbidden` 是调用方唯一会看到的“无可用提供者”信号，携带服务键与消费端诊断上下文；
/// - **设计权衡 (Trade-offs)**：上下文使用 `String` 保存，牺牲少量分配换取可读性。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// 地址描述符无法解析。
    #[error("malformed address descriptor `{input}`: {reason}")]
    MalformedUrl { input: String, reason: String },

    /// 注册中心明确声明没有提供者，目录处于禁止访问状态。
    #[error(
        "no provider available for service `{service_key}` from registry `{registry}` on consumer `{consumer}`, \
         please check status of providers (disabled, not registered or in blacklist)"
    )]
    Forbidden {
        service_key: String,
        consumer: String,
        registry: String,
    },

    /// 目录已经销毁，不再接受列举请求。
    #[error("directory for service `{service_key}` is already destroyed")]
    Destroyed { service_key: String },

    /// 通过协议边界建立调用者失败。
    #[error("failed to refer invoker for `{url}`: {detail}")]
    Refer { url: String, detail: String },

    /// 通过协议边界导出服务失败。
    #[error("failed to export `{url}`: {detail}")]
    Export { url: String, detail: String },

    /// 覆盖规则载荷无法解析。
    #[error("invalid configurator rule: {detail}")]
    ConfiguratorParse { detail: String },

    /// 路由描述符无法转换为路由器。
    #[error("invalid router descriptor `{url}`: {detail}")]
    RouterParse { url: String, detail: String },

    /// 注册中心往返失败。
    #[error("registry operation `{operation}` failed for `{url}`: {detail}")]
    Registry {
        operation: &'static str,
        url: String,
        detail: String,
    },

    /// 路由链执行失败。
    #[error("router chain failed: {detail}")]
    Routing { detail: String },

    /// 动态配置中心访问失败，由 `DynamicConfiguration` 的实现方返回。
    #[error("dynamic configuration `{key}` unavailable: {detail}")]
    DynamicConfig { key: String, detail: String },

    /// 选项文件无效。
    #[error("invalid registry options: {detail}")]
    Config { detail: String },
}

impl RegistryError {
    /// 返回稳定错误码，供指标与告警维度使用。
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::MalformedUrl { .. } => "registry.url.malformed",
            RegistryError::Forbidden { .. } => "registry.directory.forbidden",
            RegistryError::Destroyed { .. } => "registry.directory.destroyed",
            RegistryError::Refer { .. } => "registry.protocol.refer",
            RegistryError::Export { .. } => "registry.protocol.export",
            RegistryError::ConfiguratorParse { .. } => "registry.configurator.parse",
            RegistryError::RouterParse { .. } => "registry.router.parse",
            RegistryError::Registry { .. } => "registry.remote",
            RegistryError::Routing { .. } => "registry.router.route",
            RegistryError::DynamicConfig { .. } => "registry.dynamic_config",
            RegistryError::Config { .. } => "registry.options",
        }
    }

    /// 是否为“注册中心声明无提供者”。
    pub fn is_forbidden(&self) -> bool {
        matches!(self, RegistryError::Forbidden { .. })
    }

    /// 把注册中心客户端返回的错误归入 [`RegistryError::Registry`]，补上操作名与地址。
    ///
    /// 已经是 `Registry` 的错误原样返回，避免上下文重复叠加。
    pub(crate) fn registry(
        operation: &'static str,
        url: &crate::url::ServiceUrl,
        source: RegistryError,
    ) -> Self {
        match source {
            RegistryError::Registry { .. } => source,
            other => RegistryError::Registry {
                operation,
                url: url.to_string(),
                detail: other.to_string(),
            },
        }
    }
}

/// 本 crate 的统一结果别名。
pub type Result<T, E = RegistryError> = core::result::Result<T, E>;
