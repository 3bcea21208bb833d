//! 协议边界：调用者、导出器与拨号/导出协议的对象层契约。
//!
//! # 教案式说明
//! - **定位（Where）**：真正的网络编解码与连接管理由外部协议实现承担，本模块只描述目录与注册协议
//!   需要的最小能力；
//! - **设计（How）**：装饰型调用者通过 [`Invoker::delegate`] 显式暴露被包装的内层对象，
//!   [`innermost`] 沿链条走到叶子，替代运行时类型探测；
//! - **契约（What）**：调用者身份以 `Arc::ptr_eq` 判定，目录保证同一规范键只对应一个调用者实例。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::url::ServiceUrl;

/// 单次调用的最小描述，供路由器做方法级、附件级匹配。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    method: String,
    attachments: BTreeMap<String, String>,
}

impl Invocation {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            attachments: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }
}

/// 指向某个远端提供者的活动调用句柄。
///
/// # 契约说明（What）
/// - `url`：调用者当前生效的地址描述符（已合并消费端参数与覆盖规则）；
/// - `destroy`：释放底层连接，允许失败，调用方负责记录日志；
/// - `delegate`：装饰型实现返回被包装的调用者，叶子实现返回 `None`。
pub trait Invoker: Send + Sync + 'static {
    fn url(&self) -> &ServiceUrl;

    fn is_available(&self) -> bool;

    fn destroy(&self) -> Result<()>;

    fn delegate(&self) -> Option<&Arc<dyn Invoker>> {
        None
    }
}

impl fmt::Debug for dyn Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker").field("url", &self.url().to_string()).finish()
    }
}

/// 沿装饰链找到最内层的调用者。
pub fn innermost(invoker: &Arc<dyn Invoker>) -> Arc<dyn Invoker> {
    let mut current = Arc::clone(invoker);
    while let Some(inner) = current.delegate().cloned() {
        current = inner;
    }
    current
}

/// 以另一个地址描述符包装已有调用者。
///
/// - 消费端：包装拨号得到的调用者，同时记住注册中心推送的原始提供者地址；
/// - 提供端：以覆盖后的导出地址包装业务调用者，交给协议导出。
pub struct InvokerDelegate {
    inner: Arc<dyn Invoker>,
    url: ServiceUrl,
    provider_url: ServiceUrl,
}

impl InvokerDelegate {
    pub fn new(inner: Arc<dyn Invoker>, url: ServiceUrl, provider_url: ServiceUrl) -> Self {
        Self {
            inner,
            url,
            provider_url,
        }
    }

    /// 注册中心推送的原始地址（未合并消费端参数）。
    pub fn provider_url(&self) -> &ServiceUrl {
        &self.provider_url
    }
}

impl Invoker for InvokerDelegate {
    fn url(&self) -> &ServiceUrl {
        &self.url
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn destroy(&self) -> Result<()> {
        self.inner.destroy()
    }

    fn delegate(&self) -> Option<&Arc<dyn Invoker>> {
        Some(&self.inner)
    }
}

/// 协议导出后的句柄。
pub trait Exporter: Send + Sync + 'static {
    fn invoker(&self) -> Arc<dyn Invoker>;

    /// 关闭底层网络导出；实现应保证幂等。
    fn unexport(&self);
}

/// 拨号与导出的协议边界。
///
/// # 契约说明（What）
/// - `refer`：为单个提供者地址建立调用者；失败只影响该地址，不得中断批量对账；
/// - `export`：导出本地服务，返回可关闭的导出器；
/// - `supports`：本地运行时是否能拨通该协议，目录会跳过不支持的协议。
pub trait Protocol: Send + Sync + 'static {
    fn refer(&self, service_type: &str, url: &ServiceUrl) -> Result<Arc<dyn Invoker>>;

    fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Arc<dyn Exporter>>;

    fn supports(&self, _protocol: &str) -> bool {
        true
    }
}
