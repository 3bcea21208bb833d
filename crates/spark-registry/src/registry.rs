//! 注册中心边界契约。
//!
//! # 教案式说明
//! - **意图（Why）**：注册中心传输（ZooKeeper、etcd、Nacos 等）由外部实现，本核心只消费已解码的
//!   地址描述符列表；
//! - **契约（What）**：`subscribe` 注册的监听器会收到“按类别的全量快照”，而非增量；
//!   同一监听器以 `Arc::ptr_eq` 识别，`unsubscribe` 需传入订阅时的同一个 `Arc`；
//! - **风险（Trade-offs）**：订阅与注销属于一次性的建链/拆链操作，允许阻塞。

use std::sync::Arc;

use crate::error::Result;
use crate::url::ServiceUrl;

/// 注册中心推送回调。
pub trait NotifyListener: Send + Sync + 'static {
    /// 推送当前快照；每次调用都携带本次涉及类别的完整集合。
    fn notify(&self, urls: Vec<ServiceUrl>);
}

/// 注册中心客户端。
pub trait Registry: Send + Sync + 'static {
    fn url(&self) -> &ServiceUrl;

    fn is_available(&self) -> bool;

    fn register(&self, url: &ServiceUrl) -> Result<()>;

    fn unregister(&self, url: &ServiceUrl) -> Result<()>;

    fn subscribe(&self, url: &ServiceUrl, listener: Arc<dyn NotifyListener>) -> Result<()>;

    fn unsubscribe(&self, url: &ServiceUrl, listener: &Arc<dyn NotifyListener>) -> Result<()>;
}

/// 按注册中心地址获取（或复用）客户端实例。
pub trait RegistryFactory: Send + Sync + 'static {
    fn get_registry(&self, url: &ServiceUrl) -> Result<Arc<dyn Registry>>;
}
