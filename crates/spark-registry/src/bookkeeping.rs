//! 提供者/消费者登记表：记录每个服务键在哪个注册中心以什么描述符注册过。
//!
//! # 教案式说明
//! - **意图（Why）**：重新导出时需要知道“上一次对注册中心可见的描述符”以及“是否真的注册过”，
//!   才能决定是否发出注销/注册往返；运维查询也需要按服务键列出本进程的提供者与消费者；
//! - **契约（What）**：记录以 `Arc` 共享，导出句柄与登记表看到同一份状态；
//!   `registered_url` 以 [`ArcSwap`] 原子替换。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::url::ServiceUrl;

/// 单次导出的登记信息。
pub struct ProviderRecord {
    origin_url: ServiceUrl,
    registry_url: ServiceUrl,
    registered_url: ArcSwap<ServiceUrl>,
    registered: AtomicBool,
}

impl ProviderRecord {
    pub fn new(origin_url: ServiceUrl, registry_url: ServiceUrl, registered_url: ServiceUrl) -> Self {
        Self {
            origin_url,
            registry_url,
            registered_url: ArcSwap::from_pointee(registered_url),
            registered: AtomicBool::new(false),
        }
    }

    pub fn origin_url(&self) -> &ServiceUrl {
        &self.origin_url
    }

    pub fn registry_url(&self) -> &ServiceUrl {
        &self.registry_url
    }

    /// 当前对注册中心可见的描述符。
    pub fn registered_url(&self) -> Arc<ServiceUrl> {
        self.registered_url.load_full()
    }

    pub fn set_registered_url(&self, url: ServiceUrl) {
        self.registered_url.store(Arc::new(url));
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::Release);
    }
}

/// 单次引用的登记信息。
pub struct ConsumerRecord {
    registry_url: ServiceUrl,
    consumer_url: ServiceUrl,
    registered: AtomicBool,
}

impl ConsumerRecord {
    pub fn new(registry_url: ServiceUrl, consumer_url: ServiceUrl, registered: bool) -> Self {
        Self {
            registry_url,
            consumer_url,
            registered: AtomicBool::new(registered),
        }
    }

    pub fn registry_url(&self) -> &ServiceUrl {
        &self.registry_url
    }

    pub fn consumer_url(&self) -> &ServiceUrl {
        &self.consumer_url
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }
}

/// 按服务键索引的登记表。
#[derive(Default)]
pub struct ProviderConsumerTable {
    providers: DashMap<String, Vec<Arc<ProviderRecord>>>,
    consumers: DashMap<String, Vec<Arc<ConsumerRecord>>>,
}

impl ProviderConsumerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&self, service_key: &str, record: Arc<ProviderRecord>) {
        self.providers
            .entry(service_key.to_owned())
            .or_default()
            .push(record);
    }

    pub fn providers(&self, service_key: &str) -> Vec<Arc<ProviderRecord>> {
        self.providers
            .get(service_key)
            .map(|records| records.value().clone())
            .unwrap_or_default()
    }

    pub fn remove_provider(&self, service_key: &str, record: &Arc<ProviderRecord>) {
        self.providers.remove_if_mut(service_key, |_, records| {
            records.retain(|existing| !Arc::ptr_eq(existing, record));
            records.is_empty()
        });
    }

    pub fn register_consumer(&self, service_key: &str, record: Arc<ConsumerRecord>) {
        self.consumers
            .entry(service_key.to_owned())
            .or_default()
            .push(record);
    }

    pub fn consumers(&self, service_key: &str) -> Vec<Arc<ConsumerRecord>> {
        self.consumers
            .get(service_key)
            .map(|records| records.value().clone())
            .unwrap_or_default()
    }

    pub fn remove_consumer(&self, service_key: &str, record: &Arc<ConsumerRecord>) {
        self.consumers.remove_if_mut(service_key, |_, records| {
            records.retain(|existing| !Arc::ptr_eq(existing, record));
            records.is_empty()
        });
    }
}
