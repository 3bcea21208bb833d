//! 集成测试共用的内存替身：注册中心、协议、调用者、导出器与动态配置中心。
//!
//! - 所有替身只记录调用，不做网络 I/O；
//! - 注册中心的 `push` 同步回调全部订阅者，模拟一次全量推送。
#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use spark_registry::dynamic_config::{
    ConfigChangedEvent, ConfigurationListener, DynamicConfiguration,
};
use spark_registry::{
    Exporter, Invoker, NotifyListener, Protocol, Registry, RegistryError, RegistryFactory, Result,
    ServiceUrl,
};

pub fn url(raw: &str) -> ServiceUrl {
    ServiceUrl::parse(raw).expect("valid url")
}

/// 叶子调用者。
pub struct MockInvoker {
    url: ServiceUrl,
    destroyed: AtomicBool,
}

impl MockInvoker {
    pub fn new(url: ServiceUrl) -> Self {
        Self {
            url,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Invoker for MockInvoker {
    fn url(&self) -> &ServiceUrl {
        &self.url
    }

    fn is_available(&self) -> bool {
        !self.is_destroyed()
    }

    fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// 导出器：记录是否已关闭。
pub struct MockExporter {
    invoker: Arc<dyn Invoker>,
    closed: AtomicBool,
}

impl MockExporter {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Exporter for MockExporter {
    fn invoker(&self) -> Arc<dyn Invoker> {
        Arc::clone(&self.invoker)
    }

    fn unexport(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// 协议替身：可配置拨号失败的主机与不支持的协议。
#[derive(Default)]
pub struct MockProtocol {
    leaves: Mutex<Vec<Arc<MockInvoker>>>,
    refer_calls: AtomicUsize,
    failing_hosts: Mutex<HashSet<String>>,
    unsupported: Mutex<HashSet<String>>,
    exports: Mutex<Vec<Arc<MockExporter>>>,
}

impl MockProtocol {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_host(&self, host: &str) {
        self.failing_hosts.lock().insert(host.to_owned());
    }

    pub fn heal_host(&self, host: &str) {
        self.failing_hosts.lock().remove(host);
    }

    pub fn reject_protocol(&self, protocol: &str) {
        self.unsupported.lock().insert(protocol.to_owned());
    }

    pub fn refer_calls(&self) -> usize {
        self.refer_calls.load(Ordering::SeqCst)
    }

    /// 按拨号顺序返回的叶子调用者。
    pub fn leaves(&self) -> Vec<Arc<MockInvoker>> {
        self.leaves.lock().clone()
    }

    pub fn leaf_for_host(&self, host: &str) -> Option<Arc<MockInvoker>> {
        self.leaves
            .lock()
            .iter()
            .rev()
            .find(|leaf| leaf.url().host() == host)
            .cloned()
    }

    pub fn exports(&self) -> Vec<Arc<MockExporter>> {
        self.exports.lock().clone()
    }
}

impl Protocol for MockProtocol {
    fn refer(&self, _service_type: &str, url: &ServiceUrl) -> Result<Arc<dyn Invoker>> {
        self.refer_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_hosts.lock().contains(url.host()) {
            return Err(RegistryError::Refer {
                url: url.to_string(),
                detail: "connection refused".to_owned(),
            });
        }
        let leaf = Arc::new(MockInvoker::new(url.clone()));
        self.leaves.lock().push(Arc::clone(&leaf));
        Ok(leaf)
    }

    fn export(&self, invoker: Arc<dyn Invoker>) -> Result<Arc<dyn Exporter>> {
        let exporter = Arc::new(MockExporter {
            invoker,
            closed: AtomicBool::new(false),
        });
        self.exports.lock().push(Arc::clone(&exporter));
        Ok(exporter)
    }

    fn supports(&self, protocol: &str) -> bool {
        !self.unsupported.lock().contains(protocol)
    }
}

/// 注册中心往返记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryEvent {
    Register(ServiceUrl),
    Unregister(ServiceUrl),
    Subscribe(ServiceUrl),
    Unsubscribe(ServiceUrl),
}

/// 注册中心替身。
///
/// `fail` 打开某个操作的故障开关（`connect`、`register`、`unregister`、`subscribe`、
/// `unsubscribe`），失败的操作不留下事件记录。
pub struct MockRegistry {
    url: ServiceUrl,
    events: Mutex<Vec<RegistryEvent>>,
    listeners: Mutex<Vec<(ServiceUrl, Arc<dyn NotifyListener>)>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            url: url("mock://127.0.0.1:2181/RegistryService"),
            events: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().insert(operation);
    }

    pub fn heal(&self, operation: &'static str) {
        self.failing.lock().remove(operation);
    }

    fn check(&self, operation: &'static str, url: &ServiceUrl) -> Result<()> {
        if self.failing.lock().contains(operation) {
            return Err(RegistryError::Registry {
                operation,
                url: url.to_string(),
                detail: "registry session lost".to_owned(),
            });
        }
        Ok(())
    }

    pub fn events(&self) -> Vec<RegistryEvent> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn registered(&self) -> Vec<ServiceUrl> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                RegistryEvent::Register(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn unregistered(&self) -> Vec<ServiceUrl> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                RegistryEvent::Unregister(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// 向全部订阅者推送快照。
    pub fn push(&self, urls: Vec<ServiceUrl>) {
        let listeners: Vec<Arc<dyn NotifyListener>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.notify(urls.clone());
        }
    }
}

impl Registry for MockRegistry {
    fn url(&self) -> &ServiceUrl {
        &self.url
    }

    fn is_available(&self) -> bool {
        true
    }

    fn register(&self, url: &ServiceUrl) -> Result<()> {
        self.check("register", url)?;
        self.events.lock().push(RegistryEvent::Register(url.clone()));
        Ok(())
    }

    fn unregister(&self, url: &ServiceUrl) -> Result<()> {
        self.check("unregister", url)?;
        self.events.lock().push(RegistryEvent::Unregister(url.clone()));
        Ok(())
    }

    fn subscribe(&self, url: &ServiceUrl, listener: Arc<dyn NotifyListener>) -> Result<()> {
        self.check("subscribe", url)?;
        self.events.lock().push(RegistryEvent::Subscribe(url.clone()));
        self.listeners.lock().push((url.clone(), listener));
        Ok(())
    }

    fn unsubscribe(&self, url: &ServiceUrl, listener: &Arc<dyn NotifyListener>) -> Result<()> {
        self.check("unsubscribe", url)?;
        self.events.lock().push(RegistryEvent::Unsubscribe(url.clone()));
        self.listeners
            .lock()
            .retain(|(_, existing)| !Arc::ptr_eq(existing, listener));
        Ok(())
    }
}

/// 始终返回同一个注册中心；`connect` 故障开关打开时连接失败。
pub struct MockRegistryFactory(pub Arc<MockRegistry>);

impl RegistryFactory for MockRegistryFactory {
    fn get_registry(&self, url: &ServiceUrl) -> Result<Arc<dyn Registry>> {
        self.0.check("connect", url)?;
        let registry: Arc<dyn Registry> = self.0.clone();
        Ok(registry)
    }
}

/// 动态配置中心替身。
#[derive(Default)]
pub struct MockDynamicConfiguration {
    contents: Mutex<BTreeMap<String, String>>,
    listeners: Mutex<BTreeMap<String, Vec<Arc<dyn ConfigurationListener>>>>,
    unreachable: AtomicBool,
}

impl MockDynamicConfiguration {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 启动前预置规则，只写入不通知。
    pub fn seed(&self, key: &str, content: &str) {
        self.contents.lock().insert(key.to_owned(), content.to_owned());
    }

    pub fn publish(&self, key: &str, content: &str) {
        self.seed(key, content);
        self.fire(&ConfigChangedEvent::modified(key, "spark", content));
    }

    pub fn delete(&self, key: &str) {
        self.contents.lock().remove(key);
        self.fire(&ConfigChangedEvent::deleted(key, "spark"));
    }

    /// 之后的 `get_config` 全部失败，监听仍可注册。
    pub fn go_offline(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.listeners.lock().get(key).map_or(0, Vec::len)
    }

    fn fire(&self, event: &ConfigChangedEvent) {
        let listeners = self
            .listeners
            .lock()
            .get(&event.key)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener.process(event);
        }
    }
}

impl DynamicConfiguration for MockDynamicConfiguration {
    fn add_listener(&self, key: &str, _group: &str, listener: Arc<dyn ConfigurationListener>) {
        self.listeners
            .lock()
            .entry(key.to_owned())
            .or_default()
            .push(listener);
    }

    fn remove_listener(&self, key: &str, _group: &str, listener: &Arc<dyn ConfigurationListener>) {
        if let Some(listeners) = self.listeners.lock().get_mut(key) {
            listeners.retain(|existing| !Arc::ptr_eq(existing, listener));
        }
    }

    fn get_config(&self, key: &str, _group: &str) -> Result<Option<String>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RegistryError::DynamicConfig {
                key: key.to_owned(),
                detail: "config center unreachable".to_owned(),
            });
        }
        Ok(self.contents.lock().get(key).cloned())
    }
}

/// 消费端注册中心地址：`refer` 参数携带引用参数。
pub fn consumer_registry_url(refer: &ServiceUrl) -> ServiceUrl {
    url("registry://127.0.0.1:2181/RegistryService?registry=mock")
        .with_parameter("refer", refer.query_string())
}

/// 提供端源调用者地址：`export` 参数携带提供者地址。
pub fn export_origin_url(provider: &ServiceUrl, registry_params: &[(&str, &str)]) -> ServiceUrl {
    url("registry://127.0.0.1:2181/RegistryService?registry=mock")
        .with_parameters(registry_params.iter().copied())
        .with_parameter("export", provider.to_string())
}
