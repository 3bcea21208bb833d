//! 动态服务目录：把注册中心的全量推送对账为可路由的调用者列表。
//!
//! # 教案式说明
//! - **意图（Why）**：注册中心推送异步、无序、可能重复，目录需要在任何时刻都给出一个确定的调用者
//!   列表（上一次成功对账的结果，或注册中心明确声明无提供者时的空列表）；
//! - **逻辑（How）**：
//!   1. `notify` 在目录级互斥锁内分类推送：覆盖规则、路由、提供者；
//!   2. 刷新目录自身描述符上的覆盖层，再对提供者描述符执行合并、覆盖、去重与拨号；
//!   3. 新映射构建完成后先发布（缓存映射、路由链、对外列表），再销毁不再出现的调用者；
//! - **契约（What）**：
//!   - `list` 只读取 [`ArcSwap`] 快照，不与对账争锁；
//!   - 注册中心显式推送 `empty://` 时进入禁止状态，`list` 返回 [`RegistryError::Forbidden`]；
//!     之后任何非占位推送（包括只含覆盖规则的推送）都会解除禁止；
//!   - 内部错误（单个拨号失败、整批失败、路由失败）只记日志，不打断调用方。

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::category::{Category, classify};
use crate::cluster::{Cluster, GroupCluster, merge_groups};
use crate::configurator::{Configurator, apply_configurators, to_configurators};
use crate::constants::{
    ANY_VALUE, APPLICATION_KEY, CHECK_KEY, COMMA_SEPARATOR, DEFAULT_CONFIG_GROUP, DISABLED_KEY,
    EMPTY_PROTOCOL, ENABLED_KEY, GROUP_KEY, INTERFACE_KEY, METHODS_KEY, MONITOR_KEY, PROTOCOL_KEY,
    PROVIDER_ONLY_KEYS, REFER_KEY, REGISTER_IP_KEY, RELEASE_KEY, REMOTE_APPLICATION_KEY,
    TAG_KEY, TIMESTAMP_KEY, VERSION_KEY,
};
use crate::dynamic_config::DynamicConfiguration;
use crate::error::{RegistryError, Result};
use crate::invoker_cache::{InvokerCache, InvokerMap, destroy_all, reconcile};
use crate::overlay::{ConfiguratorListener, ConfiguratorOverlay, OverrideObserver};
use crate::protocol::{Invocation, Invoker, InvokerDelegate, Protocol};
use crate::registry::{NotifyListener, Registry};
use crate::router::{Router, RouterChain, RouterFactory, to_routers};
use crate::url::{ServiceUrl, parse_query, split_list};

/// 目录构造器。
///
/// 必填协作者为注册中心与协议；其余协作者缺省时：无路由工厂（忽略路由推送）、
/// [`GroupCluster`] 合并多分组、无覆盖层。
pub struct DirectoryBuilder {
    service_type: String,
    registry_url: ServiceUrl,
    registry: Option<Arc<dyn Registry>>,
    protocol: Option<Arc<dyn Protocol>>,
    router_factory: Option<Arc<dyn RouterFactory>>,
    builtin_routers: Vec<Arc<dyn Router>>,
    cluster: Arc<dyn Cluster>,
    application_listener: Option<Arc<ConfiguratorListener>>,
    dynamic_configuration: Option<Arc<dyn DynamicConfiguration>>,
    config_group: String,
}

impl DirectoryBuilder {
    /// `registry_url` 需携带 `refer` 参数：消费端引用参数的查询串。
    pub fn new(service_type: impl Into<String>, registry_url: ServiceUrl) -> Self {
        Self {
            service_type: service_type.into(),
            registry_url,
            registry: None,
            protocol: None,
            router_factory: None,
            builtin_routers: Vec::new(),
            cluster: Arc::new(GroupCluster),
            application_listener: None,
            dynamic_configuration: None,
            config_group: DEFAULT_CONFIG_GROUP.to_owned(),
        }
    }

    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn protocol(mut self, protocol: Arc<dyn Protocol>) -> Self {
        self.protocol = Some(protocol);
        self
    }

    #[must_use]
    pub fn router_factory(mut self, factory: Arc<dyn RouterFactory>) -> Self {
        self.router_factory = Some(factory);
        self
    }

    #[must_use]
    pub fn builtin_router(mut self, router: Arc<dyn Router>) -> Self {
        self.builtin_routers.push(router);
        self
    }

    #[must_use]
    pub fn cluster(mut self, cluster: Arc<dyn Cluster>) -> Self {
        self.cluster = cluster;
        self
    }

    /// 共享的应用级覆盖规则监听器。
    #[must_use]
    pub fn application_listener(mut self, listener: Arc<ConfiguratorListener>) -> Self {
        self.application_listener = Some(listener);
        self
    }

    /// 提供配置中心后，目录会为所订阅的服务创建服务级覆盖规则监听器。
    #[must_use]
    pub fn dynamic_configuration(
        mut self,
        dynamic_configuration: Arc<dyn DynamicConfiguration>,
        group: impl Into<String>,
    ) -> Self {
        self.dynamic_configuration = Some(dynamic_configuration);
        self.config_group = group.into();
        self
    }

    pub fn build(self) -> Result<Arc<ServiceDirectory>> {
        let registry = self.registry.ok_or_else(|| RegistryError::Config {
            detail: "service directory requires a registry".to_owned(),
        })?;
        let protocol = self.protocol.ok_or_else(|| RegistryError::Config {
            detail: "service directory requires a protocol".to_owned(),
        })?;
        if self.service_type.is_empty() {
            return Err(RegistryError::Config {
                detail: "service directory requires a service type".to_owned(),
            });
        }

        let query = self
            .registry_url
            .parameter(REFER_KEY)
            .map(parse_query)
            .transpose()?
            .unwrap_or_default();
        let interface = query
            .get(INTERFACE_KEY)
            .cloned()
            .unwrap_or_else(|| self.service_type.clone());
        let consumer_url = self
            .registry_url
            .with_path(interface)
            .with_cleared_parameters()
            .with_parameters(query)
            .without_parameter(MONITOR_KEY);
        let service_key = consumer_url.service_key();
        let multi_group = consumer_url
            .group()
            .is_some_and(|group| group == ANY_VALUE || group.contains(COMMA_SEPARATOR));

        let service_listener = self.dynamic_configuration.map(|dynamic_configuration| {
            ConfiguratorListener::service(&service_key, self.config_group, dynamic_configuration)
        });
        let overlay = ConfiguratorOverlay::new(self.application_listener, service_listener);

        let directory = Arc::new_cyclic(|weak: &Weak<ServiceDirectory>| ServiceDirectory {
            service_type: self.service_type,
            service_key,
            registry_url: self.registry_url,
            overridden_url: ArcSwap::from_pointee(consumer_url.clone()),
            consumer_url,
            multi_group,
            registry,
            protocol,
            router_factory: self.router_factory,
            router_chain: RouterChain::new(self.builtin_routers),
            cluster: self.cluster,
            overlay,
            forbidden: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            configurators: ArcSwap::from_pointee(Vec::new()),
            cache: InvokerCache::new(),
            invokers: ArcSwap::from_pointee(Vec::new()),
            state: Mutex::new(ReconcileState::default()),
            registered_consumer_url: Mutex::new(None),
            subscribe_url: Mutex::new(None),
            listener: Arc::new(DirectoryListener(weak.clone())),
            self_ref: weak.clone(),
        });
        directory.overlay.add_observer(directory.observer_ref());
        Ok(directory)
    }
}

#[derive(Default)]
struct ReconcileState {
    cached_provider_urls: Option<Vec<ServiceUrl>>,
}

/// 单个服务引用的动态目录。
pub struct ServiceDirectory {
    service_type: String,
    service_key: String,
    registry_url: ServiceUrl,
    consumer_url: ServiceUrl,
    overridden_url: ArcSwap<ServiceUrl>,
    multi_group: bool,
    registry: Arc<dyn Registry>,
    protocol: Arc<dyn Protocol>,
    router_factory: Option<Arc<dyn RouterFactory>>,
    router_chain: RouterChain,
    cluster: Arc<dyn Cluster>,
    overlay: ConfiguratorOverlay,
    forbidden: AtomicBool,
    destroyed: AtomicBool,
    configurators: ArcSwap<Vec<Configurator>>,
    cache: InvokerCache,
    invokers: ArcSwap<Vec<Arc<dyn Invoker>>>,
    state: Mutex<ReconcileState>,
    registered_consumer_url: Mutex<Option<ServiceUrl>>,
    subscribe_url: Mutex<Option<ServiceUrl>>,
    listener: Arc<dyn NotifyListener>,
    self_ref: Weak<ServiceDirectory>,
}

impl ServiceDirectory {
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    pub fn registry_url(&self) -> &ServiceUrl {
        &self.registry_url
    }

    /// 由 `refer` 参数还原的消费端描述符。
    pub fn consumer_url(&self) -> &ServiceUrl {
        &self.consumer_url
    }

    /// 叠加了全部覆盖层的消费端描述符。
    pub fn directory_url(&self) -> Arc<ServiceUrl> {
        self.overridden_url.load_full()
    }

    pub fn is_multi_group(&self) -> bool {
        self.multi_group
    }

    pub fn is_forbidden(&self) -> bool {
        self.forbidden.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// 对外发布的调用者列表（多分组时为合并后的列表）。
    pub fn invokers(&self) -> Arc<Vec<Arc<dyn Invoker>>> {
        self.invokers.load_full()
    }

    /// 规范键到调用者的缓存快照。
    pub fn cached_invokers(&self) -> Arc<InvokerMap> {
        self.cache.snapshot()
    }

    /// 注册中心推送的覆盖规则。
    pub fn configurators(&self) -> Arc<Vec<Configurator>> {
        self.configurators.load_full()
    }

    pub fn router_chain(&self) -> &RouterChain {
        &self.router_chain
    }

    pub fn overlay(&self) -> &ConfiguratorOverlay {
        &self.overlay
    }

    /// 供注册中心回调的监听器；只弱引用目录，不延长其生命周期。
    pub fn listener(&self) -> Arc<dyn NotifyListener> {
        Arc::clone(&self.listener)
    }

    pub fn is_available(&self) -> bool {
        if self.is_destroyed() || self.is_forbidden() {
            return false;
        }
        self.cache
            .snapshot()
            .values()
            .any(|invoker| invoker.is_available())
    }

    /// 向注册中心登记消费端描述符，销毁时自动注销。
    pub fn register_consumer(&self, url: ServiceUrl) -> Result<()> {
        self.registry
            .register(&url)
            .map_err(|err| RegistryError::registry("register", &url, err))?;
        *self.registered_consumer_url.lock() = Some(url);
        Ok(())
    }

    pub fn registered_consumer_url(&self) -> Option<ServiceUrl> {
        self.registered_consumer_url.lock().clone()
    }

    /// 订阅提供者、覆盖规则与路由。
    pub fn subscribe(&self, url: ServiceUrl) -> Result<()> {
        self.registry
            .subscribe(&url, Arc::clone(&self.listener))
            .map_err(|err| RegistryError::registry("subscribe", &url, err))?;
        *self.subscribe_url.lock() = Some(url);
        Ok(())
    }

    /// 处理一次注册中心推送。
    pub fn notify(&self, urls: Vec<ServiceUrl>) {
        if self.is_destroyed() {
            debug!(service = %self.service_key, "ignoring notification for destroyed directory");
            return;
        }
        let mut state = self.state.lock();

        let mut providers = Vec::new();
        let mut routers = Vec::new();
        let mut configurators = Vec::new();
        for url in urls {
            match classify(&url) {
                Some(Category::Providers) => providers.push(url),
                Some(Category::Routers) => routers.push(url),
                Some(Category::Configurators) => configurators.push(url),
                None => {
                    warn!(
                        service = %self.service_key,
                        url = %url,
                        category = url.category(),
                        "unsupported category in registry notification, dropped"
                    );
                }
            }
        }

        if let Some(list) = to_configurators(&configurators) {
            self.configurators.store(Arc::new(list));
        }

        if !routers.is_empty() {
            match &self.router_factory {
                Some(factory) => {
                    if let Some(list) = to_routers(&routers, factory.as_ref()) {
                        self.router_chain.add_routers(list);
                    }
                }
                None => {
                    warn!(
                        service = %self.service_key,
                        count = routers.len(),
                        "no router factory configured, router descriptors ignored"
                    );
                }
            }
        }

        self.refresh_override_and_invoker(&mut state, providers);
    }

    fn refresh_override_and_invoker(&self, state: &mut ReconcileState, urls: Vec<ServiceUrl>) {
        self.override_directory_url();
        self.refresh_invoker(state, urls);
    }

    fn override_directory_url(&self) {
        let url = apply_configurators(&self.configurators.load(), &self.consumer_url);
        let url = self.overlay.apply(&url);
        self.overridden_url.store(Arc::new(url));
    }

    fn refresh_invoker(&self, state: &mut ReconcileState, urls: Vec<ServiceUrl>) {
        if urls.len() == 1 && urls[0].protocol() == EMPTY_PROTOCOL {
            self.forbidden.store(true, Ordering::Release);
            let empty = Arc::new(Vec::new());
            self.invokers.store(Arc::clone(&empty));
            self.router_chain.set_invokers(empty);
            state.cached_provider_urls = None;
            let old = self.cache.take_all();
            let failed = destroy_all(old.values().cloned());
            info!(
                service = %self.service_key,
                destroyed = old.len(),
                failed,
                "registry reported no provider, directory is forbidden"
            );
            return;
        }
        self.forbidden.store(false, Ordering::Release);

        let urls = if urls.is_empty() {
            match &state.cached_provider_urls {
                Some(cached) => cached.clone(),
                None => return,
            }
        } else {
            state.cached_provider_urls = Some(urls.clone());
            urls
        };

        let batch = self.prepare_batch(&urls);
        let old = self.cache.snapshot();
        let reconciled = reconcile(&old, batch, |(url, provider_url): &(ServiceUrl, ServiceUrl)| {
            let invoker = self.protocol.refer(&self.service_type, url)?;
            let delegate: Arc<dyn Invoker> = Arc::new(InvokerDelegate::new(
                invoker,
                url.clone(),
                provider_url.clone(),
            ));
            Ok(delegate)
        });
        for (key, err) in &reconciled.failures {
            error!(
                service = %self.service_key,
                url = %key,
                error = %err,
                "failed to refer invoker, provider skipped"
            );
        }

        if reconciled.entries.is_empty() {
            error!(
                service = %self.service_key,
                count = urls.len(),
                "no invoker could be built from the provider descriptors, keeping the last good list"
            );
            return;
        }

        let entries = Arc::new(reconciled.entries);
        let list: Arc<Vec<Arc<dyn Invoker>>> = Arc::new(entries.values().cloned().collect());
        self.router_chain.set_invokers(Arc::clone(&list));
        let published = if self.multi_group {
            Arc::new(merge_groups(&list, self.cluster.as_ref()))
        } else {
            list
        };
        self.cache.publish(Arc::clone(&entries));
        self.invokers.store(published);

        let evicted = reconciled.evicted.len();
        let failed = destroy_all(reconciled.evicted);
        debug!(
            service = %self.service_key,
            count = entries.len(),
            evicted,
            failed,
            "directory reconciled"
        );
    }

    /// 过滤、合并、覆盖并按规范键去重，得到待对账的批次。
    fn prepare_batch(&self, urls: &[ServiceUrl]) -> Vec<(String, (ServiceUrl, ServiceUrl))> {
        let allowed = self.consumer_url.parameter(PROTOCOL_KEY).filter(|p| !p.is_empty());
        let mut seen = HashSet::new();
        let mut batch = Vec::with_capacity(urls.len());
        for provider_url in urls {
            if let Some(allowed) = allowed {
                if !split_list(allowed).any(|protocol| protocol == provider_url.protocol()) {
                    continue;
                }
            }
            if provider_url.protocol() == EMPTY_PROTOCOL {
                continue;
            }
            if !self.protocol.supports(provider_url.protocol()) {
                error!(
                    service = %self.service_key,
                    url = %provider_url,
                    protocol = provider_url.protocol(),
                    "unsupported protocol, provider skipped"
                );
                continue;
            }

            let url = self.merge_url(provider_url);
            let key = url.canonical_key();
            if !seen.insert(key.clone()) {
                continue;
            }
            let enabled = if url.has_parameter(DISABLED_KEY) {
                !url.bool_parameter(DISABLED_KEY, false)
            } else {
                url.bool_parameter(ENABLED_KEY, true)
            };
            if !enabled {
                debug!(service = %self.service_key, url = %url, "provider disabled");
                continue;
            }
            batch.push((key, (url, provider_url.clone())));
        }
        batch
    }

    /// 合并消费端引用参数并叠加三层覆盖规则。
    fn merge_url(&self, provider_url: &ServiceUrl) -> ServiceUrl {
        let mut url = merge_consumer_parameters(provider_url, &self.consumer_url);
        url = apply_configurators(&self.configurators.load(), &url);
        url = self.overlay.apply(&url);
        url = url.with_parameter(CHECK_KEY, "false");

        let absent: Vec<(String, String)> = url
            .parameters()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.overridden_url
            .rcu(|current| current.with_parameters_if_absent(absent.iter().cloned()));

        if url.path().is_empty() {
            if let Some(interface) = self.consumer_url.parameter(INTERFACE_KEY) {
                url = url.with_path(interface);
            }
        }
        url
    }

    /// 按当前路由链筛选本次调用的调用者。
    pub fn list(&self, invocation: &Invocation) -> Result<Vec<Arc<dyn Invoker>>> {
        if self.is_destroyed() {
            return Err(RegistryError::Destroyed {
                service_key: self.service_key.clone(),
            });
        }
        self.do_list(invocation)
    }

    fn do_list(&self, invocation: &Invocation) -> Result<Vec<Arc<dyn Invoker>>> {
        if self.is_forbidden() {
            return Err(RegistryError::Forbidden {
                service_key: self.service_key.clone(),
                consumer: self
                    .consumer_url
                    .parameter(REGISTER_IP_KEY)
                    .unwrap_or("unknown")
                    .to_owned(),
                registry: self.registry_url.address(),
            });
        }
        if self.multi_group {
            return Ok(self.invokers.load().to_vec());
        }
        match self.router_chain.route(&self.overridden_url.load(), invocation) {
            Ok(invokers) => Ok(invokers),
            Err(err) => {
                error!(
                    service = %self.service_key,
                    method = invocation.method(),
                    error = %err,
                    "router chain failed, returning no invoker"
                );
                Ok(Vec::new())
            }
        }
    }

    /// 注销、退订并销毁全部调用者；注册中心错误只记录告警。
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(url) = self.registered_consumer_url.lock().take() {
            if let Err(err) = self.registry.unregister(&url) {
                warn!(service = %self.service_key, url = %url, error = %err, "failed to unregister consumer");
            }
        }
        if let Some(url) = self.subscribe_url.lock().take() {
            if let Err(err) = self.registry.unsubscribe(&url, &self.listener) {
                warn!(service = %self.service_key, url = %url, error = %err, "failed to unsubscribe");
            }
        }
        self.overlay.detach(&self.observer_ref());

        let mut state = self.state.lock();
        state.cached_provider_urls = None;
        let empty = Arc::new(Vec::new());
        self.invokers.store(Arc::clone(&empty));
        self.router_chain.set_invokers(empty);
        let old = self.cache.take_all();
        let failed = destroy_all(old.values().cloned());
        info!(
            service = %self.service_key,
            destroyed = old.len(),
            failed,
            "directory destroyed"
        );
    }

    fn observer_ref(&self) -> Weak<dyn OverrideObserver> {
        self.self_ref.clone()
    }
}

impl OverrideObserver for ServiceDirectory {
    fn on_overrides_changed(&self) {
        if self.is_destroyed() {
            return;
        }
        let mut state = self.state.lock();
        self.refresh_override_and_invoker(&mut state, Vec::new());
    }
}

/// 注册中心回调适配器。
struct DirectoryListener(Weak<ServiceDirectory>);

impl NotifyListener for DirectoryListener {
    fn notify(&self, urls: Vec<ServiceUrl>) {
        if let Some(directory) = self.0.upgrade() {
            directory.notify(urls);
        }
    }
}

/// 提供者描述符合并消费端引用参数。
///
/// - 剔除只对提供端线程模型有意义的参数；
/// - 提供者已声明分组、版本时以提供者为准；发布时间、方法列表与标签不从消费端带入；
/// - 记录提供者所属应用为 `remote.application`。
pub fn merge_consumer_parameters(provider_url: &ServiceUrl, consumer_url: &ServiceUrl) -> ServiceUrl {
    let provider = provider_url.without_parameters(PROVIDER_ONLY_KEYS);
    let mut local: BTreeMap<&str, &str> = consumer_url
        .parameters()
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    if provider.has_parameter(GROUP_KEY) {
        local.remove(GROUP_KEY);
    }
    if provider.has_parameter(VERSION_KEY) {
        local.remove(VERSION_KEY);
    }
    for key in [RELEASE_KEY, METHODS_KEY, TIMESTAMP_KEY, TAG_KEY] {
        local.remove(key);
    }

    let mut merged = provider.with_parameters(local);
    if let Some(application) = provider_url.parameter(APPLICATION_KEY) {
        merged = merged.with_parameter(REMOTE_APPLICATION_KEY, application);
    }
    merged
}
