//! 注册协议：提供端导出/重新导出/优雅下线，以及消费端引用时的目录装配。
//!
//! # 教案式说明
//! - **意图（Why）**：提供者的有效配置会被覆盖规则改写，改写后需要在不中断在途调用的前提下
//!   热替换本地导出，并且只有在“注册中心可见部分”真的变化时才往返注册中心；
//! - **逻辑（How）**：
//!   1. `export`：拆出注册中心地址与提供者地址，创建覆盖监听器，叠加覆盖层后本地导出，
//!      计算注册中心可见描述符，登记、注册并订阅覆盖规则；注册或订阅失败时撤销已完成的步骤，
//!      立即关闭本地导出器后返回错误；
//!   2. 覆盖规则变化时，[`OverrideListener`] 在自身互斥锁内重新计算有效地址，
//!      与当前导出地址比较，不同则 [`RegistryProtocol::re_export`]；
//!   3. `unexport`：注销、退订、移除缓存后，把最终关闭交给运行时在宽限期后执行；
//! - **契约（What）**：导出句柄 [`ExporterHandle`] 在重新导出时保持身份不变，只替换内部导出器；
//!   `unexport` 幂等，且不会阻塞调用线程等待连接排空。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::bookkeeping::{ConsumerRecord, ProviderConsumerTable, ProviderRecord};
use crate::category::is_configurator;
use crate::cluster::{Cluster, GroupCluster};
use crate::config::RegistryOptions;
use crate::configurator::{Configurator, apply_configurators, to_configurators};
use crate::constants::{
    ACCEPT_FOREIGN_IP_KEY, ANY_VALUE, BIND_IP_KEY, BIND_PORT_KEY, CATEGORY_KEY, CHECK_KEY,
    CONFIGURATORS_CATEGORY, CONSUMER_PROTOCOL, CONSUMERS_CATEGORY, DEFAULT_REGISTER_PROVIDER_KEYS,
    EXPORT_KEY, EXTRA_KEYS_KEY, INTERFACE_KEY, INTERFACES_KEY, METHODS_KEY, MONITOR_KEY,
    OVERRIDE_PROTOCOL, PROVIDER_PROTOCOL, PROVIDERS_CATEGORY, QOS_ENABLE_KEY, QOS_HOST_KEY,
    QOS_PORT_KEY, REGISTER_IP_KEY, REGISTER_KEY, REGISTRY_KEY, REGISTRY_PROTOCOL, ROUTERS_CATEGORY,
    SIMPLIFIED_KEY, VALIDATION_KEY,
};
use crate::directory::{DirectoryBuilder, ServiceDirectory};
use crate::dynamic_config::{DynamicConfiguration, NoopDynamicConfiguration};
use crate::error::{RegistryError, Result};
use crate::overlay::{ConfiguratorListener, OverrideObserver};
use crate::protocol::{Exporter, Invoker, InvokerDelegate, Protocol};
use crate::registry::{NotifyListener, RegistryFactory};
use crate::router::RouterFactory;
use crate::url::{ServiceUrl, is_match, split_list};

/// 非精简模式下不对注册中心暴露的参数。
const REGISTRY_FILTERED_KEYS: [&str; 9] = [
    MONITOR_KEY,
    BIND_IP_KEY,
    BIND_PORT_KEY,
    QOS_ENABLE_KEY,
    QOS_HOST_KEY,
    QOS_PORT_KEY,
    ACCEPT_FOREIGN_IP_KEY,
    VALIDATION_KEY,
    INTERFACES_KEY,
];

/// 注册协议构造器。
pub struct RegistryProtocolBuilder {
    registry_factory: Arc<dyn RegistryFactory>,
    protocol: Arc<dyn Protocol>,
    dynamic_configuration: Arc<dyn DynamicConfiguration>,
    options: RegistryOptions,
    runtime: Option<Handle>,
    router_factory: Option<Arc<dyn RouterFactory>>,
    cluster: Arc<dyn Cluster>,
}

impl RegistryProtocolBuilder {
    pub fn new(registry_factory: Arc<dyn RegistryFactory>, protocol: Arc<dyn Protocol>) -> Self {
        Self {
            registry_factory,
            protocol,
            dynamic_configuration: Arc::new(NoopDynamicConfiguration),
            options: RegistryOptions::default(),
            runtime: Handle::try_current().ok(),
            router_factory: None,
            cluster: Arc::new(GroupCluster),
        }
    }

    #[must_use]
    pub fn dynamic_configuration(mut self, dynamic_configuration: Arc<dyn DynamicConfiguration>) -> Self {
        self.dynamic_configuration = dynamic_configuration;
        self
    }

    #[must_use]
    pub fn options(mut self, options: RegistryOptions) -> Self {
        self.options = options;
        self
    }

    /// 执行延迟关闭的运行时；缺省取构造时所在的 tokio 运行时。
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn router_factory(mut self, factory: Arc<dyn RouterFactory>) -> Self {
        self.router_factory = Some(factory);
        self
    }

    #[must_use]
    pub fn cluster(mut self, cluster: Arc<dyn Cluster>) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn build(self) -> Arc<RegistryProtocol> {
        let application_listener = self.options.application.as_deref().map(|application| {
            ConfiguratorListener::application(
                application,
                self.options.config_group.clone(),
                Arc::clone(&self.dynamic_configuration),
            )
        });

        let protocol = Arc::new_cyclic(|weak: &Weak<RegistryProtocol>| RegistryProtocol {
            registry_factory: self.registry_factory,
            protocol: self.protocol,
            dynamic_configuration: self.dynamic_configuration,
            options: self.options,
            runtime: self.runtime,
            router_factory: self.router_factory,
            cluster: self.cluster,
            application_listener,
            bounds: DashMap::new(),
            override_listeners: DashMap::new(),
            service_listeners: DashMap::new(),
            table: ProviderConsumerTable::new(),
            self_ref: weak.clone(),
        });
        if let Some(application) = &protocol.application_listener {
            application.add_observer(protocol.observer_ref());
        }
        protocol
    }
}

/// 注册协议。
pub struct RegistryProtocol {
    registry_factory: Arc<dyn RegistryFactory>,
    protocol: Arc<dyn Protocol>,
    dynamic_configuration: Arc<dyn DynamicConfiguration>,
    options: RegistryOptions,
    runtime: Option<Handle>,
    router_factory: Option<Arc<dyn RouterFactory>>,
    cluster: Arc<dyn Cluster>,
    application_listener: Option<Arc<ConfiguratorListener>>,
    bounds: DashMap<String, Arc<ExporterHandle>>,
    override_listeners: DashMap<String, Arc<OverrideListener>>,
    service_listeners: DashMap<String, Arc<ConfiguratorListener>>,
    table: ProviderConsumerTable,
    self_ref: Weak<RegistryProtocol>,
}

impl RegistryProtocol {
    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    pub fn bookkeeping(&self) -> &ProviderConsumerTable {
        &self.table
    }

    pub fn application_listener(&self) -> Option<&Arc<ConfiguratorListener>> {
        self.application_listener.as_ref()
    }

    /// 当前所有导出句柄。
    pub fn exporters(&self) -> Vec<Arc<ExporterHandle>> {
        self.bounds
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// 按覆盖订阅地址查找覆盖监听器。
    pub fn override_listener(&self, subscribe_url: &ServiceUrl) -> Option<Arc<OverrideListener>> {
        self.override_listeners
            .get(&subscribe_url.to_string())
            .map(|entry| Arc::clone(entry.value()))
    }

    fn bound(&self, key: &str) -> Option<Arc<ExporterHandle>> {
        self.bounds.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn service_listener(&self, service_key: &str) -> Option<Arc<ConfiguratorListener>> {
        self.service_listeners
            .get(service_key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// 导出本地服务。
    ///
    /// `origin_invoker` 的地址是注册中心地址，`export` 参数携带提供者地址。
    /// 同一提供者重复导出直接返回已有句柄。本地导出之后的任一步失败都会回滚：
    /// 撤销已完成的注册，移除登记与监听器，并立即关闭刚建立的导出器。
    pub fn export(&self, origin_invoker: Arc<dyn Invoker>) -> Result<Arc<ExporterHandle>> {
        let registry_url = registry_url_of(origin_invoker.url());
        let provider_url = provider_url_of(origin_invoker.url())?;
        if let Some(existing) = self.bound(&provider_url.canonical_key()) {
            return Ok(existing);
        }

        let subscribe_url = override_subscribe_url(&provider_url);
        let override_listener = Arc::new(OverrideListener {
            subscribe_url: subscribe_url.clone(),
            origin_invoker: Arc::clone(&origin_invoker),
            configurators: ArcSwap::from_pointee(Vec::new()),
            lock: Mutex::new(()),
            owner: self.self_ref.clone(),
        });
        self.override_listeners
            .insert(subscribe_url.to_string(), Arc::clone(&override_listener));

        let service_key = provider_url.service_key();
        let provider_url = self.override_url_with_config(&provider_url, &override_listener);
        let handle = match self.do_local_export(&origin_invoker, &provider_url) {
            Ok(handle) => handle,
            Err(err) => {
                self.override_listeners.remove(&subscribe_url.to_string());
                self.release_service_listener(&service_key);
                return Err(err);
            }
        };

        let registered_url = registered_provider_url(&provider_url, &registry_url);
        let record = Arc::new(ProviderRecord::new(
            origin_invoker.url().clone(),
            registry_url.clone(),
            registered_url.clone(),
        ));
        self.table.register_provider(&service_key, Arc::clone(&record));
        handle.bind(ExportBinding {
            registry_url: registry_url.clone(),
            subscribe_url: subscribe_url.clone(),
            service_key,
            record: Arc::clone(&record),
        });

        let register = provider_url.bool_parameter(REGISTER_KEY, true).then_some(&*record);
        let listener: Arc<dyn NotifyListener> = override_listener;
        if let Err(err) = self.register_and_subscribe(&registry_url, &subscribe_url, register, listener) {
            warn!(url = %registered_url, error = %err, "export failed, rolling back local export");
            self.rollback_export(&handle);
            return Err(err);
        }
        info!(url = %registered_url, "service exported");
        Ok(handle)
    }

    fn register_and_subscribe(
        &self,
        registry_url: &ServiceUrl,
        subscribe_url: &ServiceUrl,
        register: Option<&ProviderRecord>,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<()> {
        let registry = self.registry_factory.get_registry(registry_url)?;
        if let Some(record) = register {
            let registered_url = record.registered_url();
            registry
                .register(&registered_url)
                .map_err(|err| RegistryError::registry("register", &registered_url, err))?;
            record.set_registered(true);
        }
        registry
            .subscribe(subscribe_url, listener)
            .map_err(|err| RegistryError::registry("subscribe", subscribe_url, err))
    }

    /// 撤销一次未完成的导出。订阅总是最后一步，因此这里无需退订。
    fn rollback_export(&self, handle: &Arc<ExporterHandle>) {
        handle.unexported.store(true, Ordering::Release);
        self.bounds
            .remove_if(&handle.key, |_, bound| Arc::ptr_eq(bound, handle));
        let binding = handle.binding.lock().take();
        if let Some(binding) = binding {
            self.override_listeners
                .remove(&binding.subscribe_url.to_string());
            self.unregister_provider(&binding);
            self.table.remove_provider(&binding.service_key, &binding.record);
            self.release_service_listener(&binding.service_key);
        }
        handle.current().unexport();
    }

    /// 尽力注销已注册的提供者描述符，失败只记日志。
    fn unregister_provider(&self, binding: &ExportBinding) {
        if !binding.record.is_registered() {
            return;
        }
        let registered = binding.record.registered_url();
        match self.registry_factory.get_registry(&binding.registry_url) {
            Ok(registry) => {
                if let Err(err) = registry.unregister(&registered) {
                    warn!(url = %registered, error = %err, "failed to unregister provider");
                }
            }
            Err(err) => {
                warn!(url = %registered, error = %err, "registry unavailable, provider stays registered");
            }
        }
        binding.record.set_registered(false);
    }

    /// 没有导出再使用该服务键时，移除服务级监听器并从配置中心解绑。
    fn release_service_listener(&self, service_key: &str) {
        let in_use = self
            .bounds
            .iter()
            .any(|entry| entry.value().service_key == service_key);
        if in_use {
            return;
        }
        if let Some((_, service)) = self.service_listeners.remove(service_key) {
            service.detach();
        }
    }

    fn override_url_with_config(
        &self,
        provider_url: &ServiceUrl,
        override_listener: &Arc<OverrideListener>,
    ) -> ServiceUrl {
        let mut url = provider_url.clone();
        if let Some(application) = &self.application_listener {
            url = application.apply(&url);
        }
        let service = self.service_listener_for(&provider_url.service_key());
        let weak: Weak<OverrideListener> = Arc::downgrade(override_listener);
        let observer: Weak<dyn OverrideObserver> = weak;
        service.add_observer(observer);
        service.apply(&url)
    }

    fn service_listener_for(&self, service_key: &str) -> Arc<ConfiguratorListener> {
        if let Some(existing) = self.service_listener(service_key) {
            return existing;
        }
        let created = ConfiguratorListener::service(
            service_key,
            self.options.config_group.clone(),
            Arc::clone(&self.dynamic_configuration),
        );
        let stored = Arc::clone(
            self.service_listeners
                .entry(service_key.to_owned())
                .or_insert_with(|| Arc::clone(&created))
                .value(),
        );
        if !Arc::ptr_eq(&stored, &created) {
            created.detach();
        }
        stored
    }

    fn do_local_export(
        &self,
        origin_invoker: &Arc<dyn Invoker>,
        provider_url: &ServiceUrl,
    ) -> Result<Arc<ExporterHandle>> {
        let origin_provider_url = provider_url_of(origin_invoker.url())?;
        let key = origin_provider_url.canonical_key();
        if let Some(existing) = self.bound(&key) {
            return Ok(existing);
        }

        let service_key = origin_provider_url.service_key();
        let delegate: Arc<dyn Invoker> = Arc::new(InvokerDelegate::new(
            Arc::clone(origin_invoker),
            provider_url.clone(),
            origin_provider_url,
        ));
        let exporter = self.protocol.export(delegate)?;
        let handle = Arc::new(ExporterHandle {
            key: key.clone(),
            service_key,
            origin_invoker: Arc::clone(origin_invoker),
            exporter: ArcSwap::from_pointee(exporter),
            binding: Mutex::new(None),
            unexported: AtomicBool::new(false),
            owner: self.self_ref.clone(),
        });
        Ok(Arc::clone(self.bounds.entry(key).or_insert(handle).value()))
    }

    /// 以新的有效地址替换本地导出。
    ///
    /// 只有注册中心可见描述符发生变化、且此前确实注册过时，才会注销旧描述符并注册新描述符。
    pub fn re_export(&self, origin_invoker: &Arc<dyn Invoker>, new_invoker_url: ServiceUrl) -> Result<()> {
        let origin_provider_url = provider_url_of(origin_invoker.url())?;
        let key = origin_provider_url.canonical_key();
        let Some(handle) = self.bound(&key) else {
            warn!(key = %key, "exporter not found, it may have been unexported");
            return Ok(());
        };

        let registry_url = registry_url_of(origin_invoker.url());
        let new_registered_url = registered_provider_url(&new_invoker_url, &registry_url);

        let delegate: Arc<dyn Invoker> = Arc::new(InvokerDelegate::new(
            Arc::clone(origin_invoker),
            new_invoker_url,
            origin_provider_url,
        ));
        handle.set_exporter(self.protocol.export(delegate)?);

        let Some(record) = handle.record() else {
            return Ok(());
        };
        let old_registered_url = record.registered_url();
        if *old_registered_url == new_registered_url {
            return Ok(());
        }
        if record.is_registered() {
            let registry = self.registry_factory.get_registry(&registry_url)?;
            if let Err(err) = registry.unregister(&old_registered_url) {
                warn!(url = %old_registered_url, error = %err, "failed to unregister stale provider url");
            }
            registry
                .register(&new_registered_url)
                .map_err(|err| RegistryError::registry("register", &new_registered_url, err))?;
        }
        info!(
            old = %old_registered_url,
            new = %new_registered_url,
            "registry-visible provider url changed"
        );
        record.set_registered_url(new_registered_url);
        Ok(())
    }

    /// 引用远端服务，返回已订阅的目录。
    ///
    /// `url` 为注册中心地址，`refer` 参数携带消费端引用参数。
    pub fn refer(&self, service_type: &str, url: &ServiceUrl) -> Result<Arc<ServiceDirectory>> {
        let registry_url = registry_url_of(url);
        let registry = self.registry_factory.get_registry(&registry_url)?;

        let mut builder = DirectoryBuilder::new(service_type, registry_url.clone())
            .registry(Arc::clone(&registry))
            .protocol(Arc::clone(&self.protocol))
            .cluster(Arc::clone(&self.cluster))
            .dynamic_configuration(
                Arc::clone(&self.dynamic_configuration),
                self.options.config_group.clone(),
            );
        if let Some(factory) = &self.router_factory {
            builder = builder.router_factory(Arc::clone(factory));
        }
        if let Some(application) = &self.application_listener {
            builder = builder.application_listener(Arc::clone(application));
        }
        let directory = builder.build()?;

        let mut parameters = directory.consumer_url().parameters().clone();
        let host = parameters.remove(REGISTER_IP_KEY).unwrap_or_default();
        let subscribe_url =
            ServiceUrl::new(CONSUMER_PROTOCOL, host, 0, service_type).with_parameters(parameters);

        let register = subscribe_url.service_interface() != ANY_VALUE
            && subscribe_url.bool_parameter(REGISTER_KEY, true);
        if register {
            directory.register_consumer(
                subscribe_url
                    .with_parameter(CATEGORY_KEY, CONSUMERS_CATEGORY)
                    .with_parameter(CHECK_KEY, "false"),
            )?;
        }
        directory.subscribe(subscribe_url.with_parameter(
            CATEGORY_KEY,
            format!("{PROVIDERS_CATEGORY},{CONFIGURATORS_CATEGORY},{ROUTERS_CATEGORY}"),
        ))?;

        self.table.register_consumer(
            directory.service_key(),
            Arc::new(ConsumerRecord::new(registry_url, subscribe_url, register)),
        );
        info!(service = %directory.service_key(), "service referred");
        Ok(directory)
    }

    /// 下线全部导出并解除应用级监听。
    pub fn destroy(&self) {
        for handle in self.exporters() {
            handle.unexport();
        }
        self.bounds.clear();
        if let Some(application) = &self.application_listener {
            application.remove_observer(&self.observer_ref());
            application.detach();
        }
    }

    fn schedule_close(&self, exporter: Arc<dyn Exporter>, key: &str) {
        let grace = self.options.server_shutdown_timeout();
        match &self.runtime {
            Some(runtime) => {
                let key = key.to_owned();
                runtime.spawn(async move {
                    tokio::time::sleep(grace).await;
                    exporter.unexport();
                    info!(key = %key, "exporter closed after shutdown grace period");
                });
            }
            None => {
                warn!(key = %key, "no async runtime available, closing exporter immediately");
                exporter.unexport();
            }
        }
    }

    fn observer_ref(&self) -> Weak<dyn OverrideObserver> {
        self.self_ref.clone()
    }
}

impl OverrideObserver for RegistryProtocol {
    fn on_overrides_changed(&self) {
        let listeners: Vec<Arc<OverrideListener>> = self
            .override_listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for listener in listeners {
            listener.do_override_if_necessary();
        }
    }
}

struct ExportBinding {
    registry_url: ServiceUrl,
    subscribe_url: ServiceUrl,
    service_key: String,
    record: Arc<ProviderRecord>,
}

/// 可热替换的导出句柄。
pub struct ExporterHandle {
    key: String,
    service_key: String,
    origin_invoker: Arc<dyn Invoker>,
    exporter: ArcSwap<Arc<dyn Exporter>>,
    binding: Mutex<Option<ExportBinding>>,
    unexported: AtomicBool,
    owner: Weak<RegistryProtocol>,
}

impl ExporterHandle {
    /// 导出缓存键：去掉 `dynamic`/`enabled` 后的提供者地址。
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn origin_invoker(&self) -> &Arc<dyn Invoker> {
        &self.origin_invoker
    }

    /// 当前对注册中心可见的描述符；尚未完成导出或已下线时为 `None`。
    pub fn registered_url(&self) -> Option<Arc<ServiceUrl>> {
        self.record().map(|record| record.registered_url())
    }

    pub fn subscribe_url(&self) -> Option<ServiceUrl> {
        self.binding
            .lock()
            .as_ref()
            .map(|binding| binding.subscribe_url.clone())
    }

    pub fn is_unexported(&self) -> bool {
        self.unexported.load(Ordering::Acquire)
    }

    fn current(&self) -> Arc<dyn Exporter> {
        let guard = self.exporter.load();
        Arc::clone(&**guard)
    }

    fn set_exporter(&self, exporter: Arc<dyn Exporter>) {
        self.exporter.store(Arc::new(exporter));
    }

    fn bind(&self, binding: ExportBinding) {
        *self.binding.lock() = Some(binding);
    }

    fn record(&self) -> Option<Arc<ProviderRecord>> {
        self.binding
            .lock()
            .as_ref()
            .map(|binding| Arc::clone(&binding.record))
    }
}

impl Exporter for ExporterHandle {
    fn invoker(&self) -> Arc<dyn Invoker> {
        self.current().invoker()
    }

    fn unexport(&self) {
        if self.unexported.swap(true, Ordering::AcqRel) {
            return;
        }
        let exporter = self.current();
        let Some(owner) = self.owner.upgrade() else {
            exporter.unexport();
            return;
        };
        owner.bounds.remove(&self.key);

        let binding = self.binding.lock().take();
        if let Some(binding) = binding {
            let listener = owner
                .override_listeners
                .remove(&binding.subscribe_url.to_string())
                .map(|(_, listener)| listener);
            owner.unregister_provider(&binding);
            if let Some(listener) = listener {
                let listener: Arc<dyn NotifyListener> = listener;
                match owner.registry_factory.get_registry(&binding.registry_url) {
                    Ok(registry) => {
                        if let Err(err) = registry.unsubscribe(&binding.subscribe_url, &listener) {
                            warn!(url = %binding.subscribe_url, error = %err, "failed to unsubscribe override listener");
                        }
                    }
                    Err(err) => {
                        warn!(url = %binding.registry_url, error = %err, "registry unavailable during unexport");
                    }
                }
            }
            owner.table.remove_provider(&binding.service_key, &binding.record);
            owner.release_service_listener(&binding.service_key);
        }

        info!(key = %self.key, "provider unexported, draining before close");
        owner.schedule_close(exporter, &self.key);
    }
}

/// 提供端覆盖规则监听器：每个导出一份。
pub struct OverrideListener {
    subscribe_url: ServiceUrl,
    origin_invoker: Arc<dyn Invoker>,
    configurators: ArcSwap<Vec<Configurator>>,
    lock: Mutex<()>,
    owner: Weak<RegistryProtocol>,
}

impl OverrideListener {
    pub fn subscribe_url(&self) -> &ServiceUrl {
        &self.subscribe_url
    }

    /// 注册中心推送的、与本导出匹配的覆盖规则。
    pub fn configurators(&self) -> Arc<Vec<Configurator>> {
        self.configurators.load_full()
    }

    /// 重新计算有效地址，变化时重新导出。
    ///
    /// 叠加顺序：原始提供者地址 → 本导出的推送规则 → 服务级 → 应用级。
    pub fn do_override_if_necessary(&self) {
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let _guard = self.lock.lock();

        let origin_url = match provider_url_of(self.origin_invoker.url()) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "origin invoker lost its provider url");
                return;
            }
        };
        let key = origin_url.canonical_key();
        let Some(exporter) = owner.bound(&key) else {
            warn!(key = %key, "exporter not found, override skipped");
            return;
        };
        let current_url = exporter.invoker().url().clone();

        let mut new_url = apply_configurators(&self.configurators.load(), &origin_url);
        if let Some(service) = owner.service_listener(&origin_url.service_key()) {
            new_url = service.apply(&new_url);
        }
        if let Some(application) = &owner.application_listener {
            new_url = application.apply(&new_url);
        }
        if current_url == new_url {
            return;
        }

        match owner.re_export(&self.origin_invoker, new_url.clone()) {
            Ok(()) => info!(old = %current_url, new = %new_url, "provider re-exported"),
            Err(err) => error!(url = %new_url, error = %err, "failed to re-export provider"),
        }
    }

    fn matched_urls(&self, urls: Vec<ServiceUrl>) -> Vec<ServiceUrl> {
        urls.into_iter()
            .filter(|url| {
                if url.parameter(CATEGORY_KEY).is_none() && url.protocol() == OVERRIDE_PROTOCOL {
                    let legacy = url.with_parameter(CATEGORY_KEY, CONFIGURATORS_CATEGORY);
                    is_match(&self.subscribe_url, &legacy)
                } else {
                    is_match(&self.subscribe_url, url)
                }
            })
            .collect()
    }
}

impl NotifyListener for OverrideListener {
    fn notify(&self, urls: Vec<ServiceUrl>) {
        let matched = self.matched_urls(urls);
        if matched.is_empty() {
            return;
        }
        let configurator_urls: Vec<ServiceUrl> = matched
            .into_iter()
            .filter(|url| is_configurator(url))
            .collect();
        if let Some(list) = to_configurators(&configurator_urls) {
            self.configurators.store(Arc::new(list));
        }
        self.do_override_if_necessary();
    }
}

impl OverrideObserver for OverrideListener {
    fn on_overrides_changed(&self) {
        self.do_override_if_necessary();
    }
}

/// 注册中心地址：`registry://` 以 `registry` 参数的值替换协议。
fn registry_url_of(url: &ServiceUrl) -> ServiceUrl {
    if url.protocol() != REGISTRY_PROTOCOL {
        return url.clone();
    }
    match url.parameter(REGISTRY_KEY).filter(|kind| !kind.is_empty()) {
        Some(kind) => url.with_protocol(kind).without_parameter(REGISTRY_KEY),
        None => url.without_parameter(REGISTRY_KEY),
    }
}

fn provider_url_of(url: &ServiceUrl) -> Result<ServiceUrl> {
    let raw = url.parameter(EXPORT_KEY).filter(|raw| !raw.is_empty()).ok_or_else(|| {
        RegistryError::Export {
            url: url.to_string(),
            detail: "missing `export` parameter".to_owned(),
        }
    })?;
    ServiceUrl::parse(raw)
}

/// 覆盖规则订阅地址。
pub fn override_subscribe_url(provider_url: &ServiceUrl) -> ServiceUrl {
    provider_url
        .with_protocol(PROVIDER_PROTOCOL)
        .with_parameter(CATEGORY_KEY, CONFIGURATORS_CATEGORY)
        .with_parameter(CHECK_KEY, "false")
}

/// 计算对注册中心可见的提供者描述符。
///
/// - 默认：去掉以 `.` 开头的隐藏参数以及监控、绑定、运维端口等本地参数；
/// - 注册中心地址带 `simplified=true` 时：只保留默认白名单、`extra-keys` 声明的参数与
///   `<method>.` 前缀的方法级参数；路径与接口名不一致时保留 `interface`。
pub fn registered_provider_url(provider_url: &ServiceUrl, registry_url: &ServiceUrl) -> ServiceUrl {
    if !registry_url.bool_parameter(SIMPLIFIED_KEY, false) {
        let hidden: Vec<&str> = provider_url
            .parameters()
            .keys()
            .filter(|key| key.starts_with('.'))
            .map(String::as_str)
            .collect();
        return provider_url.without_parameters(hidden.into_iter().chain(REGISTRY_FILTERED_KEYS));
    }

    let mut extra: Vec<&str> = registry_url
        .parameter(EXTRA_KEYS_KEY)
        .map(|raw| split_list(raw).collect())
        .unwrap_or_default();
    if provider_url.parameter(INTERFACE_KEY).is_some_and(|interface| interface != provider_url.path()) {
        extra.push(INTERFACE_KEY);
    }
    let methods: Vec<&str> = provider_url
        .parameter(METHODS_KEY)
        .map(|raw| split_list(raw).collect())
        .unwrap_or_default();

    let kept: Vec<(String, String)> = provider_url
        .parameters()
        .iter()
        .filter(|(key, _)| {
            let key = key.as_str();
            DEFAULT_REGISTER_PROVIDER_KEYS.contains(&key)
                || extra.contains(&key)
                || methods.iter().any(|method| {
                    key.strip_prefix(method)
                        .is_some_and(|rest| rest.starts_with('.'))
                })
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    provider_url.with_cleared_parameters().with_parameters(kept)
}
