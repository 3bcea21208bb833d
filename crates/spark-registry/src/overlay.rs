//! 配置覆盖层：应用级与服务级两个作用域的覆盖规则监听器。
//!
//! # 教案式说明
//! - **意图（Why）**：覆盖规则除了随注册中心推送，还会由动态配置中心按“应用”“服务”两个维度下发；
//!   两者独立订阅、独立更新，再按固定优先级叠加到地址描述符上；
//! - **逻辑（How）**：
//!   1. 监听器构造时向配置中心注册自身，并立即拉取一次当前规则，保证启动状态正确；
//!   2. 变更事件到来时，删除事件清空规则；其余事件解析载荷，解析成功才替换；
//!   3. 替换后回调所有仍存活的观察者（服务目录或注册协议），由其重新对账；
//! - **契约（What）**：观察者以 [`Weak`] 持有，监听器不延长其生命周期；规则列表以 [`ArcSwap`]
//!   发布，读取方永远拿到完整快照。

use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::configurator::{Configurator, apply_configurators, parse_configurators};
use crate::constants::CONFIGURATORS_SUFFIX;
use crate::dynamic_config::{
    ConfigChangeType, ConfigChangedEvent, ConfigurationListener, DynamicConfiguration,
};
use crate::url::ServiceUrl;

/// 覆盖规则变化的回调方。
pub trait OverrideObserver: Send + Sync + 'static {
    /// 规则已替换；实现方应以当前缓存的描述符重新应用覆盖层。
    fn on_overrides_changed(&self);
}

/// 监听器作用域。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverrideScope {
    Application,
    Service,
}

/// 单个作用域的覆盖规则监听器。
pub struct ConfiguratorListener {
    scope: OverrideScope,
    key: String,
    group: String,
    configurators: ArcSwap<Vec<Configurator>>,
    observers: Mutex<Vec<Weak<dyn OverrideObserver>>>,
    dynamic_configuration: Arc<dyn DynamicConfiguration>,
}

impl ConfiguratorListener {
    /// 应用级监听器，配置键为 `<application>.configurators`。
    pub fn application(
        application: &str,
        group: impl Into<String>,
        dynamic_configuration: Arc<dyn DynamicConfiguration>,
    ) -> Arc<Self> {
        Self::init(
            OverrideScope::Application,
            format!("{application}{CONFIGURATORS_SUFFIX}"),
            group.into(),
            dynamic_configuration,
        )
    }

    /// 服务级监听器，配置键为 `<service_key>.configurators`。
    pub fn service(
        service_key: &str,
        group: impl Into<String>,
        dynamic_configuration: Arc<dyn DynamicConfiguration>,
    ) -> Arc<Self> {
        Self::init(
            OverrideScope::Service,
            format!("{service_key}{CONFIGURATORS_SUFFIX}"),
            group.into(),
            dynamic_configuration,
        )
    }

    fn init(
        scope: OverrideScope,
        key: String,
        group: String,
        dynamic_configuration: Arc<dyn DynamicConfiguration>,
    ) -> Arc<Self> {
        let listener = Arc::new(Self {
            scope,
            key,
            group,
            configurators: ArcSwap::from_pointee(Vec::new()),
            observers: Mutex::new(Vec::new()),
            dynamic_configuration: Arc::clone(&dynamic_configuration),
        });

        let registered: Arc<dyn ConfigurationListener> = listener.clone();
        dynamic_configuration.add_listener(&listener.key, &listener.group, registered);

        match dynamic_configuration.get_config(&listener.key, &listener.group) {
            Ok(Some(raw)) => {
                if let Err(err) = listener.replace_from_raw(&raw) {
                    warn!(
                        key = %listener.key,
                        error = %err,
                        "initial configurator rule is invalid, starting with no overrides"
                    );
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    key = %listener.key,
                    error = %err,
                    "failed to pull initial configurator rule"
                );
            }
        }
        listener
    }

    pub fn scope(&self) -> OverrideScope {
        self.scope
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 当前规则快照。
    pub fn configurators(&self) -> Arc<Vec<Configurator>> {
        self.configurators.load_full()
    }

    /// 将本作用域的规则应用到描述符上。
    pub fn apply(&self, url: &ServiceUrl) -> ServiceUrl {
        apply_configurators(&self.configurators.load(), url)
    }

    pub fn add_observer(&self, observer: Weak<dyn OverrideObserver>) {
        let mut observers = self.observers.lock();
        observers.retain(|existing| existing.strong_count() > 0);
        if !observers.iter().any(|existing| Weak::ptr_eq(existing, &observer)) {
            observers.push(observer);
        }
    }

    pub fn remove_observer(&self, observer: &Weak<dyn OverrideObserver>) {
        self.observers
            .lock()
            .retain(|existing| existing.strong_count() > 0 && !Weak::ptr_eq(existing, observer));
    }

    /// 从配置中心注销自身。
    pub fn detach(self: &Arc<Self>) {
        let registered: Arc<dyn ConfigurationListener> = self.clone();
        self.dynamic_configuration
            .remove_listener(&self.key, &self.group, &registered);
    }

    fn replace_from_raw(&self, raw: &str) -> crate::error::Result<()> {
        let configurators = parse_configurators(raw)?;
        debug!(key = %self.key, count = configurators.len(), "configurator rule loaded");
        self.configurators.store(Arc::new(configurators));
        Ok(())
    }

    fn notify_observers(&self) {
        let live: Vec<Arc<dyn OverrideObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|observer| observer.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            observer.on_overrides_changed();
        }
    }
}

impl ConfigurationListener for ConfiguratorListener {
    fn process(&self, event: &ConfigChangedEvent) {
        if event.key != self.key {
            return;
        }
        info!(
            key = %event.key,
            change = ?event.change_type,
            "configurator rule changed"
        );

        if event.change_type == ConfigChangeType::Deleted {
            self.configurators.store(Arc::new(Vec::new()));
        } else if let Err(err) = self.replace_from_raw(event.content.as_deref().unwrap_or_default())
        {
            warn!(
                key = %event.key,
                error = %err,
                "failed to parse configurator rule, keeping previous overrides"
            );
            return;
        }

        self.notify_observers();
    }
}

/// 应用级与服务级监听器的组合视图。
///
/// 叠加顺序为“先应用级、后服务级”，服务级在冲突时胜出。应用级监听器由宿主显式构造并共享，
/// 不使用进程级全局变量。
#[derive(Clone, Default)]
pub struct ConfiguratorOverlay {
    application: Option<Arc<ConfiguratorListener>>,
    service: Option<Arc<ConfiguratorListener>>,
}

impl ConfiguratorOverlay {
    pub fn new(
        application: Option<Arc<ConfiguratorListener>>,
        service: Option<Arc<ConfiguratorListener>>,
    ) -> Self {
        Self {
            application,
            service,
        }
    }

    pub fn application(&self) -> Option<&Arc<ConfiguratorListener>> {
        self.application.as_ref()
    }

    pub fn service(&self) -> Option<&Arc<ConfiguratorListener>> {
        self.service.as_ref()
    }

    pub fn apply(&self, url: &ServiceUrl) -> ServiceUrl {
        let mut url = url.clone();
        if let Some(application) = &self.application {
            url = application.apply(&url);
        }
        if let Some(service) = &self.service {
            url = service.apply(&url);
        }
        url
    }

    /// 同时向两个作用域登记观察者。
    pub fn add_observer(&self, observer: Weak<dyn OverrideObserver>) {
        if let Some(application) = &self.application {
            application.add_observer(observer.clone());
        }
        if let Some(service) = &self.service {
            service.add_observer(observer);
        }
    }

    /// 解除观察者；服务级监听器属于当前持有者，一并从配置中心注销。
    pub fn detach(&self, observer: &Weak<dyn OverrideObserver>) {
        if let Some(application) = &self.application {
            application.remove_observer(observer);
        }
        if let Some(service) = &self.service {
            service.remove_observer(observer);
            service.detach();
        }
    }
}
