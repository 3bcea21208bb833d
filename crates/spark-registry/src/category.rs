//! 注册中心推送的分类判定。

use std::fmt;

use crate::constants::{
    APP_DYNAMIC_CONFIGURATORS_CATEGORY, CONFIGURATORS_CATEGORY, DYNAMIC_CONFIGURATORS_CATEGORY,
    OVERRIDE_PROTOCOL, PROVIDERS_CATEGORY, ROUTE_PROTOCOL, ROUTERS_CATEGORY,
};
use crate::url::ServiceUrl;

/// 推送记录所属的类别。
///
/// - **意图（Why）**：同一次推送可能同时携带提供者、路由与覆盖规则，目录需要先分桶再分别处理；
/// - **契约（What）**：类别由协议嗅探优先决定（`override://`、`route://`），其次看 `category` 参数，
///   缺省视为提供者。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Providers,
    Routers,
    Configurators,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Providers => PROVIDERS_CATEGORY,
            Category::Routers => ROUTERS_CATEGORY,
            Category::Configurators => CONFIGURATORS_CATEGORY,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_configurator(url: &ServiceUrl) -> bool {
    url.protocol() == OVERRIDE_PROTOCOL
        || matches!(
            url.category(),
            CONFIGURATORS_CATEGORY | DYNAMIC_CONFIGURATORS_CATEGORY | APP_DYNAMIC_CONFIGURATORS_CATEGORY
        )
}

pub fn is_route(url: &ServiceUrl) -> bool {
    url.protocol() == ROUTE_PROTOCOL || url.category() == ROUTERS_CATEGORY
}

pub fn is_provider(url: &ServiceUrl) -> bool {
    url.protocol() != OVERRIDE_PROTOCOL
        && url.protocol() != ROUTE_PROTOCOL
        && url.category() == PROVIDERS_CATEGORY
}

/// 对单条记录分类；无法识别的类别返回 `None`，由调用方记录告警后丢弃。
pub fn classify(url: &ServiceUrl) -> Option<Category> {
    if is_configurator(url) {
        Some(Category::Configurators)
    } else if is_route(url) {
        Some(Category::Routers)
    } else if is_provider(url) {
        Some(Category::Providers)
    } else {
        None
    }
}
