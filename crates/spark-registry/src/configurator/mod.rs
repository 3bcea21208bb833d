//! 覆盖规则（Configurator）：匹配谓词 + 参数补丁。
//!
//! # 教案式说明
//! - **意图（Why）**：治理平台通过覆盖规则在不重启的前提下调整超时、权重、禁用等参数，
//!   规则本身也以地址描述符表达（`override://` 或 `absent://`）；
//! - **逻辑（How）**：
//!   1. 先判定规则是否启用、主机/端口/应用/条件键是否命中目标；
//!   2. 命中后剔除条件键，剩余参数作为补丁写入目标（`Override` 覆盖，`Absent` 仅补缺）；
//!   3. 多条规则按主机、优先级排序后左折叠应用，后者看见前者的改写；
//! - **契约（What）**：[`to_configurators`] 对空输入返回 `None`，调用方据此保留旧列表。

pub mod rule;

use std::cmp::Ordering;

use crate::constants::{
    ABSENT_PROTOCOL, ANY_VALUE, ANYHOST_KEY, ANYHOST_VALUE, APPLICATION_KEY, CATEGORY_KEY,
    CHECK_KEY, COMPATIBLE_CONFIG_KEY, CONFIG_VERSION_KEY, CONSUMER_SIDE, DYNAMIC_KEY,
    EMPTY_PROTOCOL, ENABLED_KEY, GROUP_KEY, INTERFACES_KEY, OVERRIDE_PROVIDERS_KEY, PRIORITY_KEY,
    PROVIDER_SIDE, REGISTER_IP_KEY, SIDE_KEY, VERSION_KEY,
};
use crate::url::ServiceUrl;

pub use rule::parse_configurators;

/// 补丁的写入方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfiguratorKind {
    /// 覆盖同名参数。
    Override,
    /// 仅在目标缺少该参数时写入。
    Absent,
}

/// 单条覆盖规则。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configurator {
    url: ServiceUrl,
    kind: ConfiguratorKind,
}

impl Configurator {
    /// 由规则地址构造；`absent://` 协议映射为 [`ConfiguratorKind::Absent`]，其余均视为覆盖。
    pub fn new(url: ServiceUrl) -> Self {
        let kind = if url.protocol() == ABSENT_PROTOCOL {
            ConfiguratorKind::Absent
        } else {
            ConfiguratorKind::Override
        };
        Self { url, kind }
    }

    pub fn url(&self) -> &ServiceUrl {
        &self.url
    }

    pub fn kind(&self) -> ConfiguratorKind {
        self.kind
    }

    fn priority(&self) -> i64 {
        self.url.int_parameter(PRIORITY_KEY, 0)
    }

    /// 将规则应用到目标地址；未命中时原样返回。
    ///
    /// # 逻辑解析（How）
    /// - 规则被禁用或缺少主机时直接跳过；
    /// - 携带 `configVersion` 的规则按“同侧匹配”：消费端规则（端口为 0）对照消费端注册地址
    ///   `register.ip`，提供端规则要求端口为 0 或与目标一致；
    /// - 旧格式规则：端口非 0 时按端口匹配提供者；端口为 0 时，消费端目标对照 `register.ip`，
    ///   通配主机的规则作用于所有提供者。
    pub fn configure(&self, url: &ServiceUrl) -> ServiceUrl {
        if !self.url.bool_parameter(ENABLED_KEY, true) || self.url.host().is_empty() {
            return url.clone();
        }
        if url.host().is_empty() {
            return url.clone();
        }

        if self.url.has_parameter(CONFIG_VERSION_KEY) {
            let current_side = url.side();
            let rule_side = self.url.side();
            if current_side.is_some() && current_side == rule_side {
                if rule_side == Some(CONSUMER_SIDE) && self.url.port() == 0 {
                    return self.configure_if_match(consumer_host(url), url);
                }
                if rule_side == Some(PROVIDER_SIDE)
                    && (self.url.port() == 0 || self.url.port() == url.port())
                {
                    return self.configure_if_match(url.host(), url);
                }
            }
            return url.clone();
        }

        self.configure_deprecated(url)
    }

    fn configure_deprecated(&self, url: &ServiceUrl) -> ServiceUrl {
        if self.url.port() != 0 {
            if url.port() == self.url.port() {
                return self.configure_if_match(url.host(), url);
            }
        } else if url.parameter_or(SIDE_KEY, PROVIDER_SIDE) == CONSUMER_SIDE {
            return self.configure_if_match(consumer_host(url), url);
        } else if self.url.host() == ANYHOST_VALUE {
            return self.configure_if_match(ANYHOST_VALUE, url);
        }
        url.clone()
    }

    fn configure_if_match(&self, host: &str, url: &ServiceUrl) -> ServiceUrl {
        if self.url.host() != ANYHOST_VALUE && self.url.host() != host {
            return url.clone();
        }

        if let Some(providers) = self.url.parameter(OVERRIDE_PROVIDERS_KEY) {
            if !providers.is_empty()
                && !providers.contains(&url.address())
                && !providers.contains(ANYHOST_VALUE)
            {
                return url.clone();
            }
        }

        let rule_application = self.url.application();
        if let Some(application) = rule_application {
            if application != ANY_VALUE && Some(application) != url.application() {
                return url.clone();
            }
        }

        let mut condition_keys = vec![
            CATEGORY_KEY,
            CHECK_KEY,
            DYNAMIC_KEY,
            ENABLED_KEY,
            GROUP_KEY,
            VERSION_KEY,
            APPLICATION_KEY,
            SIDE_KEY,
            CONFIG_VERSION_KEY,
            COMPATIBLE_CONFIG_KEY,
            INTERFACES_KEY,
            OVERRIDE_PROVIDERS_KEY,
            ANYHOST_KEY,
        ];
        for (key, value) in self.url.parameters() {
            let conditional = key.starts_with('~') || key == APPLICATION_KEY || key == SIDE_KEY;
            if !conditional {
                continue;
            }
            condition_keys.push(key.as_str());
            let target_key = key.strip_prefix('~').unwrap_or(key);
            if value != ANY_VALUE && Some(value.as_str()) != url.parameter(target_key) {
                return url.clone();
            }
        }

        let patch = self.url.without_parameters(condition_keys);
        match self.kind {
            ConfiguratorKind::Override => url.with_parameters(
                patch
                    .parameters()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone())),
            ),
            ConfiguratorKind::Absent => url.with_parameters_if_absent(
                patch
                    .parameters()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone())),
            ),
        }
    }
}

/// 消费端注册地址；缺失时返回空串，只有通配主机的规则能命中。
fn consumer_host(url: &ServiceUrl) -> &str {
    url.parameter(REGISTER_IP_KEY).unwrap_or("")
}

impl Ord for Configurator {
    fn cmp(&self, other: &Self) -> Ordering {
        self.url
            .host()
            .cmp(other.url.host())
            .then_with(|| self.priority().cmp(&other.priority()))
    }
}

impl PartialOrd for Configurator {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 将规则地址转换为排好序的覆盖规则列表。
///
/// - 输入为空：返回 `None`，调用方保留旧列表；
/// - 出现 `empty://`：返回空列表，表示清除全部规则；
/// - 某条规则除 `anyhost` 外没有任何参数：清空此前累积的规则。
pub fn to_configurators(urls: &[ServiceUrl]) -> Option<Vec<Configurator>> {
    if urls.is_empty() {
        return None;
    }

    let mut configurators = Vec::with_capacity(urls.len());
    for url in urls {
        if url.protocol() == EMPTY_PROTOCOL {
            configurators.clear();
            break;
        }
        let has_patch = url.parameters().keys().any(|key| key != ANYHOST_KEY);
        if !has_patch {
            configurators.clear();
            continue;
        }
        configurators.push(Configurator::new(url.clone()));
    }
    configurators.sort();
    Some(configurators)
}

/// 依次应用规则（左折叠）。
pub fn apply_configurators(configurators: &[Configurator], url: &ServiceUrl) -> ServiceUrl {
    configurators
        .iter()
        .fold(url.clone(), |current, configurator| configurator.configure(&current))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> ServiceUrl {
        ServiceUrl::parse(raw).expect("valid url")
    }

    fn provider() -> ServiceUrl {
        url("spark://10.0.0.1:20880/Greeter?side=provider&timeout=1000&application=demo")
    }

    #[test]
    fn anyhost_override_rewrites_provider_parameters() {
        let configurator =
            Configurator::new(url("override://0.0.0.0/Greeter?category=configurators&timeout=5000"));
        let configured = configurator.configure(&provider());
        assert_eq!(configured.parameter("timeout"), Some("5000"));
        assert_eq!(configured.parameter("category"), None);
    }

    #[test]
    fn absent_only_fills_missing_keys() {
        let configurator =
            Configurator::new(url("absent://0.0.0.0/Greeter?timeout=5000&weight=200"));
        let configured = configurator.configure(&provider());
        assert_eq!(configured.parameter("timeout"), Some("1000"));
        assert_eq!(configured.parameter("weight"), Some("200"));
    }

    #[test]
    fn port_specific_rule_ignores_other_providers() {
        let configurator = Configurator::new(url("override://10.0.0.1:20881/Greeter?timeout=9"));
        assert_eq!(configurator.configure(&provider()), provider());
    }

    #[test]
    fn application_and_tilde_conditions_must_match() {
        let other_app =
            Configurator::new(url("override://0.0.0.0/Greeter?application=billing&timeout=9"));
        assert_eq!(other_app.configure(&provider()), provider());

        let tilde_miss = Configurator::new(url("override://0.0.0.0/Greeter?~timeout=2000&weight=1"));
        assert_eq!(tilde_miss.configure(&provider()), provider());

        let tilde_hit = Configurator::new(url("override://0.0.0.0/Greeter?~timeout=1000&weight=1"));
        let configured = tilde_hit.configure(&provider());
        assert_eq!(configured.parameter("weight"), Some("1"));
        assert_eq!(configured.parameter("~timeout"), None);
    }

    #[test]
    fn disabled_rule_is_ignored() {
        let configurator =
            Configurator::new(url("override://0.0.0.0/Greeter?enabled=false&timeout=9"));
        assert_eq!(configurator.configure(&provider()), provider());
    }

    #[test]
    fn consumer_rule_matches_register_ip() {
        let consumer_view = provider()
            .with_parameter(SIDE_KEY, CONSUMER_SIDE)
            .with_parameter(REGISTER_IP_KEY, "10.9.9.9");
        let targeted = Configurator::new(url("override://10.9.9.9/Greeter?timeout=7"));
        let elsewhere = Configurator::new(url("override://10.8.8.8/Greeter?timeout=8"));
        assert_eq!(
            targeted.configure(&consumer_view).parameter("timeout"),
            Some("7")
        );
        assert_eq!(elsewhere.configure(&consumer_view), consumer_view);
    }

    #[test]
    fn versioned_rule_requires_same_side() {
        let rule = Configurator::new(url(
            "override://0.0.0.0/Greeter?configVersion=v2.7&side=consumer&timeout=3",
        ));
        assert_eq!(rule.configure(&provider()), provider());
        let consumer_view = provider().with_parameter(SIDE_KEY, CONSUMER_SIDE);
        assert_eq!(
            rule.configure(&consumer_view).parameter("timeout"),
            Some("3")
        );
    }

    #[test]
    fn to_configurators_handles_empty_and_clear_markers() {
        assert!(to_configurators(&[]).is_none());

        let cleared = to_configurators(&[
            url("override://0.0.0.0/Greeter?timeout=1"),
            url("empty://0.0.0.0/Greeter?category=configurators"),
        ])
        .expect("some");
        assert!(cleared.is_empty());

        let sorted = to_configurators(&[
            url("override://10.0.0.1/Greeter?timeout=1"),
            url("override://0.0.0.0/Greeter?timeout=2"),
        ])
        .expect("some");
        assert_eq!(sorted[0].url().host(), "0.0.0.0");
        assert_eq!(sorted[1].url().host(), "10.0.0.1");
    }

    #[test]
    fn later_configurators_see_earlier_rewrites() {
        let list = to_configurators(&[
            url("override://0.0.0.0/Greeter?timeout=2000&priority=1"),
            url("override://0.0.0.0/Greeter?~timeout=2000&weight=50&priority=2"),
        ])
        .expect("some");
        let configured = apply_configurators(&list, &provider());
        assert_eq!(configured.parameter("timeout"), Some("2000"));
        assert_eq!(configured.parameter("weight"), Some("50"));
    }
}
