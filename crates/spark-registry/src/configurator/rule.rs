//! 覆盖规则载荷解析：TOML 规则文档 → `override://` 地址描述符 → [`Configurator`] 列表。
//!
//! 规则文档示例：
//!
//! ```toml
//! scope = "service"
//! key = "blue/Greeter:1.0"
//! config_version = "v2.7"
//!
//! [[configs]]
//! side = "consumer"
//! addresses = ["0.0.0.0"]
//! [configs.parameters]
//! timeout = "6000"
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{Configurator, to_configurators};
use crate::constants::{
    ANY_VALUE, ANYHOST_VALUE, APP_DYNAMIC_CONFIGURATORS_CATEGORY, APPLICATION_KEY, CATEGORY_KEY,
    CONFIG_VERSION_KEY, DYNAMIC_CONFIGURATORS_CATEGORY, ENABLED_KEY, GROUP_KEY,
    OVERRIDE_PROTOCOL, OVERRIDE_PROVIDERS_KEY, SIDE_KEY, VERSION_KEY,
};
use crate::error::{RegistryError, Result};
use crate::url::ServiceUrl;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RuleScope {
    Application,
    Service,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfiguratorRule {
    scope: RuleScope,
    key: String,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(default)]
    config_version: Option<String>,
    #[serde(default)]
    configs: Vec<ConfigItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigItem {
    side: Option<String>,
    addresses: Vec<String>,
    provider_addresses: Vec<String>,
    applications: Vec<String>,
    services: Vec<String>,
    enabled: Option<bool>,
    parameters: BTreeMap<String, String>,
}

fn enabled_by_default() -> bool {
    true
}

/// 解析原始规则载荷。
///
/// - 空白载荷视为“没有规则”，返回空列表；
/// - TOML 语法错误、缺少 `key` 或地址非法时返回 [`RegistryError::ConfiguratorParse`]，
///   调用方据此保留旧列表。
pub fn parse_configurators(raw: &str) -> Result<Vec<Configurator>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let rule: ConfiguratorRule = toml::from_str(raw).map_err(|err| parse_error(err.to_string()))?;
    if rule.key.trim().is_empty() {
        return Err(parse_error("rule `key` must not be empty"));
    }

    let mut urls = Vec::new();
    for item in &rule.configs {
        match rule.scope {
            RuleScope::Service => service_item_to_urls(&rule, item, &mut urls)?,
            RuleScope::Application => app_item_to_urls(&rule, item, &mut urls)?,
        }
    }
    Ok(to_configurators(&urls).unwrap_or_default())
}

fn service_item_to_urls(
    rule: &ConfiguratorRule,
    item: &ConfigItem,
    urls: &mut Vec<ServiceUrl>,
) -> Result<()> {
    for address in addresses(item) {
        let base = with_service(override_url(address)?, &rule.key);
        let base = with_item_parameters(base, rule, item, DYNAMIC_CONFIGURATORS_CATEGORY);
        if item.applications.is_empty() {
            urls.push(base);
        } else {
            urls.extend(
                item.applications
                    .iter()
                    .map(|application| base.with_parameter(APPLICATION_KEY, application.as_str())),
            );
        }
    }
    Ok(())
}

fn app_item_to_urls(
    rule: &ConfiguratorRule,
    item: &ConfigItem,
    urls: &mut Vec<ServiceUrl>,
) -> Result<()> {
    let any_service = [ANY_VALUE.to_owned()];
    let services = if item.services.is_empty() {
        &any_service[..]
    } else {
        &item.services[..]
    };
    for address in addresses(item) {
        let base = override_url(address)?;
        for service in services {
            let url = with_item_parameters(
                with_service(base.clone(), service),
                rule,
                item,
                APP_DYNAMIC_CONFIGURATORS_CATEGORY,
            )
            .with_parameter(APPLICATION_KEY, rule.key.as_str());
            urls.push(url);
        }
    }
    Ok(())
}

fn addresses(item: &ConfigItem) -> impl Iterator<Item = &str> {
    let fallback = item.addresses.is_empty().then_some(ANYHOST_VALUE);
    item.addresses.iter().map(String::as_str).chain(fallback)
}

fn override_url(address: &str) -> Result<ServiceUrl> {
    ServiceUrl::parse(&format!("{OVERRIDE_PROTOCOL}://{address}"))
        .map_err(|err| parse_error(format!("invalid address `{address}`: {err}")))
}

/// 将 `group/interface:version` 拆解为路径与分组、版本参数。
fn with_service(url: ServiceUrl, service_key: &str) -> ServiceUrl {
    let (group, rest) = match service_key.split_once('/') {
        Some((group, rest)) => (Some(group), rest),
        None => (None, service_key),
    };
    let (interface, version) = match rest.split_once(':') {
        Some((interface, version)) => (interface, Some(version)),
        None => (rest, None),
    };
    let mut url = url.with_path(interface);
    if let Some(group) = group.filter(|group| !group.is_empty()) {
        url = url.with_parameter(GROUP_KEY, group);
    }
    if let Some(version) = version.filter(|version| !version.is_empty()) {
        url = url.with_parameter(VERSION_KEY, version);
    }
    url
}

fn with_item_parameters(
    url: ServiceUrl,
    rule: &ConfiguratorRule,
    item: &ConfigItem,
    category: &str,
) -> ServiceUrl {
    let mut url = url.with_parameter(CATEGORY_KEY, category);
    if let Some(side) = &item.side {
        url = url.with_parameter(SIDE_KEY, side.as_str());
    }
    url = url.with_parameters(item.parameters.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    if !item.provider_addresses.is_empty() {
        url = url.with_parameter(OVERRIDE_PROVIDERS_KEY, item.provider_addresses.join(","));
    }
    let enabled = rule.enabled && item.enabled.unwrap_or(true);
    url = url.with_parameter(ENABLED_KEY, enabled.to_string());
    if let Some(version) = &rule.config_version {
        url = url.with_parameter(CONFIG_VERSION_KEY, version.as_str());
    }
    url
}

fn parse_error(detail: impl Into<String>) -> RegistryError {
    RegistryError::ConfiguratorParse {
        detail: detail.into(),
    }
}
