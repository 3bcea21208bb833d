//! 地址描述符：服务、提供者与覆盖规则共同使用的结构化端点身份。
//!
//! # 教案式说明
//! - **意图（Why）**：注册中心推送的每一条记录都是一个地址描述符；目录对账、覆盖规则匹配与缓存键计算
//!   都以它为最小单元，因此需要一个不可变、可比较、字符串形式稳定的值类型；
//! - **契约（What）**：[`ServiceUrl`] 的所有“修改”方法均返回新实例；参数表使用 [`BTreeMap`]，
//!   保证 `Display` 输出按键排序，从而可直接作为缓存键；
//! - **风险（Trade-offs）**：`BTreeMap` 的插入为 `O(log n)`，在推送频繁的场景略慢于 `HashMap`，
//!   但换来稳定的序列化与 diff 结果。

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::constants::{
    ANY_VALUE, APPLICATION_KEY, CATEGORY_KEY, CLASSIFIER_KEY, COMMA_SEPARATOR, DEFAULT_CATEGORY,
    DYNAMIC_KEY, ENABLED_KEY, GROUP_KEY, INTERFACE_KEY, SIDE_KEY, VERSION_KEY,
};
use crate::error::{RegistryError, Result};

/// 不可变的地址描述符。
///
/// # 契约说明（What）
/// - `protocol`：协议/方案，例如 `spark`、`empty`、`override`；
/// - `host`/`port`：端点地址，`port == 0` 表示未指定；
/// - `path`：服务路径，通常等于接口名；
/// - `parameters`：键唯一的字符串参数表。
/// - **后置条件**：相同 `Display` 字符串的两个实例视为同一逻辑端点。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceUrl {
    protocol: String,
    username: Option<String>,
    password: Option<String>,
    host: String,
    port: u16,
    path: String,
    parameters: BTreeMap<String, String>,
}

impl ServiceUrl {
    /// 构造不带参数的描述符。
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            username: None,
            password: None,
            host: host.into(),
            port,
            path: path.into().trim_start_matches('/').to_owned(),
            parameters: BTreeMap::new(),
        }
    }

    /// 解析 `protocol://[user[:pass]@]host[:port][/path][?k=v&...]` 形式的字符串。
    ///
    /// - 参数键与值会做百分号解码，与 [`fmt::Display`] 的编码互逆；
    /// - 缺少 `://`、协议为空或端口非法时返回 [`RegistryError::MalformedUrl`]。
    pub fn parse(input: &str) -> Result<Self> {
        let malformed = |reason: &str| RegistryError::MalformedUrl {
            input: input.to_owned(),
            reason: reason.to_owned(),
        };

        let trimmed = input.trim();
        let (protocol, rest) = trimmed
            .split_once("://")
            .ok_or_else(|| malformed("missing `://` separator"))?;
        if protocol.is_empty() {
            return Err(malformed("protocol is empty"));
        }

        let (body, query) = match rest.split_once('?') {
            Some((body, query)) => (body, Some(query)),
            None => (rest, None),
        };
        let (authority, path) = match body.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (body, ""),
        };

        let (userinfo, hostport) = match authority.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, authority),
        };
        let (username, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, pass)) => (Some(user.to_owned()), Some(pass.to_owned())),
                None => (Some(info.to_owned()), None),
            },
            None => (None, None),
        };

        let (host, port) = match hostport.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| malformed("port is not a valid u16"))?;
                (host, port)
            }
            Some((host, _)) => (host, 0),
            None => (hostport, 0),
        };

        let parameters = query.map(parse_query).transpose()?.unwrap_or_default();

        Ok(Self {
            protocol: protocol.to_owned(),
            username,
            password,
            host: host.to_owned(),
            port,
            path: path.to_owned(),
            parameters,
        })
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` 形式的地址；端口未指定时只返回主机。
    pub fn address(&self) -> String {
        if self.port == 0 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// 读取参数，空值与缺失均回落到 `default`。
    pub fn parameter_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.parameter(key) {
            Some(value) if !value.is_empty() => value,
            _ => default,
        }
    }

    pub fn has_parameter(&self, key: &str) -> bool {
        self.parameter(key).is_some_and(|value| !value.is_empty())
    }

    /// 以布尔语义读取参数；无法识别的取值回落到 `default`。
    pub fn bool_parameter(&self, key: &str, default: bool) -> bool {
        match self.parameter(key) {
            Some("true") => true,
            Some("false") => false,
            _ => default,
        }
    }

    pub fn int_parameter(&self, key: &str, default: i64) -> i64 {
        self.parameter(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }

    /// 服务接口名：优先取 `interface` 参数，缺省回落到路径。
    pub fn service_interface(&self) -> &str {
        self.parameter_or(INTERFACE_KEY, &self.path)
    }

    pub fn group(&self) -> Option<&str> {
        self.parameter(GROUP_KEY).filter(|group| !group.is_empty())
    }

    pub fn version(&self) -> Option<&str> {
        self.parameter(VERSION_KEY)
            .filter(|version| !version.is_empty())
    }

    pub fn application(&self) -> Option<&str> {
        self.parameter(APPLICATION_KEY)
            .filter(|application| !application.is_empty())
            .or(self.username.as_deref())
    }

    pub fn side(&self) -> Option<&str> {
        self.parameter(SIDE_KEY)
    }

    pub fn category(&self) -> &str {
        self.parameter_or(CATEGORY_KEY, DEFAULT_CATEGORY)
    }

    /// `group/interface:version` 形式的服务键，空片段省略。
    pub fn service_key(&self) -> String {
        let interface = self.service_interface();
        let mut key = String::with_capacity(interface.len() + 16);
        if let Some(group) = self.group() {
            key.push_str(group);
            key.push('/');
        }
        key.push_str(interface);
        if let Some(version) = self.version() {
            key.push(':');
            key.push_str(version);
        }
        key
    }

    /// 规范缓存键：去掉 `dynamic` 与 `enabled` 元参数后的完整字符串。
    pub fn canonical_key(&self) -> String {
        self.without_parameters([DYNAMIC_KEY, ENABLED_KEY])
            .to_string()
    }

    /// 编码后的 `k=v&...` 查询串，可作为嵌套参数值（如 `refer`）传递。
    pub fn query_string(&self) -> String {
        let mut query = String::new();
        for (key, value) in &self.parameters {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&urlencoding::encode(key));
            query.push('=');
            query.push_str(&urlencoding::encode(value));
        }
        query
    }

    #[must_use]
    pub fn with_protocol(&self, protocol: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.protocol = protocol.into();
        next
    }

    #[must_use]
    pub fn with_host(&self, host: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.host = host.into();
        next
    }

    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        let mut next = self.clone();
        next.port = port;
        next
    }

    #[must_use]
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.path = path.into().trim_start_matches('/').to_owned();
        next
    }

    #[must_use]
    pub fn with_parameter(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.parameters.insert(key.into(), value.into());
        next
    }

    /// 批量覆盖参数，后出现者胜出。
    #[must_use]
    pub fn with_parameters<I, K, V>(&self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut next = self.clone();
        for (key, value) in entries {
            next.parameters.insert(key.into(), value.into());
        }
        next
    }

    /// 仅补齐缺失参数，已存在的键保持原值。
    #[must_use]
    pub fn with_parameters_if_absent<I, K, V>(&self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut next = self.clone();
        for (key, value) in entries {
            next.parameters.entry(key.into()).or_insert_with(|| value.into());
        }
        next
    }

    #[must_use]
    pub fn without_parameter(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.parameters.remove(key);
        next
    }

    #[must_use]
    pub fn without_parameters<'k, I>(&self, keys: I) -> Self
    where
        I: IntoIterator<Item = &'k str>,
    {
        let mut next = self.clone();
        for key in keys {
            next.parameters.remove(key);
        }
        next
    }

    #[must_use]
    pub fn with_cleared_parameters(&self) -> Self {
        let mut next = self.clone();
        next.parameters.clear();
        next
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.protocol)?;
        if let Some(username) = &self.username {
            f.write_str(username)?;
            if let Some(password) = &self.password {
                write!(f, ":{password}")?;
            }
            f.write_str("@")?;
        }
        f.write_str(&self.host)?;
        if self.port > 0 {
            write!(f, ":{}", self.port)?;
        }
        if !self.path.is_empty() {
            write!(f, "/{}", self.path)?;
        }
        if !self.parameters.is_empty() {
            write!(f, "?{}", self.query_string())?;
        }
        Ok(())
    }
}

impl FromStr for ServiceUrl {
    type Err = RegistryError;

    fn from_str(input: &str) -> Result<Self> {
        Self::parse(input)
    }
}

/// 判断 `candidate`（例如覆盖规则）是否落在 `subscription` 的订阅范围内。
///
/// # 逻辑解析（How）
/// 1. 接口名相等，或任一方为 `*`；
/// 2. 类别匹配：订阅方的类别列表包含候选类别，`*` 通配，`-category` 表示排除；
/// 3. 候选被禁用时，仅当订阅方声明 `enabled=*` 才继续匹配；
/// 4. 分组（逗号列表或 `*`）、版本（`*`）与分类器逐项比较。
pub fn is_match(subscription: &ServiceUrl, candidate: &ServiceUrl) -> bool {
    let wanted_interface = subscription.service_interface();
    let offered_interface = candidate.service_interface();
    if !(wanted_interface == ANY_VALUE
        || offered_interface == ANY_VALUE
        || wanted_interface == offered_interface)
    {
        return false;
    }

    if !is_match_category(candidate.category(), subscription.category()) {
        return false;
    }

    if !candidate.bool_parameter(ENABLED_KEY, true)
        && subscription.parameter(ENABLED_KEY) != Some(ANY_VALUE)
    {
        return false;
    }

    let wanted_group = subscription.parameter(GROUP_KEY);
    let offered_group = candidate.parameter(GROUP_KEY);
    let group_matches = wanted_group == Some(ANY_VALUE)
        || wanted_group == offered_group
        || match (wanted_group, offered_group) {
            (Some(wanted), Some(offered)) => split_list(wanted).any(|group| group == offered),
            _ => false,
        };

    let wanted_version = subscription.parameter(VERSION_KEY);
    let version_matches =
        wanted_version == Some(ANY_VALUE) || wanted_version == candidate.parameter(VERSION_KEY);

    let wanted_classifier = subscription.parameter_or(CLASSIFIER_KEY, ANY_VALUE);
    let classifier_matches = wanted_classifier == ANY_VALUE
        || wanted_classifier == candidate.parameter_or(CLASSIFIER_KEY, ANY_VALUE);

    group_matches && version_matches && classifier_matches
}

fn is_match_category(category: &str, categories: &str) -> bool {
    if categories.is_empty() {
        return category == DEFAULT_CATEGORY;
    }
    let mut listed = false;
    for candidate in split_list(categories) {
        if candidate == ANY_VALUE {
            return true;
        }
        if candidate.strip_prefix('-') == Some(category) {
            return false;
        }
        listed |= candidate == category;
    }
    listed
}

/// 解析 `k=v&...` 查询串，键值做百分号解码，空键忽略。
///
/// 解码结果不是合法 UTF-8 时返回 [`RegistryError::MalformedUrl`]，不做有损替换。
pub fn parse_query(query: &str) -> Result<BTreeMap<String, String>> {
    let mut parameters = BTreeMap::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(query, key)?;
        if key.is_empty() {
            continue;
        }
        parameters.insert(key, decode_component(query, value)?);
    }
    Ok(parameters)
}

fn decode_component(query: &str, raw: &str) -> Result<String> {
    urlencoding::decode(raw)
        .map(Cow::into_owned)
        .map_err(|err| RegistryError::MalformedUrl {
            input: query.to_owned(),
            reason: format!("query component is not valid UTF-8: {err}"),
        })
}

/// 切分逗号列表，忽略空白片段。
pub(crate) fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(COMMA_SEPARATOR)
        .map(str::trim)
        .filter(|item| !item.is_empty())
}
