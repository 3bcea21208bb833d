//! 地址描述符参数键与协议常量。
//!
//! # 教案式说明
//! - **意图（Why）**：注册中心推送、覆盖规则与消费端引用参数共享同一套键名，集中声明可避免拼写漂移；
//! - **契约（What）**：所有常量均为 `&'static str`，取值与注册中心上的既有数据格式保持兼容，修改即属破坏性变更。

/// 通配主机，代表“对所有地址生效”。
pub const ANYHOST_VALUE: &str = "0.0.0.0";
/// 通配取值。
pub const ANY_VALUE: &str = "*";
/// 逗号分隔列表的分隔符。
pub const COMMA_SEPARATOR: char = ',';

/// 空协议哨兵：注册中心明确表示“当前没有任何提供者”。
pub const EMPTY_PROTOCOL: &str = "empty";
pub const OVERRIDE_PROTOCOL: &str = "override";
pub const ABSENT_PROTOCOL: &str = "absent";
pub const ROUTE_PROTOCOL: &str = "route";
pub const PROVIDER_PROTOCOL: &str = "provider";
pub const CONSUMER_PROTOCOL: &str = "consumer";
pub const REGISTRY_PROTOCOL: &str = "registry";

pub const CATEGORY_KEY: &str = "category";
pub const PROVIDERS_CATEGORY: &str = "providers";
pub const CONSUMERS_CATEGORY: &str = "consumers";
pub const ROUTERS_CATEGORY: &str = "routers";
pub const CONFIGURATORS_CATEGORY: &str = "configurators";
pub const DYNAMIC_CONFIGURATORS_CATEGORY: &str = "dynamicconfigurators";
pub const APP_DYNAMIC_CONFIGURATORS_CATEGORY: &str = "appdynamicconfigurators";
pub const DEFAULT_CATEGORY: &str = PROVIDERS_CATEGORY;

/// 元参数：不得参与缓存键计算。
pub const DYNAMIC_KEY: &str = "dynamic";
pub const ENABLED_KEY: &str = "enabled";
pub const DISABLED_KEY: &str = "disabled";

pub const INTERFACE_KEY: &str = "interface";
pub const INTERFACES_KEY: &str = "interfaces";
pub const GROUP_KEY: &str = "group";
pub const VERSION_KEY: &str = "version";
pub const CLASSIFIER_KEY: &str = "classifier";
pub const APPLICATION_KEY: &str = "application";
pub const REMOTE_APPLICATION_KEY: &str = "remote.application";
pub const SIDE_KEY: &str = "side";
pub const PROVIDER_SIDE: &str = "provider";
pub const CONSUMER_SIDE: &str = "consumer";
pub const PROTOCOL_KEY: &str = "protocol";
pub const CHECK_KEY: &str = "check";
pub const PRIORITY_KEY: &str = "priority";
pub const ANYHOST_KEY: &str = "anyhost";
pub const ROUTER_KEY: &str = "router";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const RELEASE_KEY: &str = "release";
pub const METHODS_KEY: &str = "methods";
pub const TAG_KEY: &str = "tag";

/// 消费端注册到注册中心时使用的本机地址。
pub const REGISTER_IP_KEY: &str = "register.ip";
/// 提供者是否需要向注册中心登记。
pub const REGISTER_KEY: &str = "register";
/// 注册中心地址上声明的真实注册中心协议。
pub const REGISTRY_KEY: &str = "registry";
/// 注册中心地址中携带的导出地址。
pub const EXPORT_KEY: &str = "export";
/// 注册中心地址中携带的引用参数（查询串格式）。
pub const REFER_KEY: &str = "refer";
/// 精简注册模式开关。
pub const SIMPLIFIED_KEY: &str = "simplified";
/// 精简注册模式下额外保留的键。
pub const EXTRA_KEYS_KEY: &str = "extra-keys";

pub const OVERRIDE_PROVIDERS_KEY: &str = "providerAddresses";
pub const CONFIG_VERSION_KEY: &str = "configVersion";
pub const COMPATIBLE_CONFIG_KEY: &str = "compatible_config";

pub const MONITOR_KEY: &str = "monitor";
pub const BIND_IP_KEY: &str = "bind.ip";
pub const BIND_PORT_KEY: &str = "bind.port";
pub const QOS_ENABLE_KEY: &str = "qos.enable";
pub const QOS_HOST_KEY: &str = "qos.host";
pub const QOS_PORT_KEY: &str = "qos.port";
pub const ACCEPT_FOREIGN_IP_KEY: &str = "qos.accept.foreign.ip";
pub const VALIDATION_KEY: &str = "validation";

/// 提供者线程模型相关参数，合并消费端参数时需剔除。
pub const PROVIDER_ONLY_KEYS: [&str; 6] = [
    "threadname",
    "threadpool",
    "corethreads",
    "threads",
    "queues",
    "alive",
];

/// 精简注册模式下默认保留的提供者参数。
pub const DEFAULT_REGISTER_PROVIDER_KEYS: [&str; 19] = [
    APPLICATION_KEY,
    "codec",
    "exchanger",
    "serialization",
    "cluster",
    "connections",
    "deprecated",
    GROUP_KEY,
    "loadbalance",
    "mock",
    "path",
    "timeout",
    "token",
    VERSION_KEY,
    "warmup",
    "weight",
    TIMESTAMP_KEY,
    "spark",
    RELEASE_KEY,
];

/// 动态配置中心中覆盖规则键的后缀。
pub const CONFIGURATORS_SUFFIX: &str = ".configurators";
/// 动态配置中心默认分组。
pub const DEFAULT_CONFIG_GROUP: &str = "spark";
