//! # spark-registry
//!
//! ## 定位与职责（Why）
//! - 维护消费端“服务 X 由哪些远端端点实现”的视图，使其与外部注册中心的异步、乱序、可能重复的
//!   全量推送保持一致；
//! - 按注册中心推送、应用级、服务级三层覆盖规则改写地址描述符，并热替换在用的调用者列表；
//! - 提供端在有效配置变化时重新导出服务，旧的网络导出在宽限期后关闭，不打断在途调用。
//!
//! ## 架构嵌入（Where）
//! - `url`、`constants`、`category`：地址描述符与推送分类的基础词汇；
//! - `configurator`、`overlay`：覆盖规则的匹配、排序与动态配置监听；
//! - `invoker_cache`、`router`、`cluster`、`directory`：消费端对账与路由；
//! - `registry_protocol`、`bookkeeping`：提供端导出、重新导出与登记；
//! - `registry`、`protocol`、`dynamic_config`：与注册中心、网络协议、配置中心的边界契约。
//!
//! ## 运行约束（Trade-offs）
//! - 对账以目录级互斥锁串行化，读路径只读取 `ArcSwap` 快照；
//! - 本 crate 只通过 `tracing` 宏输出日志，从不安装订阅器；
//! - 延迟关闭依赖 tokio 运行时（需开启计时器），未提供运行时时立即关闭并告警。

pub mod bookkeeping;
pub mod category;
pub mod cluster;
pub mod config;
pub mod configurator;
pub mod constants;
pub mod directory;
pub mod dynamic_config;
pub mod error;
pub mod invoker_cache;
pub mod overlay;
pub mod protocol;
pub mod registry;
pub mod registry_protocol;
pub mod router;
pub mod url;

pub use config::RegistryOptions;
pub use configurator::{Configurator, ConfiguratorKind};
pub use directory::{DirectoryBuilder, ServiceDirectory};
pub use error::{RegistryError, Result};
pub use overlay::{ConfiguratorListener, ConfiguratorOverlay, OverrideObserver};
pub use protocol::{Exporter, Invocation, Invoker, InvokerDelegate, Protocol};
pub use registry::{NotifyListener, Registry, RegistryFactory};
pub use registry_protocol::{ExporterHandle, OverrideListener, RegistryProtocol, RegistryProtocolBuilder};
pub use url::ServiceUrl;
