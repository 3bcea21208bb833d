//! 路由链：按优先级串联的调用者过滤器。
//!
//! # 教案式说明
//! - **意图（Why）**：目录只负责“有哪些提供者”，每次调用还要经过标签、条件等路由规则筛选；
//!   路由谓词引擎由外部实现，本模块只定义契约与链式执行；
//! - **逻辑（How）**：
//!   - 路由器列表与调用者列表都以 [`ArcSwap`] 保存，热更新时整表替换，读路径无锁；
//!   - 内置路由器在构造时给定，注册中心推送的动态路由器通过 [`RouterChain::add_routers`]
//!     整批替换，二者合并后按优先级稳定排序；
//! - **契约（What）**：`route` 以上一个路由器的输出作为下一个的输入，任何一个失败即整体失败，
//!   由目录记录日志并降级为空列表。

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use crate::constants::{EMPTY_PROTOCOL, ROUTER_KEY};
use crate::error::Result;
use crate::protocol::{Invocation, Invoker};
use crate::url::ServiceUrl;

/// 单个路由器。
pub trait Router: Send + Sync + 'static {
    fn url(&self) -> &ServiceUrl;

    /// 数值越小越先执行。
    fn priority(&self) -> i32 {
        0
    }

    fn route(
        &self,
        invokers: &[Arc<dyn Invoker>],
        consumer: &ServiceUrl,
        invocation: &Invocation,
    ) -> Result<Vec<Arc<dyn Invoker>>>;

    /// 调用者集合变化时的预计算钩子。
    fn notify(&self, _invokers: &[Arc<dyn Invoker>]) {}
}

/// 由路由描述符构造路由器。
pub trait RouterFactory: Send + Sync + 'static {
    fn get_router(&self, url: &ServiceUrl) -> Result<Arc<dyn Router>>;
}

/// 将注册中心推送的路由描述符转换为路由器。
///
/// - 输入为空返回 `None`，保持当前动态路由不变；
/// - `empty://` 占位记录被跳过，因此“仅含占位”的推送会得到空列表，即清空动态路由；
/// - 带 `router` 参数的描述符以该参数替换协议；
/// - 转换失败记录告警并跳过；同一描述符只保留一个路由器。
pub fn to_routers(
    urls: &[ServiceUrl],
    factory: &dyn RouterFactory,
) -> Option<Vec<Arc<dyn Router>>> {
    if urls.is_empty() {
        return None;
    }
    let mut seen = HashSet::new();
    let mut routers = Vec::with_capacity(urls.len());
    for url in urls {
        if url.protocol() == EMPTY_PROTOCOL {
            continue;
        }
        let url = match url.parameter(ROUTER_KEY) {
            Some(kind) if !kind.is_empty() => url.with_protocol(kind),
            _ => url.clone(),
        };
        match factory.get_router(&url) {
            Ok(router) => {
                if seen.insert(router.url().to_string()) {
                    routers.push(router);
                }
            }
            Err(err) => {
                warn!(url = %url, error = %err, "failed to convert router descriptor");
            }
        }
    }
    Some(routers)
}

/// 路由链。
pub struct RouterChain {
    builtin: Vec<Arc<dyn Router>>,
    routers: ArcSwap<Vec<Arc<dyn Router>>>,
    invokers: ArcSwap<Vec<Arc<dyn Invoker>>>,
}

impl RouterChain {
    pub fn new(builtin: Vec<Arc<dyn Router>>) -> Self {
        let routers = sorted(builtin.clone());
        Self {
            builtin,
            routers: ArcSwap::from_pointee(routers),
            invokers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// 以新的动态路由器替换上一批动态路由器，内置路由器始终保留。
    ///
    /// 合并后按 `url()` 去重，同一地址只保留先出现的一个，因此内置路由器优先。
    pub fn add_routers(&self, dynamic: Vec<Arc<dyn Router>>) {
        let mut seen = HashSet::new();
        let routers: Vec<Arc<dyn Router>> = self
            .builtin
            .iter()
            .cloned()
            .chain(dynamic)
            .filter(|router| seen.insert(router.url().to_string()))
            .collect();
        let routers = sorted(routers);
        debug!(count = routers.len(), "router chain updated");
        self.routers.store(Arc::new(routers));
    }

    pub fn routers(&self) -> Arc<Vec<Arc<dyn Router>>> {
        self.routers.load_full()
    }

    pub fn invokers(&self) -> Arc<Vec<Arc<dyn Invoker>>> {
        self.invokers.load_full()
    }

    /// 更新调用者集合并通知每个路由器。
    pub fn set_invokers(&self, invokers: Arc<Vec<Arc<dyn Invoker>>>) {
        for router in self.routers.load().iter() {
            router.notify(&invokers);
        }
        self.invokers.store(invokers);
    }

    pub fn route(
        &self,
        consumer: &ServiceUrl,
        invocation: &Invocation,
    ) -> Result<Vec<Arc<dyn Invoker>>> {
        let mut current = self.invokers.load_full().to_vec();
        for router in self.routers.load().iter() {
            current = router.route(&current, consumer, invocation)?;
        }
        Ok(current)
    }
}

impl Default for RouterChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

fn sorted(mut routers: Vec<Arc<dyn Router>>) -> Vec<Arc<dyn Router>> {
    routers.sort_by_key(|router| router.priority());
    routers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    struct Tagged {
        url: ServiceUrl,
        priority: i32,
        keep_host: Option<&'static str>,
    }

    impl Router for Tagged {
        fn url(&self) -> &ServiceUrl {
            &self.url
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn route(
            &self,
            invokers: &[Arc<dyn Invoker>],
            _consumer: &ServiceUrl,
            _invocation: &Invocation,
        ) -> Result<Vec<Arc<dyn Invoker>>> {
            Ok(invokers
                .iter()
                .filter(|invoker| self.keep_host.is_none_or(|host| invoker.url().host() == host))
                .cloned()
                .collect())
        }
    }

    struct Factory;

    impl RouterFactory for Factory {
        fn get_router(&self, url: &ServiceUrl) -> Result<Arc<dyn Router>> {
            if url.protocol() == "broken" {
                return Err(RegistryError::RouterParse {
                    url: url.to_string(),
                    detail: "unknown router".to_owned(),
                });
            }
            Ok(Arc::new(Tagged {
                url: url.clone(),
                priority: url.int_parameter("priority", 0) as i32,
                keep_host: None,
            }))
        }
    }

    fn url(raw: &str) -> ServiceUrl {
        ServiceUrl::parse(raw).expect("valid url")
    }

    #[test]
    fn to_routers_skips_empty_broken_and_duplicates() {
        let routers = to_routers(
            &[
                url("route://0.0.0.0/Greeter?router=tag&priority=2"),
                url("route://0.0.0.0/Greeter?router=tag&priority=2"),
                url("route://0.0.0.0/Greeter?router=broken"),
                url("empty://0.0.0.0/Greeter?category=routers"),
            ],
            &Factory,
        )
        .expect("non-empty input");
        assert_eq!(routers.len(), 1);
        assert_eq!(routers[0].url().protocol(), "tag");
        assert!(to_routers(&[], &Factory).is_none());
    }

    #[test]
    fn dynamic_routers_replace_previous_batch_and_keep_builtin_order() {
        let builtin: Arc<dyn Router> = Arc::new(Tagged {
            url: url("builtin://0.0.0.0/Greeter"),
            priority: 5,
            keep_host: None,
        });
        let chain = RouterChain::new(vec![builtin]);
        chain.add_routers(vec![Factory.get_router(&url("tag://0.0.0.0/G?priority=1")).unwrap()]);
        chain.add_routers(vec![Factory.get_router(&url("tag://0.0.0.0/G?priority=9")).unwrap()]);
        let priorities: Vec<i32> = chain.routers().iter().map(|r| r.priority()).collect();
        assert_eq!(priorities, vec![5, 9]);
    }

    #[test]
    fn pushed_router_with_builtin_address_is_dropped() {
        let builtin: Arc<dyn Router> = Arc::new(Tagged {
            url: url("tag://0.0.0.0/G?priority=7"),
            priority: 7,
            keep_host: None,
        });
        let chain = RouterChain::new(vec![Arc::clone(&builtin)]);
        let shadow: Arc<dyn Router> = Arc::new(Tagged {
            url: url("tag://0.0.0.0/G?priority=7"),
            priority: 1,
            keep_host: Some("10.0.0.9"),
        });
        let twin = Factory.get_router(&url("tag://0.0.0.0/G?priority=3")).unwrap();
        let twin_again = Factory.get_router(&url("tag://0.0.0.0/G?priority=3")).unwrap();

        chain.add_routers(vec![shadow, twin, twin_again]);

        let routers = chain.routers();
        assert_eq!(routers.len(), 2);
        assert_eq!(routers[0].priority(), 3);
        assert!(Arc::ptr_eq(&routers[1], &builtin));
    }
}
