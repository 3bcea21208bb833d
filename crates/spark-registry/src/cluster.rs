//! 多分组合并：消费端订阅 `group=*` 或逗号列表时，按分组聚合调用者。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::constants::GROUP_KEY;
use crate::error::Result;
use crate::protocol::Invoker;
use crate::url::ServiceUrl;

/// 将同一分组的调用者聚合为一个集群调用者。
pub trait Cluster: Send + Sync + 'static {
    fn join(&self, group: &str, invokers: Vec<Arc<dyn Invoker>>) -> Arc<dyn Invoker>;
}

/// 默认实现：每个分组得到一个 [`GroupInvoker`]。
#[derive(Clone, Copy, Debug, Default)]
pub struct GroupCluster;

impl Cluster for GroupCluster {
    fn join(&self, group: &str, invokers: Vec<Arc<dyn Invoker>>) -> Arc<dyn Invoker> {
        Arc::new(GroupInvoker::new(group, invokers))
    }
}

/// 一个分组内全部调用者的静态视图。
///
/// 成员归目录缓存所有，`destroy` 不会释放成员连接。
pub struct GroupInvoker {
    group: String,
    url: ServiceUrl,
    members: Vec<Arc<dyn Invoker>>,
}

impl GroupInvoker {
    pub fn new(group: impl Into<String>, members: Vec<Arc<dyn Invoker>>) -> Self {
        let group = group.into();
        let url = members
            .first()
            .map(|first| first.url().clone())
            .unwrap_or_else(|| ServiceUrl::new("group", "", 0, ""))
            .with_parameter(GROUP_KEY, group.as_str());
        Self {
            group,
            url,
            members,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn members(&self) -> &[Arc<dyn Invoker>] {
        &self.members
    }
}

impl Invoker for GroupInvoker {
    fn url(&self) -> &ServiceUrl {
        &self.url
    }

    fn is_available(&self) -> bool {
        self.members.iter().any(|member| member.is_available())
    }

    fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

/// 按 `group` 参数分桶：只有一个分组时原样返回成员，多个分组时每组合并为一个集群调用者。
pub fn merge_groups(invokers: &[Arc<dyn Invoker>], cluster: &dyn Cluster) -> Vec<Arc<dyn Invoker>> {
    let mut groups: BTreeMap<&str, Vec<Arc<dyn Invoker>>> = BTreeMap::new();
    for invoker in invokers {
        groups
            .entry(invoker.url().parameter_or(GROUP_KEY, ""))
            .or_default()
            .push(Arc::clone(invoker));
    }
    match groups.len() {
        0 => Vec::new(),
        1 => groups.into_values().flatten().collect(),
        _ => groups
            .into_iter()
            .map(|(group, members)| cluster.join(group, members))
            .collect(),
    }
}
