//! 调用者缓存：规范键 → 调用者，以快照整体替换。
//!
//! # 教案式说明
//! - **意图（Why）**：注册中心每次推送的都是全量快照，但连接建立代价高，必须按规范键复用已有调用者；
//! - **逻辑（How）**：[`reconcile`] 是纯函数，输入旧映射与本批次描述符，输出新映射、待淘汰列表与
//!   拨号失败列表；构建期间不销毁任何调用者，发布新映射之后才由调用方执行 [`destroy_all`]；
//! - **契约（What）**：同一批次内重复的规范键只保留第一个；读取方通过 [`InvokerCache::snapshot`]
//!   拿到一致视图，不会看到“一半旧一半新”的映射。

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::warn;

use crate::error::{RegistryError, Result};
use crate::protocol::Invoker;

/// 规范键到调用者的映射。
pub type InvokerMap = BTreeMap<String, Arc<dyn Invoker>>;

/// 一次对账的结果。
#[derive(Default)]
pub struct Reconciled {
    /// 新映射：复用的旧调用者与新拨号的调用者。
    pub entries: InvokerMap,
    /// 旧映射中本次未出现的调用者，发布后销毁。
    pub evicted: Vec<Arc<dyn Invoker>>,
    /// 拨号失败的规范键与错误。
    pub failures: Vec<(String, RegistryError)>,
}

/// 计算新映射。
///
/// - `batch`：`(规范键, 拨号参数)` 序列；
/// - `dial`：仅对旧映射中不存在的键调用。
pub fn reconcile<T, I, F>(old: &InvokerMap, batch: I, mut dial: F) -> Reconciled
where
    I: IntoIterator<Item = (String, T)>,
    F: FnMut(&T) -> Result<Arc<dyn Invoker>>,
{
    let mut reconciled = Reconciled::default();
    for (key, target) in batch {
        if reconciled.entries.contains_key(&key) {
            continue;
        }
        if let Some(existing) = old.get(&key) {
            reconciled.entries.insert(key, Arc::clone(existing));
            continue;
        }
        match dial(&target) {
            Ok(invoker) => {
                reconciled.entries.insert(key, invoker);
            }
            Err(err) => reconciled.failures.push((key, err)),
        }
    }
    reconciled.evicted = old
        .iter()
        .filter(|(key, _)| !reconciled.entries.contains_key(*key))
        .map(|(_, invoker)| Arc::clone(invoker))
        .collect();
    reconciled
}

/// 尽力销毁；单个失败只记录告警，返回失败数量。
pub fn destroy_all<I>(invokers: I) -> usize
where
    I: IntoIterator<Item = Arc<dyn Invoker>>,
{
    let mut failed = 0;
    for invoker in invokers {
        if let Err(err) = invoker.destroy() {
            failed += 1;
            warn!(
                url = %invoker.url(),
                error = %err,
                "failed to destroy invoker"
            );
        }
    }
    failed
}

/// 原子发布的调用者映射。
pub struct InvokerCache {
    entries: ArcSwap<InvokerMap>,
}

impl InvokerCache {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(InvokerMap::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<InvokerMap> {
        self.entries.load_full()
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Invoker>> {
        self.entries.load().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// 发布新映射，返回旧映射。
    pub fn publish(&self, entries: Arc<InvokerMap>) -> Arc<InvokerMap> {
        self.entries.swap(entries)
    }

    /// 清空并返回旧映射，供调用方销毁。
    pub fn take_all(&self) -> Arc<InvokerMap> {
        self.entries.swap(Arc::new(InvokerMap::new()))
    }
}

impl Default for InvokerCache {
    fn default() -> Self {
        Self::new()
    }
}
