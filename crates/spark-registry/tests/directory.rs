//! 服务目录对账的集成测试。
//!
//! - 覆盖端到端推送序列、调用者复用、`empty://` 禁止态、单点与整批拨号失败、协议过滤、
//!   路由失败降级、多分组合并、推送分类与销毁；
//! - 注册中心与协议均为 `support` 中的内存替身。

mod support;

use std::sync::Arc;

use spark_registry::router::Router;
use spark_registry::{
    DirectoryBuilder, Invocation, Invoker, RegistryError, ServiceDirectory, ServiceUrl,
};
use support::{MockProtocol, MockRegistry, RegistryEvent, consumer_registry_url, url};
use tracing_test::traced_test;

const CONSUMER: &str = "consumer://10.0.0.8/Greeter?interface=Greeter&version=1.0&register.ip=10.0.0.8&application=web&side=consumer";

fn provider(host: &str) -> ServiceUrl {
    url(&format!(
        "spark://{host}:20880/Greeter?version=1.0&application=billing&side=provider"
    ))
}

fn sentinel() -> ServiceUrl {
    url("empty://10.0.0.8/Greeter?category=providers&version=1.0")
}

fn directory_with(
    consumer: &str,
    protocol: &Arc<MockProtocol>,
    registry: &Arc<MockRegistry>,
) -> Arc<ServiceDirectory> {
    DirectoryBuilder::new("Greeter", consumer_registry_url(&url(consumer)))
        .registry(registry.clone())
        .protocol(protocol.clone())
        .build()
        .expect("directory")
}

fn directory(protocol: &Arc<MockProtocol>) -> Arc<ServiceDirectory> {
    directory_with(CONSUMER, protocol, &MockRegistry::new())
}

fn invoker_for(directory: &ServiceDirectory, host: &str) -> Arc<dyn Invoker> {
    directory
        .invokers()
        .iter()
        .find(|invoker| invoker.url().host() == host)
        .cloned()
        .expect("invoker for host")
}

#[test]
fn end_to_end_push_sequence() {
    let protocol = MockProtocol::new();
    let directory = directory(&protocol);

    directory.notify(vec![provider("10.0.0.1")]);
    assert_eq!(directory.invokers().len(), 1);
    assert!(!directory.is_forbidden());
    let first = invoker_for(&directory, "10.0.0.1");

    directory.notify(vec![provider("10.0.0.1"), provider("10.0.0.2")]);
    assert_eq!(directory.invokers().len(), 2);
    assert!(Arc::ptr_eq(&first, &invoker_for(&directory, "10.0.0.1")));
    let second = invoker_for(&directory, "10.0.0.2");

    directory.notify(Vec::new());
    assert_eq!(directory.invokers().len(), 2);
    assert!(Arc::ptr_eq(&first, &invoker_for(&directory, "10.0.0.1")));
    assert!(Arc::ptr_eq(&second, &invoker_for(&directory, "10.0.0.2")));
    assert_eq!(protocol.refer_calls(), 2);

    directory.notify(vec![sentinel()]);
    assert!(directory.is_forbidden());
    assert!(directory.invokers().is_empty());
    assert!(directory.cached_invokers().is_empty());
    assert!(protocol.leaves().iter().all(|leaf| leaf.is_destroyed()));
}

#[test]
fn identical_pushes_never_redial() {
    let protocol = MockProtocol::new();
    let directory = directory(&protocol);
    let batch = vec![provider("10.0.0.1"), provider("10.0.0.2")];
    for _ in 0..5 {
        directory.notify(batch.clone());
    }
    assert_eq!(protocol.refer_calls(), 2);
    assert!(protocol.leaves().iter().all(|leaf| !leaf.is_destroyed()));
}

#[test]
fn removed_provider_is_destroyed_after_publish() {
    let protocol = MockProtocol::new();
    let directory = directory(&protocol);
    directory.notify(vec![provider("10.0.0.1"), provider("10.0.0.2")]);
    directory.notify(vec![provider("10.0.0.1")]);

    assert_eq!(directory.invokers().len(), 1);
    let gone = protocol.leaf_for_host("10.0.0.2").expect("dialed");
    let kept = protocol.leaf_for_host("10.0.0.1").expect("dialed");
    assert!(gone.is_destroyed());
    assert!(!kept.is_destroyed());
}

#[test]
fn sentinel_destroys_every_active_invoker() {
    let protocol = MockProtocol::new();
    let directory = directory(&protocol);
    let batch: Vec<ServiceUrl> = (1..=10).map(|i| provider(&format!("10.0.1.{i}"))).collect();
    directory.notify(batch);
    assert_eq!(directory.invokers().len(), 10);

    directory.notify(vec![sentinel()]);
    assert!(directory.is_forbidden());
    assert!(directory.invokers().is_empty());
    assert_eq!(protocol.leaves().len(), 10);
    assert!(protocol.leaves().iter().all(|leaf| leaf.is_destroyed()));
}

#[test]
fn forbidden_list_reports_diagnostics_and_recovers() {
    let protocol = MockProtocol::new();
    let directory = directory(&protocol);
    directory.notify(vec![sentinel()]);

    let err = directory
        .list(&Invocation::new("hello"))
        .expect_err("forbidden");
    assert!(err.is_forbidden());
    let message = err.to_string();
    assert!(message.contains("Greeter:1.0"));
    assert!(message.contains("10.0.0.8"));

    directory.notify(vec![provider("10.0.0.1")]);
    assert!(!directory.is_forbidden());
    assert_eq!(directory.list(&Invocation::new("hello")).expect("list").len(), 1);
}

#[test]
fn configurator_only_push_lifts_forbidden_state() {
    let protocol = MockProtocol::new();
    let directory = directory(&protocol);
    directory.notify(vec![provider("10.0.0.1")]);
    directory.notify(vec![sentinel()]);
    assert!(directory.is_forbidden());

    directory.notify(vec![url(
        "override://0.0.0.0/Greeter?category=configurators&timeout=9000",
    )]);

    assert!(!directory.is_forbidden());
    assert!(directory.invokers().is_empty());
    let routed = directory.list(&Invocation::new("hello")).expect("not forbidden");
    assert!(routed.is_empty());
}

#[traced_test]
#[test]
fn failed_provider_push_after_sentinel_is_not_forbidden() {
    let protocol = MockProtocol::new();
    protocol.fail_host("10.0.0.2");
    let directory = directory(&protocol);
    directory.notify(vec![sentinel()]);

    directory.notify(vec![provider("10.0.0.2")]);

    assert!(!directory.is_forbidden());
    assert!(directory.list(&Invocation::new("hello")).expect("list").is_empty());
    assert!(logs_contain("keeping the last good list"));

    protocol.heal_host("10.0.0.2");
    directory.notify(vec![provider("10.0.0.2")]);
    assert_eq!(directory.list(&Invocation::new("hello")).expect("list").len(), 1);
}

#[test]
fn empty_push_without_snapshot_changes_nothing() {
    let protocol = MockProtocol::new();
    let directory = directory(&protocol);
    directory.notify(Vec::new());
    assert!(directory.invokers().is_empty());
    assert!(!directory.is_forbidden());
    assert_eq!(protocol.refer_calls(), 0);
}

#[traced_test]
#[test]
fn single_dial_failure_skips_only_that_provider() {
    let protocol = MockProtocol::new();
    protocol.fail_host("10.0.0.2");
    let directory = directory(&protocol);

    directory.notify(vec![provider("10.0.0.1"), provider("10.0.0.2"), provider("10.0.0.3")]);

    let hosts: Vec<String> = directory
        .invokers()
        .iter()
        .map(|invoker| invoker.url().host().to_owned())
        .collect();
    assert_eq!(hosts, vec!["10.0.0.1".to_owned(), "10.0.0.3".to_owned()]);
    assert!(logs_contain("failed to refer invoker"));
}

#[traced_test]
#[test]
fn full_batch_failure_keeps_last_good_list() {
    let protocol = MockProtocol::new();
    let directory = directory(&protocol);
    directory.notify(vec![provider("10.0.0.1")]);
    let good = invoker_for(&directory, "10.0.0.1");

    protocol.fail_host("10.0.0.2");
    protocol.fail_host("10.0.0.3");
    directory.notify(vec![provider("10.0.0.2"), provider("10.0.0.3")]);

    assert_eq!(directory.invokers().len(), 1);
    assert!(Arc::ptr_eq(&good, &directory.invokers()[0]));
    assert!(!protocol.leaf_for_host("10.0.0.1").expect("dialed").is_destroyed());
    assert!(logs_contain("keeping the last good list"));
}

#[traced_test]
#[test]
fn protocol_allow_list_and_unsupported_protocols_filter_providers() {
    let protocol = MockProtocol::new();
    protocol.reject_protocol("rest");
    let consumer = format!("{CONSUMER}&protocol=spark,rest");
    let directory = directory_with(&consumer, &protocol, &MockRegistry::new());

    directory.notify(vec![
        provider("10.0.0.1"),
        url("grpc://10.0.0.2:50051/Greeter?version=1.0"),
        url("rest://10.0.0.3:8080/Greeter?version=1.0"),
    ]);

    assert_eq!(directory.invokers().len(), 1);
    assert_eq!(directory.invokers()[0].url().protocol(), "spark");
    assert!(logs_contain("unsupported protocol"));
}

#[test]
fn disabled_providers_are_not_dialed() {
    let protocol = MockProtocol::new();
    let directory = directory(&protocol);
    directory.notify(vec![
        provider("10.0.0.1"),
        provider("10.0.0.2").with_parameter("disabled", "true"),
        provider("10.0.0.3").with_parameter("enabled", "false"),
    ]);
    assert_eq!(directory.invokers().len(), 1);
    assert_eq!(protocol.refer_calls(), 1);
}

#[test]
fn merged_invoker_url_carries_consumer_parameters() {
    let protocol = MockProtocol::new();
    let directory = directory(&protocol);
    directory.notify(vec![provider("10.0.0.1").with_parameter("threads", "200")]);

    let invoker = invoker_for(&directory, "10.0.0.1");
    let merged = invoker.url();
    assert_eq!(merged.parameter("application"), Some("web"));
    assert_eq!(merged.parameter("remote.application"), Some("billing"));
    assert_eq!(merged.parameter("check"), Some("false"));
    assert_eq!(merged.parameter("threads"), None);
    assert_eq!(merged.port(), 20880);
}

struct FailingRouter(ServiceUrl);

impl Router for FailingRouter {
    fn url(&self) -> &ServiceUrl {
        &self.0
    }

    fn route(
        &self,
        _invokers: &[Arc<dyn Invoker>],
        _consumer: &ServiceUrl,
        _invocation: &Invocation,
    ) -> spark_registry::Result<Vec<Arc<dyn Invoker>>> {
        Err(RegistryError::Routing {
            detail: "condition rule is broken".to_owned(),
        })
    }
}

#[traced_test]
#[test]
fn router_failure_degrades_to_empty_list() {
    let protocol = MockProtocol::new();
    let directory = DirectoryBuilder::new("Greeter", consumer_registry_url(&url(CONSUMER)))
        .registry(MockRegistry::new())
        .protocol(protocol.clone())
        .builtin_router(Arc::new(FailingRouter(url("condition://0.0.0.0/Greeter"))))
        .build()
        .expect("directory");
    directory.notify(vec![provider("10.0.0.1")]);

    let routed = directory.list(&Invocation::new("hello")).expect("no error surfaced");
    assert!(routed.is_empty());
    assert_eq!(directory.invokers().len(), 1);
    assert!(logs_contain("router chain failed"));
}

#[test]
fn multi_group_consumer_sees_one_invoker_per_group() {
    let protocol = MockProtocol::new();
    let consumer = "consumer://10.0.0.8/Greeter?interface=Greeter&group=*&register.ip=10.0.0.8&side=consumer";
    let directory = directory_with(consumer, &protocol, &MockRegistry::new());
    assert!(directory.is_multi_group());

    directory.notify(vec![
        url("spark://10.0.0.1:20880/Greeter?group=blue"),
        url("spark://10.0.0.2:20880/Greeter?group=blue"),
        url("spark://10.0.0.3:20880/Greeter?group=green"),
    ]);

    let merged = directory.invokers();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].url().group(), Some("blue"));
    assert_eq!(merged[1].url().group(), Some("green"));
    assert_eq!(directory.cached_invokers().len(), 3);
    assert_eq!(directory.list(&Invocation::new("hello")).expect("list").len(), 2);
}

#[traced_test]
#[test]
fn mixed_push_is_classified_by_category() {
    let protocol = MockProtocol::new();
    let directory = directory(&protocol);

    directory.notify(vec![
        provider("10.0.0.1"),
        url("override://0.0.0.0/Greeter?category=configurators&timeout=9000"),
        url("route://0.0.0.0/Greeter?category=routers&router=tag"),
        url("spark://10.0.0.9:20880/Greeter?category=consumers"),
    ]);

    assert_eq!(directory.configurators().len(), 1);
    assert_eq!(directory.invokers().len(), 1);
    let first = invoker_for(&directory, "10.0.0.1");
    assert_eq!(first.url().parameter("timeout"), Some("9000"));
    assert_eq!(directory.directory_url().parameter("timeout"), Some("9000"));
    assert!(logs_contain("unsupported category"));
    assert!(logs_contain("no router factory configured"));

    directory.notify(vec![url("empty://0.0.0.0/Greeter?category=configurators")]);
    assert!(directory.configurators().is_empty());
    let second = invoker_for(&directory, "10.0.0.1");
    assert_eq!(second.url().parameter("timeout"), None);
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(protocol.leaves().iter().filter(|leaf| leaf.is_destroyed()).count(), 1);
}

#[test]
fn registry_push_reaches_directory_through_subscription() {
    let protocol = MockProtocol::new();
    let registry = MockRegistry::new();
    let directory = directory_with(CONSUMER, &protocol, &registry);
    directory
        .subscribe(url("consumer://10.0.0.8/Greeter?category=providers,configurators,routers"))
        .expect("subscribe");

    registry.push(vec![provider("10.0.0.1")]);
    assert_eq!(directory.invokers().len(), 1);
}

#[test]
fn destroy_unregisters_unsubscribes_and_releases_invokers() {
    let protocol = MockProtocol::new();
    let registry = MockRegistry::new();
    let directory = directory_with(CONSUMER, &protocol, &registry);
    let consumer = url("consumer://10.0.0.8/Greeter?category=consumers");
    let subscription = url("consumer://10.0.0.8/Greeter?category=providers,configurators,routers");
    directory.register_consumer(consumer.clone()).expect("register");
    directory.subscribe(subscription.clone()).expect("subscribe");
    registry.push(vec![provider("10.0.0.1"), provider("10.0.0.2")]);

    directory.destroy();
    directory.destroy();

    let events = registry.events();
    assert!(events.contains(&RegistryEvent::Unregister(consumer)));
    assert!(events.contains(&RegistryEvent::Unsubscribe(subscription)));
    assert_eq!(registry.subscriber_count(), 0);
    assert!(protocol.leaves().iter().all(|leaf| leaf.is_destroyed()));
    assert!(!directory.is_available());
    assert!(matches!(
        directory.list(&Invocation::new("hello")),
        Err(RegistryError::Destroyed { .. })
    ));
    assert_eq!(
        registry.unregistered().len(),
        1,
        "second destroy must be a no-op"
    );
}
