use super::*;
use crate::gateways::hostname_matches;
use pretty_assertions::assert_eq;
use trellis_controller_core::{
    ir::ListenerProtocol,
    proxy::{DfpFilterConfig, DiscoveryType, DFP_DNS_CACHE_NAME},
};
use trellis_controller_k8s_api::{
    backend::{BackendType, DynamicForwardProxyBackend},
    policy::{ListenerPolicySpec, ListenerSettingsSpec, PortSettings},
    Backend, BackendSpec, ListenerPolicy,
};

#[test]
fn gateways_of_other_classes_are_ignored() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;

    let mut gateway = mk_gateway("ns-0", "gw-0", [("http", 80, "HTTP")]);
    gateway.spec.gateway_class_name = "other".to_string();
    test.apply(&inputs.gateways, gateway.clone());
    assert!(test.pipeline.gateways.is_empty());
    assert!(test.pipeline.snapshots.is_empty());

    gateway.spec.gateway_class_name = "trellis".to_string();
    test.apply(&inputs.gateways, gateway);
    assert_eq!(test.pipeline.snapshots.len(), 1);
    assert_eq!(
        test.snapshot("ns-0", "gw-0").role,
        "trellis.dev/gateway-controller~ns-0~gw-0"
    );

    test.delete(&inputs.gateways, "ns-0", "gw-0");
    assert!(test.pipeline.snapshots.is_empty());
}

#[test]
fn invalid_listeners_are_reported() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;

    test.apply(
        &inputs.gateways,
        mk_gateway(
            "ns-0",
            "gw-0",
            [
                ("http", 80, "HTTP"),
                ("http", 81, "HTTP"),
                ("tcp", 9000, "TCP"),
                ("bad-port", 70000, "HTTP"),
            ],
        ),
    );

    let gateway = test
        .pipeline
        .gateways
        .get("ns-0/gw-0")
        .expect("gateway must exist");
    assert_eq!(
        gateway.errors,
        vec!["listener http is defined more than once".to_string()]
    );
    assert_eq!(gateway.listeners.len(), 3);
    let tcp = gateway.listener("tcp").expect("listener must exist");
    assert_eq!(tcp.protocol, ListenerProtocol::Unsupported);
    assert_eq!(tcp.errors, vec!["unsupported protocol TCP".to_string()]);
    let bad = gateway.listener("bad-port").expect("listener must exist");
    assert_eq!(
        bad.errors,
        vec!["port 70000 is outside the range 1-65535".to_string()]
    );

    // Only the valid listener is programmed.
    let snapshot = test.snapshot("ns-0", "gw-0");
    assert_eq!(snapshot.listeners.len(), 1);
    assert_eq!(snapshot.listeners[0].port, 80);
    assert_eq!(snapshot.errors.len(), 3);
}

#[test]
fn routes_attach_by_section_and_hostname() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;

    let mut gateway = mk_gateway("ns-0", "gw-0", [("web", 80, "HTTP"), ("api", 8080, "HTTP")]);
    gateway.spec.listeners[0].hostname = Some("*.example.com".to_string());
    test.apply(&inputs.gateways, gateway);

    let mut web = mk_route(
        "ns-0",
        "web",
        [HTTPRouteParentRefs {
            section_name: Some("web".to_string()),
            ..mk_parent_ref("gw-0")
        }],
        [mk_rule(None, [])],
    );
    web.spec.hostnames = Some(vec!["www.example.com".to_string(), "other.org".to_string()]);
    test.apply(&inputs.http_routes, web);

    let mut elsewhere = mk_route("ns-0", "elsewhere", [mk_parent_ref("gw-0")], [mk_rule(None, [])]);
    elsewhere.spec.hostnames = Some(vec!["other.org".to_string()]);
    test.apply(&inputs.http_routes, elsewhere);

    let by_port = mk_route(
        "ns-0",
        "by-port",
        [HTTPRouteParentRefs {
            port: Some(8080),
            ..mk_parent_ref("gw-0")
        }],
        [mk_rule(None, [])],
    );
    test.apply(&inputs.http_routes, by_port);

    // Routes in other namespaces are not allowed by the listeners.
    test.apply(
        &inputs.http_routes,
        mk_route(
            "ns-1",
            "foreign",
            [HTTPRouteParentRefs {
                namespace: Some("ns-0".to_string()),
                ..mk_parent_ref("gw-0")
            }],
            [mk_rule(None, [])],
        ),
    );

    let gateway = test
        .pipeline
        .gateways
        .get("ns-0/gw-0")
        .expect("gateway must exist");
    let names = |listener: &str| {
        gateway
            .listener(listener)
            .expect("listener must exist")
            .routes
            .iter()
            .map(|r| r.source.name.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(names("web"), vec!["web".to_string()]);
    assert_eq!(
        names("api"),
        vec!["by-port".to_string(), "elsewhere".to_string()]
    );

    let snapshot = test.snapshot("ns-0", "gw-0");
    let web = snapshot
        .route_configs
        .iter()
        .find(|rc| rc.name == "listener~80~web")
        .expect("route config must exist");
    assert_eq!(
        web.virtual_hosts[0].domains,
        vec!["www.example.com".to_string()]
    );
}

#[test]
fn hostname_wildcards() {
    assert!(hostname_matches("*.example.com", "foo.example.com"));
    assert!(hostname_matches("foo.example.com", "*.example.com"));
    assert!(hostname_matches("*.example.com", "*.example.com"));
    assert!(hostname_matches("*.example.com", "*.foo.example.com"));
    assert!(hostname_matches("FOO.example.com", "foo.EXAMPLE.com"));
    assert!(!hostname_matches("*.example.com", "example.com"));
    assert!(!hostname_matches("foo.example.com", "bar.example.com"));
}

#[test]
fn listener_policy_per_port_settings() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;

    test.apply(
        &inputs.gateways,
        mk_gateway("ns-0", "gw-0", [("http", 80, "HTTP"), ("alt", 8080, "HTTP")]),
    );
    test.apply(
        &inputs.listener_policies,
        ListenerPolicy {
            metadata: mk_meta("ns-0", "listeners"),
            spec: ListenerPolicySpec {
                target_refs: vec![mk_target("Gateway", "gw-0", None)],
                default: Some(ListenerSettingsSpec {
                    per_connection_buffer_limit_bytes: Some(32_768),
                    idle_timeout: Some("30s".to_string()),
                    ..Default::default()
                }),
                per_port: Some(vec![PortSettings {
                    port: 8080,
                    settings: ListenerSettingsSpec {
                        idle_timeout: Some("5s".to_string()),
                        proxy_protocol: Some(true),
                        ..Default::default()
                    },
                }]),
                ..Default::default()
            },
            status: None,
        },
    );

    let snapshot = test.snapshot("ns-0", "gw-0");
    let chain = |port: u16| {
        snapshot
            .listeners
            .iter()
            .find(|l| l.port == port)
            .expect("listener must exist")
            .filter_chains[0]
            .clone()
    };

    let http = chain(80);
    assert_eq!(http.per_connection_buffer_limit, Some(32_768));
    assert_eq!(http.idle_timeout_ms, Some(30_000));
    assert!(!http.proxy_protocol);

    let alt = chain(8080);
    assert_eq!(alt.per_connection_buffer_limit, Some(32_768));
    assert_eq!(alt.idle_timeout_ms, Some(5_000));
    assert!(alt.proxy_protocol);
}

#[test]
fn dynamic_forward_proxy_filter_recorded_on_chain() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;

    test.apply(&inputs.gateways, mk_gateway("ns-0", "gw-0", [("http", 80, "HTTP")]));
    test.apply(
        &inputs.backends,
        Backend {
            metadata: mk_meta("ns-0", "egress"),
            spec: BackendSpec {
                type_: BackendType::DynamicForwardProxy,
                r#static: None,
                dynamic_forward_proxy: Some(DynamicForwardProxyBackend {
                    enable_tls: Some(true),
                }),
            },
            status: None,
        },
    );
    test.apply(
        &inputs.http_routes,
        mk_route(
            "ns-0",
            "route-0",
            [mk_parent_ref("gw-0")],
            [mk_rule(
                None,
                [HTTPRouteRulesBackendRefs {
                    group: Some("trellis.dev".to_string()),
                    kind: Some("Backend".to_string()),
                    ..mk_backend_ref("egress", None)
                }],
            )],
        ),
    );

    let dfp = DfpFilterConfig {
        dns_cache_name: DFP_DNS_CACHE_NAME.to_string(),
        sub_clusters: vec!["backend~ns-0~egress~0".to_string()],
    };
    let snapshot = test.snapshot("ns-0", "gw-0");
    assert_eq!(
        snapshot.listeners[0].filter_chains[0].dynamic_forward_proxy,
        Some(dfp.clone())
    );
    assert_eq!(
        snapshot.dfp_filters.get("listener~80~http"),
        Some(&dfp)
    );

    let cluster = test
        .pipeline
        .clusters
        .get("backend~ns-0~egress~0")
        .expect("cluster must exist");
    assert_eq!(cluster.cluster.discovery, DiscoveryType::ClusterProvided);
    assert!(cluster
        .cluster
        .dynamic_forward_proxy
        .as_ref()
        .is_some_and(|c| c.tls));

    // No endpoints are computed for dynamic forward proxies.
    assert!(test.pipeline.endpoints.get("backend~ns-0~egress~0").is_none());
}
