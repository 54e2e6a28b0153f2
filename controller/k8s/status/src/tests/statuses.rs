use super::*;
use crate::{backend_statuses, gateway_statuses, policy_statuses, route_statuses};
use pretty_assertions::assert_eq;
use rstest::rstest;
use trellis_controller_core::{
    conditions::{self, reasons},
    ir::PolicyKind,
    DEFAULT_CONTROLLER_NAME,
};
use trellis_controller_k8s_api::{
    backend::{BackendSpec, BackendType, Host, StaticBackend},
    gateway::gateways::{
        GatewayListenersAllowedRoutes, GatewayListenersAllowedRoutesNamespaces,
        GatewayListenersAllowedRoutesNamespacesFrom, GatewayStatusListenersSupportedKinds,
    },
    policy::{LocalPolicyTargetReference, TrafficPolicySpec},
    Backend, TrafficPolicy,
};

/// `(type, status, reason, message)` for each condition.
fn summary(conditions: &[Condition]) -> Vec<(&str, &str, &str, &str)> {
    conditions
        .iter()
        .map(|c| {
            (
                c.type_.as_str(),
                c.status.as_str(),
                c.reason.as_str(),
                c.message.as_str(),
            )
        })
        .collect()
}

fn mk_service(ns: &str, name: &str, port: i32) -> k8s::Service {
    k8s::Service {
        metadata: mk_meta(ns, name),
        spec: Some(k8s::api::core::v1::ServiceSpec {
            ports: Some(vec![k8s::api::core::v1::ServicePort {
                name: Some("http".to_string()),
                port,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_traffic_policy(
    name: &str,
    weight: i32,
    target: (&str, &str),
    timeout: &str,
) -> TrafficPolicy {
    TrafficPolicy {
        metadata: mk_meta("ns-0", name),
        spec: TrafficPolicySpec {
            target_refs: vec![LocalPolicyTargetReference {
                group: GATEWAY_API_GROUP.to_string(),
                kind: target.0.to_string(),
                name: target.1.to_string(),
                section_name: None,
            }],
            weight: Some(weight),
            timeout: Some(timeout.to_string()),
            ..Default::default()
        },
        status: None,
    }
}

#[test]
fn gateway_status_reports_listeners() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;
    let statuses = gateway_statuses(&test.pipeline.gateways);

    let mut gateway = mk_gateway("ns-0", "gw-0", [("http", 80, "HTTP"), ("tcp", 9000, "TCP")]);
    gateway.metadata.generation = Some(3);
    test.apply(&inputs.gateways, gateway);
    test.apply(&inputs.services, mk_service("ns-0", "svc-0", 8080));
    test.apply(
        &inputs.http_routes,
        mk_route(
            "ns-0",
            "route-0",
            [mk_parent_ref("gw-0")],
            [mk_backend_ref("svc-0", Some(8080))],
        ),
    );

    let status = statuses.get("ns-0/gw-0").expect("status must exist");
    let gateway_conditions = status.status.conditions.as_deref().unwrap_or_default();
    assert_eq!(
        summary(gateway_conditions),
        vec![
            (conditions::ACCEPTED, "True", reasons::ACCEPTED, ""),
            (conditions::PROGRAMMED, "True", reasons::PROGRAMMED, ""),
        ]
    );
    assert!(gateway_conditions
        .iter()
        .all(|c| c.observed_generation == Some(3)));

    let listeners = status.status.listeners.as_deref().unwrap_or_default();
    let http = &listeners[0];
    assert_eq!(http.name, "http");
    assert_eq!(http.attached_routes, 1);
    assert_eq!(
        http.supported_kinds,
        vec![GatewayStatusListenersSupportedKinds {
            group: Some(GATEWAY_API_GROUP.to_string()),
            kind: "HTTPRoute".to_string(),
        }]
    );

    let tcp = &listeners[1];
    assert_eq!(tcp.attached_routes, 0);
    assert!(tcp.supported_kinds.is_empty());
    assert_eq!(
        summary(&tcp.conditions),
        vec![
            (
                conditions::ACCEPTED,
                "False",
                reasons::UNSUPPORTED_PROTOCOL,
                "error: unsupported protocol TCP",
            ),
            (conditions::RESOLVED_REFS, "True", reasons::RESOLVED_REFS, ""),
            (
                conditions::PROGRAMMED,
                "False",
                reasons::INVALID,
                "error: unsupported protocol TCP",
            ),
        ]
    );
}

#[test]
fn gateway_without_usable_listeners_is_not_programmed() {
    let test = TestConfig::default();
    let statuses = gateway_statuses(&test.pipeline.gateways);

    test.apply(
        &test.pipeline.inputs.gateways,
        mk_gateway("ns-0", "gw-0", [("udp", 53, "UDP")]),
    );

    let status = statuses.get("ns-0/gw-0").expect("status must exist");
    assert_eq!(
        summary(status.status.conditions.as_deref().unwrap_or_default())[1],
        (
            conditions::PROGRAMMED,
            "False",
            reasons::INVALID,
            "no listener can be programmed",
        )
    );
}

#[test]
fn gateways_of_other_classes_have_no_status() {
    let test = TestConfig::default();
    let statuses = gateway_statuses(&test.pipeline.gateways);

    let mut gateway = mk_gateway("ns-0", "gw-0", [("http", 80, "HTTP")]);
    gateway.spec.gateway_class_name = "other".to_string();
    test.apply(&test.pipeline.inputs.gateways, gateway);

    assert!(statuses.get("ns-0/gw-0").is_none());
}

#[test]
fn route_status_per_parent() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;
    let statuses = route_statuses(
        test.pipeline.config.clone(),
        &test.pipeline.routes.routes,
        &test.pipeline.gateways,
    );

    test.apply(&inputs.gateways, mk_gateway("ns-0", "gw-0", [("http", 80, "HTTP")]));
    let wrong_section = HTTPRouteParentRefs {
        section_name: Some("https".to_string()),
        ..mk_parent_ref("gw-0")
    };
    test.apply(
        &inputs.http_routes,
        mk_route(
            "ns-0",
            "route-0",
            [
                mk_parent_ref("gw-0"),
                wrong_section.clone(),
                mk_parent_ref("not-ours"),
            ],
            [mk_backend_ref("svc-0", Some(8080))],
        ),
    );

    let status = statuses.get("ns-0/route-0").expect("status must exist");
    let parents = &status.status.parents;
    assert_eq!(parents.len(), 2, "unknown gateways are left alone");
    assert!(parents
        .iter()
        .all(|p| p.controller_name == DEFAULT_CONTROLLER_NAME));

    let resolved = (
        conditions::RESOLVED_REFS,
        "False",
        reasons::BACKEND_NOT_FOUND,
        "error: backend ns-0/svc-0 not found",
    );
    assert_eq!(parents[0].parent_ref.name, "gw-0");
    assert_eq!(parents[0].parent_ref.section_name, None);
    assert_eq!(
        summary(parents[0].conditions.as_deref().unwrap_or_default()),
        vec![(conditions::ACCEPTED, "True", reasons::ACCEPTED, ""), resolved]
    );
    assert_eq!(parents[1].parent_ref.section_name.as_deref(), Some("https"));
    assert_eq!(
        summary(parents[1].conditions.as_deref().unwrap_or_default()),
        vec![
            (
                conditions::ACCEPTED,
                "False",
                reasons::NO_MATCHING_PARENT,
                "no listener matches the parent reference",
            ),
            resolved,
        ]
    );

    // Once the backend exists, references resolve.
    test.apply(&inputs.services, mk_service("ns-0", "svc-0", 8080));
    let status = statuses.get("ns-0/route-0").expect("status must exist");
    assert_eq!(
        summary(status.status.parents[0].conditions.as_deref().unwrap_or_default())[1],
        (conditions::RESOLVED_REFS, "True", reasons::RESOLVED_REFS, "")
    );
}

#[test]
fn route_in_other_namespace_is_not_allowed() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;
    let statuses = route_statuses(
        test.pipeline.config.clone(),
        &test.pipeline.routes.routes,
        &test.pipeline.gateways,
    );

    let mut gateway = mk_gateway("ns-0", "gw-0", [("http", 80, "HTTP")]);
    test.apply(&inputs.gateways, gateway.clone());
    let parent = HTTPRouteParentRefs {
        namespace: Some("ns-0".to_string()),
        ..mk_parent_ref("gw-0")
    };
    test.apply(
        &inputs.http_routes,
        mk_route("ns-1", "route-0", [parent], []),
    );

    let status = statuses.get("ns-1/route-0").expect("status must exist");
    assert_eq!(
        summary(status.status.parents[0].conditions.as_deref().unwrap_or_default())[0],
        (
            conditions::ACCEPTED,
            "False",
            reasons::NOT_ALLOWED_BY_LISTENERS,
            "no listener accepts this route",
        )
    );

    // A listener accepting routes from all namespaces admits it.
    gateway.spec.listeners[0].allowed_routes = Some(GatewayListenersAllowedRoutes {
        namespaces: Some(GatewayListenersAllowedRoutesNamespaces {
            from: Some(GatewayListenersAllowedRoutesNamespacesFrom::All),
            ..Default::default()
        }),
        ..Default::default()
    });
    test.apply(&inputs.gateways, gateway);
    let status = statuses.get("ns-1/route-0").expect("status must exist");
    assert_eq!(
        summary(status.status.parents[0].conditions.as_deref().unwrap_or_default())[0],
        (conditions::ACCEPTED, "True", reasons::ACCEPTED, "")
    );
}

#[test]
fn listener_namespace_selectors_are_rejected() {
    let test = TestConfig::default();
    let statuses = gateway_statuses(&test.pipeline.gateways);

    let mut gateway = mk_gateway("ns-0", "gw-0", [("http", 80, "HTTP")]);
    gateway.spec.listeners[0].allowed_routes = Some(GatewayListenersAllowedRoutes {
        namespaces: Some(GatewayListenersAllowedRoutesNamespaces {
            from: Some(GatewayListenersAllowedRoutesNamespacesFrom::Selector),
            ..Default::default()
        }),
        ..Default::default()
    });
    test.apply(&test.pipeline.inputs.gateways, gateway);

    let status = statuses.get("ns-0/gw-0").expect("status must exist");
    let listeners = status.status.listeners.as_deref().unwrap_or_default();
    assert_eq!(
        summary(&listeners[0].conditions)[0],
        (
            conditions::ACCEPTED,
            "False",
            reasons::INVALID,
            "error: allowedRoutes namespace selectors are not supported",
        )
    );
}

#[rstest]
#[case::winner("policy-high", "True", reasons::ACCEPTED, "applied timeout")]
#[case::overridden(
    "policy-low",
    "False",
    reasons::CONFLICTED,
    "every field is overridden by a higher-priority policy"
)]
#[case::missing_target(
    "policy-missing",
    "False",
    reasons::TARGET_NOT_FOUND,
    "HTTPRoute ns-0/route-x not found"
)]
#[case::invalid("policy-invalid", "False", reasons::INVALID, "error: invalid timeout \"soon\"")]
fn policy_status_reports_applied_fields(
    #[case] policy: &str,
    #[case] status: &str,
    #[case] reason: &str,
    #[case] message: &str,
) {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;
    let statuses = policy_statuses(&test.pipeline, PolicyKind::Traffic);

    test.apply(
        &inputs.http_routes,
        mk_route("ns-0", "route-0", [mk_parent_ref("gw-0")], []),
    );
    for (name, weight, target, timeout) in [
        ("policy-high", 10, "route-0", "2s"),
        ("policy-low", 0, "route-0", "5s"),
        ("policy-missing", 0, "route-x", "5s"),
        ("policy-invalid", 0, "route-0", "soon"),
    ] {
        test.apply(
            &inputs.traffic_policies,
            mk_traffic_policy(name, weight, ("HTTPRoute", target), timeout),
        );
    }

    let desired = statuses
        .get(&object_key("ns-0", policy))
        .expect("status must exist");
    let ancestors = &desired.status.ancestors;
    assert_eq!(ancestors.len(), 1);
    assert_eq!(ancestors[0].controller_name, DEFAULT_CONTROLLER_NAME);
    assert_eq!(ancestors[0].ancestor_ref.kind.as_deref(), Some("HTTPRoute"));

    let conditions = &ancestors[0].conditions;
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0].type_, conditions::ACCEPTED);
    assert_eq!(conditions[0].status, status);
    assert_eq!(conditions[0].reason, reason);
    assert!(
        conditions[0].message.starts_with(message),
        "unexpected message: {}",
        conditions[0].message
    );
}

#[test]
fn policy_statuses_are_split_by_kind() {
    let test = TestConfig::default();
    let listener_statuses = policy_statuses(&test.pipeline, PolicyKind::Listener);

    test.apply(
        &test.pipeline.inputs.traffic_policies,
        mk_traffic_policy("policy-0", 0, ("Gateway", "gw-0"), "1s"),
    );

    assert!(listener_statuses.get("ns-0/policy-0").is_none());
}

#[test]
fn gateway_policy_status_reads_listener_provenance() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;
    let statuses = policy_statuses(&test.pipeline, PolicyKind::Traffic);

    test.apply(
        &inputs.traffic_policies,
        mk_traffic_policy("policy-0", 0, ("Gateway", "gw-0"), "1s"),
    );
    let status = statuses.get("ns-0/policy-0").expect("status must exist");
    assert_eq!(
        status.status.ancestors[0].conditions[0].reason,
        reasons::TARGET_NOT_FOUND
    );

    test.apply(&inputs.gateways, mk_gateway("ns-0", "gw-0", [("http", 80, "HTTP")]));
    let status = statuses.get("ns-0/policy-0").expect("status must exist");
    assert_eq!(
        summary(&status.status.ancestors[0].conditions),
        vec![(
            conditions::ACCEPTED,
            "True",
            reasons::ACCEPTED,
            "applied timeout"
        )]
    );
}

#[test]
fn backend_status_reports_errors() {
    let test = TestConfig::default();
    let statuses = backend_statuses(&test.pipeline);

    let mut backend = Backend {
        metadata: mk_meta("ns-0", "backend-0"),
        spec: BackendSpec {
            type_: BackendType::Static,
            r#static: Some(StaticBackend { hosts: vec![] }),
            dynamic_forward_proxy: None,
        },
        status: None,
    };
    test.apply(&test.pipeline.inputs.backends, backend.clone());

    let status = statuses.get("ns-0/backend-0").expect("status must exist");
    assert_eq!(
        summary(&status.status.conditions),
        vec![
            (
                conditions::ACCEPTED,
                "False",
                reasons::INVALID,
                "error: static backend must specify at least one host",
            ),
            (conditions::RESOLVED_REFS, "True", reasons::RESOLVED_REFS, ""),
        ]
    );

    backend.spec.r#static = Some(StaticBackend {
        hosts: vec![Host {
            host: "example.com".to_string(),
            port: 443,
        }],
    });
    test.apply(&test.pipeline.inputs.backends, backend);
    let status = statuses.get("ns-0/backend-0").expect("status must exist");
    assert_eq!(
        summary(&status.status.conditions)[0],
        (conditions::ACCEPTED, "True", reasons::ACCEPTED, "")
    );
}
