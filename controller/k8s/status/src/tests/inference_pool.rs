use super::*;
use crate::{
    inference_pool::{DEFAULT_PARENT_KIND, DEFAULT_PARENT_NAME},
    pool_parents_eq, PoolStatusIndex, PoolStatuses,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use trellis_controller_core::{conditions, ObjectSource};
use trellis_controller_k8s_api::inference::{
    InferencePoolStatus, PoolParentReference, PoolParentStatus,
};

fn default_parent_ref() -> PoolParentReference {
    PoolParentReference {
        group: Some(INFERENCE_API_GROUP.to_string()),
        kind: DEFAULT_PARENT_KIND.to_string(),
        namespace: None,
        name: DEFAULT_PARENT_NAME.to_string(),
    }
}

/// Each parent's conditions as `(type, status, message)`.
fn parent_conditions(
    status: &InferencePoolStatus,
) -> Vec<(PoolParentReference, Vec<[String; 3]>)> {
    status
        .parent
        .iter()
        .map(|p| {
            let conditions = p
                .conditions
                .iter()
                .map(|c| [c.type_.clone(), c.status.clone(), c.message.clone()])
                .collect();
            (p.parent_ref.clone(), conditions)
        })
        .collect()
}

fn cond(type_: &str, status: &str, message: &str) -> [String; 3] {
    [type_.to_string(), status.to_string(), message.to_string()]
}

fn mk_route_with_uid(mut route: HttpRoute, uid: &str) -> HttpRoute {
    route.metadata.uid = Some(uid.to_string());
    route
}

#[test]
fn unreferenced_pool_has_no_parents() {
    let test = TestConfig::default();
    let pools = PoolStatuses::new(&test.pipeline.inputs);

    test.apply(&test.pipeline.inputs.inference_pools, mk_pool("ns-0", "my-pool", 8000));

    let status = pools
        .statuses
        .get("ns-0/my-pool")
        .expect("pool status must exist");
    assert_eq!(status.status, InferencePoolStatus::default());
}

#[test]
fn referencing_gateway_becomes_parent() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;
    let pools = PoolStatuses::new(inputs);

    test.apply(&inputs.inference_pools, mk_pool("ns-0", "my-pool", 8000));
    test.apply(
        &inputs.http_routes,
        mk_route_with_uid(
            mk_route("ns-0", "route-0", [mk_parent_ref("gw1")], [mk_pool_ref("my-pool")]),
            "uid-0",
        ),
    );

    let status = pools
        .status(&ObjectSource::inference_pool("ns-0", "my-pool"))
        .expect("pool must exist");
    assert_eq!(
        parent_conditions(&status),
        vec![(
            gateway_parent_ref("ns-0", "gw1"),
            vec![
                cond(conditions::ACCEPTED, "True", ""),
                cond(conditions::RESOLVED_REFS, "True", ""),
            ],
        )]
    );
}

#[test]
fn pool_errors_are_reported_on_every_parent() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;
    let pools = PoolStatuses::new(inputs);

    test.apply(
        &inputs.http_routes,
        mk_route("ns-0", "route-0", [mk_parent_ref("gw1")], [mk_pool_ref("my-pool")]),
    );
    let mut pool = mk_pool("ns-0", "my-pool", 8000);
    pool.spec.selector.clear();
    test.apply(&inputs.inference_pools, pool);

    let message = "error: selector must not be empty";
    let status = pools
        .statuses
        .get("ns-0/my-pool")
        .expect("pool status must exist");
    assert_eq!(
        parent_conditions(&status.status),
        vec![
            (
                gateway_parent_ref("ns-0", "gw1"),
                vec![
                    cond(conditions::ACCEPTED, "True", ""),
                    cond(conditions::RESOLVED_REFS, "False", message),
                ],
            ),
            (
                default_parent_ref(),
                vec![cond(conditions::RESOLVED_REFS, "False", message)],
            ),
        ]
    );

    // Fixing the pool removes the default parent.
    test.apply(&inputs.inference_pools, mk_pool("ns-0", "my-pool", 8000));
    let status = pools
        .statuses
        .get("ns-0/my-pool")
        .expect("pool status must exist");
    assert_eq!(status.status.parent.len(), 1);
    assert_eq!(
        status.status.parent[0].parent_ref,
        gateway_parent_ref("ns-0", "gw1")
    );
}

#[test]
fn invalid_pool_without_routes_reports_default_parent() {
    let test = TestConfig::default();
    let pools = PoolStatuses::new(&test.pipeline.inputs);

    test.apply(&test.pipeline.inputs.inference_pools, mk_pool("ns-0", "my-pool", 0));

    let status = pools
        .status(&ObjectSource::inference_pool("ns-0", "my-pool"))
        .expect("pool must exist");
    assert_eq!(
        parent_conditions(&status),
        vec![(
            default_parent_ref(),
            vec![cond(
                conditions::RESOLVED_REFS,
                "False",
                "error: targetPortNumber 0 is outside the range 1-65535",
            )],
        )]
    );
}

#[test]
fn deleting_route_removes_parent() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;
    let pools = PoolStatuses::new(inputs);

    test.apply(&inputs.inference_pools, mk_pool("ns-0", "my-pool", 8000));
    test.apply(
        &inputs.http_routes,
        mk_route_with_uid(
            mk_route("ns-0", "route-0", [mk_parent_ref("gw1")], [mk_pool_ref("my-pool")]),
            "uid-0",
        ),
    );
    test.apply(
        &inputs.http_routes,
        mk_route_with_uid(
            mk_route("ns-0", "route-1", [mk_parent_ref("gw2")], [mk_pool_ref("my-pool")]),
            "uid-1",
        ),
    );
    let pool = ObjectSource::inference_pool("ns-0", "my-pool");
    assert_eq!(pools.status(&pool).expect("pool must exist").parent.len(), 2);

    test.delete(&inputs.http_routes, "ns-0", "route-1");
    let status = pools.status(&pool).expect("pool must exist");
    assert_eq!(
        status
            .parent
            .iter()
            .map(|p| p.parent_ref.clone())
            .collect::<Vec<_>>(),
        vec![gateway_parent_ref("ns-0", "gw1")]
    );

    test.delete(&inputs.http_routes, "ns-0", "route-0");
    let status = pools
        .statuses
        .get("ns-0/my-pool")
        .expect("pool status must exist");
    assert!(status.status.parent.is_empty());
}

#[test]
fn routes_in_other_namespaces_are_ignored() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;
    let pools = PoolStatuses::new(inputs);

    test.apply(&inputs.inference_pools, mk_pool("ns-0", "my-pool", 8000));
    let mut pool_ref = mk_pool_ref("my-pool");
    pool_ref.namespace = Some("ns-0".to_string());
    test.apply(
        &inputs.http_routes,
        mk_route("ns-1", "route-0", [mk_parent_ref("gw1")], [pool_ref]),
    );

    let status = pools
        .status(&ObjectSource::inference_pool("ns-0", "my-pool"))
        .expect("pool must exist");
    assert!(status.parent.is_empty());
}

#[test]
fn deleting_pool_removes_status() {
    let test = TestConfig::default();
    let inputs = &test.pipeline.inputs;
    let pools = PoolStatuses::new(inputs);

    test.apply(&inputs.inference_pools, mk_pool("ns-0", "my-pool", 8000));
    assert!(pools.statuses.get("ns-0/my-pool").is_some());

    test.delete(&inputs.inference_pools, "ns-0", "my-pool");
    assert!(pools.statuses.get("ns-0/my-pool").is_none());
}

#[test]
fn stale_delete_keeps_replacement_route() {
    let mut index = PoolStatusIndex::default();
    let pool = mk_pool("ns-0", "my-pool", 8000);
    let source = index.apply_pool(&pool);

    let old = mk_route_with_uid(
        mk_route("ns-0", "route-0", [mk_parent_ref("gw1")], [mk_pool_ref("my-pool")]),
        "uid-old",
    );
    let new = mk_route_with_uid(old.clone(), "uid-new");
    index.apply_route(&new);

    assert!(index.delete_route(&old).is_empty());
    assert_eq!(index.status(&source).expect("pool must exist").parent.len(), 1);

    assert_eq!(index.delete_route(&new), BTreeSet::from([source.clone()]));
    assert!(index
        .status(&source)
        .expect("pool must exist")
        .parent
        .is_empty());
}

#[test]
fn parent_comparison_ignores_order() {
    let accepted = condition(conditions::ACCEPTED, true, "Accepted", "", None);
    let resolved = condition(conditions::RESOLVED_REFS, true, "ResolvedRefs", "", None);
    let gw1 = |conditions: Vec<Condition>| PoolParentStatus {
        parent_ref: gateway_parent_ref("ns-0", "gw1"),
        conditions,
    };
    let gw2 = |conditions: Vec<Condition>| PoolParentStatus {
        parent_ref: gateway_parent_ref("ns-0", "gw2"),
        conditions,
    };

    let a = vec![
        gw1(vec![accepted.clone(), resolved.clone()]),
        gw2(vec![accepted.clone(), resolved.clone()]),
    ];
    let b = vec![
        gw2(vec![resolved.clone(), accepted.clone()]),
        gw1(vec![resolved.clone(), accepted.clone()]),
    ];
    assert!(pool_parents_eq(&a, &b));

    let mut not_resolved = resolved.clone();
    not_resolved.status = "False".to_string();
    let c = vec![
        gw2(vec![accepted.clone(), resolved.clone()]),
        gw1(vec![accepted.clone(), not_resolved]),
    ];
    assert!(!pool_parents_eq(&a, &c));
    assert!(!pool_parents_eq(&a, &a[..1]));
}
