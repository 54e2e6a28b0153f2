use crate::{
    compose, content_hash, InMemoryCache, PerClientClusters, Resource, ResourceType, Snapshot,
    SnapshotCache, SnapshotMetrics, UniquelyConnectedClient, VersionedResources, Xds, MTLS_LABEL,
};
use maplit::{btreemap, btreeset};
use pretty_assertions::assert_eq;
use prometheus_client::registry::Registry;
use std::{collections::BTreeMap, sync::Arc};
use tracing::Level;
use trellis_controller_collections::Collection;
use trellis_controller_core::{
    ir::{ClusterIr, Endpoint, EndpointsForBackend, LoadBalancer, Locality},
    proxy::{
        self, ClusterResource, DiscoveryType, GatewaySnapshot, ListenerResource,
        RouteConfigResource, UpstreamTlsConfig,
    },
    ObjectSource,
};

const ROLE: &str = "trellis.dev/gateway-controller~ns-0~gw-0";
const CLUSTER: &str = "service~ns-0~web~8080";

struct TestConfig {
    generic: Collection<GatewaySnapshot>,
    clusters: Collection<ClusterIr>,
    endpoints: Collection<EndpointsForBackend>,
    xds: Xds,
    _tracing: tracing::subscriber::DefaultGuard,
}

// === Versioning ===

#[test]
fn versions_ignore_member_order() {
    let a = Resource::Listener(Arc::new(mk_listener("listener~80", 80)));
    let b = Resource::Listener(Arc::new(mk_listener("listener~443", 443)));
    let c = Resource::RouteConfig(Arc::new(mk_route_config("listener~80~http")));

    let forward = VersionedResources::from_iter([a.clone(), b.clone()]);
    let reverse = VersionedResources::from_iter([b.clone(), a.clone()]);
    assert_eq!(forward.version(), reverse.version());
    assert_eq!(forward, reverse);

    let snapshot = Snapshot::new([a.clone(), c.clone(), b]);
    let fewer = Snapshot::new([c, a]);
    assert_ne!(
        snapshot.get_version(ResourceType::Listener),
        fewer.get_version(ResourceType::Listener),
        "different member sets must have different versions"
    );
    assert_eq!(
        snapshot.get_version(ResourceType::RouteConfig),
        fewer.get_version(ResourceType::RouteConfig),
    );
}

#[test]
fn removing_a_member_restores_the_previous_version() {
    let a = Resource::Listener(Arc::new(mk_listener("listener~80", 80)));
    let b = Resource::Listener(Arc::new(mk_listener("listener~443", 443)));

    let mut resources = VersionedResources::from_iter([a.clone()]);
    let before = resources.version();
    resources.insert(b);
    assert_ne!(resources.version(), before);
    assert!(resources.remove("listener~443").is_some());
    assert_eq!(resources.version(), before);

    assert!(resources.remove("listener~80").is_some());
    assert_eq!(resources.version(), VersionedResources::default().version());
    assert!(resources.is_empty());
}

#[test]
fn replacing_a_member_updates_the_version() {
    let mut resources =
        VersionedResources::from_iter([Resource::Listener(Arc::new(mk_listener("l", 80)))]);
    let before = resources.version();

    let old = resources.insert(Resource::Listener(Arc::new(mk_listener("l", 8080))));
    assert!(old.is_some());
    assert_eq!(resources.len(), 1);
    assert_ne!(resources.version(), before);

    // Replacing with identical content leaves the version as it was.
    let after = resources.version();
    resources.insert(Resource::Listener(Arc::new(mk_listener("l", 8080))));
    assert_eq!(resources.version(), after);
}

#[test]
fn version_map_lists_each_member() {
    let listener = mk_listener("listener~80", 80);
    let hash = content_hash(&listener.name, &listener);
    let snapshot = Snapshot::new([Resource::Listener(Arc::new(listener))]);

    let versions = snapshot.version_map();
    assert_eq!(
        versions.get(&ResourceType::Listener),
        Some(&btreemap! { "listener~80".to_string() => format!("{hash:016x}") }),
    );
    assert!(std::ptr::eq(versions, snapshot.version_map()));

    assert_eq!(snapshot.count(ResourceType::Cluster), 0);
    assert!(snapshot.get_resources(ResourceType::Cluster).is_none());
    assert_eq!(
        snapshot.get_version(ResourceType::Cluster),
        "0000000000000000"
    );
}

// === Composition ===

#[test]
fn snapshots_wait_for_both_inputs() {
    let clients = Collection::<UniquelyConnectedClient>::new("clients");
    let generic = Collection::<GatewaySnapshot>::new("generic");
    let per_client = Collection::<PerClientClusters>::new("per-client");
    let composed = compose(&clients, &generic, &per_client);

    let client = mk_client(BTreeMap::new(), Locality::default());
    clients.insert(client.key(), client.clone());
    assert!(composed.is_empty());

    let snapshot = mk_snapshot(btreeset! { CLUSTER.to_string() });
    generic.insert(ROLE, snapshot.clone());
    assert!(
        composed.is_empty(),
        "no snapshot without per-client clusters"
    );

    let mut overrides = PerClientClusters {
        client_key: client.key().to_string(),
        role: ROLE.to_string(),
        revision: snapshot.cluster_revision() ^ 1,
        clusters: vec![Arc::new(mk_cluster(None))],
        endpoints: vec![],
    };
    per_client.insert(client.key(), overrides.clone());
    assert!(
        composed.is_empty(),
        "no snapshot from clusters computed against another revision"
    );

    overrides.revision = snapshot.cluster_revision();
    per_client.insert(client.key(), overrides);
    let wrapper = composed.get(client.key()).expect("snapshot must be composed");
    assert_eq!(wrapper.role, ROLE);
    assert_eq!(wrapper.snapshot.count(ResourceType::Listener), 1);
    assert_eq!(wrapper.snapshot.count(ResourceType::RouteConfig), 1);
    assert_eq!(wrapper.snapshot.count(ResourceType::Cluster), 1);

    generic.remove(ROLE);
    assert!(composed.is_empty());
}

#[test]
fn clusters_resolved_per_client() {
    let test = TestConfig::default();
    test.clusters.insert(
        CLUSTER,
        ClusterIr {
            backend: ObjectSource::service("ns-0", "web"),
            cluster: mk_cluster(Some(UpstreamTlsConfig {
                sni: Some("web.ns-0".to_string()),
                mutual_requested: true,
                client_certificate: None,
            })),
            errors: vec![],
        },
    );
    test.generic
        .insert(ROLE, mk_snapshot(btreeset! { CLUSTER.to_string() }));

    let plain = test
        .xds
        .clients
        .connect(mk_client(BTreeMap::new(), Locality::default()));
    let mtls = test.xds.clients.connect(mk_client(
        btreemap! { MTLS_LABEL.to_string() => "enabled".to_string() },
        Locality::default(),
    ));
    assert_ne!(plain.key(), mtls.key());

    let tls = |key: &str| {
        let wrapper = test.xds.snapshots.get(key).expect("snapshot must exist");
        let clusters = wrapper
            .snapshot
            .get_resources(ResourceType::Cluster)
            .expect("clusters must exist");
        match clusters.get(CLUSTER) {
            Some(Resource::Cluster(c)) => c.tls.clone().expect("tls must be configured"),
            other => panic!("unexpected cluster: {other:?}"),
        }
    };
    assert_eq!(tls(plain.key()).client_certificate, None);
    assert_eq!(
        tls(mtls.key()).client_certificate.as_deref(),
        Some("ns-0/trellis-proxy-client-tls")
    );
}

#[test]
fn snapshot_follows_new_clusters() {
    let test = TestConfig::default();
    let client = test
        .xds
        .clients
        .connect(mk_client(BTreeMap::new(), Locality::default()));
    assert!(test.xds.snapshots.get(client.key()).is_none());

    test.generic.insert(ROLE, mk_snapshot(Default::default()));
    let first = test
        .xds
        .snapshots
        .get(client.key())
        .expect("snapshot must exist");
    assert_eq!(first.snapshot.count(ResourceType::Cluster), 0);

    test.clusters.insert(
        CLUSTER,
        ClusterIr {
            backend: ObjectSource::service("ns-0", "web"),
            cluster: mk_cluster(None),
            errors: vec![],
        },
    );
    test.generic
        .insert(ROLE, mk_snapshot(btreeset! { CLUSTER.to_string() }));
    let second = test
        .xds
        .snapshots
        .get(client.key())
        .expect("snapshot must exist");
    assert_eq!(second.snapshot.count(ResourceType::Cluster), 1);
    assert_ne!(
        first.snapshot.get_version(ResourceType::Cluster),
        second.snapshot.get_version(ResourceType::Cluster)
    );
}

#[test]
fn endpoints_prioritized_by_client_locality() {
    let test = TestConfig::default();
    test.clusters.insert(
        CLUSTER,
        ClusterIr {
            backend: ObjectSource::service("ns-0", "web"),
            cluster: mk_cluster(None),
            errors: vec![],
        },
    );
    test.endpoints.insert(
        CLUSTER,
        EndpointsForBackend {
            cluster_name: CLUSTER.to_string(),
            backend: ObjectSource::service("ns-0", "web"),
            endpoints: vec![
                mk_endpoint("10.0.0.1", "us-east", "us-east-1a"),
                mk_endpoint("10.0.0.2", "us-east", "us-east-1b"),
                mk_endpoint("10.0.0.3", "eu-west", "eu-west-1a"),
                mk_endpoint("10.0.0.4", "us-east", "us-east-1a"),
            ],
        },
    );
    test.generic
        .insert(ROLE, mk_snapshot(btreeset! { CLUSTER.to_string() }));

    let client = test.xds.clients.connect(mk_client(
        BTreeMap::new(),
        mk_locality("us-east", "us-east-1a"),
    ));
    let wrapper = test
        .xds
        .snapshots
        .get(client.key())
        .expect("snapshot must exist");
    let endpoints = match wrapper
        .snapshot
        .get_resources(ResourceType::Endpoint)
        .and_then(|eps| eps.get(CLUSTER))
    {
        Some(Resource::Endpoint(eps)) => eps.clone(),
        other => panic!("unexpected endpoints: {other:?}"),
    };
    let priorities = endpoints
        .localities
        .iter()
        .map(|l| (l.priority, l.locality.zone.as_str(), l.addresses.clone()))
        .collect::<Vec<_>>();
    assert_eq!(
        priorities,
        vec![
            (
                0,
                "us-east-1a",
                vec!["10.0.0.1:8080".to_string(), "10.0.0.4:8080".to_string()]
            ),
            (1, "us-east-1b", vec!["10.0.0.2:8080".to_string()]),
            (2, "eu-west-1a", vec!["10.0.0.3:8080".to_string()]),
        ]
    );

    // A client without a known region sees every endpoint at the lowest
    // priority.
    let unknown = test
        .xds
        .clients
        .connect(mk_client(BTreeMap::new(), Locality::default()));
    let wrapper = test
        .xds
        .snapshots
        .get(unknown.key())
        .expect("snapshot must exist");
    match wrapper
        .snapshot
        .get_resources(ResourceType::Endpoint)
        .and_then(|eps| eps.get(CLUSTER))
    {
        Some(Resource::Endpoint(eps)) => {
            assert!(eps.localities.iter().all(|l| l.priority == 2));
        }
        other => panic!("unexpected endpoints: {other:?}"),
    }
}

// === Distribution ===

#[test]
fn clients_share_entries_until_last_disconnect() {
    let test = TestConfig::default();
    test.generic.insert(ROLE, mk_snapshot(Default::default()));

    let cache = Arc::new(InMemoryCache::default());
    let mut registry = Registry::default();
    let metrics = SnapshotMetrics::register(&mut registry);
    let _sync = test.xds.sync(cache.clone(), metrics.clone());

    let a = test
        .xds
        .clients
        .connect(mk_client(BTreeMap::new(), Locality::default()));
    let b = test
        .xds
        .clients
        .connect(mk_client(BTreeMap::new(), Locality::default()));
    assert_eq!(a.key(), b.key());
    assert_eq!(test.xds.clients.collection().len(), 1);

    let mut updates = cache.subscribe(a.key());
    assert!(cache.get_snapshot(a.key()).is_some());
    assert_eq!(metrics.get(a.key(), ResourceType::Listener), Some(1));
    assert_eq!(metrics.get(a.key(), ResourceType::RouteConfig), Some(1));

    drop(a);
    assert!(
        cache.get_snapshot(b.key()).is_some(),
        "snapshot must be kept while a client remains connected"
    );

    let key = b.key().to_string();
    drop(b);
    assert!(test.xds.clients.collection().is_empty());
    assert!(cache.get_snapshot(&key).is_none());
    assert!(updates.has_changed().unwrap_or(false));
    assert!(updates.borrow_and_update().is_none());
    assert_eq!(metrics.get(&key, ResourceType::Listener), Some(0));
    assert_eq!(metrics.get(&key, ResourceType::RouteConfig), Some(0));
}

#[test]
fn metrics_are_tracked_per_client() {
    let test = TestConfig::default();
    test.generic.insert(ROLE, mk_snapshot(Default::default()));

    let cache = Arc::new(InMemoryCache::default());
    let mut registry = Registry::default();
    let metrics = SnapshotMetrics::register(&mut registry);
    let _sync = test.xds.sync(cache, metrics.clone());

    let plain = test
        .xds
        .clients
        .connect(mk_client(BTreeMap::new(), Locality::default()));
    let mtls = test.xds.clients.connect(mk_client(
        btreemap! { MTLS_LABEL.to_string() => "enabled".to_string() },
        Locality::default(),
    ));
    assert_ne!(plain.key(), mtls.key());
    assert_eq!(metrics.get(plain.key(), ResourceType::Listener), Some(1));
    assert_eq!(metrics.get(mtls.key(), ResourceType::Listener), Some(1));

    let plain_key = plain.key().to_string();
    drop(plain);
    assert_eq!(
        metrics.get(mtls.key(), ResourceType::Listener),
        Some(1),
        "a disconnect must not clear another client of the same gateway"
    );
    assert_eq!(metrics.get(&plain_key, ResourceType::Listener), Some(0));

    let mut encoded = String::new();
    prometheus_client::encoding::text::encode(&mut encoded, &registry).unwrap();
    assert!(encoded.contains(&format!("client=\"{}\"", mtls.key())));
    assert!(encoded.contains("namespace=\"ns-0\""));
    assert!(encoded.contains("name=\"gw-0\""));
}

#[test]
fn server_serves_connected_clients() {
    let test = TestConfig::default();
    test.generic.insert(ROLE, mk_snapshot(Default::default()));
    let server = test.xds.serve(SnapshotMetrics::Noop);

    let client = server
        .xds
        .clients
        .connect(mk_client(BTreeMap::new(), Locality::default()));
    let mut updates = server.cache.subscribe(client.key());
    assert!(updates.borrow_and_update().is_some());

    test.generic.remove(ROLE);
    assert!(updates.has_changed().unwrap_or(false));
    assert!(updates.borrow_and_update().is_none());
}

#[test]
fn sync_replays_existing_snapshots() {
    let test = TestConfig::default();
    test.generic.insert(ROLE, mk_snapshot(Default::default()));
    let client = test
        .xds
        .clients
        .connect(mk_client(BTreeMap::new(), Locality::default()));

    let cache = Arc::new(InMemoryCache::default());
    let sync = test.xds.sync(cache.clone(), SnapshotMetrics::Noop);
    assert_eq!(cache.len(), 1);
    let cached = cache
        .get_snapshot(client.key())
        .expect("snapshot must be cached");
    let composed = test
        .xds
        .snapshots
        .get(client.key())
        .expect("snapshot must be composed");
    assert!(Arc::ptr_eq(&cached, &composed.snapshot));

    sync.unregister();
    test.generic.remove(ROLE);
    assert!(
        cache.get_snapshot(client.key()).is_some(),
        "changes after unregistering must not reach the cache"
    );
    assert_eq!(
        SnapshotMetrics::Noop.get(client.key(), ResourceType::Listener),
        None
    );
}

// === Helpers ===

impl Default for TestConfig {
    fn default() -> Self {
        let _tracing = init_tracing();
        let generic = Collection::new("generic");
        let clusters = Collection::new("clusters");
        let endpoints = Collection::new("endpoints");
        let xds = Xds::new(&generic, &clusters, &endpoints);
        Self {
            generic,
            clusters,
            endpoints,
            xds,
            _tracing,
        }
    }
}

fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .finish(),
    )
}

fn mk_client(labels: BTreeMap<String, String>, locality: Locality) -> UniquelyConnectedClient {
    UniquelyConnectedClient::new(ROLE, labels, locality, "ns-0")
}

fn mk_locality(region: &str, zone: &str) -> Locality {
    Locality {
        region: region.to_string(),
        zone: zone.to_string(),
    }
}

fn mk_endpoint(address: &str, region: &str, zone: &str) -> Endpoint {
    Endpoint {
        address: address.to_string(),
        port: 8080,
        locality: mk_locality(region, zone),
    }
}

fn mk_listener(name: &str, port: u16) -> ListenerResource {
    ListenerResource {
        name: name.to_string(),
        address: "0.0.0.0".to_string(),
        port,
        filter_chains: vec![],
    }
}

fn mk_route_config(name: &str) -> RouteConfigResource {
    RouteConfigResource {
        name: name.to_string(),
        virtual_hosts: vec![],
    }
}

fn mk_cluster(tls: Option<UpstreamTlsConfig>) -> ClusterResource {
    ClusterResource {
        name: CLUSTER.to_string(),
        discovery: DiscoveryType::Eds,
        lb_policy: LoadBalancer::RoundRobin,
        connect_timeout_ms: proxy::DEFAULT_CONNECT_TIMEOUT_MS,
        tls,
        per_connection_buffer_limit: None,
        static_hosts: vec![],
        dynamic_forward_proxy: None,
        inference_extension: None,
    }
}

fn mk_snapshot(cluster_names: std::collections::BTreeSet<String>) -> GatewaySnapshot {
    GatewaySnapshot {
        role: ROLE.to_string(),
        gateway: ObjectSource::gateway("ns-0", "gw-0"),
        listeners: vec![Arc::new(mk_listener("listener~80", 80))],
        route_configs: vec![Arc::new(mk_route_config("listener~80~http"))],
        cluster_names,
        dfp_filters: Default::default(),
        errors: vec![],
    }
}
