use crate::{
    index::{self, Config, Feed, Pipeline},
    k8s, lease, status,
    xds::{SnapshotMetrics, Xds, XdsServer},
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::{runtime::watcher, Client, Resource};
use prometheus_client::registry::Registry;
use std::future::Future;
use tokio::time::Duration;
use tracing::{info, info_span, Instrument};

const RECONCILIATION_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[clap(name = "trellis", about = "A Gateway API controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "trellis=info,warn",
        env = "TRELLIS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Written to the status of the routes and policies this controller
    /// reports on.
    #[clap(long, default_value = trellis_controller_core::DEFAULT_CONTROLLER_NAME)]
    controller_name: String,

    /// Only Gateways of these classes are served.
    #[clap(long = "gateway-class", default_value = "trellis")]
    gateway_classes: Vec<String>,

    #[clap(long, default_value = "trellis-system")]
    control_plane_namespace: String,

    #[clap(long, default_value = "trellis-controller")]
    controller_deployment_name: String,

    #[clap(long, default_value = "5")]
    status_retry_attempts: u32,

    #[clap(long, default_value = "20")]
    status_retry_base_delay_ms: u64,

    /// The maximum number of status writes to buffer per resource kind.
    #[clap(long, default_value = "10000")]
    status_queue_size: usize,

    /// Disables the per-client snapshot resource gauges.
    #[clap(long)]
    disable_metrics: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    /// Runs the controller without serving proxies; composed snapshots are
    /// kept in the in-memory cache only.
    pub async fn run(self) -> Result<()> {
        self.run_with(|_| async { Ok(()) }).await
    }

    /// Runs the controller, handing the snapshot cache and connected-client
    /// registry to `serve` so that a transport can serve proxies from them.
    pub async fn run_with<F, Fut>(self, serve: F) -> Result<()>
    where
        F: FnOnce(XdsServer) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            controller_name,
            gateway_classes,
            control_plane_namespace,
            controller_deployment_name,
            status_retry_attempts,
            status_retry_base_delay_ms,
            status_queue_size,
            disable_metrics,
        } = self;

        let pipeline = Pipeline::new(Config {
            controller_name,
            gateway_classes,
        });
        let xds = Xds::new(&pipeline.snapshots, &pipeline.clusters, &pipeline.endpoints);

        let mut prom = <Registry>::default();
        index::metrics::register(prom.sub_registry_with_prefix("index"), pipeline.clone());
        let status_metrics =
            status::ControllerMetrics::register(prom.sub_registry_with_prefix("resource_status"));
        let snapshot_metrics = if disable_metrics {
            SnapshotMetrics::Noop
        } else {
            SnapshotMetrics::register(prom.sub_registry_with_prefix("xds"))
        };
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("failed to read the HOSTNAME environment variable")?;

        let claims = lease::init(
            &runtime,
            &control_plane_namespace,
            &controller_deployment_name,
            &hostname,
        )
        .await?;

        // Spawn resource watches.

        let inputs = &pipeline.inputs;
        macro_rules! watch {
            ($kind:ty, $collection:expr, $span:literal) => {{
                let watch = runtime.watch_all::<$kind>(watcher::Config::default());
                tokio::spawn(
                    kubert::index::namespaced(Feed::shared(&$collection), watch)
                        .instrument(info_span!($span)),
                );
            }};
        }

        watch!(k8s::Gateway, inputs.gateways, "gateways");
        watch!(k8s::HttpRoute, inputs.http_routes, "httproutes");
        watch!(k8s::ReferenceGrant, inputs.reference_grants, "referencegrants");
        watch!(k8s::Service, inputs.services, "services");
        watch!(k8s::Pod, inputs.pods, "pods");
        watch!(k8s::Backend, inputs.backends, "backends");
        watch!(k8s::TrafficPolicy, inputs.traffic_policies, "trafficpolicies");
        watch!(
            k8s::BackendConfigPolicy,
            inputs.backend_config_policies,
            "backendconfigpolicies"
        );
        watch!(k8s::ListenerPolicy, inputs.listener_policies, "listenerpolicies");

        // InferencePools are served only when their CRD is installed.
        if api_resource_exists::<k8s::InferencePool>(&runtime.client()).await {
            watch!(k8s::InferencePool, inputs.inference_pools, "inferencepools");
        } else {
            tracing::warn!("InferencePool resource kind not found, skipping watches");
            inputs.inference_pools.mark_synced();
        }

        // Push composed snapshots to the cache that proxies are served from.
        let server = xds.serve(snapshot_metrics);
        tokio::spawn(
            {
                let serve = serve(server);
                async move {
                    if let Err(error) = serve.await {
                        tracing::error!(%error, "Proxy transport failed");
                    }
                }
            }
            .instrument(info_span!("xds")),
        );

        // Write statuses while this replica holds the write lease, once the
        // initial state of every input is known.
        let statuses = status::StatusControllers::new(
            &pipeline,
            &status::KubeStatusClients::new(runtime.client(), "trellis-controller"),
            status::Params {
                retry: status::RetryPolicy {
                    max_attempts: status_retry_attempts.max(1),
                    base_delay: Duration::from_millis(status_retry_base_delay_ms),
                    ..Default::default()
                },
                queue_size: status_queue_size,
            },
            status_metrics,
        );
        statuses.spawn(RECONCILIATION_PERIOD);
        tokio::spawn(
            {
                let inputs = pipeline.inputs.clone();
                async move {
                    inputs.wait_until_synced().await;
                    info!("Inputs synced");
                    statuses.follow_claims(claims, hostname).await;
                }
            }
            .instrument(info_span!("status_controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
