//! Backend objects: Service ports, Backend resources and InferencePools,
//! each with its merged BackendConfigPolicy.

use crate::{inputs::Inputs, policies::Policies};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::sync::Arc;
use trellis_controller_collections::{Collection, HandlerContext, Index};
use trellis_controller_core::{
    ir::{
        validate_pool, BackendData, BackendObjectIr, BackendPolicyIr, ExtensionRef,
        InferencePoolIr, PolicyAtt, PolicyIr, StaticHost,
    },
    merge::{self, MergeOrigins, MergeStrategy},
    ObjectSource,
};
use trellis_controller_k8s_api::{backend::BackendType, Backend, InferencePool, Service};

/// The port an endpoint picker listens on when the pool does not say.
const DEFAULT_EXTENSION_PORT: u16 = 9002;

#[derive(Clone, Debug)]
pub struct Backends {
    pub objects: Collection<BackendObjectIr>,
    pub by_source: Index<BackendObjectIr>,
}

impl Backends {
    pub fn new(inputs: &Inputs, policies: &Policies) -> Self {
        let services = {
            let policies = policies.clone();
            inputs
                .services
                .derive_many("service-backends", move |ctx, svc| {
                    service_backends(ctx, &policies, svc)
                })
        };
        let backends = {
            let policies = policies.clone();
            inputs
                .backends
                .derive_one("backend-backends", move |ctx, backend| {
                    Some(backend_object(ctx, &policies, backend))
                })
        };
        let pools = {
            let policies = policies.clone();
            inputs
                .inference_pools
                .derive_one("inferencepool-backends", move |ctx, pool| {
                    Some(pool_backend(ctx, &policies, pool))
                })
        };

        let objects = Collection::join("backends", &[services, backends, pools]);
        let by_source = objects.index("backends-by-source", |backend| {
            vec![backend.source.to_string()]
        });
        Self { objects, by_source }
    }

    /// Looks up every backend object for `source`, ordered by cluster name.
    pub fn lookup(
        &self,
        ctx: &mut HandlerContext<'_>,
        source: &ObjectSource,
    ) -> Vec<Arc<BackendObjectIr>> {
        ctx.fetch_indexed(&self.by_source, &source.to_string())
    }
}

fn merged_policy(
    ctx: &mut HandlerContext<'_>,
    policies: &Policies,
    source: &ObjectSource,
    strategy: MergeStrategy,
    port_section: Option<(Option<&str>, u16)>,
) -> (BackendPolicyIr, MergeOrigins) {
    let atts = policies
        .attachments(ctx, source)
        .into_iter()
        .filter(|att| match (att.section.as_deref(), port_section) {
            (None, _) => true,
            (Some(section), Some((name, port))) => {
                Some(section) == name || section == port.to_string()
            }
            (Some(_), None) => false,
        })
        .collect::<Vec<PolicyAtt>>();
    merge::merge_attachments(&atts, strategy, PolicyIr::as_backend_config)
}

fn service_backends(
    ctx: &mut HandlerContext<'_>,
    policies: &Policies,
    svc: &Service,
) -> Vec<BackendObjectIr> {
    let source = ObjectSource::service(svc.namespace().unwrap_or_default(), svc.name_unchecked());
    let strategy = MergeStrategy::from_annotations(&source, svc.annotations());
    let Some(spec) = svc.spec.as_ref() else {
        return Vec::new();
    };
    let selector = spec.selector.clone().unwrap_or_default();

    let mut backends = Vec::new();
    for svc_port in spec.ports.iter().flatten() {
        let Ok(port) = u16::try_from(svc_port.port) else {
            tracing::debug!(service = %source, port = svc_port.port, "Ignoring invalid port");
            continue;
        };
        // Named target ports cannot be resolved without the pods' container
        // ports; they fall back to the service port.
        let target_port = match svc_port.target_port.as_ref() {
            Some(IntOrString::Int(p)) => u16::try_from(*p).unwrap_or(port),
            _ => port,
        };
        let (policy, origins) = merged_policy(
            ctx,
            policies,
            &source,
            strategy,
            Some((svc_port.name.as_deref(), port)),
        );
        backends.push(BackendObjectIr {
            source: source.clone(),
            port,
            data: BackendData::Service {
                selector: selector.clone(),
                target_port,
            },
            policy,
            origins,
            errors: Vec::new(),
        });
    }
    backends
}

fn backend_object(
    ctx: &mut HandlerContext<'_>,
    policies: &Policies,
    backend: &Backend,
) -> BackendObjectIr {
    let source =
        ObjectSource::backend(backend.namespace().unwrap_or_default(), backend.name_unchecked());
    let strategy = MergeStrategy::from_annotations(&source, backend.annotations());
    let (policy, origins) = merged_policy(ctx, policies, &source, strategy, None);

    let mut errors = Vec::new();
    let data = match backend.spec.type_ {
        BackendType::Static => {
            let hosts = backend
                .spec
                .r#static
                .iter()
                .flat_map(|s| s.hosts.iter())
                .map(|h| StaticHost {
                    host: h.host.clone(),
                    port: h.port,
                })
                .collect::<Vec<_>>();
            if hosts.is_empty() {
                errors.push("static backend must specify at least one host".to_string());
            }
            BackendData::Static { hosts }
        }
        BackendType::DynamicForwardProxy => BackendData::DynamicForwardProxy {
            tls: backend
                .spec
                .dynamic_forward_proxy
                .as_ref()
                .and_then(|dfp| dfp.enable_tls)
                .unwrap_or(false),
        },
    };

    BackendObjectIr {
        source,
        port: 0,
        data,
        policy,
        origins,
        errors,
    }
}

fn pool_backend(
    ctx: &mut HandlerContext<'_>,
    policies: &Policies,
    pool: &InferencePool,
) -> BackendObjectIr {
    let source =
        ObjectSource::inference_pool(pool.namespace().unwrap_or_default(), pool.name_unchecked());
    let strategy = MergeStrategy::from_annotations(&source, pool.annotations());
    let (policy, origins) = merged_policy(ctx, policies, &source, strategy, None);

    let spec = &pool.spec;
    let errors = validate_pool(
        &spec.selector,
        spec.target_port_number,
        spec.extension_ref.as_ref().map(|ext| ext.name.as_str()),
    );
    let target_port = u16::try_from(spec.target_port_number).unwrap_or_default();
    let extension = spec
        .extension_ref
        .as_ref()
        .filter(|ext| !ext.name.is_empty())
        .map(|ext| ExtensionRef {
            name: ext.name.clone(),
            port: Some(
                ext.port_number
                    .and_then(|p| u16::try_from(p).ok())
                    .unwrap_or(DEFAULT_EXTENSION_PORT),
            ),
        });

    BackendObjectIr {
        source,
        port: target_port,
        data: BackendData::InferencePool(InferencePoolIr {
            selector: spec.selector.clone(),
            target_port,
            extension,
        }),
        policy,
        origins,
        errors,
    }
}
