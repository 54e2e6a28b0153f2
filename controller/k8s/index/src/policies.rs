//! Translates policy resources to IR and indexes them by target.

use crate::{creation_timestamp, inputs::Inputs};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use trellis_controller_collections::{Collection, HandlerContext, Index};
use trellis_controller_core::{
    ir::{
        BackendPolicyIr, HeaderModifierIr, ListenerPolicyIr, ListenerSettings, LoadBalancer,
        LocalRateLimitIr, PolicyAtt, PolicyIr, PolicyKind, PolicyTargetRef, PolicyWrapper,
        RetryIr, TlsMode, TrafficPolicyIr, UpstreamTls,
    },
    ObjectSource, TRELLIS_API_GROUP,
};
use trellis_controller_k8s_api::{
    duration::parse_duration,
    policy::{HeaderModifierSpec, HttpHeader, ListenerSettingsSpec},
    BackendConfigPolicy, ListenerPolicy, LocalPolicyTargetReference, TrafficPolicy,
};

#[derive(Clone, Debug)]
pub struct Policies {
    pub all: Collection<PolicyWrapper>,
    pub by_target: Index<PolicyWrapper>,
}

impl Policies {
    pub fn new(inputs: &Inputs) -> Self {
        let traffic = inputs
            .traffic_policies
            .derive_one("trafficpolicies-ir", |_, policy| Some(traffic_policy(policy)));
        let backend_config = inputs
            .backend_config_policies
            .derive_one("backendconfigpolicies-ir", |_, policy| {
                Some(backend_config_policy(policy))
            });
        let listener = inputs
            .listener_policies
            .derive_one("listenerpolicies-ir", |_, policy| Some(listener_policy(policy)));

        let all = Collection::join("policies", &[traffic, backend_config, listener]);
        let by_target = all.index("policies-by-target", PolicyWrapper::target_keys);
        Self { all, by_target }
    }

    /// Returns every attachment to `target`, recording a dependency on the
    /// target's index entry so the caller is recomputed when an attached
    /// policy changes.
    pub fn attachments(
        &self,
        ctx: &mut HandlerContext<'_>,
        target: &ObjectSource,
    ) -> Vec<PolicyAtt> {
        let key = PolicyWrapper::target_key(
            &target.group,
            &target.kind,
            &target.namespace,
            &target.name,
        );
        ctx.fetch_indexed(&self.by_target, &key)
            .iter()
            .flat_map(|policy| policy.attachments_to(target))
            .collect()
    }
}

fn wrap<K>(
    resource: &K,
    kind: PolicyKind,
    target_refs: &[LocalPolicyTargetReference],
    weight: Option<i32>,
    policy: PolicyIr,
    errors: Vec<String>,
) -> PolicyWrapper
where
    K: kube::Resource<DynamicType = ()>,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_unchecked();
    let source = ObjectSource::new(TRELLIS_API_GROUP, kind.kind_name(), namespace, name);

    let target_refs = target_refs
        .iter()
        .filter_map(|target| {
            if !kind.allows_target(&target.group, &target.kind) {
                tracing::warn!(
                    policy = %source,
                    group = %target.group,
                    kind = %target.kind,
                    name = %target.name,
                    "Skipping unsupported policy target",
                );
                return None;
            }
            Some(PolicyTargetRef {
                group: target.group.clone(),
                kind: target.kind.clone(),
                name: target.name.clone(),
                section_name: target.section_name.clone(),
            })
        })
        .collect();

    PolicyWrapper {
        generation: resource.meta().generation,
        creation_timestamp: creation_timestamp(resource.meta()),
        weight: weight.unwrap_or_default(),
        source,
        target_refs,
        policy,
        errors,
    }
}

/// Parses an optional duration field, recording a message on failure.
fn duration_field(
    field: &str,
    value: Option<&String>,
    errors: &mut Vec<String>,
) -> Option<std::time::Duration> {
    let value = value?;
    match parse_duration(value) {
        Ok(d) => Some(d),
        Err(error) => {
            errors.push(format!("invalid {field} {value:?}: {error}"));
            None
        }
    }
}

pub(crate) fn traffic_policy(policy: &TrafficPolicy) -> PolicyWrapper {
    let spec = &policy.spec;
    let mut errors = Vec::new();

    let timeout = duration_field("timeout", spec.timeout.as_ref(), &mut errors);
    let retry = spec.retry.as_ref().map(|retry| RetryIr {
        attempts: retry.attempts,
        per_try_timeout: duration_field(
            "retry.perTryTimeout",
            retry.per_try_timeout.as_ref(),
            &mut errors,
        ),
        retry_on: retry.retry_on.clone(),
    });
    let request_headers = spec.request_header_modifier.as_ref().map(header_modifier);
    let rate_limit = spec.rate_limit.as_ref().and_then(|rl| {
        let fill_interval = duration_field(
            "rateLimit.fillInterval",
            Some(&rl.fill_interval),
            &mut errors,
        )?;
        if rl.max_tokens == 0 {
            errors.push("rateLimit.maxTokens must be greater than zero".to_string());
            return None;
        }
        Some(LocalRateLimitIr {
            max_tokens: rl.max_tokens,
            tokens_per_fill: rl.tokens_per_fill.unwrap_or(1),
            fill_interval,
        })
    });

    let ir = TrafficPolicyIr {
        timeout,
        retry,
        request_headers,
        rate_limit,
    };
    wrap(
        policy,
        PolicyKind::Traffic,
        &spec.target_refs,
        spec.weight,
        PolicyIr::Traffic(ir),
        errors,
    )
}

fn header_modifier(spec: &HeaderModifierSpec) -> HeaderModifierIr {
    let pairs = |headers: &Option<Vec<HttpHeader>>| {
        headers
            .iter()
            .flatten()
            .map(|h| (h.name.to_ascii_lowercase(), h.value.clone()))
            .collect::<BTreeMap<_, _>>()
    };
    HeaderModifierIr {
        set: pairs(&spec.set),
        add: pairs(&spec.add),
        remove: spec
            .remove
            .iter()
            .flatten()
            .map(|name| name.to_ascii_lowercase())
            .collect::<BTreeSet<_>>(),
    }
}

pub(crate) fn backend_config_policy(policy: &BackendConfigPolicy) -> PolicyWrapper {
    let spec = &policy.spec;
    let mut errors = Vec::new();

    let connect_timeout =
        duration_field("connectTimeout", spec.connect_timeout.as_ref(), &mut errors);
    let load_balancer = spec
        .load_balancer
        .as_deref()
        .and_then(|lb| match lb {
            "RoundRobin" => Some(LoadBalancer::RoundRobin),
            "LeastRequest" => Some(LoadBalancer::LeastRequest),
            "Random" => Some(LoadBalancer::Random),
            lb => {
                errors.push(format!("unknown loadBalancer {lb:?}"));
                None
            }
        });
    let tls = spec.tls.as_ref().map(|tls| UpstreamTls {
        sni: tls.sni.clone(),
        mode: tls.mode.as_deref().and_then(|mode| match mode {
            "Simple" => Some(TlsMode::Simple),
            "Mutual" => Some(TlsMode::Mutual),
            mode => {
                errors.push(format!("unknown tls.mode {mode:?}"));
                None
            }
        }),
    });

    let ir = BackendPolicyIr {
        connect_timeout,
        load_balancer,
        tls,
        per_connection_buffer_limit: spec.per_connection_buffer_limit_bytes,
    };
    wrap(
        policy,
        PolicyKind::BackendConfig,
        &spec.target_refs,
        spec.weight,
        PolicyIr::BackendConfig(ir),
        errors,
    )
}

pub(crate) fn listener_policy(policy: &ListenerPolicy) -> PolicyWrapper {
    let spec = &policy.spec;
    let mut errors = Vec::new();

    let default = spec
        .default
        .as_ref()
        .map(|s| listener_settings("default", s, &mut errors))
        .unwrap_or_default();
    let mut per_port = BTreeMap::new();
    for port in spec.per_port.iter().flatten() {
        let field = format!("perPort[{}]", port.port);
        let settings = listener_settings(&field, &port.settings, &mut errors);
        if per_port.insert(port.port, settings).is_some() {
            errors.push(format!("port {} is configured more than once", port.port));
        }
    }

    let ir = ListenerPolicyIr { default, per_port };
    wrap(
        policy,
        PolicyKind::Listener,
        &spec.target_refs,
        spec.weight,
        PolicyIr::Listener(ir),
        errors,
    )
}

fn listener_settings(
    field: &str,
    spec: &ListenerSettingsSpec,
    errors: &mut Vec<String>,
) -> ListenerSettings {
    ListenerSettings {
        per_connection_buffer_limit: spec.per_connection_buffer_limit_bytes,
        idle_timeout: duration_field(
            &format!("{field}.idleTimeout"),
            spec.idle_timeout.as_ref(),
            errors,
        ),
        proxy_protocol: spec.proxy_protocol,
    }
}

/// The attachments that apply to `section` of their target.
pub(crate) fn for_section(atts: &[PolicyAtt], section: Option<&str>) -> Vec<PolicyAtt> {
    atts.iter()
        .filter(|att| att.applies_to_section(section))
        .cloned()
        .collect()
}
