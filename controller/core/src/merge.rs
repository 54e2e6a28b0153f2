//! Precedence-ordered policy merging with per-field provenance.
//!
//! Attachments are sorted by weight (highest first), then section-scoped
//! before whole-object, then by creation time (oldest first), then by
//! namespace and name. They are folded into an accumulator in that order;
//! fields set by an earlier policy are kept unless the merge options allow
//! overriding them. Every field that changes records which policy set it.

use crate::{
    ir::{
        BackendPolicyIr, HeaderModifierIr, ListenerPolicyIr, ListenerSettings, PolicyAtt,
        PolicyIr, RetryIr, TrafficPolicyIr, UpstreamTls,
    },
    ObjectSource,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

/// Annotation on a target object selecting how inherited policies merge.
pub const INHERITED_POLICY_PRIORITY_ANNOTATION: &str = "trellis.dev/inherited-policy-priority";

/// Controls how a child's policies combine with those inherited from its
/// parent (for example, route policies beneath gateway policies).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Parent fields win; the whole field is replaced.
    #[default]
    ShallowMergePreferParent,
    /// Child fields win; the whole field is replaced.
    ShallowMergePreferChild,
    /// Parent values win; nested objects are merged field by field.
    DeepMergePreferParent,
    /// Child values win; nested objects are merged field by field.
    DeepMergePreferChild,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown merge strategy: {0:?}")]
pub struct InvalidMergeStrategy(String);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Recurse into nested objects rather than replacing them wholesale.
    pub deep: bool,
    /// Allow incoming values to replace values that are already set.
    pub override_existing: bool,
}

/// Identifies the policy that contributed a merged field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachedPolicyRef {
    pub source: ObjectSource,
    pub weight: i32,
    pub section: Option<String>,
}

/// Records, for each merged field path, the policy that set it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOrigins(BTreeMap<String, AttachedPolicyRef>);

/// Merge state threaded through [`Merge::merge_from`].
pub struct MergeCtx<'a> {
    origin: Origin<'a>,
    options: MergeOptions,
    origins: &'a mut MergeOrigins,
    prefix: String,
}

#[derive(Copy, Clone)]
enum Origin<'a> {
    Policy(&'a AttachedPolicyRef),
    Inherited(&'a MergeOrigins),
}

pub trait Merge: Clone + PartialEq {
    fn merge_from(&mut self, incoming: &Self, ctx: &mut MergeCtx<'_>);
}

/// Orders attachments from highest to lowest precedence.
pub fn sort_attachments(attachments: &mut [PolicyAtt]) {
    attachments.sort_by(|a, b| {
        b.policy
            .weight
            .cmp(&a.policy.weight)
            .then_with(|| b.section.is_some().cmp(&a.section.is_some()))
            .then_with(|| {
                a.policy
                    .creation_timestamp
                    .cmp(&b.policy.creation_timestamp)
            })
            .then_with(|| a.policy.source.namespace.cmp(&b.policy.source.namespace))
            .then_with(|| a.policy.source.name.cmp(&b.policy.source.name))
    });
}

/// Merges the payloads selected from `attachments` in precedence order.
/// Attachments of other kinds, and policies with errors, are ignored.
pub fn merge_attachments<P, F>(
    attachments: &[PolicyAtt],
    strategy: MergeStrategy,
    select: F,
) -> (P, MergeOrigins)
where
    P: Merge + Default,
    F: Fn(&PolicyIr) -> Option<&P>,
{
    let mut attachments = attachments.to_vec();
    sort_attachments(&mut attachments);

    let options = MergeOptions::attachments(strategy);
    let mut merged = P::default();
    let mut origins = MergeOrigins::default();
    for att in &attachments {
        if !att.policy.errors.is_empty() {
            continue;
        }
        let Some(policy) = select(&att.policy.policy) else {
            continue;
        };
        let origin = att.origin();
        let mut ctx = MergeCtx::new(Origin::Policy(&origin), options, &mut origins);
        merged.merge_from(policy, &mut ctx);
    }
    (merged, origins)
}

/// Merges a child's merged policy beneath its parent's.
pub fn inherit<P: Merge>(
    child: &P,
    child_origins: &MergeOrigins,
    parent: &P,
    parent_origins: &MergeOrigins,
    strategy: MergeStrategy,
) -> (P, MergeOrigins) {
    let mut merged = parent.clone();
    let mut origins = parent_origins.clone();
    let mut ctx = MergeCtx::new(
        Origin::Inherited(child_origins),
        MergeOptions::inheritance(strategy),
        &mut origins,
    );
    merged.merge_from(child, &mut ctx);
    (merged, origins)
}

// === impl MergeStrategy ===

impl FromStr for MergeStrategy {
    type Err = InvalidMergeStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ShallowMergePreferParent" => Ok(Self::ShallowMergePreferParent),
            "ShallowMergePreferChild" => Ok(Self::ShallowMergePreferChild),
            "DeepMergePreferParent" => Ok(Self::DeepMergePreferParent),
            "DeepMergePreferChild" => Ok(Self::DeepMergePreferChild),
            s => Err(InvalidMergeStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ShallowMergePreferParent => "ShallowMergePreferParent",
            Self::ShallowMergePreferChild => "ShallowMergePreferChild",
            Self::DeepMergePreferParent => "DeepMergePreferParent",
            Self::DeepMergePreferChild => "DeepMergePreferChild",
        };
        f.write_str(s)
    }
}

impl MergeStrategy {
    /// Reads the strategy from a target's annotations. Malformed values are
    /// logged and the default is used.
    pub fn from_annotations(target: &ObjectSource, annotations: &BTreeMap<String, String>) -> Self {
        match annotations.get(INHERITED_POLICY_PRIORITY_ANNOTATION) {
            None => Self::default(),
            Some(value) => value.parse().unwrap_or_else(|error| {
                tracing::warn!(%target, %error, "Ignoring invalid merge strategy annotation");
                Self::default()
            }),
        }
    }

    pub fn is_deep(&self) -> bool {
        matches!(
            self,
            Self::DeepMergePreferParent | Self::DeepMergePreferChild
        )
    }

    pub fn prefers_child(&self) -> bool {
        matches!(
            self,
            Self::ShallowMergePreferChild | Self::DeepMergePreferChild
        )
    }
}

// === impl MergeOptions ===

impl MergeOptions {
    /// Options for folding same-level attachments: earlier (higher
    /// precedence) values are never overridden.
    pub fn attachments(strategy: MergeStrategy) -> Self {
        Self {
            deep: strategy.is_deep(),
            override_existing: false,
        }
    }

    /// Options for merging a child's policy into its parent's.
    pub fn inheritance(strategy: MergeStrategy) -> Self {
        Self {
            deep: strategy.is_deep(),
            override_existing: strategy.prefers_child(),
        }
    }
}

// === impl MergeOrigins ===

impl MergeOrigins {
    /// Returns the policy that set `field`, or the nearest enclosing field.
    pub fn get(&self, field: &str) -> Option<&AttachedPolicyRef> {
        let mut path = field;
        loop {
            if let Some(origin) = self.0.get(path) {
                return Some(origin);
            }
            path = &path[..path.rfind('.')?];
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttachedPolicyRef)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every policy that contributed at least one field.
    pub fn sources(&self) -> BTreeSet<&ObjectSource> {
        self.0.values().map(|o| &o.source).collect()
    }

    fn clear_under(&mut self, path: &str) {
        self.0.retain(|k, _| !is_under(k, path));
    }
}

fn is_under(field: &str, path: &str) -> bool {
    field == path
        || (field.len() > path.len()
            && field.starts_with(path)
            && field.as_bytes()[path.len()] == b'.')
}

// === impl MergeCtx ===

impl<'a> MergeCtx<'a> {
    fn new(origin: Origin<'a>, options: MergeOptions, origins: &'a mut MergeOrigins) -> Self {
        Self {
            origin,
            options,
            origins,
            prefix: String::new(),
        }
    }

    pub fn options(&self) -> MergeOptions {
        self.options
    }

    fn path(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.prefix)
        }
    }

    fn child(&mut self, name: &str) -> MergeCtx<'_> {
        MergeCtx {
            origin: self.origin,
            options: self.options,
            prefix: self.path(name),
            origins: &mut *self.origins,
        }
    }

    fn record(&mut self, path: String) {
        self.origins.clear_under(&path);
        match self.origin {
            Origin::Policy(origin) => {
                self.origins.0.insert(path, origin.clone());
            }
            Origin::Inherited(source) => {
                let nested = source
                    .0
                    .iter()
                    .filter(|(k, _)| is_under(k, &path))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>();
                if nested.is_empty() {
                    if let Some(origin) = source.get(&path) {
                        self.origins.0.insert(path, origin.clone());
                    }
                } else {
                    self.origins.0.extend(nested);
                }
            }
        }
    }

    /// Merges a scalar field.
    pub fn field<T: Clone + PartialEq>(
        &mut self,
        name: &str,
        acc: &mut Option<T>,
        incoming: &Option<T>,
    ) {
        let Some(value) = incoming else {
            return;
        };
        let replace = match acc.as_ref() {
            None => true,
            Some(current) => self.options.override_existing && current != value,
        };
        if replace {
            *acc = Some(value.clone());
            let path = self.path(name);
            self.record(path);
        }
    }

    /// Merges a nested object, recursing when deep merging is enabled.
    pub fn nested<T: Merge>(&mut self, name: &str, acc: &mut Option<T>, incoming: &Option<T>) {
        let Some(value) = incoming else {
            return;
        };
        if let Some(current) = acc.as_mut() {
            if self.options.deep {
                let mut ctx = self.child(name);
                current.merge_from(value, &mut ctx);
            } else if self.options.override_existing && current != value {
                *current = value.clone();
                let path = self.path(name);
                self.record(path);
            }
            return;
        }
        *acc = Some(value.clone());
        let path = self.path(name);
        self.record(path);
    }

    /// Merges a map of scalars key by key.
    pub fn map<K, V>(&mut self, name: &str, acc: &mut BTreeMap<K, V>, incoming: &BTreeMap<K, V>)
    where
        K: Ord + Clone + fmt::Display,
        V: Clone + PartialEq,
    {
        for (key, value) in incoming {
            let replace = match acc.get(key) {
                None => true,
                Some(current) => self.options.override_existing && current != value,
            };
            if replace {
                acc.insert(key.clone(), value.clone());
                let path = format!("{}.{key}", self.path(name));
                self.record(path);
            }
        }
    }

    /// Merges a map of objects key by key; keys present on both sides are
    /// merged recursively.
    pub fn nested_map<K, V>(
        &mut self,
        name: &str,
        acc: &mut BTreeMap<K, V>,
        incoming: &BTreeMap<K, V>,
    ) where
        K: Ord + Clone + fmt::Display,
        V: Merge,
    {
        for (key, value) in incoming {
            let field = format!("{name}.{key}");
            match acc.get_mut(key) {
                Some(current) => {
                    let mut ctx = self.child(&field);
                    current.merge_from(value, &mut ctx);
                }
                None => {
                    acc.insert(key.clone(), value.clone());
                    let path = self.path(&field);
                    self.record(path);
                }
            }
        }
    }

    /// Merges a set by union.
    pub fn union<T: Ord + Clone>(
        &mut self,
        name: &str,
        acc: &mut BTreeSet<T>,
        incoming: &BTreeSet<T>,
    ) {
        if incoming.is_subset(acc) {
            return;
        }
        acc.extend(incoming.iter().cloned());
        let path = self.path(name);
        self.record(path);
    }
}

// === impl Merge ===

impl Merge for TrafficPolicyIr {
    fn merge_from(&mut self, incoming: &Self, ctx: &mut MergeCtx<'_>) {
        ctx.field("timeout", &mut self.timeout, &incoming.timeout);
        ctx.nested("retry", &mut self.retry, &incoming.retry);
        ctx.nested(
            "requestHeaders",
            &mut self.request_headers,
            &incoming.request_headers,
        );
        ctx.field("rateLimit", &mut self.rate_limit, &incoming.rate_limit);
    }
}

impl Merge for RetryIr {
    fn merge_from(&mut self, incoming: &Self, ctx: &mut MergeCtx<'_>) {
        ctx.field("attempts", &mut self.attempts, &incoming.attempts);
        ctx.field(
            "perTryTimeout",
            &mut self.per_try_timeout,
            &incoming.per_try_timeout,
        );
        ctx.field("retryOn", &mut self.retry_on, &incoming.retry_on);
    }
}

impl Merge for HeaderModifierIr {
    fn merge_from(&mut self, incoming: &Self, ctx: &mut MergeCtx<'_>) {
        ctx.map("set", &mut self.set, &incoming.set);
        ctx.map("add", &mut self.add, &incoming.add);
        ctx.union("remove", &mut self.remove, &incoming.remove);
    }
}

impl Merge for BackendPolicyIr {
    fn merge_from(&mut self, incoming: &Self, ctx: &mut MergeCtx<'_>) {
        ctx.field(
            "connectTimeout",
            &mut self.connect_timeout,
            &incoming.connect_timeout,
        );
        ctx.field(
            "loadBalancer",
            &mut self.load_balancer,
            &incoming.load_balancer,
        );
        ctx.nested("tls", &mut self.tls, &incoming.tls);
        ctx.field(
            "perConnectionBufferLimit",
            &mut self.per_connection_buffer_limit,
            &incoming.per_connection_buffer_limit,
        );
    }
}

impl Merge for UpstreamTls {
    fn merge_from(&mut self, incoming: &Self, ctx: &mut MergeCtx<'_>) {
        ctx.field("sni", &mut self.sni, &incoming.sni);
        ctx.field("mode", &mut self.mode, &incoming.mode);
    }
}

impl Merge for ListenerSettings {
    fn merge_from(&mut self, incoming: &Self, ctx: &mut MergeCtx<'_>) {
        ctx.field(
            "perConnectionBufferLimit",
            &mut self.per_connection_buffer_limit,
            &incoming.per_connection_buffer_limit,
        );
        ctx.field("idleTimeout", &mut self.idle_timeout, &incoming.idle_timeout);
        ctx.field(
            "proxyProtocol",
            &mut self.proxy_protocol,
            &incoming.proxy_protocol,
        );
    }
}

impl Merge for ListenerPolicyIr {
    fn merge_from(&mut self, incoming: &Self, ctx: &mut MergeCtx<'_>) {
        {
            let mut defaults = ctx.child("default");
            self.default.merge_from(&incoming.default, &mut defaults);
        }
        ctx.nested_map("perPort", &mut self.per_port, &incoming.per_port);
    }
}
