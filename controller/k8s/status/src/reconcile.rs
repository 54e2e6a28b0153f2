//! Structural status comparison.
//!
//! Desired statuses are computed without timestamps. Before a write they are
//! reconciled with the live status: conditions whose status is unchanged
//! keep their `lastTransitionTime`, and entries owned by other controllers
//! are preserved. Comparison ignores timestamps and the order of
//! conditions, parents and listeners.

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use std::hash::Hash;
use trellis_controller_k8s_api::{
    backend::BackendStatus,
    gateway::{
        gateways::GatewayStatusListeners,
        httproutes::{HTTPRouteStatusParents, HTTPRouteStatusParentsParentRef},
    },
    inference::{InferencePoolStatus, PoolParentStatus},
    policy::{PolicyAncestorStatus, PolicyStatus},
    Condition, GatewayStatus, HttpRouteStatus, Time,
};

pub trait ReconcilableStatus: Clone + Default + PartialEq + Send + Sync + 'static {
    /// Compares statuses, ignoring condition timestamps and ordering.
    fn semantically_eq(&self, other: &Self) -> bool;

    /// Stamps transition times on `self`, carrying them over from `live`
    /// for unchanged conditions, and keeps whatever in `live` belongs to
    /// other controllers.
    fn reconcile_with(self, live: Option<&Self>, controller_name: &str, now: Time) -> Self;
}

/// Builds a condition with an unset transition time.
pub fn condition(
    type_: &str,
    status: bool,
    reason: &str,
    message: impl Into<String>,
    observed_generation: Option<i64>,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.into(),
        observed_generation,
        last_transition_time: Time(DateTime::<Utc>::UNIX_EPOCH),
    }
}

/// Compares condition sets by type, status, reason, message and observed
/// generation.
pub fn conditions_eq(a: &[Condition], b: &[Condition]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.iter().map(condition_key).collect::<Vec<_>>();
    let mut b = b.iter().map(condition_key).collect::<Vec<_>>();
    a.sort();
    b.sort();
    a == b
}

fn condition_key(c: &Condition) -> (&str, &str, &str, &str, Option<i64>) {
    (&c.type_, &c.status, &c.reason, &c.message, c.observed_generation)
}

/// Sets each condition's transition time: the live time when a live
/// condition of the same type has the same status, otherwise `now`.
pub fn stamp_conditions(desired: &mut [Condition], live: &[Condition], now: &Time) {
    for c in desired {
        c.last_transition_time = live
            .iter()
            .find(|l| l.type_ == c.type_ && l.status == c.status)
            .map(|l| l.last_transition_time.clone())
            .unwrap_or_else(|| now.clone());
    }
}

/// Compares two lists as sets keyed by `key`, comparing matched entries with
/// `eq`. Duplicate keys make the lists unequal.
fn keyed_eq<T, K>(a: &[T], b: &[T], key: impl Fn(&T) -> K, eq: impl Fn(&T, &T) -> bool) -> bool
where
    K: Hash + Eq,
{
    if a.len() != b.len() {
        return false;
    }
    let by_key = a.iter().map(|t| (key(t), t)).collect::<HashMap<_, _>>();
    if by_key.len() != a.len() {
        return false;
    }
    b.iter()
        .all(|t| by_key.get(&key(t)).is_some_and(|other| eq(other, t)))
}

// === impl GatewayStatus ===

/// Gateway statuses leave unset lists as `None`; they compare equal to empty
/// ones.
impl ReconcilableStatus for GatewayStatus {
    fn semantically_eq(&self, other: &Self) -> bool {
        conditions_eq(
            self.conditions.as_deref().unwrap_or_default(),
            other.conditions.as_deref().unwrap_or_default(),
        ) && keyed_eq(
            self.listeners.as_deref().unwrap_or_default(),
            other.listeners.as_deref().unwrap_or_default(),
            |l| l.name.clone(),
            listener_eq,
        )
    }

    fn reconcile_with(mut self, live: Option<&Self>, _: &str, now: Time) -> Self {
        let empty = Self::default();
        let live = live.unwrap_or(&empty);
        if let Some(conditions) = self.conditions.as_mut() {
            stamp_conditions(conditions, live.conditions.as_deref().unwrap_or_default(), &now);
        }
        let live_listeners = live.listeners.as_deref().unwrap_or_default();
        for listener in self.listeners.iter_mut().flatten() {
            let live = live_listeners
                .iter()
                .find(|l| l.name == listener.name)
                .map(|l| &l.conditions[..])
                .unwrap_or_default();
            stamp_conditions(&mut listener.conditions, live, &now);
        }
        self
    }
}

fn listener_eq(a: &GatewayStatusListeners, b: &GatewayStatusListeners) -> bool {
    a.attached_routes == b.attached_routes
        && a.supported_kinds == b.supported_kinds
        && conditions_eq(&a.conditions, &b.conditions)
}

// === impl HttpRouteStatus ===

impl ReconcilableStatus for HttpRouteStatus {
    fn semantically_eq(&self, other: &Self) -> bool {
        keyed_eq(
            &self.parents,
            &other.parents,
            |p| (route_parent_key(&p.parent_ref), p.controller_name.clone()),
            |a, b| conditions_eq(a.conditions.as_deref().unwrap_or_default(), b.conditions.as_deref().unwrap_or_default()),
        )
    }

    fn reconcile_with(mut self, live: Option<&Self>, controller_name: &str, now: Time) -> Self {
        let empty = Self::default();
        let live = live.unwrap_or(&empty);
        for parent in &mut self.parents {
            let live = live
                .parents
                .iter()
                .find(|l| same_route_parent(l, parent))
                .map(|l| l.conditions.as_deref().unwrap_or_default())
                .unwrap_or_default();
            stamp_conditions(parent.conditions.as_deref_mut().unwrap_or_default(), live, &now);
        }
        self.parents.extend(
            live.parents
                .iter()
                .filter(|p| p.controller_name != controller_name)
                .cloned(),
        );
        self
    }
}

fn same_route_parent(a: &HTTPRouteStatusParents, b: &HTTPRouteStatusParents) -> bool {
    a.parent_ref == b.parent_ref && a.controller_name == b.controller_name
}

type RouteParentKey = (
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<i32>,
);

fn route_parent_key(r: &HTTPRouteStatusParentsParentRef) -> RouteParentKey {
    (
        r.group.clone(),
        r.kind.clone(),
        r.namespace.clone(),
        r.name.clone(),
        r.section_name.clone(),
        r.port,
    )
}

// === impl PolicyStatus ===

impl ReconcilableStatus for PolicyStatus {
    fn semantically_eq(&self, other: &Self) -> bool {
        keyed_eq(
            &self.ancestors,
            &other.ancestors,
            |a| (a.ancestor_ref.clone(), a.controller_name.clone()),
            |a, b| conditions_eq(&a.conditions, &b.conditions),
        )
    }

    fn reconcile_with(mut self, live: Option<&Self>, controller_name: &str, now: Time) -> Self {
        let empty = Self::default();
        let live = live.unwrap_or(&empty);
        for ancestor in &mut self.ancestors {
            let live = live
                .ancestors
                .iter()
                .find(|l| same_ancestor(l, ancestor))
                .map(|l| &l.conditions[..])
                .unwrap_or_default();
            stamp_conditions(&mut ancestor.conditions, live, &now);
        }
        self.ancestors.extend(
            live.ancestors
                .iter()
                .filter(|a| a.controller_name != controller_name)
                .cloned(),
        );
        self
    }
}

fn same_ancestor(a: &PolicyAncestorStatus, b: &PolicyAncestorStatus) -> bool {
    a.ancestor_ref == b.ancestor_ref && a.controller_name == b.controller_name
}

// === impl BackendStatus ===

impl ReconcilableStatus for BackendStatus {
    fn semantically_eq(&self, other: &Self) -> bool {
        conditions_eq(&self.conditions, &other.conditions)
    }

    fn reconcile_with(mut self, live: Option<&Self>, _: &str, now: Time) -> Self {
        let live = live.map(|l| &l.conditions[..]).unwrap_or_default();
        stamp_conditions(&mut self.conditions, live, &now);
        self
    }
}

// === impl InferencePoolStatus ===

impl ReconcilableStatus for InferencePoolStatus {
    /// Pools are equal when they list the same parents, by identity, each
    /// with the same set of conditions.
    fn semantically_eq(&self, other: &Self) -> bool {
        pool_parents_eq(&self.parent, &other.parent)
    }

    fn reconcile_with(mut self, live: Option<&Self>, _: &str, now: Time) -> Self {
        let empty = Self::default();
        let live = live.unwrap_or(&empty);
        for parent in &mut self.parent {
            let live = live
                .parent
                .iter()
                .find(|l| l.parent_ref == parent.parent_ref)
                .map(|l| &l.conditions[..])
                .unwrap_or_default();
            stamp_conditions(&mut parent.conditions, live, &now);
        }
        self
    }
}

pub fn pool_parents_eq(a: &[PoolParentStatus], b: &[PoolParentStatus]) -> bool {
    keyed_eq(
        a,
        b,
        |p| p.parent_ref.clone(),
        |a, b| conditions_eq(&a.conditions, &b.conditions),
    )
}
