use kube::ResourceExt;
use trellis_controller_collections::{Collection, HandlerContext, Index};
use trellis_controller_core::ObjectSource;
use trellis_controller_k8s_api::ReferenceGrant;

/// Answers whether a cross-namespace reference is permitted by a
/// ReferenceGrant in the target's namespace.
#[derive(Clone, Debug)]
pub struct ReferenceGrants {
    by_namespace: Index<ReferenceGrant>,
}

/// The object holding a reference.
#[derive(Copy, Clone, Debug)]
pub struct ReferenceFrom<'a> {
    pub group: &'a str,
    pub kind: &'a str,
    pub namespace: &'a str,
}

impl ReferenceGrants {
    pub fn new(grants: &Collection<ReferenceGrant>) -> Self {
        let by_namespace = grants.index("referencegrants-by-namespace", |grant| {
            grant.namespace().into_iter().collect()
        });
        Self { by_namespace }
    }

    /// Same-namespace references are always allowed. Otherwise a grant in the
    /// target namespace must name both sides. The lookup is recorded as a
    /// dependency of the calling transform.
    pub fn allowed(
        &self,
        ctx: &mut HandlerContext<'_>,
        from: ReferenceFrom<'_>,
        to: &ObjectSource,
    ) -> bool {
        if from.namespace == to.namespace {
            return true;
        }
        ctx.fetch_indexed(&self.by_namespace, &to.namespace)
            .iter()
            .any(|grant| {
                let from_ok = grant.spec.from.iter().any(|f| {
                    f.group == from.group && f.kind == from.kind && f.namespace == from.namespace
                });
                let to_ok = grant.spec.to.iter().any(|t| {
                    t.group == to.group
                        && t.kind == to.kind
                        && t.name.as_ref().map_or(true, |name| *name == to.name)
                });
                from_ok && to_ok
            })
    }
}
