use crate::{reconcile::condition, DesiredStatus};
use kube::ResourceExt;
use trellis_controller_collections::Collection;
use trellis_controller_core::{
    conditions::{self, errors_message, reasons},
    ObjectSource,
};
use trellis_controller_k8s_api::backend::BackendStatus;
use trellis_controller_k8s_index::Pipeline;

pub fn backend_statuses(pipeline: &Pipeline) -> Collection<DesiredStatus<BackendStatus>> {
    let backends = pipeline.backends.clone();
    pipeline
        .inputs
        .backends
        .derive_one("backend-statuses", move |ctx, backend| {
            let source = ObjectSource::backend(
                backend.namespace().unwrap_or_default(),
                backend.name_unchecked(),
            );
            let errors = backends
                .lookup(ctx, &source)
                .iter()
                .flat_map(|b| b.errors.iter().cloned())
                .collect::<Vec<_>>();
            let status = backend_status(&errors, backend.metadata.generation);
            Some(DesiredStatus::new(&source, status))
        })
}

pub fn backend_status(errors: &[String], generation: Option<i64>) -> BackendStatus {
    let accepted = match errors_message("Backend", errors) {
        None => condition(
            conditions::ACCEPTED,
            true,
            reasons::ACCEPTED,
            "",
            generation,
        ),
        Some(message) => condition(
            conditions::ACCEPTED,
            false,
            reasons::INVALID,
            message,
            generation,
        ),
    };
    BackendStatus {
        conditions: vec![
            accepted,
            condition(
                conditions::RESOLVED_REFS,
                true,
                reasons::RESOLVED_REFS,
                "",
                generation,
            ),
        ],
    }
}
