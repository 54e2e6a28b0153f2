use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Counts the outcome of every status write attempt, by resource kind.
#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    succeeded: Family<KindLabels, Counter>,
    failed: Family<KindLabels, Counter>,
    conflicted: Family<KindLabels, Counter>,
    skipped: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

impl ControllerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let succeeded = Family::<KindLabels, Counter>::default();
        reg.register(
            "patch_succeeded",
            "Count of successful status writes",
            succeeded.clone(),
        );

        let failed = Family::<KindLabels, Counter>::default();
        reg.register(
            "patch_failed",
            "Count of status writes that failed after exhausting retries",
            failed.clone(),
        );

        let conflicted = Family::<KindLabels, Counter>::default();
        reg.register(
            "patch_conflicted",
            "Count of status writes abandoned because the resource was modified concurrently",
            conflicted.clone(),
        );

        let skipped = Family::<KindLabels, Counter>::default();
        reg.register(
            "patch_skipped",
            "Count of status writes skipped because the live status was already current",
            skipped.clone(),
        );

        Self {
            succeeded,
            failed,
            conflicted,
            skipped,
        }
    }

    pub(crate) fn succeeded(&self, kind: &'static str) {
        self.succeeded.get_or_create(&KindLabels { kind }).inc();
    }

    pub(crate) fn failed(&self, kind: &'static str) {
        self.failed.get_or_create(&KindLabels { kind }).inc();
    }

    pub(crate) fn conflicted(&self, kind: &'static str) {
        self.conflicted.get_or_create(&KindLabels { kind }).inc();
    }

    pub(crate) fn skipped(&self, kind: &'static str) {
        self.skipped.get_or_create(&KindLabels { kind }).inc();
    }

    /// The succeeded, failed, conflicted and skipped counts for a kind.
    #[cfg(test)]
    pub(crate) fn counts(&self, kind: &'static str) -> [u64; 4] {
        let labels = KindLabels { kind };
        [
            self.succeeded.get_or_create(&labels).get(),
            self.failed.get_or_create(&labels).get(),
            self.conflicted.get_or_create(&labels).get(),
            self.skipped.get_or_create(&labels).get(),
        ]
    }
}
