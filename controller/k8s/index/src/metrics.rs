use crate::Pipeline;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented(Pipeline);

pub fn register(reg: &mut Registry, pipeline: Pipeline) {
    reg.register_collector(Box::new(Instrumented(pipeline)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let sizes = self.0.collection_sizes();

        let mut size_encoder = encoder.encode_descriptor(
            "collection_size",
            "The number of items held by each collection",
            None,
            MetricType::Gauge,
        )?;
        for (name, len) in &sizes {
            let labels = vec![("collection", *name)];
            let size = ConstGauge::new(*len as u32);
            let family_encoder = size_encoder.encode_family(&labels)?;
            size.encode(family_encoder)?;
        }

        let unsynced_encoder = encoder.encode_descriptor(
            "unsynced_inputs",
            "The number of input collections that have not completed their initial list",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(self.0.inputs.unsynced() as u32).encode(unsynced_encoder)?;

        Ok(())
    }
}
