use permission_core::{Snapshot, WritePass};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Counters for one sync process, held on their own registry.
#[derive(Clone)]
pub struct SyncMetrics {
    registry: Registry,
    writes: IntCounterVec,
    write_failures: IntCounterVec,
    malformed_records: IntCounter,
    feed_incomplete: IntCounterVec,
    registry_records: IntGauge,
}

impl SyncMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let writes = IntCounterVec::new(
            Opts::new("permission_writes_total", "Registry records written, by pass"),
            &["pass"],
        )?;
        let write_failures = IntCounterVec::new(
            Opts::new("permission_write_failures_total", "Registry writes that failed"),
            &["retryable"],
        )?;
        let malformed_records = IntCounter::new(
            "permission_malformed_records_total",
            "Registry boxes that could not be decoded",
        )?;
        let feed_incomplete = IntCounterVec::new(
            Opts::new("permission_feed_incomplete_total", "Feed reads that ended incomplete"),
            &["feed"],
        )?;
        let registry_records = IntGauge::new(
            "permission_registry_records",
            "Decodable records in the last registry snapshot",
        )?;

        registry.register(Box::new(writes.clone()))?;
        registry.register(Box::new(write_failures.clone()))?;
        registry.register(Box::new(malformed_records.clone()))?;
        registry.register(Box::new(feed_incomplete.clone()))?;
        registry.register(Box::new(registry_records.clone()))?;

        Ok(Self {
            registry,
            writes,
            write_failures,
            malformed_records,
            feed_incomplete,
            registry_records,
        })
    }

    pub fn observe_write(&self, pass: WritePass) {
        self.writes.with_label_values(&[pass.label()]).inc();
    }

    pub fn observe_write_failure(&self, retryable: bool) {
        let label = if retryable { "true" } else { "false" };
        self.write_failures.with_label_values(&[label]).inc();
    }

    pub fn observe_snapshot(&self, snapshot: &Snapshot) {
        self.malformed_records.inc_by(snapshot.malformed().len() as u64);
        self.registry_records.set(snapshot.len() as i64);
    }

    pub fn observe_incomplete(&self, feed: &str) {
        self.feed_incomplete.with_label_values(&[feed]).inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
