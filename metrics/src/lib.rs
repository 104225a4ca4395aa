use std::time::{Duration, Instant};

use anyhow::Result;
use opentelemetry::{
    metrics::{Counter, Histogram},
    KeyValue,
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::metrics::SdkMeterProvider;

/// Installs an OTLP meter provider as the global provider. Without it every
/// instrument below records into the no-op global meter.
pub fn init_provider(endpoint: Option<&str>) -> Result<SdkMeterProvider> {
    let mut exporter = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = endpoint {
        exporter = exporter.with_endpoint(endpoint.to_string());
    }
    let exporter = exporter.build()?;
    let provider = SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .build();
    opentelemetry::global::set_meter_provider(provider.clone());
    Ok(provider)
}

pub trait TimerUpdate {
    fn add(&self, duration: Duration, labels: &[KeyValue]);
}

impl TimerUpdate for Counter<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.add(duration.as_secs_f64(), labels);
    }
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.record(duration.as_secs_f64(), labels);
    }
}

/// Records the time between `start` and drop into `metric`.
pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
    labels: Vec<KeyValue>,
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    pub fn start(metric: &'a T) -> Self {
        Self::start_with_labels(metric, Vec::new())
    }

    pub fn start_with_labels(metric: &'a T, labels: Vec<KeyValue>) -> Self {
        Self {
            start: Instant::now(),
            metric,
            labels,
        }
    }
}

impl<T: TimerUpdate + Sync> Drop for Timer<'_, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed(), &self.labels);
    }
}

pub mod api_io_stats {
    use opentelemetry::metrics::{Counter, Histogram};

    #[derive(Debug)]
    pub struct Metrics {
        pub uploads: Counter<u64>,
        pub upload_bytes: Counter<u64>,
        pub upload_failures: Counter<u64>,
        pub downloads: Counter<u64>,
        pub download_misses: Counter<u64>,
        pub candidate_failures: Counter<u64>,
        pub candidate_latency: Histogram<f64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("sos-api-server");
            let uploads = meter
                .u64_counter("sos.api.uploads")
                .with_description("number of objects accepted by a blob-server")
                .build();
            let upload_bytes = meter
                .u64_counter("sos.api.upload_bytes")
                .with_description("number of bytes accepted by blob-servers")
                .build();
            let upload_failures = meter
                .u64_counter("sos.api.upload_failures")
                .with_description("uploads rejected by every blob-server")
                .build();
            let downloads = meter
                .u64_counter("sos.api.downloads")
                .with_description("number of objects served")
                .build();
            let download_misses = meter
                .u64_counter("sos.api.download_misses")
                .with_description("lookups no blob-server could answer")
                .build();
            let candidate_failures = meter
                .u64_counter("sos.api.candidate_failures")
                .with_description("blob-server attempts that failed and moved to the next candidate")
                .build();
            let candidate_latency = meter
                .f64_histogram("sos.api.candidate_latency")
                .with_description("latency of a single blob-server attempt in seconds")
                .build();
            Metrics {
                uploads,
                upload_bytes,
                upload_failures,
                downloads,
                download_misses,
                candidate_failures,
                candidate_latency,
            }
        }
    }
}

pub mod replication_stats {
    use opentelemetry::metrics::{Counter, Histogram};

    #[derive(Debug)]
    pub struct Metrics {
        pub objects_copied: Counter<u64>,
        pub copy_failures: Counter<u64>,
        pub listing_failures: Counter<u64>,
        pub pass_latency: Histogram<f64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("sos-replicator");
            let objects_copied = meter
                .u64_counter("sos.replication.objects_copied")
                .with_description("objects mirrored between group members")
                .build();
            let copy_failures = meter
                .u64_counter("sos.replication.copy_failures")
                .with_description("objects that could not be mirrored")
                .build();
            let listing_failures = meter
                .u64_counter("sos.replication.listing_failures")
                .with_description("group members skipped because their listing failed")
                .build();
            let pass_latency = meter
                .f64_histogram("sos.replication.pass_latency")
                .with_description("replication pass latencies in seconds")
                .build();
            Metrics {
                objects_copied,
                copy_failures,
                listing_failures,
                pass_latency,
            }
        }
    }
}
