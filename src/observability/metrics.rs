use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    pub uploads_total: IntCounter,
    pub upload_bytes_total: IntCounter,
    pub uploads_rejected_total: IntCounter,
    pub jobs_queued: IntGauge,
    pub jobs_in_progress: IntGauge,
    pub jobs_completed: IntCounter,
    pub jobs_failed: IntCounter,
    pub jobs_timeout: IntCounter,
    pub stage_retries_total: IntCounter,
    pub dlq_written_total: IntCounter,
    pub events_published_total: IntCounter,
    pub job_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let uploads_total = IntCounter::new("uploads_total", "Uploads accepted")?;
        let upload_bytes_total = IntCounter::new("upload_bytes_total", "Bytes stored from accepted uploads")?;
        let uploads_rejected_total = IntCounter::new("uploads_rejected_total", "Uploads rejected before a project was created")?;
        let jobs_queued = IntGauge::new("jobs_queued", "Jobs waiting for a pipeline worker")?;
        let jobs_in_progress = IntGauge::new("jobs_in_progress", "Jobs currently running")?;
        let jobs_completed = IntCounter::new("jobs_completed", "Jobs that reached done")?;
        let jobs_failed = IntCounter::new("jobs_failed", "Jobs that ended in failed")?;
        let jobs_timeout = IntCounter::new("jobs_timeout", "Jobs that exceeded the job timeout")?;
        let stage_retries_total = IntCounter::new("stage_retries_total", "Stage attempts retried after a transient error")?;
        let dlq_written_total = IntCounter::new("dlq_written_total", "Dead letters written")?;
        let events_published_total = IntCounter::new("events_published_total", "Status events published")?;
        let job_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("job_duration_seconds", "Pipeline job duration in seconds")
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0]),
        )?;

        registry.register(Box::new(uploads_total.clone()))?;
        registry.register(Box::new(upload_bytes_total.clone()))?;
        registry.register(Box::new(uploads_rejected_total.clone()))?;
        registry.register(Box::new(jobs_queued.clone()))?;
        registry.register(Box::new(jobs_in_progress.clone()))?;
        registry.register(Box::new(jobs_completed.clone()))?;
        registry.register(Box::new(jobs_failed.clone()))?;
        registry.register(Box::new(jobs_timeout.clone()))?;
        registry.register(Box::new(stage_retries_total.clone()))?;
        registry.register(Box::new(dlq_written_total.clone()))?;
        registry.register(Box::new(events_published_total.clone()))?;
        registry.register(Box::new(job_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            uploads_total,
            upload_bytes_total,
            uploads_rejected_total,
            jobs_queued,
            jobs_in_progress,
            jobs_completed,
            jobs_failed,
            jobs_timeout,
            stage_retries_total,
            dlq_written_total,
            events_published_total,
            job_duration_seconds,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or(());
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_exposes_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.uploads_total.inc();
        metrics.upload_bytes_total.inc_by(42);

        let text = String::from_utf8(metrics.encode()).unwrap();
        assert!(text.contains("uploads_total 1"));
        assert!(text.contains("upload_bytes_total 42"));
    }
}
