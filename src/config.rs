use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub instance_id: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub pipeline_max_concurrency: usize,
    pub pipeline_queue_capacity: usize,
    pub processing_at_ms: u64,
    pub rendering_at_ms: u64,
    pub done_at_ms: u64,
    pub job_timeout_ms: u64,
    pub stage_max_retries: u32,
    pub stage_retry_base_ms: u64,
    pub dlq_path: PathBuf,
    pub dlq_max_bytes: u64,
    pub dlq_max_rotations: u32,
    pub nats_url: Option<String>,
    pub events_subject: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup. Unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = var("HOST", "0.0.0.0");
        if host.trim().is_empty() {
            return Err("HOST cannot be empty".to_string());
        }
        let port = parse_in_range::<u16>(&var("PORT", "4000"), "PORT", 0, u16::MAX)?;
        let bind_addr = format!("{}:{}", host, port);

        let instance_id = lookup("INSTANCE_ID")
            .unwrap_or_else(|| format!("studio-{}", uuid::Uuid::new_v4()));
        if instance_id.trim().is_empty() {
            return Err("INSTANCE_ID cannot be empty".to_string());
        }

        let upload_dir = var("UPLOAD_DIR", "uploads");
        if upload_dir.trim().is_empty() {
            return Err("UPLOAD_DIR cannot be empty".to_string());
        }

        let max_upload_bytes = parse_in_range::<u64>(
            &var("MAX_UPLOAD_BYTES", &(200_u64 * 1024 * 1024).to_string()),
            "MAX_UPLOAD_BYTES",
            1,
            10 * 1024 * 1024 * 1024,
        )?;

        let pipeline_max_concurrency =
            parse_in_range::<usize>(&var("PIPELINE_MAX_CONCURRENCY", "8"), "PIPELINE_MAX_CONCURRENCY", 1, 256)?;
        let pipeline_queue_capacity =
            parse_in_range::<usize>(&var("PIPELINE_QUEUE_CAPACITY", "1024"), "PIPELINE_QUEUE_CAPACITY", 1, 100_000)?;

        let processing_at_ms =
            parse_in_range::<u64>(&var("PIPELINE_PROCESSING_AT_MS", "2000"), "PIPELINE_PROCESSING_AT_MS", 0, 3_600_000)?;
        let rendering_at_ms =
            parse_in_range::<u64>(&var("PIPELINE_RENDERING_AT_MS", "6000"), "PIPELINE_RENDERING_AT_MS", 0, 3_600_000)?;
        let done_at_ms =
            parse_in_range::<u64>(&var("PIPELINE_DONE_AT_MS", "12000"), "PIPELINE_DONE_AT_MS", 0, 3_600_000)?;
        if !(processing_at_ms <= rendering_at_ms && rendering_at_ms <= done_at_ms) {
            return Err(
                "PIPELINE_PROCESSING_AT_MS <= PIPELINE_RENDERING_AT_MS <= PIPELINE_DONE_AT_MS must hold".to_string(),
            );
        }

        let job_timeout_ms = parse_in_range::<u64>(&var("JOB_TIMEOUT_MS", "60000"), "JOB_TIMEOUT_MS", 100, 3_600_000)?;
        if job_timeout_ms <= done_at_ms {
            return Err("JOB_TIMEOUT_MS must be greater than PIPELINE_DONE_AT_MS".to_string());
        }

        let stage_max_retries = parse_in_range::<u32>(&var("STAGE_MAX_RETRIES", "3"), "STAGE_MAX_RETRIES", 0, 20)?;
        let stage_retry_base_ms =
            parse_in_range::<u64>(&var("STAGE_RETRY_BASE_MS", "500"), "STAGE_RETRY_BASE_MS", 1, 60_000)?;

        let dlq_path = var("DLQ_PATH", "/tmp/studio-deadletter.jsonl");
        if dlq_path.trim().is_empty() {
            return Err("DLQ_PATH cannot be empty".to_string());
        }
        let dlq_max_bytes = parse_in_range::<u64>(
            &var("DLQ_MAX_BYTES", &(100_u64 * 1024 * 1024).to_string()),
            "DLQ_MAX_BYTES",
            1_000_000,
            10_000_000_000,
        )?;
        let dlq_max_rotations = parse_in_range::<u32>(&var("DLQ_MAX_ROTATIONS", "5"), "DLQ_MAX_ROTATIONS", 1, 100)?;

        let nats_url = lookup("NATS_URL").filter(|u| !u.trim().is_empty());
        let events_subject = var("PROJECT_EVENTS_SUBJECT", "studio.project.status.v1");
        if !is_valid_subject(&events_subject) {
            return Err("PROJECT_EVENTS_SUBJECT invalid format".to_string());
        }

        Ok(Config {
            bind_addr,
            instance_id,
            upload_dir: PathBuf::from(upload_dir),
            max_upload_bytes,
            pipeline_max_concurrency,
            pipeline_queue_capacity,
            processing_at_ms,
            rendering_at_ms,
            done_at_ms,
            job_timeout_ms,
            stage_max_retries,
            stage_retry_base_ms,
            dlq_path: PathBuf::from(dlq_path),
            dlq_max_bytes,
            dlq_max_rotations,
            nats_url,
            events_subject,
        })
    }
}

fn parse_in_range<T>(raw: &str, key: &str, min: T, max: T) -> Result<T, String>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|_| format!("{} must be a number", key))?;
    if value < min || value > max {
        return Err(format!("{} must be between {} and {}", key, min, max));
    }
    Ok(value)
}

fn is_valid_subject(s: &str) -> bool {
    if s.trim().is_empty() {
        return false;
    }
    let allowed = s.chars().all(|c| {
        c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
    });
    allowed && !s.contains("..") && !s.starts_with('.') && !s.ends_with('.')
}
