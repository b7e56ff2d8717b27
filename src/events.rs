use crate::observability::{metrics::Metrics, Logger};
use crate::protocol::{DeadLetter, EventEnvelopeV1, Project, StatusEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

const CONNECT_MAX_ATTEMPTS: u32 = 5;
const LOCAL_FEED_CAPACITY: usize = 256;

/// Publishes project status changes to NATS and to in-process subscribers.
/// NATS publishing is a no-op when no server is configured.
#[derive(Clone)]
pub struct EventPublisher {
    client: Option<async_nats::Client>,
    subject: String,
    local: broadcast::Sender<EventEnvelopeV1>,
    logger: Logger,
    metrics: Arc<Metrics>,
}

impl EventPublisher {
    fn new(client: Option<async_nats::Client>, subject: String, logger: Logger, metrics: Arc<Metrics>) -> Self {
        let (local, _) = broadcast::channel(LOCAL_FEED_CAPACITY);
        Self { client, subject, local, logger, metrics }
    }

    pub fn disabled(logger: Logger, metrics: Arc<Metrics>) -> Self {
        Self::new(None, String::new(), logger, metrics)
    }

    /// Connects with exponential backoff. Gives up after a bounded number of attempts and
    /// carries on with events disabled.
    pub async fn connect(url: Option<&str>, subject: &str, logger: Logger, metrics: Arc<Metrics>) -> Self {
        let Some(url) = url else {
            logger.info("Status events disabled, NATS_URL not set", None);
            return Self::disabled(logger, metrics);
        };

        let mut attempt: u32 = 0;
        loop {
            match async_nats::connect(url).await {
                Ok(client) => {
                    logger.info("Connected to NATS", Some(&json!({"subject": subject})));
                    return Self::new(Some(client), subject.to_string(), logger, metrics);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= CONNECT_MAX_ATTEMPTS {
                        logger.error("NATS unreachable, status events disabled", Some(&json!({
                            "error": e.to_string(),
                            "attempts": attempt
                        })));
                        return Self::disabled(logger, metrics);
                    }
                    let backoff_ms = std::cmp::min(30_000, (500_u64).saturating_mul(2_u64.saturating_pow(attempt - 1)));
                    logger.warn("Failed to connect to NATS, will retry", Some(&json!({
                        "error": e.to_string(),
                        "attempt": attempt,
                        "backoff_ms": backoff_ms
                    })));
                    sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// In-process feed of every envelope, in publish order. Slow receivers lag and skip.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelopeV1> {
        self.local.subscribe()
    }

    pub async fn project_changed(&self, project: &Project) {
        let env = EventEnvelopeV1::wrap_status(&StatusEvent::from(project));
        self.publish(&env).await;
    }

    pub async fn dead_letter(&self, letter: &DeadLetter) {
        let env = EventEnvelopeV1::wrap_dead_letter(letter);
        self.publish(&env).await;
    }

    async fn publish(&self, env: &EventEnvelopeV1) {
        // No receivers is fine
        let _ = self.local.send(env.clone());
        let Some(client) = &self.client else {
            return;
        };
        let payload = match serde_json::to_vec(env) {
            Ok(p) => p,
            Err(e) => {
                self.logger.error("Failed to serialize event", Some(&json!({"error": e.to_string()})));
                return;
            }
        };
        match client.publish(self.subject.clone(), payload.into()).await {
            Ok(_) => self.metrics.events_published_total.inc(),
            Err(e) => {
                self.logger.warn("Failed to publish status event", Some(&json!({
                    "error": e.to_string(),
                    "subject": self.subject
                })));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProjectStatus;
    use std::path::PathBuf;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_no_url_means_disabled() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let publisher = EventPublisher::connect(
            None,
            "studio.project.status.v1",
            Logger::new("studio-test".to_string()),
            metrics.clone(),
        )
        .await;
        assert!(!publisher.is_enabled());

        let project = Project::new(Uuid::new_v4(), "a.mov".to_string(), PathBuf::from("a"));
        publisher.project_changed(&project).await;
        assert_eq!(metrics.events_published_total.get(), 0);
    }

    #[tokio::test]
    async fn test_local_feed_preserves_order() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let publisher = EventPublisher::disabled(Logger::new("studio-test".to_string()), metrics);
        let mut feed = publisher.subscribe();

        let mut project = Project::new(Uuid::new_v4(), "a.mov".to_string(), PathBuf::from("a"));
        publisher.project_changed(&project).await;
        project.status = ProjectStatus::Processing;
        publisher.project_changed(&project).await;

        assert_eq!(feed.recv().await.unwrap().data["status"], "uploaded");
        assert_eq!(feed.recv().await.unwrap().data["status"], "processing");
    }
}
