use crate::api::{self, AppState};
use crate::config::Config;
use crate::events::EventPublisher;
use crate::observability::{metrics::Metrics, Logger};
use crate::pipeline::{self, Pipeline};
use crate::storage::UploadStorage;
use crate::store::ProjectStore;
use axum::Router;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A running service: shared state plus the pipeline dispatcher.
pub struct Studio {
    state: AppState,
    shutdown_tx: broadcast::Sender<()>,
    pipeline_task: JoinHandle<()>,
}

impl Studio {
    pub async fn start(config: &Config, logger: Logger) -> Result<Self, BoxError> {
        let metrics = Arc::new(Metrics::new().map_err(|e| format!("metrics registry: {}", e))?);
        let storage = UploadStorage::open(&config.upload_dir).await?;
        let store = ProjectStore::new();
        let events = EventPublisher::connect(
            config.nats_url.as_deref(),
            &config.events_subject,
            logger.clone(),
            metrics.clone(),
        )
        .await;

        let pipeline = Pipeline::from_config(
            config,
            store.clone(),
            storage.clone(),
            logger.clone(),
            metrics.clone(),
            events.clone(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let (handle, pipeline_task) = pipeline::spawn(
            pipeline,
            config.pipeline_max_concurrency,
            config.pipeline_queue_capacity,
            shutdown_rx,
        );

        let state = AppState {
            store,
            storage,
            pipeline: handle,
            events,
            logger: logger.clone(),
            metrics,
            readiness: Arc::new(AtomicBool::new(false)),
            draining: Arc::new(AtomicBool::new(false)),
            max_upload_bytes: config.max_upload_bytes,
            max_concurrency: config.pipeline_max_concurrency,
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        state.readiness.store(true, Ordering::SeqCst);
        logger.info("Pipeline started", Some(&json!({
            "upload_dir": config.upload_dir.display().to_string(),
            "max_concurrency": config.pipeline_max_concurrency,
            "queue_capacity": config.pipeline_queue_capacity
        })));

        Ok(Self { state, shutdown_tx, pipeline_task })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    /// Stops taking work and waits for in-flight jobs to finish.
    pub async fn shutdown(self) {
        self.state.readiness.store(false, Ordering::SeqCst);
        self.state.draining.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.pipeline_task.await {
            self.state.logger.error("Pipeline task ended abnormally", Some(&json!({"error": e.to_string()})));
        }
    }
}
